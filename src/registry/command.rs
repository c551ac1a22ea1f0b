//! Shell command steps
//!
//! Suite files express fixtures and bodies as shell commands. A step runs
//! through `sh -c` in the suite file's directory and checks its exit code
//! and output against the declared expectation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

use crate::error::{SourceLocation, TestError};
use crate::executor::Context;
use crate::models::{ScopeLevel, TestFn};

/// Exit status a command uses to ask for a skip
pub const SKIP_EXIT_CODE: i32 = 77;

/// Store key holding variables captured by earlier steps
pub const ENV_KEY: &str = "env";

type EnvMap = BTreeMap<String, String>;

/// What a command must produce to succeed
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Expectation {
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_contains: Option<String>,
}

/// Declared command
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub run: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: EnvMap,
    #[serde(default)]
    pub expect: Expectation,
    /// Export trimmed stdout under this variable to later steps of the scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,
}

impl CommandSpec {
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            ..Default::default()
        }
    }
}

/// Either `run: "cmd"` shorthand or the full form
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CommandDef {
    Short(String),
    Full(CommandSpec),
}

impl From<CommandDef> for CommandSpec {
    fn from(def: CommandDef) -> Self {
        match def {
            CommandDef::Short(run) => CommandSpec::new(run),
            CommandDef::Full(spec) => spec,
        }
    }
}

/// A command bound to its working directory and scope
#[derive(Clone, Debug)]
pub struct CommandStep {
    pub spec: CommandSpec,
    pub workdir: PathBuf,
    /// Scope whose store receives captured variables
    pub level: ScopeLevel,
    pub origin: SourceLocation,
}

impl CommandStep {
    pub fn new(spec: CommandSpec, workdir: impl Into<PathBuf>, level: ScopeLevel, origin: SourceLocation) -> Self {
        Self {
            spec,
            workdir: workdir.into(),
            level,
            origin,
        }
    }

    /// Layer variables in from `env`, without overriding the step's own
    pub fn inherit_env(mut self, env: &EnvMap) -> Self {
        for (key, value) in env {
            self.spec
                .env
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    fn assertion(&self, message: String) -> TestError {
        TestError::Assertion {
            message,
            location: Some(self.origin.clone()),
        }
    }

    fn unhandled(&self, message: String) -> TestError {
        TestError::Unhandled {
            message,
            location: Some(self.origin.clone()),
        }
    }

    pub fn run(&self, ctx: &mut Context<'_>) -> Result<(), TestError> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.spec.run)
            .current_dir(&self.workdir)
            .envs(&self.spec.env);
        for store in ctx.stores() {
            if let Some(captured) = store.get::<EnvMap>(ENV_KEY) {
                command.envs(captured);
            }
        }

        debug!("{}: sh -c {:?}", ctx.scope(), self.spec.run);
        let output = command
            .output()
            .map_err(|e| self.unhandled(format!("failed to spawn `{}`: {e}", self.spec.run)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let Some(code) = output.status.code() else {
            return Err(self.unhandled(format!(
                "`{}` was terminated by a signal",
                self.spec.run
            )));
        };

        let expect = &self.spec.expect;
        if code == SKIP_EXIT_CODE && expect.exit_code != SKIP_EXIT_CODE {
            let reason = stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or("command requested skip");
            return Err(TestError::skip(reason));
        }
        if code != expect.exit_code {
            let mut message = format!(
                "`{}` exited with {code}, expected {}",
                self.spec.run, expect.exit_code
            );
            let stderr = stderr.trim();
            if !stderr.is_empty() {
                message.push_str("\nstderr:\n");
                message.push_str(stderr);
            }
            return Err(self.assertion(message));
        }
        if let Some(needle) = &expect.stdout_contains {
            if !stdout.contains(needle.as_str()) {
                return Err(self.assertion(format!(
                    "stdout of `{}` does not contain {needle:?}\nstdout:\n{}",
                    self.spec.run,
                    stdout.trim()
                )));
            }
        }
        if let Some(needle) = &expect.stderr_contains {
            if !stderr.contains(needle.as_str()) {
                return Err(self.assertion(format!(
                    "stderr of `{}` does not contain {needle:?}\nstderr:\n{}",
                    self.spec.run,
                    stderr.trim()
                )));
            }
        }

        if let Some(var) = &self.spec.capture {
            let store = match self.level {
                ScopeLevel::Module => ctx.module(),
                ScopeLevel::Class => ctx.class(),
                ScopeLevel::Instance => ctx.instance(),
            };
            let mut captured = store.remove::<EnvMap>(ENV_KEY).unwrap_or_default();
            captured.insert(var.clone(), stdout.trim().to_string());
            store.insert(ENV_KEY, captured);
        }
        Ok(())
    }

    pub fn into_fn(self) -> TestFn {
        Arc::new(move |ctx| self.run(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScopeStores;
    use std::path::Path;

    fn step(spec: CommandSpec, dir: &Path, level: ScopeLevel) -> CommandStep {
        CommandStep::new(spec, dir, level, SourceLocation::file_only(Path::new("test_x.yaml")))
    }

    fn run(step: &CommandStep, stores: &mut ScopeStores) -> Result<(), TestError> {
        let mut ctx = Context::new("m::C::test", stores);
        step.run(&mut ctx)
    }

    #[test]
    fn test_exit_code_checked() {
        let dir = tempfile::tempdir().unwrap();
        let mut stores = ScopeStores::default();

        assert!(run(&step(CommandSpec::new("true"), dir.path(), ScopeLevel::Instance), &mut stores).is_ok());

        let err = run(&step(CommandSpec::new("exit 3"), dir.path(), ScopeLevel::Instance), &mut stores)
            .unwrap_err();
        assert!(err.is_assertion());
        assert!(err.message().contains("exited with 3, expected 0"));
        assert_eq!(err.location().unwrap().file, "test_x.yaml");
    }

    #[test]
    fn test_skip_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut stores = ScopeStores::default();
        let err = run(
            &step(CommandSpec::new("echo no docker; exit 77"), dir.path(), ScopeLevel::Instance),
            &mut stores,
        )
        .unwrap_err();
        assert_eq!(err, TestError::skip("no docker"));
    }

    #[test]
    fn test_output_expectations() {
        let dir = tempfile::tempdir().unwrap();
        let mut stores = ScopeStores::default();
        let mut spec = CommandSpec::new("echo hello; echo oops >&2");
        spec.expect.stdout_contains = Some("hello".into());
        spec.expect.stderr_contains = Some("oops".into());
        assert!(run(&step(spec.clone(), dir.path(), ScopeLevel::Instance), &mut stores).is_ok());

        spec.expect.stdout_contains = Some("goodbye".into());
        let err = run(&step(spec, dir.path(), ScopeLevel::Instance), &mut stores).unwrap_err();
        assert!(err.message().contains("does not contain \"goodbye\""));
    }

    #[test]
    fn test_runs_in_workdir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let mut stores = ScopeStores::default();
        let mut spec = CommandSpec::new("test -f marker.txt && test \"$GREETING\" = hi");
        spec.env.insert("GREETING".into(), "hi".into());
        assert!(run(&step(spec, dir.path(), ScopeLevel::Instance), &mut stores).is_ok());
    }

    #[test]
    fn test_capture_flows_to_later_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut stores = ScopeStores::default();
        let mut producer = CommandSpec::new("echo '  token-123  '");
        producer.capture = Some("TOKEN".into());
        run(&step(producer, dir.path(), ScopeLevel::Class), &mut stores).unwrap();

        assert_eq!(
            stores.class.get::<EnvMap>(ENV_KEY).unwrap().get("TOKEN").map(String::as_str),
            Some("token-123")
        );
        let consumer = CommandSpec::new("test \"$TOKEN\" = token-123");
        assert!(run(&step(consumer, dir.path(), ScopeLevel::Instance), &mut stores).is_ok());
    }

    #[test]
    fn test_short_form_deserializes() {
        let def: CommandDef = serde_yaml::from_str("\"make check\"").unwrap();
        assert_eq!(CommandSpec::from(def).run, "make check");
        let def: CommandDef = serde_yaml::from_str("run: ls\nexpect:\n  exit_code: 2\n").unwrap();
        assert_eq!(CommandSpec::from(def).expect.exit_code, 2);
    }
}
