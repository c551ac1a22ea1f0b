//! YAML suite files
//!
//! One file declares one module. Fixtures and unit bodies are shell
//! commands, see [`CommandStep`].
//!
//! ```yaml
//! name: math
//! env: { LANG: C }
//! setup: ./start-db.sh
//! containers:
//!   - name: Arith
//!     setup_class: { run: "mktemp -d", capture: WORKDIR }
//!     tests:
//!       - name: test_add
//!         run: "expr 1 + 1"
//!         expect: { stdout_contains: "2" }
//!         tags: [fast]
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DiscoveryError, SourceLocation};
use crate::models::{
    Annotated, AttrValue, Condition, Decoration, Fixtures, Metadata, ScopeLevel, TestContainer,
    TestModule, TestUnit,
};
use crate::registry::command::{CommandDef, CommandSpec, CommandStep, Expectation};
use crate::registry::ModuleSource;

type EnvMap = BTreeMap<String, String>;

/// Tags, attributes and decorations shared by all three levels
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Marks {
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    attrs: BTreeMap<String, AttrValue>,
    skip: Option<String>,
    skip_if_env: Option<String>,
    skip_unless_env: Option<String>,
    #[serde(default)]
    expected_failure: bool,
}

impl Marks {
    fn into_metadata(self) -> Result<Metadata, String> {
        let decorations = [
            self.skip.is_some(),
            self.skip_if_env.is_some(),
            self.skip_unless_env.is_some(),
            self.expected_failure,
        ];
        if decorations.iter().filter(|d| **d).count() > 1 {
            return Err(
                "only one of skip, skip_if_env, skip_unless_env, expected_failure may be set"
                    .to_string(),
            );
        }

        let decoration = if let Some(reason) = self.skip {
            Decoration::Skip { reason }
        } else if let Some(var) = self.skip_if_env {
            let condition = Condition::env_set(&var);
            Decoration::ConditionalSkip {
                reason: condition.label().to_string(),
                condition,
            }
        } else if let Some(var) = self.skip_unless_env {
            let condition = Condition::env_unset(&var);
            Decoration::ConditionalSkip {
                reason: condition.label().to_string(),
                condition,
            }
        } else if self.expected_failure {
            Decoration::ExpectedFailure
        } else {
            Decoration::None
        };

        Ok(Metadata {
            tags: self.tags,
            attrs: self.attrs,
            decoration,
        })
    }
}

// serde cannot combine `flatten` with `deny_unknown_fields`, so each level
// lists the mark fields and moves them into a `Marks`.
macro_rules! marks_of {
    ($spec:expr) => {
        Marks {
            tags: $spec.tags,
            attrs: $spec.attrs,
            skip: $spec.skip,
            skip_if_env: $spec.skip_if_env,
            skip_unless_env: $spec.skip_unless_env,
            expected_failure: $spec.expected_failure,
        }
    };
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitSpec {
    name: String,
    run: String,
    #[serde(default)]
    env: EnvMap,
    #[serde(default)]
    expect: Expectation,
    capture: Option<String>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    attrs: BTreeMap<String, AttrValue>,
    skip: Option<String>,
    skip_if_env: Option<String>,
    skip_unless_env: Option<String>,
    #[serde(default)]
    expected_failure: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContainerSpec {
    name: String,
    #[serde(default)]
    env: EnvMap,
    setup_class: Option<CommandDef>,
    teardown_class: Option<CommandDef>,
    setup: Option<CommandDef>,
    teardown: Option<CommandDef>,
    #[serde(default)]
    tests: Vec<UnitSpec>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    attrs: BTreeMap<String, AttrValue>,
    skip: Option<String>,
    skip_if_env: Option<String>,
    skip_unless_env: Option<String>,
    #[serde(default)]
    expected_failure: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleSpec {
    name: Option<String>,
    #[serde(default)]
    env: EnvMap,
    setup: Option<CommandDef>,
    teardown: Option<CommandDef>,
    #[serde(default)]
    containers: Vec<ContainerSpec>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    attrs: BTreeMap<String, AttrValue>,
    skip: Option<String>,
    skip_if_env: Option<String>,
    skip_unless_env: Option<String>,
    #[serde(default)]
    expected_failure: bool,
}

/// Builds fixtures and bodies for one file
struct Builder<'a> {
    workdir: PathBuf,
    origin: SourceLocation,
    module: &'a str,
}

impl Builder<'_> {
    fn step(&self, spec: CommandSpec, level: ScopeLevel, env: &EnvMap) -> CommandStep {
        CommandStep::new(spec, &self.workdir, level, self.origin.clone()).inherit_env(env)
    }

    fn fixtures(
        &self,
        setup: Option<CommandDef>,
        teardown: Option<CommandDef>,
        level: ScopeLevel,
        env: &EnvMap,
    ) -> Fixtures {
        Fixtures {
            setup: setup.map(|def| self.step(def.into(), level, env).into_fn()),
            teardown: teardown.map(|def| self.step(def.into(), level, env).into_fn()),
        }
    }

    fn container(&self, spec: ContainerSpec, module_env: &EnvMap) -> Result<TestContainer, String> {
        let mut env = module_env.clone();
        env.extend(spec.env.clone());

        let mut container = TestContainer::new(&spec.name);
        container.class_fixtures =
            self.fixtures(spec.setup_class, spec.teardown_class, ScopeLevel::Class, &env);
        container.instance_fixtures =
            self.fixtures(spec.setup, spec.teardown, ScopeLevel::Instance, &env);
        *container.metadata_mut() = marks_of!(spec)
            .into_metadata()
            .map_err(|e| format!("container '{}': {e}", spec.name))?;

        for unit in spec.tests {
            let name = unit.name.clone();
            let command = CommandSpec {
                run: unit.run,
                env: unit.env,
                expect: unit.expect,
                capture: unit.capture,
            };
            let body = self.step(command, ScopeLevel::Instance, &env).into_fn();
            let mut test = TestUnit::from_fn(&name, body, Some(self.origin.clone()));
            *test.metadata_mut() = marks_of!(unit)
                .into_metadata()
                .map_err(|e| format!("test '{}::{}::{name}': {e}", self.module, spec.name))?;
            container = container.unit(test);
        }
        Ok(container)
    }
}

/// A suite file on disk
#[derive(Clone, Debug)]
pub struct SuiteFile {
    pub path: PathBuf,
}

impl SuiteFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn error(&self, cause: impl Into<String>) -> DiscoveryError {
        DiscoveryError::new(self.stem(), cause).with_path(&self.path)
    }

    /// Parse file contents into a module
    pub fn parse(&self, contents: &str) -> Result<TestModule, DiscoveryError> {
        let spec: ModuleSpec =
            serde_yaml::from_str(contents).map_err(|e| self.error(e.to_string()))?;
        let name = spec.name.clone().unwrap_or_else(|| self.stem());

        let workdir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        let builder = Builder {
            workdir,
            origin: SourceLocation::file_only(&self.path),
            module: &name,
        };

        let mut module = TestModule::new(&name).with_path(&self.path);
        module.fixtures = builder.fixtures(spec.setup, spec.teardown, ScopeLevel::Module, &spec.env);
        *module.metadata_mut() = marks_of!(spec)
            .into_metadata()
            .map_err(|e| DiscoveryError::new(&name, e).with_path(&self.path))?;

        for container in spec.containers {
            let container = builder
                .container(container, &spec.env)
                .map_err(|e| DiscoveryError::new(&name, e).with_path(&self.path))?;
            module = module.container(container);
        }
        Ok(module)
    }
}

impl ModuleSource for SuiteFile {
    fn name(&self) -> String {
        self.stem()
    }

    fn load(&self) -> Result<TestModule, DiscoveryError> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| self.error(format!("cannot read {}: {e}", self.path.display())))?;
        self.parse(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: math
tags: [unit]
attrs: { owner: core }
containers:
  - name: Arith
    tests:
      - name: test_add
        run: "expr 1 + 1"
        expect: { stdout_contains: "2" }
        tags: [fast]
      - name: test_known_bug
        run: "exit 1"
        expected_failure: true
      - name: test_needs_env
        run: "true"
        skip_unless_env: UNITRUN_SAMPLE_NEVER_SET
  - name: Slow
    skip: "too slow for CI"
    attrs: { priority: 3 }
    tests:
      - name: test_big
        run: "true"
"#;

    #[test]
    fn test_parse_builds_tree() {
        let module = SuiteFile::new("suites/test_math.yaml").parse(SAMPLE).unwrap();
        assert_eq!(module.name, "math");
        assert_eq!(module.containers.len(), 2);
        assert!(module.meta.tags.contains("unit"));
        assert_eq!(module.meta.attrs["owner"], AttrValue::from("core"));

        let arith = &module.containers[0];
        assert_eq!(arith.units.len(), 3);
        assert!(arith.units[0].meta.tags.contains("fast"));
        assert!(arith.units[1].meta.decoration.is_expected_failure());
        assert_eq!(
            arith.units[2].meta.decoration.skip_reason().as_deref(),
            Some("$UNITRUN_SAMPLE_NEVER_SET is unset")
        );
        assert_eq!(
            arith.units[0].defined_at.as_ref().unwrap().file,
            "suites/test_math.yaml"
        );

        let slow = &module.containers[1];
        assert_eq!(slow.meta.decoration.skip_reason().as_deref(), Some("too slow for CI"));
        assert_eq!(slow.meta.attrs["priority"], AttrValue::Int(3));
    }

    #[test]
    fn test_name_defaults_to_stem() {
        let module = SuiteFile::new("dir/test_io.yml")
            .parse("containers: []\n")
            .unwrap();
        assert_eq!(module.name, "test_io");
        assert_eq!(module.path.as_deref(), Some(Path::new("dir/test_io.yml")));
    }

    #[test]
    fn test_schema_error_is_discovery_error() {
        let err = SuiteFile::new("test_bad.yaml")
            .parse("containers:\n  - name: A\n    tests:\n      - name: test_x\n        rn: ls\n")
            .unwrap_err();
        assert_eq!(err.module, "test_bad");
        assert_eq!(err.path.as_deref(), Some(Path::new("test_bad.yaml")));
        assert!(err.cause.contains("rn"));
    }

    #[test]
    fn test_conflicting_marks_rejected() {
        let err = SuiteFile::new("test_conflict.yaml")
            .parse("skip: later\nexpected_failure: true\n")
            .unwrap_err();
        assert!(err.cause.contains("only one of"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SuiteFile::new("/nonexistent/test_gone.yaml").load().unwrap_err();
        assert_eq!(err.module, "test_gone");
        assert!(err.cause.starts_with("cannot read"));
    }
}
