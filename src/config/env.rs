//! Environment variable configuration
//!
//! `UNITRUN_*` variables override the config file and profile, and are in
//! turn overridden by command-line flags.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "UNITRUN";

/// Configuration read from environment variables
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// Selector expression from UNITRUN_SELECT
    pub select: Option<String>,
    /// Worker count from UNITRUN_PARALLEL
    pub parallel: Option<usize>,
    /// Run timeout in seconds from UNITRUN_TIMEOUT
    pub timeout: Option<f64>,
    /// Output format from UNITRUN_FORMAT
    pub format: Option<String>,
    /// Verbose from UNITRUN_VERBOSE
    pub verbose: Option<bool>,
    /// Config file from UNITRUN_CONFIG
    pub config_file: Option<String>,
    /// Profile from UNITRUN_PROFILE
    pub profile: Option<String>,
    /// Fail-fast from UNITRUN_FAIL_FAST
    pub fail_fast: Option<bool>,
    /// Cancelled runs exit non-zero, from UNITRUN_FAIL_ON_CANCEL
    pub fail_on_cancel: Option<bool>,
    /// Set when NO_COLOR is present
    pub no_color: bool,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            select: get_env("SELECT"),
            parallel: get_env_parse("PARALLEL"),
            timeout: get_env_parse("TIMEOUT"),
            format: get_env("FORMAT"),
            verbose: get_env_bool("VERBOSE"),
            config_file: get_env("CONFIG"),
            profile: get_env("PROFILE"),
            fail_fast: get_env_bool("FAIL_FAST"),
            fail_on_cancel: get_env_bool("FAIL_ON_CANCEL"),
            no_color: env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.select.is_some()
            || self.parallel.is_some()
            || self.timeout.is_some()
            || self.format.is_some()
            || self.verbose.is_some()
            || self.config_file.is_some()
            || self.profile.is_some()
            || self.fail_fast.is_some()
            || self.fail_on_cancel.is_some()
            || self.no_color
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_SELECT:     {:?}", self.select);
        println!("  {ENV_PREFIX}_PARALLEL:   {:?}", self.parallel);
        println!("  {ENV_PREFIX}_TIMEOUT:    {:?}", self.timeout);
        println!("  {ENV_PREFIX}_FORMAT:     {:?}", self.format);
        println!("  {ENV_PREFIX}_VERBOSE:    {:?}", self.verbose);
        println!("  {ENV_PREFIX}_CONFIG:     {:?}", self.config_file);
        println!("  {ENV_PREFIX}_PROFILE:    {:?}", self.profile);
        println!("  {ENV_PREFIX}_FAIL_FAST:  {:?}", self.fail_fast);
        println!("  {ENV_PREFIX}_FAIL_ON_CANCEL: {:?}", self.fail_on_cancel);
        println!("  NO_COLOR:           {}", self.no_color);
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
pub struct EnvBuilder {
    vars: Vec<(String, Option<String>)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_{name}"), Some(value.into())));
        self
    }

    pub fn select(self, expr: impl Into<String>) -> Self {
        self.var("SELECT", expr)
    }

    pub fn parallel(self, workers: usize) -> Self {
        self.var("PARALLEL", workers.to_string())
    }

    pub fn timeout(self, secs: f64) -> Self {
        self.var("TIMEOUT", secs.to_string())
    }

    pub fn format(self, format: impl Into<String>) -> Self {
        self.var("FORMAT", format)
    }

    pub fn profile(self, profile: impl Into<String>) -> Self {
        self.var("PROFILE", profile)
    }

    pub fn fail_fast(self, fail_fast: bool) -> Self {
        self.var("FAIL_FAST", fail_fast.to_string())
    }

    pub fn fail_on_cancel(self, fail: bool) -> Self {
        self.var("FAIL_ON_CANCEL", fail.to_string())
    }

    pub fn no_color(mut self, set: bool) -> Self {
        self.vars
            .push(("NO_COLOR".to_string(), set.then(|| "1".to_string())));
        self
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all UNITRUN environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_SELECT      Selector expression (e.g. 'not slow')");
    println!("  {ENV_PREFIX}_PARALLEL    Number of module workers");
    println!("  {ENV_PREFIX}_TIMEOUT     Run timeout in seconds");
    println!("  {ENV_PREFIX}_FORMAT      Console format (text, summary)");
    println!("  {ENV_PREFIX}_VERBOSE     One line per test (true/false)");
    println!("  {ENV_PREFIX}_CONFIG      Path to configuration file");
    println!("  {ENV_PREFIX}_PROFILE     Selection profile name");
    println!("  {ENV_PREFIX}_FAIL_FAST   Stop after the first failure (true/false)");
    println!("  {ENV_PREFIX}_FAIL_ON_CANCEL  Exit 1 when the run was cancelled (true/false)");
    println!("  NO_COLOR            Disable colored output");
    println!("  RUST_LOG            Log filter, overrides --log-level");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_SELECT='not slow'");
    println!("  unitrun run tests/");
}
