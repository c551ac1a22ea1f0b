//! Configuration module
//!
//! Settings are layered: defaults, then the config file, then the selected
//! profile, then `UNITRUN_*` variables, then command-line flags.

pub mod env;
pub mod file;
pub mod profile;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::SelectorError;
use crate::executor::RunOptions;
use crate::models::{RunReport, UnexpectedSuccessPolicy};
use crate::output::{OutputFormat, Symbols};
use crate::registry::NamingConvention;
use crate::selector::Selector;

pub use env::{EnvBuilder, EnvConfig, EnvGuard};
pub use file::ConfigFile;
pub use profile::{ProfileManager, SelectionProfile};

/// Run timeout from a positive, finite number of seconds
pub(crate) fn run_timeout(secs: f64) -> Result<Duration> {
    if secs.is_nan() || secs <= 0.0 {
        bail!("Timeout must be a positive number of seconds, got {secs}");
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("Timeout of {secs} seconds is out of range"))
}

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where to look for suite files when no path is given
    pub test_path: PathBuf,

    /// Unit and file naming rules
    pub naming: NamingConvention,

    /// Module workers; 1 runs sequentially
    pub workers: usize,

    /// Whole-run timeout in seconds
    pub timeout_secs: Option<f64>,

    /// Stop after the first failing unit
    pub fail_fast: bool,

    /// Exit non-zero when the run was cancelled, even if nothing failed
    pub fail_on_cancel: bool,

    /// Whether an unexpected success fails the run
    pub unexpected_success: UnexpectedSuccessPolicy,

    /// Console format
    pub format: OutputFormat,

    /// One line per unit instead of progress symbols
    pub verbose: bool,

    /// Colored console output
    pub color: bool,

    /// Progress symbols
    pub symbols: Symbols,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            test_path: PathBuf::from("tests"),
            naming: NamingConvention::default(),
            workers: 1,
            timeout_secs: None,
            fail_fast: false,
            fail_on_cancel: false,
            unexpected_success: UnexpectedSuccessPolicy::Failure,
            format: OutputFormat::Text,
            verbose: false,
            color: true,
            symbols: Symbols::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if is_yaml(path.as_ref()) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if is_yaml(path.as_ref()) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

/// Values given on the command line; `None` means not given
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub path: Option<PathBuf>,
    pub select: Option<String>,
    pub attrs: Vec<String>,
    pub filter: Option<String>,
    pub parallel: Option<usize>,
    pub timeout: Option<f64>,
    pub fail_fast: bool,
    pub fail_on_cancel: bool,
    pub format: Option<OutputFormat>,
    pub verbose: bool,
    pub no_color: bool,
    pub unexpected_success: Option<UnexpectedSuccessPolicy>,
}

/// Fully resolved settings for one invocation
#[derive(Clone, Debug)]
pub struct RunSettings {
    pub path: PathBuf,
    pub select: Option<String>,
    pub attrs: Vec<String>,
    pub filter: Option<String>,
    pub workers: usize,
    pub timeout: Option<Duration>,
    pub fail_fast: bool,
    pub fail_on_cancel: bool,
    pub policy: UnexpectedSuccessPolicy,
    pub format: OutputFormat,
    pub verbose: bool,
    pub color: bool,
    pub symbols: Symbols,
    pub naming: NamingConvention,
}

impl RunSettings {
    /// Apply each layer over the previous one
    pub fn resolve(
        app: &AppConfig,
        profile: Option<&SelectionProfile>,
        env: &EnvConfig,
        cli: &CliOverrides,
    ) -> Result<Self> {
        let env_format = match &env.format {
            Some(name) => Some(
                OutputFormat::from_str(name)
                    .with_context(|| format!("Invalid UNITRUN_FORMAT: {name}"))?,
            ),
            None => None,
        };

        let select = cli
            .select
            .clone()
            .or_else(|| env.select.clone())
            .or_else(|| profile.and_then(|p| p.select.clone()));
        let attrs = if cli.attrs.is_empty() {
            profile.map(|p| p.attrs.clone()).unwrap_or_default()
        } else {
            cli.attrs.clone()
        };
        let filter = cli
            .filter
            .clone()
            .or_else(|| profile.and_then(|p| p.filter.clone()));

        let workers = cli
            .parallel
            .or(env.parallel)
            .or_else(|| profile.and_then(|p| p.parallel))
            .unwrap_or(app.workers)
            .max(1);

        let timeout = cli
            .timeout
            .or(env.timeout)
            .or(app.timeout_secs)
            .map(run_timeout)
            .transpose()?;

        let fail_fast = cli.fail_fast
            || env
                .fail_fast
                .or_else(|| profile.and_then(|p| p.fail_fast))
                .unwrap_or(app.fail_fast);

        let settings = Self {
            path: cli.path.clone().unwrap_or_else(|| app.test_path.clone()),
            select,
            attrs,
            filter,
            workers,
            timeout,
            fail_fast,
            fail_on_cancel: cli.fail_on_cancel
                || env.fail_on_cancel.unwrap_or(app.fail_on_cancel),
            policy: cli.unexpected_success.unwrap_or(app.unexpected_success),
            format: cli.format.or(env_format).unwrap_or(app.format),
            verbose: cli.verbose || env.verbose.unwrap_or(app.verbose),
            color: app.color && !env.no_color && !cli.no_color,
            symbols: app.symbols.clone(),
            naming: app.naming.clone(),
        };
        debug!("Resolved settings: {:?}", settings);
        Ok(settings)
    }

    /// Expression AND attribute specs AND name filter
    pub fn selector(&self) -> Result<Selector, SelectorError> {
        let mut selector = match &self.select {
            Some(expr) => Selector::parse(expr)?,
            None => Selector::all(),
        };
        selector = selector.and(Selector::from_attr_specs(&self.attrs)?);
        if let Some(filter) = &self.filter {
            selector = selector.with_name_filter(filter);
        }
        Ok(selector)
    }

    /// Whether the finished run should exit successfully
    pub fn passed(&self, report: &RunReport) -> bool {
        report.is_successful() && !(self.fail_on_cancel && report.cancelled.is_some())
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions::default()
            .with_policy(self.policy)
            .with_fail_fast(self.fail_fast)
            .with_timeout(self.timeout)
            .with_workers(self.workers)
    }
}

/// Explicit path, then `UNITRUN_CONFIG`, then the search locations
pub fn load_config(explicit: Option<&Path>, env: &EnvConfig) -> Result<ConfigFile> {
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    match explicit {
        Some(path) => ConfigFile::load(&path),
        None => ConfigFile::load_default(),
    }
}

/// Look up the profile named on the command line or in `UNITRUN_PROFILE`
pub fn select_profile(
    config: &ConfigFile,
    cli: Option<&str>,
    env: &EnvConfig,
) -> Result<Option<SelectionProfile>> {
    let Some(name) = cli.or(env.profile.as_deref()) else {
        return Ok(None);
    };
    match config.profile(name) {
        Some(profile) => Ok(Some(profile)),
        None => {
            let known: Vec<_> = config
                .profile_manager()
                .list()
                .iter()
                .map(|p| p.name.clone())
                .collect();
            bail!("Unknown profile '{name}' (available: {})", known.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.unexpected_success, UnexpectedSuccessPolicy::Failure);
        assert!(config.color);
    }

    #[test]
    fn test_app_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yml");
        let config = AppConfig {
            workers: 8,
            verbose: true,
            ..AppConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_defaults_only() {
        let settings = RunSettings::resolve(
            &AppConfig::default(),
            None,
            &EnvConfig::default(),
            &CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(settings.path, PathBuf::from("tests"));
        assert_eq!(settings.workers, 1);
        assert!(settings.timeout.is_none());
        assert!(settings.selector().unwrap().is_all());
    }

    #[test]
    fn test_precedence_layers() {
        let app = AppConfig {
            workers: 2,
            timeout_secs: Some(30.0),
            ..AppConfig::default()
        };
        let profile = SelectionProfile::fast();
        let env = EnvConfig {
            select: Some("tag == env".into()),
            timeout: Some(10.0),
            ..EnvConfig::default()
        };
        let cli = CliOverrides {
            select: Some("tag == cli".into()),
            ..CliOverrides::default()
        };

        let settings = RunSettings::resolve(&app, Some(&profile), &env, &cli).unwrap();
        assert_eq!(settings.select.as_deref(), Some("tag == cli"));
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.timeout, Some(Duration::from_secs(10)));

        let settings =
            RunSettings::resolve(&app, Some(&profile), &env, &CliOverrides::default()).unwrap();
        assert_eq!(settings.select.as_deref(), Some("tag == env"));

        let settings = RunSettings::resolve(
            &app,
            Some(&profile),
            &EnvConfig::default(),
            &CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(settings.select.as_deref(), Some("not tag == \"slow\""));
        assert_eq!(settings.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_color_and_fail_fast() {
        let env = EnvConfig {
            no_color: true,
            fail_fast: Some(false),
            ..EnvConfig::default()
        };
        let profile = SelectionProfile::smoke();
        let settings =
            RunSettings::resolve(&AppConfig::default(), Some(&profile), &env, &CliOverrides::default())
                .unwrap();
        assert!(!settings.color);
        assert!(!settings.fail_fast);

        let cli = CliOverrides {
            fail_fast: true,
            ..CliOverrides::default()
        };
        let settings = RunSettings::resolve(&AppConfig::default(), None, &env, &cli).unwrap();
        assert!(settings.fail_fast);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let env = EnvConfig {
            format: Some("fancy".into()),
            ..EnvConfig::default()
        };
        assert!(
            RunSettings::resolve(&AppConfig::default(), None, &env, &CliOverrides::default())
                .is_err()
        );

        let cli = CliOverrides {
            timeout: Some(0.0),
            ..CliOverrides::default()
        };
        assert!(
            RunSettings::resolve(&AppConfig::default(), None, &EnvConfig::default(), &cli)
                .is_err()
        );
    }

    #[test]
    fn test_cancelled_run_exit_status() {
        let mut report = RunReport::new(UnexpectedSuccessPolicy::Failure);
        report.record(crate::models::UnitRecord::new(
            crate::models::UnitId::new("m", "C", "test_a"),
            crate::models::Outcome::skipped("run cancelled: interrupted"),
            Duration::ZERO,
        ));
        report.finish(Duration::ZERO, Some("interrupted".to_string()));

        let lenient = RunSettings::resolve(
            &AppConfig::default(),
            None,
            &EnvConfig::default(),
            &CliOverrides::default(),
        )
        .unwrap();
        assert!(lenient.passed(&report));

        let cli = CliOverrides {
            fail_on_cancel: true,
            ..CliOverrides::default()
        };
        let strict =
            RunSettings::resolve(&AppConfig::default(), None, &EnvConfig::default(), &cli)
                .unwrap();
        assert!(!strict.passed(&report));

        report.cancelled = None;
        assert!(strict.passed(&report));
    }

    #[test]
    fn test_unrepresentable_timeouts_rejected() {
        for secs in [f64::INFINITY, f64::NAN, 1e300] {
            let cli = CliOverrides {
                timeout: Some(secs),
                ..CliOverrides::default()
            };
            let err =
                RunSettings::resolve(&AppConfig::default(), None, &EnvConfig::default(), &cli)
                    .unwrap_err();
            assert!(err.to_string().starts_with("Timeout"));
        }

        let env = EnvConfig {
            timeout: Some(f64::INFINITY),
            ..EnvConfig::default()
        };
        assert!(
            RunSettings::resolve(&AppConfig::default(), None, &env, &CliOverrides::default())
                .is_err()
        );
        assert_eq!(run_timeout(1.5).unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_run_options() {
        let cli = CliOverrides {
            parallel: Some(0),
            unexpected_success: Some(UnexpectedSuccessPolicy::Success),
            ..CliOverrides::default()
        };
        let settings =
            RunSettings::resolve(&AppConfig::default(), None, &EnvConfig::default(), &cli)
                .unwrap();
        let options = settings.run_options();
        assert_eq!(options.workers, 1);
        assert_eq!(options.policy, UnexpectedSuccessPolicy::Success);
    }

    #[test]
    fn test_unknown_profile() {
        let config = ConfigFile::default();
        let env = EnvConfig::default();
        assert!(select_profile(&config, Some("nope"), &env).is_err());
        assert!(select_profile(&config, None, &env).unwrap().is_none());
        let env = EnvConfig {
            profile: Some("smoke".into()),
            ..EnvConfig::default()
        };
        assert_eq!(
            select_profile(&config, None, &env).unwrap().unwrap().name,
            "smoke"
        );
    }
}
