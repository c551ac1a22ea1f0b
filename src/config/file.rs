//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::profile::{ProfileManager, SelectionProfile};
use super::{run_timeout, AppConfig};
use crate::output::OutputFormat;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./unitrun.yaml",
    "./unitrun.yml",
    "./.unitrun.yaml",
    "~/.config/unitrun/config.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Application settings
    #[serde(default)]
    pub app: AppConfig,

    /// Selection profiles
    #[serde(default)]
    pub profiles: Vec<SelectionProfile>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            profiles: Vec::new(),
        }
    }
}

impl ConfigFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        match Self::find() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }
        if self.app.workers == 0 {
            anyhow::bail!("app.workers must be at least 1");
        }
        if let Some(secs) = self.app.timeout_secs {
            run_timeout(secs).context("Invalid app.timeout_secs")?;
        }
        if self.app.naming.extensions.is_empty() {
            anyhow::bail!("app.naming.extensions must not be empty");
        }

        for profile in &self.profiles {
            profile
                .selector()
                .with_context(|| format!("Invalid selection in profile '{}'", profile.name))?;
        }

        Ok(())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        Self {
            version: "1.0".to_string(),
            app: AppConfig {
                workers: 4,
                timeout_secs: Some(600.0),
                format: OutputFormat::Text,
                ..AppConfig::default()
            },
            profiles: vec![
                SelectionProfile::new("nightly")
                    .with_description("Everything except known-broken tests")
                    .with_select("not tag == broken"),
                SelectionProfile::new("critical")
                    .with_description("High priority tests owned by core")
                    .with_attr("owner=core,priority=1"),
            ],
        }
    }

    /// Get profile by name, file profiles shadowing built-ins
    pub fn profile(&self, name: &str) -> Option<SelectionProfile> {
        self.profile_manager().get(name).cloned()
    }

    /// Built-in profiles plus those declared in this file
    pub fn profile_manager(&self) -> ProfileManager {
        let mut manager = ProfileManager::new();
        for profile in &self.profiles {
            manager.add(profile.clone());
        }
        manager
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_example() {
        let config = ConfigFile::example();
        assert!(!config.profiles.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_save_load() {
        let dir = tempdir().unwrap();
        for name in ["config.yaml", "config.json"] {
            let path = dir.path().join(name);
            let config = ConfigFile::example();
            config.save(&path).unwrap();

            let loaded = ConfigFile::load(&path).unwrap();
            assert_eq!(loaded.version, config.version);
            assert_eq!(loaded.app.workers, 4);
            assert_eq!(loaded.profiles, config.profiles);
        }
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unitrun.yaml");
        std::fs::write(&path, "app:\n  fail_fast: true\n").unwrap();
        let loaded = ConfigFile::load(&path).unwrap();
        assert!(loaded.app.fail_fast);
        assert_eq!(loaded.app.workers, 1);
        assert_eq!(loaded.app.naming.unit_prefix, "test_");
    }

    #[test]
    fn test_validate_rejects_bad_profile() {
        let mut config = ConfigFile::default();
        config
            .profiles
            .push(SelectionProfile::new("broken").with_select("priority <"));
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("profile 'broken'"));
    }

    #[test]
    fn test_validate_rejects_version_and_workers() {
        let mut config = ConfigFile {
            version: "9.9".to_string(),
            ..ConfigFile::default()
        };
        assert!(config.validate().is_err());
        config.version = "1.0".to_string();
        config.app.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unitrun.yaml");
        std::fs::write(&path, "app:\n  timeout_secs: 1.0e+300\n").unwrap();
        let err = ConfigFile::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("app.timeout_secs"));
    }

    #[test]
    fn test_file_profiles_shadow_builtins() {
        let mut config = ConfigFile::default();
        config
            .profiles
            .push(SelectionProfile::new("smoke").with_select("tag == sanity"));
        let smoke = config.profile("smoke").unwrap();
        assert_eq!(smoke.select.as_deref(), Some("tag == sanity"));
        assert!(config.profile("fast").is_some());
        assert!(config.profile("missing").is_none());
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}
