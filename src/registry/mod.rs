//! Test discovery
//!
//! Collects modules from registered sources or suite files on disk into a
//! `Suite`. Discovery never runs a unit or a fixture.

mod command;
mod suite;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::DiscoveryError;
use crate::models::TestModule;

pub use command::{CommandDef, CommandSpec, CommandStep, Expectation, ENV_KEY, SKIP_EXIT_CODE};
pub use suite::SuiteFile;

/// Something that can produce a module
pub trait ModuleSource {
    fn name(&self) -> String;
    fn load(&self) -> Result<TestModule, DiscoveryError>;
}

impl<T: ModuleSource + ?Sized> ModuleSource for Box<T> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn load(&self) -> Result<TestModule, DiscoveryError> {
        (**self).load()
    }
}

/// Closure-backed source for modules written in Rust
pub struct StaticModule {
    name: String,
    build: Box<dyn Fn() -> Result<TestModule, DiscoveryError> + Send + Sync>,
}

impl StaticModule {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Result<TestModule, DiscoveryError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Box::new(build),
        }
    }

    pub fn from_module(module: TestModule) -> Self {
        let name = module.name.clone();
        Self::new(name, move || Ok(module.clone()))
    }
}

impl ModuleSource for StaticModule {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn load(&self) -> Result<TestModule, DiscoveryError> {
        (self.build)()
    }
}

impl fmt::Debug for StaticModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticModule").field("name", &self.name).finish()
    }
}

/// One discovered module, or the reason it could not be loaded
#[derive(Clone, Debug)]
pub enum SuiteEntry {
    Loaded(TestModule),
    Failed(DiscoveryError),
}

impl SuiteEntry {
    pub fn name(&self) -> &str {
        match self {
            SuiteEntry::Loaded(module) => &module.name,
            SuiteEntry::Failed(err) => &err.module,
        }
    }

    /// Records this entry produces when run
    pub fn unit_count(&self) -> usize {
        match self {
            SuiteEntry::Loaded(module) => module.unit_count(),
            SuiteEntry::Failed(_) => 1,
        }
    }
}

/// Ordered discovery result
#[derive(Clone, Debug, Default)]
pub struct Suite {
    entries: Vec<SuiteEntry>,
}

impl Suite {
    pub fn new(entries: Vec<SuiteEntry>) -> Self {
        Self { entries }
    }

    pub fn from_modules(modules: Vec<TestModule>) -> Self {
        Self::new(modules.into_iter().map(SuiteEntry::Loaded).collect())
    }

    pub fn entries(&self) -> &[SuiteEntry] {
        &self.entries
    }

    pub fn modules(&self) -> impl Iterator<Item = &TestModule> {
        self.entries.iter().filter_map(|e| match e {
            SuiteEntry::Loaded(module) => Some(module),
            SuiteEntry::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &DiscoveryError> {
        self.entries.iter().filter_map(|e| match e {
            SuiteEntry::Failed(err) => Some(err),
            SuiteEntry::Loaded(_) => None,
        })
    }

    /// Units plus one placeholder per module that failed to load
    pub fn unit_count(&self) -> usize {
        self.entries.iter().map(SuiteEntry::unit_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which names and files count as tests
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConvention {
    pub unit_prefix: String,
    pub file_prefix: String,
    pub extensions: Vec<String>,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            unit_prefix: "test_".to_string(),
            file_prefix: "test_".to_string(),
            extensions: vec!["yaml".to_string(), "yml".to_string()],
        }
    }
}

impl NamingConvention {
    pub fn is_unit(&self, name: &str) -> bool {
        name.starts_with(&self.unit_prefix)
    }

    pub fn is_suite_file(&self, path: &Path) -> bool {
        let has_prefix = path
            .file_name()
            .and_then(OsStr::to_str)
            .is_some_and(|name| name.starts_with(&self.file_prefix));
        let has_extension = path
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        has_prefix && has_extension
    }
}

/// Applies the naming convention while collecting modules
#[derive(Clone, Debug, Default)]
pub struct Registry {
    convention: NamingConvention,
}

impl Registry {
    pub fn new(convention: NamingConvention) -> Self {
        Self { convention }
    }

    pub fn convention(&self) -> &NamingConvention {
        &self.convention
    }

    /// Load every source in order; a failing source does not stop the rest
    pub fn discover<S: ModuleSource>(&self, sources: &[S]) -> Suite {
        let entries = sources
            .iter()
            .map(|source| {
                debug!("Loading module {}", source.name());
                self.load(source)
            })
            .collect();
        Suite::new(entries)
    }

    fn load<S: ModuleSource>(&self, source: &S) -> SuiteEntry {
        match source.load() {
            Ok(module) => SuiteEntry::Loaded(self.apply_convention(module)),
            Err(err) => {
                warn!("{}", err);
                SuiteEntry::Failed(err)
            }
        }
    }

    fn apply_convention(&self, mut module: TestModule) -> TestModule {
        for container in &mut module.containers {
            container.units.retain(|unit| {
                let keep = self.convention.is_unit(&unit.name);
                if !keep {
                    debug!(
                        "Ignoring {}::{}::{}: name lacks prefix '{}'",
                        module.name, container.name, unit.name, self.convention.unit_prefix
                    );
                }
                keep
            });
        }
        debug!("Discovered {} units in {}", module.unit_count(), module.name);
        module
    }

    /// Suite files under `root` in sorted path order; `root` may be a file
    pub fn sources_in(&self, root: &Path) -> Result<Vec<SuiteFile>> {
        if !root.exists() {
            bail!("Test path does not exist: {}", root.display());
        }
        if root.is_file() {
            return Ok(vec![SuiteFile::new(root)]);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            let path = entry.path();
            if entry.file_type().is_file() && self.convention.is_suite_file(path) {
                files.push(SuiteFile::new(path));
            } else if entry.file_type().is_file() {
                debug!("Skipping non-suite file {}", path.display());
            }
        }
        Ok(files)
    }

    /// Walk `root` and load every suite file found
    pub fn discover_path(&self, root: &Path) -> Result<Suite> {
        let sources = self.sources_in(root)?;
        info!("Found {} suite files under {}", sources.len(), root.display());
        Ok(self.discover(&sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestContainer, TestUnit};
    use std::fs;

    fn module(name: &str) -> TestModule {
        TestModule::new(name).container(
            TestContainer::new("C")
                .unit(TestUnit::new("test_a", |_| Ok(())))
                .unit(TestUnit::new("helper", |_| Ok(()))),
        )
    }

    #[test]
    fn test_units_without_prefix_are_ignored() {
        let registry = Registry::default();
        let suite = registry.discover(&[StaticModule::from_module(module("m"))]);
        let names: Vec<_> = suite
            .modules()
            .flat_map(|m| m.units().map(|(_, u)| u.name.clone()))
            .collect();
        assert_eq!(names, vec!["test_a"]);
    }

    #[test]
    fn test_failed_source_does_not_stop_siblings() {
        let sources = vec![
            StaticModule::from_module(module("first")),
            StaticModule::new("broken", || Err(DiscoveryError::new("broken", "import failed"))),
            StaticModule::from_module(module("last")),
        ];
        let suite = Registry::default().discover(&sources);
        let names: Vec<_> = suite.entries().iter().map(SuiteEntry::name).collect();
        assert_eq!(names, vec!["first", "broken", "last"]);
        assert_eq!(suite.failures().count(), 1);
        assert_eq!(suite.unit_count(), 3);
    }

    #[test]
    fn test_discovery_does_not_execute() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let m = TestModule::new("m")
            .setup(move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .container(TestContainer::new("C").unit(TestUnit::new("test_a", |_| Ok(()))));
        Registry::default().discover(&[StaticModule::from_module(m)]);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_discover_path_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        let body = "containers:\n  - name: C\n    tests:\n      - name: test_x\n        run: \"true\"\n";
        fs::write(dir.path().join("test_b.yaml"), body).unwrap();
        fs::write(dir.path().join("test_a.yml"), body).unwrap();
        fs::write(dir.path().join("nested/test_c.yaml"), body).unwrap();
        fs::write(dir.path().join("helper.yaml"), body).unwrap();
        fs::write(dir.path().join("test_broken.yaml"), "containers: [").unwrap();

        let suite = Registry::default().discover_path(dir.path()).unwrap();
        let names: Vec<_> = suite.entries().iter().map(SuiteEntry::name).collect();
        assert_eq!(names, vec!["test_c", "test_a", "test_b", "test_broken"]);
        assert!(matches!(suite.entries()[3], SuiteEntry::Failed(_)));
    }

    #[test]
    fn test_single_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        fs::write(&path, "containers: []\n").unwrap();
        let sources = Registry::default().sources_in(&path).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(Registry::default().sources_in(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_naming_convention() {
        let convention = NamingConvention::default();
        assert!(convention.is_suite_file(Path::new("a/test_x.YAML")));
        assert!(!convention.is_suite_file(Path::new("a/x_test.yaml")));
        assert!(!convention.is_suite_file(Path::new("a/test_x.json")));
        assert!(convention.is_unit("test_it"));
        assert!(!convention.is_unit("it_test"));
    }
}
