//! Fixture lifecycle management
//!
//! Each scope level (module, class, instance) runs through a small state
//! machine and owns a `Store` that lives from scope entry to scope exit.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, warn};

use crate::error::{ScopeError, TestError};
use crate::executor::panic::guarded;
use crate::models::{ScopeFault, ScopeLevel, TestFn};

/// Typed key/value storage for one scope
#[derive(Default)]
pub struct Store {
    values: HashMap<String, Box<dyn Any + Send>>,
}

impl Store {
    pub fn insert<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        let value = self.values.remove(key)?;
        value.downcast::<T>().ok().map(|b| *b)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Store").field("keys", &keys).finish()
    }
}

/// One store per scope level
#[derive(Debug, Default)]
pub struct ScopeStores {
    pub module: Store,
    pub class: Store,
    pub instance: Store,
}

impl ScopeStores {
    pub fn get_mut(&mut self, level: ScopeLevel) -> &mut Store {
        match level {
            ScopeLevel::Module => &mut self.module,
            ScopeLevel::Class => &mut self.class,
            ScopeLevel::Instance => &mut self.instance,
        }
    }
}

/// Handle passed to fixtures and unit bodies
pub struct Context<'a> {
    scope: &'a str,
    stores: &'a mut ScopeStores,
}

impl<'a> Context<'a> {
    pub fn new(scope: &'a str, stores: &'a mut ScopeStores) -> Self {
        Self { scope, stores }
    }

    /// Name of the scope or unit currently running
    pub fn scope(&self) -> &str {
        self.scope
    }

    pub fn module(&mut self) -> &mut Store {
        &mut self.stores.module
    }

    pub fn class(&mut self) -> &mut Store {
        &mut self.stores.class
    }

    pub fn instance(&mut self) -> &mut Store {
        &mut self.stores.instance
    }

    /// Read-only view of all three stores, outermost first
    pub fn stores(&self) -> [&Store; 3] {
        [&self.stores.module, &self.stores.class, &self.stores.instance]
    }
}

/// Lifecycle state of one scope
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeState {
    NotStarted,
    SetupRunning,
    Active,
    TeardownRunning,
    Done,
    SetupFailed,
}

impl ScopeState {
    pub fn can_transition_to(self, next: ScopeState) -> bool {
        use ScopeState::*;
        matches!(
            (self, next),
            (NotStarted, SetupRunning)
                | (NotStarted, Done)
                | (SetupRunning, Active)
                | (SetupRunning, SetupFailed)
                | (Active, TeardownRunning)
                | (TeardownRunning, Done)
        )
    }

    /// No further transitions possible
    pub fn is_terminal(self) -> bool {
        matches!(self, ScopeState::Done | ScopeState::SetupFailed)
    }
}

/// State machine for the scope currently occupying a level
#[derive(Debug, Clone)]
pub struct ScopeFixture {
    pub level: ScopeLevel,
    pub name: String,
    state: ScopeState,
}

impl ScopeFixture {
    pub fn new(level: ScopeLevel, name: impl Into<String>) -> Self {
        Self {
            level,
            name: name.into(),
            state: ScopeState::NotStarted,
        }
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    fn transition(&mut self, next: ScopeState) {
        if !self.state.can_transition_to(next) {
            error!(
                "invalid {} scope transition for '{}': {:?} -> {:?}",
                self.level, self.name, self.state, next
            );
            debug_assert!(false, "invalid scope transition {:?} -> {:?}", self.state, next);
        }
        debug!("{} '{}': {:?} -> {:?}", self.level, self.name, self.state, next);
        self.state = next;
    }
}

/// Result of entering a scope
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeEntry {
    Active,
    /// Setup raised; units of the scope become errors
    Failed(ScopeError),
    /// Setup requested a skip; units of the scope become skipped
    Skipped(String),
}

/// Runs setup and teardown for the three scope levels of one worker
#[derive(Debug, Default)]
pub struct FixtureManager {
    stores: ScopeStores,
    module: Option<ScopeFixture>,
    class: Option<ScopeFixture>,
    instance: Option<ScopeFixture>,
    faults: Vec<ScopeFault>,
}

impl FixtureManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, level: ScopeLevel) -> &mut Option<ScopeFixture> {
        match level {
            ScopeLevel::Module => &mut self.module,
            ScopeLevel::Class => &mut self.class,
            ScopeLevel::Instance => &mut self.instance,
        }
    }

    /// Current state of the scope at `level`, if one was entered
    pub fn state(&self, level: ScopeLevel) -> Option<ScopeState> {
        let slot = match level {
            ScopeLevel::Module => &self.module,
            ScopeLevel::Class => &self.class,
            ScopeLevel::Instance => &self.instance,
        };
        slot.as_ref().map(ScopeFixture::state)
    }

    fn begin(&mut self, level: ScopeLevel, name: &str) {
        if let Some(previous) = self.slot(level).as_ref() {
            if !previous.state().is_terminal() {
                error!(
                    "{} scope '{}' entered while '{}' is still {:?}",
                    level,
                    name,
                    previous.name,
                    previous.state()
                );
                debug_assert!(false, "scope '{}' not exited", previous.name);
            }
        }
        *self.slot(level) = Some(ScopeFixture::new(level, name));
        self.stores.get_mut(level).clear();
    }

    /// Run the setup of a new scope at `level`
    pub fn enter(&mut self, level: ScopeLevel, name: &str, setup: Option<&TestFn>) -> ScopeEntry {
        self.begin(level, name);
        self.set_state(level, ScopeState::SetupRunning);

        let result = match setup {
            Some(setup) => {
                let mut ctx = Context::new(name, &mut self.stores);
                guarded(setup, &mut ctx)
            }
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                self.set_state(level, ScopeState::Active);
                ScopeEntry::Active
            }
            Err(TestError::Skip { reason }) => {
                debug!("{} setup of '{}' requested skip: {}", level, name, reason);
                self.set_state(level, ScopeState::SetupFailed);
                self.stores.get_mut(level).clear();
                ScopeEntry::Skipped(reason)
            }
            Err(cause) => {
                let err = ScopeError::Setup {
                    level,
                    scope: name.to_string(),
                    cause,
                };
                error!("{}", err);
                self.set_state(level, ScopeState::SetupFailed);
                self.stores.get_mut(level).clear();
                ScopeEntry::Failed(err)
            }
        }
    }

    /// Mark a scope at `level` as skipped without running any fixture
    pub fn skip(&mut self, level: ScopeLevel, name: &str) {
        self.begin(level, name);
        self.set_state(level, ScopeState::Done);
    }

    /// Run the teardown of the scope at `level` if its setup succeeded.
    /// A teardown error is recorded as a fault and returned.
    pub fn exit(&mut self, level: ScopeLevel, teardown: Option<&TestFn>) -> Option<ScopeError> {
        let Some(fixture) = self.slot(level).clone() else {
            error!("{} scope exited without being entered", level);
            debug_assert!(false, "exit without enter");
            return None;
        };

        if fixture.state() != ScopeState::Active {
            // Setup failed or skipped: the teardown must not run
            self.stores.get_mut(level).clear();
            return None;
        }

        self.set_state(level, ScopeState::TeardownRunning);
        let result = match teardown {
            Some(teardown) => {
                let mut ctx = Context::new(&fixture.name, &mut self.stores);
                guarded(teardown, &mut ctx)
            }
            None => Ok(()),
        };
        self.set_state(level, ScopeState::Done);
        self.stores.get_mut(level).clear();

        match result {
            Ok(()) | Err(TestError::Skip { .. }) => None,
            Err(cause) => {
                let err = ScopeError::Teardown {
                    level,
                    scope: fixture.name,
                    cause,
                };
                warn!("{}", err);
                self.faults.push(ScopeFault::from(&err));
                Some(err)
            }
        }
    }

    fn set_state(&mut self, level: ScopeLevel, next: ScopeState) {
        if let Some(fixture) = self.slot(level).as_mut() {
            fixture.transition(next);
        }
    }

    /// Context for running a unit body inside the active scopes
    pub fn context<'a>(&'a mut self, scope: &'a str) -> Context<'a> {
        Context::new(scope, &mut self.stores)
    }

    /// Drain the teardown faults recorded so far
    pub fn take_faults(&mut self) -> Vec<ScopeFault> {
        std::mem::take(&mut self.faults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording(log: &Arc<Mutex<Vec<String>>>, entry: &str) -> TestFn {
        let log = log.clone();
        let entry = entry.to_string();
        Arc::new(move |_| {
            log.lock().unwrap().push(entry.clone());
            Ok(())
        })
    }

    #[test]
    fn test_state_transitions() {
        assert!(ScopeState::NotStarted.can_transition_to(ScopeState::SetupRunning));
        assert!(ScopeState::NotStarted.can_transition_to(ScopeState::Done));
        assert!(ScopeState::SetupRunning.can_transition_to(ScopeState::SetupFailed));
        assert!(!ScopeState::SetupFailed.can_transition_to(ScopeState::TeardownRunning));
        assert!(!ScopeState::Active.can_transition_to(ScopeState::Done));
        assert!(!ScopeState::Done.can_transition_to(ScopeState::SetupRunning));
    }

    #[test]
    fn test_store_is_typed() {
        let mut store = Store::default();
        store.insert("conn", 42u32);
        assert_eq!(store.get::<u32>("conn"), Some(&42));
        assert_eq!(store.get::<String>("conn"), None);
        *store.get_mut::<u32>("conn").unwrap() += 1;
        assert_eq!(store.remove::<u32>("conn"), Some(43));
        assert!(store.is_empty());
    }

    #[test]
    fn test_enter_and_exit_runs_fixtures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = FixtureManager::new();

        let entry = manager.enter(ScopeLevel::Module, "m", Some(&recording(&log, "setup")));
        assert_eq!(entry, ScopeEntry::Active);
        assert_eq!(manager.state(ScopeLevel::Module), Some(ScopeState::Active));

        assert!(manager
            .exit(ScopeLevel::Module, Some(&recording(&log, "teardown")))
            .is_none());
        assert_eq!(manager.state(ScopeLevel::Module), Some(ScopeState::Done));
        assert_eq!(*log.lock().unwrap(), vec!["setup", "teardown"]);
    }

    #[test]
    fn test_failed_setup_skips_teardown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = FixtureManager::new();
        let failing: TestFn = Arc::new(|_| Err(TestError::unhandled("db down")));

        let entry = manager.enter(ScopeLevel::Class, "m::C", Some(&failing));
        match entry {
            ScopeEntry::Failed(ScopeError::Setup { level, scope, .. }) => {
                assert_eq!(level, ScopeLevel::Class);
                assert_eq!(scope, "m::C");
            }
            other => panic!("unexpected entry: {other:?}"),
        }
        assert!(manager
            .exit(ScopeLevel::Class, Some(&recording(&log, "teardown")))
            .is_none());
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(manager.state(ScopeLevel::Class), Some(ScopeState::SetupFailed));
    }

    #[test]
    fn test_skip_from_setup() {
        let mut manager = FixtureManager::new();
        let skipping: TestFn = Arc::new(|_| Err(TestError::skip("no network")));
        let entry = manager.enter(ScopeLevel::Module, "m", Some(&skipping));
        assert_eq!(entry, ScopeEntry::Skipped("no network".to_string()));
    }

    #[test]
    fn test_teardown_error_becomes_fault() {
        let mut manager = FixtureManager::new();
        let failing: TestFn = Arc::new(|_| Err(TestError::unhandled("leak")));
        manager.enter(ScopeLevel::Instance, "m::C::test_a", None);
        let err = manager.exit(ScopeLevel::Instance, Some(&failing));
        assert!(matches!(err, Some(ScopeError::Teardown { .. })));
        assert_eq!(manager.state(ScopeLevel::Instance), Some(ScopeState::Done));

        let faults = manager.take_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].cause, "leak");
        assert!(manager.take_faults().is_empty());
    }

    #[test]
    fn test_store_lives_for_scope() {
        let mut manager = FixtureManager::new();
        let setup: TestFn = Arc::new(|ctx| {
            ctx.class().insert("value", String::from("shared"));
            Ok(())
        });
        manager.enter(ScopeLevel::Class, "m::C", Some(&setup));
        {
            let mut ctx = manager.context("m::C::test_a");
            assert_eq!(ctx.class().get::<String>("value").map(String::as_str), Some("shared"));
        }
        manager.exit(ScopeLevel::Class, None);
        let mut ctx = manager.context("m::C::test_b");
        assert!(!ctx.class().contains("value"));
    }

    #[test]
    fn test_skipped_scope_goes_straight_to_done() {
        let mut manager = FixtureManager::new();
        manager.skip(ScopeLevel::Class, "m::Skipped");
        assert_eq!(manager.state(ScopeLevel::Class), Some(ScopeState::Done));
    }
}
