//! Sequential test runner
//!
//! Walks the selected suite module by module, entering and exiting fixture
//! scopes around each unit and emitting one record per unit.

use anyhow::{Context as _, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ScopeError, SourceLocation};
use crate::executor::engine;
use crate::executor::fixture::{FixtureManager, ScopeEntry};
use crate::models::{
    Outcome, RunReport, ScopeFault, ScopeLevel, TestContainer, TestModule, TestUnit,
    UnexpectedSuccessPolicy, UnitId, UnitRecord,
};
use crate::output::Reporter;
use crate::registry::{Suite, SuiteEntry};
use crate::utils::Timer;

/// Options shared by the sequential and parallel runners
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub policy: UnexpectedSuccessPolicy,
    pub fail_fast: bool,
    pub timeout: Option<Duration>,
    pub workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            policy: UnexpectedSuccessPolicy::default(),
            fail_fast: false,
            timeout: None,
            workers: 1,
        }
    }
}

impl RunOptions {
    pub fn with_policy(mut self, policy: UnexpectedSuccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

#[derive(Debug, Default)]
struct CancelState {
    reason: Mutex<Option<String>>,
    deadline: Mutex<Option<(Instant, Duration)>>,
}

/// Shared cancellation token, checked between units
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    token: CancellationToken,
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the first reason wins
    pub fn cancel(&self, reason: impl Into<String>) {
        let mut slot = self.state.reason.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            let reason = reason.into();
            info!("Cancelling run: {}", reason);
            *slot = Some(reason);
        }
        self.token.cancel();
    }

    /// Cancel once `timeout` has elapsed from now
    pub fn set_timeout(&self, timeout: Duration) {
        let mut deadline = self.state.deadline.lock().unwrap_or_else(|e| e.into_inner());
        *deadline = Some((Instant::now() + timeout, timeout));
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the run has been cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Reason for cancellation, tripping the deadline if it has passed
    pub fn check(&self) -> Option<String> {
        if !self.is_cancelled() {
            let expired = {
                let deadline = self.state.deadline.lock().unwrap_or_else(|e| e.into_inner());
                deadline.filter(|(at, _)| Instant::now() >= *at)
            };
            match expired {
                Some((_, timeout)) => {
                    self.cancel(format!("timeout of {:.1}s exceeded", timeout.as_secs_f64()))
                }
                None => return None,
            }
        }
        self.reason()
    }

    pub fn reason(&self) -> Option<String> {
        self.state
            .reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn cancelled(reason: &str) -> Outcome {
    Outcome::skipped(format!("run cancelled: {reason}"))
}

fn setup_error(err: &ScopeError) -> Outcome {
    Outcome::error(err.to_string(), err.location().cloned())
}

/// Forwards records to the sink and trips fail-fast
struct Emitter<'a> {
    options: &'a RunOptions,
    token: &'a CancelToken,
    sink: &'a mut dyn FnMut(UnitRecord),
}

impl Emitter<'_> {
    fn emit(&mut self, record: UnitRecord) {
        if self.options.fail_fast && record.outcome.is_failure(self.options.policy) {
            self.token.cancel(format!("fail-fast after {}", record.id));
        }
        (self.sink)(record);
    }

    fn emit_all<'u>(
        &mut self,
        module: &TestModule,
        units: impl Iterator<Item = (&'u TestContainer, &'u TestUnit)>,
        outcome: &Outcome,
    ) {
        for (container, unit) in units {
            let id = UnitId::new(&module.name, &container.name, &unit.name);
            self.emit(
                UnitRecord::new(id, outcome.clone(), Duration::ZERO)
                    .with_definition(unit.defined_at.clone()),
            );
        }
    }
}

/// Execute one suite entry, emitting a record per unit.
/// Returns the teardown faults raised while running it.
pub fn execute_entry(
    entry: &SuiteEntry,
    options: &RunOptions,
    token: &CancelToken,
    sink: &mut dyn FnMut(UnitRecord),
) -> Vec<ScopeFault> {
    let mut emitter = Emitter {
        options,
        token,
        sink,
    };
    match entry {
        SuiteEntry::Failed(err) => {
            let location = err.path.as_deref().map(SourceLocation::file_only);
            emitter.emit(UnitRecord::new(
                UnitId::load_failure(&err.module),
                Outcome::error(err.to_string(), location),
                Duration::ZERO,
            ));
            Vec::new()
        }
        SuiteEntry::Loaded(module) => run_module(module, &mut emitter),
    }
}

fn run_module(module: &TestModule, out: &mut Emitter<'_>) -> Vec<ScopeFault> {
    let mut manager = FixtureManager::new();

    if let Some(reason) = out.token.check() {
        manager.skip(ScopeLevel::Module, &module.name);
        out.emit_all(module, module.units(), &cancelled(&reason));
        return Vec::new();
    }
    if let Some(reason) = module.meta.decoration.skip_reason() {
        debug!("Skipping module {}: {}", module.name, reason);
        manager.skip(ScopeLevel::Module, &module.name);
        out.emit_all(module, module.units(), &Outcome::skipped(reason));
        return Vec::new();
    }
    if module.unit_count() == 0 {
        manager.skip(ScopeLevel::Module, &module.name);
        return Vec::new();
    }

    debug!("Entering module {}", module.name);
    match manager.enter(ScopeLevel::Module, &module.name, module.fixtures.setup.as_ref()) {
        ScopeEntry::Active => {}
        ScopeEntry::Failed(err) => {
            out.emit_all(module, module.units(), &setup_error(&err));
            manager.exit(ScopeLevel::Module, module.fixtures.teardown.as_ref());
            return manager.take_faults();
        }
        ScopeEntry::Skipped(reason) => {
            out.emit_all(module, module.units(), &Outcome::skipped(reason));
            return Vec::new();
        }
    }

    for container in &module.containers {
        run_container(&mut manager, module, container, out);
    }

    manager.exit(ScopeLevel::Module, module.fixtures.teardown.as_ref());
    manager.take_faults()
}

fn run_container(
    manager: &mut FixtureManager,
    module: &TestModule,
    container: &TestContainer,
    out: &mut Emitter<'_>,
) {
    if container.units.is_empty() {
        return;
    }
    let scope = format!("{}::{}", module.name, container.name);
    let units = || container.units.iter().map(move |u| (container, u));

    if let Some(reason) = out.token.check() {
        manager.skip(ScopeLevel::Class, &scope);
        out.emit_all(module, units(), &cancelled(&reason));
        return;
    }
    if let Some(reason) = container.meta.decoration.skip_reason() {
        debug!("Skipping container {}: {}", scope, reason);
        manager.skip(ScopeLevel::Class, &scope);
        out.emit_all(module, units(), &Outcome::skipped(reason));
        return;
    }

    match manager.enter(ScopeLevel::Class, &scope, container.class_fixtures.setup.as_ref()) {
        ScopeEntry::Active => {}
        ScopeEntry::Failed(err) => {
            out.emit_all(module, units(), &setup_error(&err));
            manager.exit(ScopeLevel::Class, container.class_fixtures.teardown.as_ref());
            return;
        }
        ScopeEntry::Skipped(reason) => {
            out.emit_all(module, units(), &Outcome::skipped(reason));
            return;
        }
    }

    let container_expects_failure = container.meta.decoration.is_expected_failure()
        || module.meta.decoration.is_expected_failure();

    for unit in &container.units {
        let id = UnitId::new(&module.name, &container.name, &unit.name);
        let scope = id.to_string();

        let (outcome, duration) = if let Some(reason) = out.token.check() {
            manager.skip(ScopeLevel::Instance, &scope);
            (cancelled(&reason), Duration::ZERO)
        } else if let Some(reason) = unit.meta.decoration.skip_reason() {
            manager.skip(ScopeLevel::Instance, &scope);
            (Outcome::skipped(reason), Duration::ZERO)
        } else {
            let expected_failure = if unit.meta.decoration.is_none() {
                container_expects_failure
            } else {
                unit.meta.decoration.is_expected_failure()
            };

            let timer = Timer::start(format!("fixtures+body {scope}"));
            let outcome = match manager.enter(
                ScopeLevel::Instance,
                &scope,
                container.instance_fixtures.setup.as_ref(),
            ) {
                ScopeEntry::Active => {
                    let (outcome, _) = {
                        let mut ctx = manager.context(&scope);
                        engine::execute(unit, expected_failure, &mut ctx)
                    };
                    outcome
                }
                ScopeEntry::Failed(err) => setup_error(&err),
                ScopeEntry::Skipped(reason) => Outcome::skipped(reason),
            };
            manager.exit(ScopeLevel::Instance, container.instance_fixtures.teardown.as_ref());
            (outcome, timer.stop())
        };

        out.emit(UnitRecord::new(id, outcome, duration).with_definition(unit.defined_at.clone()));
    }

    manager.exit(ScopeLevel::Class, container.class_fixtures.teardown.as_ref());
}

/// Sequential runner, one unit at a time in discovery order
pub struct TestRunner {
    options: RunOptions,
    token: CancelToken,
}

impl TestRunner {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            token: CancelToken::new(),
        }
    }

    /// Share an externally controlled cancellation token (Ctrl-C)
    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run every entry of the suite and report as records arrive
    pub fn run(&self, suite: &Suite, reporter: &mut dyn Reporter) -> Result<RunReport> {
        info!(
            "Running {} tests from {} modules",
            suite.unit_count(),
            suite.entries().len()
        );
        if let Some(timeout) = self.options.timeout {
            self.token.set_timeout(timeout);
        }

        let timer = Timer::start("run");
        let mut report = RunReport::new(self.options.policy);
        let mut write_error = None;

        reporter
            .run_started(suite.unit_count())
            .context("Failed to write report header")?;

        for entry in suite.entries() {
            let faults = execute_entry(entry, &self.options, &self.token, &mut |record| {
                if write_error.is_none() {
                    write_error = reporter.unit_finished(&record).err();
                }
                report.record(record);
            });
            for fault in faults {
                report.add_fault(fault);
            }
        }

        if let Some(err) = write_error {
            return Err(err).context("Failed to write progress");
        }

        report.finish(timer.stop(), self.token.reason());
        info!(
            "Run finished in {:.3}s: {} tests, {} failing",
            report.elapsed.as_secs_f64(),
            report.total(),
            report.counts.failures(report.policy)
        );
        reporter
            .run_finished(&report)
            .context("Failed to write summary")?;
        Ok(report)
    }
}
