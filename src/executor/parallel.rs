//! Parallel test execution
//!
//! Runs each module on its own blocking worker. Every worker owns a fixture
//! manager, and results are reported back in module order.

use anyhow::{Context as _, Result};
use futures::stream::{FuturesOrdered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::executor::runner::{execute_entry, CancelToken, RunOptions};
use crate::models::RunReport;
use crate::output::Reporter;
use crate::registry::Suite;
use crate::utils::Timer;

/// Module-level parallel executor
pub struct ParallelExecutor {
    max_workers: usize,
}

impl ParallelExecutor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run all entries of the suite, at most `max_workers` modules at a time
    pub async fn run(
        &self,
        suite: &Suite,
        options: &RunOptions,
        token: &CancelToken,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        info!(
            "Running {} tests from {} modules on {} workers",
            suite.unit_count(),
            suite.entries().len(),
            self.max_workers
        );
        if let Some(timeout) = options.timeout {
            token.set_timeout(timeout);
        }

        let timer = Timer::start("parallel run");
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut pending = FuturesOrdered::new();

        reporter
            .run_started(suite.unit_count())
            .context("Failed to write report header")?;

        for entry in suite.entries().iter().cloned() {
            let semaphore = semaphore.clone();
            let options = options.clone();
            let token = token.clone();

            pending.push_back(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                debug!("Worker started for {}", entry.name());

                let partial = tokio::task::spawn_blocking(move || {
                    let mut partial = RunReport::new(options.policy);
                    let faults =
                        execute_entry(&entry, &options, &token, &mut |r| partial.record(r));
                    for fault in faults {
                        partial.add_fault(fault);
                    }
                    partial
                })
                .await
                .context("Worker panicked")?;
                Ok::<RunReport, anyhow::Error>(partial)
            }));
        }

        let mut report = RunReport::new(options.policy);
        while let Some(joined) = pending.next().await {
            let partial = joined.context("Worker task failed")??;
            for record in &partial.records {
                reporter
                    .unit_finished(record)
                    .context("Failed to write progress")?;
            }
            report.merge(partial);
        }

        report.finish(timer.stop(), token.reason());
        reporter
            .run_finished(&report)
            .context("Failed to write summary")?;
        Ok(report)
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(4)
    }
}
