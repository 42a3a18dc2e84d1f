//! Schedules test runs across enabled EAP types.
//!
//! Sequential mode runs one spec at a time in configuration order. Parallel
//! mode uses a fixed-size worker pool bounded by a semaphore; results are
//! collected as they complete and order-normalized back to configuration
//! order, so report ordering is deterministic either way.
//!
//! Invariant: every spec handed in yields exactly one [`RunResult`], even
//! when a worker panics or a log file cannot be opened. One spec's failure
//! never aborts its siblings.

use crate::config::{ExecutionConfig, MAX_WORKERS_CEILING, TestSpec};
use crate::executor::TestExecutor;
use crate::logs::LogManager;
use crate::report::{RunResult, RunStatus};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    parallel: bool,
    max_workers: usize,
}

impl Scheduler {
    pub fn new(execution: &ExecutionConfig) -> Self {
        Self {
            parallel: execution.parallel,
            max_workers: execution.max_workers.clamp(1, MAX_WORKERS_CEILING),
        }
    }

    /// Runs every spec and returns one result per spec, in the order the
    /// specs were given.
    pub async fn run(
        &self,
        executor: Arc<TestExecutor>,
        specs: Vec<TestSpec>,
        logs: Arc<LogManager>,
    ) -> Vec<RunResult> {
        if self.parallel && specs.len() > 1 {
            info!(workers = self.max_workers, "Running tests in parallel");
            self.run_parallel(executor, specs, logs).await
        } else {
            info!("Running tests sequentially");
            Self::run_sequential(executor, specs, logs).await
        }
    }

    async fn run_sequential(
        executor: Arc<TestExecutor>,
        specs: Vec<TestSpec>,
        logs: Arc<LogManager>,
    ) -> Vec<RunResult> {
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let result = run_one(&executor, &spec, &logs).await;
            logs.append_suite(&format!(
                "{}: {} ({:.2}s)",
                result.eap_type,
                result.status.as_str(),
                result.duration.as_secs_f64()
            ));
            results.push(result);
        }
        results
    }

    async fn run_parallel(
        &self,
        executor: Arc<TestExecutor>,
        specs: Vec<TestSpec>,
        logs: Arc<LogManager>,
    ) -> Vec<RunResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks: JoinSet<(usize, RunResult)> = JoinSet::new();

        for (index, spec) in specs.iter().cloned().enumerate() {
            let executor = Arc::clone(&executor);
            let logs = Arc::clone(&logs);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // Closed only if the set is shut down; treat as cancellation.
                let Ok(_permit) = semaphore.acquire().await else {
                    return (
                        index,
                        RunResult::skipped(spec.eap_type, RunStatus::Error, "run cancelled"),
                    );
                };
                let result = run_one(&executor, &spec, &logs).await;
                logs.append_suite(&format!(
                    "{}: {} ({:.2}s)",
                    result.eap_type,
                    result.status.as_str(),
                    result.duration.as_secs_f64()
                ));
                (index, result)
            });
        }

        let mut slots: Vec<Option<RunResult>> = (0..specs.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => warn!(error = %err, "Test worker failed to join"),
            }
        }

        // Order-normalize back to configuration order. A slot left empty by
        // a panicked worker still yields a RunResult rather than a silent
        // drop.
        slots
            .into_iter()
            .zip(specs)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    RunResult::skipped(
                        spec.eap_type,
                        RunStatus::Error,
                        "test worker terminated unexpectedly",
                    )
                })
            })
            .collect()
    }
}

async fn run_one(executor: &TestExecutor, spec: &TestSpec, logs: &LogManager) -> RunResult {
    match logs.create_run_log(spec.eap_type) {
        Ok(log) => executor.execute(spec, log).await,
        Err(err) => RunResult::skipped(
            spec.eap_type,
            RunStatus::Error,
            format!("failed to open run log: {err}"),
        ),
    }
}
