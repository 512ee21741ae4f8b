//! Batch driver
//!
//! Runs one invocation: select the pending runs, then for each of them in
//! order claim it, execute it and record the result. Runs are processed
//! sequentially; a failure on one run never stops the others.
//!
//! Only a failed fetch is fatal. Everything after it is reported in the
//! returned [`BatchSummary`] and the logs.

use anyhow::{Context, Result};
use patchflow_core::domain::run::Run;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::selector::RunSelector;
use crate::config::Config;
use crate::repository::{RunRepository, WriteOutcome};
use crate::service::{ExecutionService, ProcessExecutionService, ResultRecorder};

/// Counters for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Runs returned by the selector
    pub fetched: usize,
    /// Executions that succeeded
    pub completed: usize,
    /// Executions that failed or could not be launched
    pub failed: usize,
    /// Runs another invocation claimed first
    pub skipped: usize,
    /// Runs left pending because the batch deadline passed
    pub deferred: usize,
    /// Claims or result writes that did not go through
    pub persistence_errors: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} completed={} failed={} skipped={} deferred={} persistence_errors={}",
            self.fetched,
            self.completed,
            self.failed,
            self.skipped,
            self.deferred,
            self.persistence_errors
        )
    }
}

pub struct BatchDriver {
    selector: RunSelector,
    executor: Arc<dyn ExecutionService>,
    recorder: ResultRecorder,
    deadline: Option<Duration>,
}

impl BatchDriver {
    pub fn new(
        selector: RunSelector,
        executor: Arc<dyn ExecutionService>,
        recorder: ResultRecorder,
    ) -> Self {
        Self {
            selector,
            executor,
            recorder,
            deadline: None,
        }
    }

    /// Stops starting new runs once the batch has been going for `deadline`
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Wires the selector, process executor and recorder from configuration
    pub fn from_config(config: &Config, repository: Arc<dyn RunRepository>) -> Self {
        let selector = RunSelector::new(
            Arc::clone(&repository),
            config.organization_id,
            config.batch_limit,
        );
        let executor: Arc<dyn ExecutionService> =
            Arc::new(ProcessExecutionService::from_config(config));
        let recorder = ResultRecorder::from_config(repository, config);

        Self::new(selector, executor, recorder).with_deadline(config.batch_deadline)
    }

    /// Processes one batch
    ///
    /// # Errors
    /// Fails only when the pending runs cannot be fetched. No run is executed
    /// in that case.
    pub async fn run(&self) -> Result<BatchSummary> {
        let batch_id = Uuid::new_v4();
        let span = info_span!(
            "batch",
            %batch_id,
            organization_id = self.selector.organization_id(),
            dry_run = self.recorder.is_dry_run()
        );

        self.run_batch().instrument(span).await
    }

    async fn run_batch(&self) -> Result<BatchSummary> {
        let started = Instant::now();

        let runs = self
            .selector
            .select()
            .await
            .context("Failed to fetch pending runs")?;

        let mut summary = BatchSummary {
            fetched: runs.len(),
            ..Default::default()
        };

        if runs.is_empty() {
            info!("No pending runs");
            return Ok(summary);
        }

        info!("Found {} pending run(s)", runs.len());

        for (index, run) in runs.iter().enumerate() {
            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    summary.deferred = runs.len() - index;
                    warn!(
                        "Batch deadline of {:?} reached, leaving {} run(s) pending",
                        deadline, summary.deferred
                    );
                    break;
                }
            }

            let span = info_span!(
                "run",
                run_id = run.id,
                patchflow = run.patchflow_name().unwrap_or("<none>")
            );
            self.process(run, &mut summary).instrument(span).await;
        }

        info!("Batch finished: {}", summary);
        Ok(summary)
    }

    /// Claims, executes and records a single run
    async fn process(&self, run: &Run, summary: &mut BatchSummary) {
        match self.recorder.claim(run).await {
            Ok(WriteOutcome::Applied) => {}
            Ok(WriteOutcome::Stale) => {
                info!(stage = "claim", "Run is no longer pending, skipping it");
                summary.skipped += 1;
                return;
            }
            Err(e) => {
                error!(
                    stage = "claim",
                    connection = e.is_connection(),
                    "Failed to claim run, not executing it: {}",
                    e
                );
                summary.persistence_errors += 1;
                return;
            }
        }

        info!(stage = "execute", "Executing run");
        let outcome = self.executor.execute(run).await;
        let label = outcome.label();

        if outcome.is_success() {
            summary.completed += 1;
        } else {
            summary.failed += 1;
        }

        match self.recorder.record(run, outcome).await {
            Ok(WriteOutcome::Applied) => {
                info!(stage = "record", outcome = label, "Recorded run result");
            }
            Ok(WriteOutcome::Stale) => {
                error!(
                    stage = "record",
                    outcome = label,
                    "Run changed status during execution, result not recorded"
                );
                summary.persistence_errors += 1;
            }
            Err(e) => {
                error!(
                    stage = "record",
                    outcome = label,
                    "Failed to record result, run is left running: {}",
                    e
                );
                summary.persistence_errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionOutcome;
    use crate::repository::memory::{InMemoryRunRepository, epoch, pending_run};
    use async_trait::async_trait;
    use patchflow_core::domain::payload::Payload;
    use patchflow_core::domain::run::{RunStatus, Visibility};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Executor driven by each run's inputs
    ///
    /// `exit_code` selects a failure, `sleep_ms` delays the result.
    #[derive(Default)]
    struct ScriptedExecutor {
        executed: Mutex<Vec<i64>>,
    }

    impl ScriptedExecutor {
        fn executed(&self) -> Vec<i64> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutionService for ScriptedExecutor {
        async fn execute(&self, run: &Run) -> ExecutionOutcome {
            self.executed.lock().unwrap().push(run.id);

            if let Some(ms) = run.inputs.get("sleep_ms").and_then(|v| v.as_u64()) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }

            match run.inputs.get("exit_code").and_then(|v| v.as_i64()) {
                Some(code) => ExecutionOutcome::Failure {
                    exit_code: code as i32,
                    output: "boom".to_string(),
                },
                None => ExecutionOutcome::Success {
                    outputs: [("log", json!("done"))].into_iter().collect(),
                },
            }
        }
    }

    fn driver(
        repository: &Arc<InMemoryRunRepository>,
        executor: &Arc<ScriptedExecutor>,
        dry_run: bool,
    ) -> BatchDriver {
        BatchDriver::new(
            RunSelector::new(repository.clone(), 42, 10),
            executor.clone(),
            ResultRecorder::new(repository.clone(), dry_run, 2000),
        )
    }

    fn failing_run(id: i64, exit_code: i64) -> Run {
        pending_run(
            id,
            42,
            "AutoFix",
            [("exit_code", json!(exit_code))].into_iter().collect(),
        )
    }

    #[tokio::test]
    async fn test_completed_and_failed_runs_with_real_process() {
        let dir = TempDir::new().unwrap();
        let ok = dir.path().join("ok.sh");
        let fail = dir.path().join("fail.sh");
        std::fs::write(&ok, "echo done\n").unwrap();
        std::fs::write(&fail, "echo oops >&2\nexit 1\n").unwrap();

        let repository = Arc::new(InMemoryRunRepository::new(vec![
            pending_run(1, 42, &ok.to_string_lossy(), Payload::new()),
            pending_run(2, 42, &fail.to_string_lossy(), Payload::new()),
        ]));
        let driver = BatchDriver::new(
            RunSelector::new(repository.clone(), 42, 10),
            Arc::new(ProcessExecutionService::new("/bin/sh", dir.path())),
            ResultRecorder::new(repository.clone(), false, 2000),
        );

        let summary = driver.run().await.unwrap();

        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.persistence_errors, 0);

        let a = repository.get(1).unwrap();
        assert_eq!(a.status, RunStatus::Completed);
        assert_eq!(a.outputs.unwrap().get_str("log"), Some("done\n"));
        assert!(a.updated_at > epoch() + chrono::Duration::minutes(1));

        let b = repository.get(2).unwrap();
        assert_eq!(b.status, RunStatus::Failed);
        assert!(b.error.unwrap().contains("exited with code 1"));
        assert!(b.updated_at > epoch() + chrono::Duration::minutes(2));
    }

    #[tokio::test]
    async fn test_each_eligible_run_executed_once() {
        let mut public = pending_run(2, 42, "AutoFix", Payload::new());
        public.visibility = Visibility::Public;
        let other_org = pending_run(3, 7, "AutoFix", Payload::new());
        let mut running = pending_run(4, 42, "AutoFix", Payload::new());
        running.status = RunStatus::Running;

        let repository = Arc::new(InMemoryRunRepository::new(vec![
            pending_run(5, 42, "AutoFix", Payload::new()),
            public,
            other_org,
            running,
            failing_run(1, 2),
        ]));
        let executor = Arc::new(ScriptedExecutor::default());

        let summary = driver(&repository, &executor, false).run().await.unwrap();

        assert_eq!(executor.executed(), vec![1, 5]);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(repository.get(2).unwrap().status, RunStatus::Pending);
        assert_eq!(repository.get(3).unwrap().status, RunStatus::Pending);
        assert_eq!(repository.get(4).unwrap().status, RunStatus::Running);

        // Every processed run got exactly a claim and a terminal write.
        let written: Vec<(i64, RunStatus)> = repository
            .writes()
            .into_iter()
            .map(|(id, update)| (id, update.status))
            .collect();
        assert_eq!(
            written,
            vec![
                (1, RunStatus::Running),
                (1, RunStatus::Failed),
                (5, RunStatus::Running),
                (5, RunStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_executes_without_writing() {
        let repository = Arc::new(InMemoryRunRepository::new(vec![
            pending_run(1, 42, "AutoFix", Payload::new()),
            failing_run(2, 1),
        ]));
        let executor = Arc::new(ScriptedExecutor::default());

        let summary = driver(&repository, &executor, true).run().await.unwrap();

        assert_eq!(executor.executed(), vec![1, 2]);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert!(repository.writes().is_empty());
        assert_eq!(repository.get(1).unwrap().status, RunStatus::Pending);
        assert_eq!(repository.get(2).unwrap().status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_fatal() {
        let repository = Arc::new(InMemoryRunRepository::new(vec![pending_run(
            1,
            42,
            "AutoFix",
            Payload::new(),
        )]));
        repository.set_unreachable();
        let executor = Arc::new(ScriptedExecutor::default());

        let err = driver(&repository, &executor, false).run().await.unwrap_err();

        assert!(err.to_string().contains("Failed to fetch pending runs"));
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let repository = Arc::new(InMemoryRunRepository::default());
        let executor = Arc::new(ScriptedExecutor::default());

        let summary = driver(&repository, &executor, false).run().await.unwrap();

        assert_eq!(summary, BatchSummary::default());
    }

    #[tokio::test]
    async fn test_run_claimed_elsewhere_is_skipped() {
        let repository = Arc::new(InMemoryRunRepository::new(vec![
            pending_run(1, 42, "AutoFix", Payload::new()),
            pending_run(2, 42, "AutoFix", Payload::new()),
        ]));
        repository.take_after_fetch(1);
        let executor = Arc::new(ScriptedExecutor::default());

        let summary = driver(&repository, &executor, false).run().await.unwrap();

        assert_eq!(executor.executed(), vec![2]);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.completed, 1);
    }

    #[tokio::test]
    async fn test_write_failures_do_not_stop_the_batch() {
        let repository = Arc::new(InMemoryRunRepository::new(vec![
            pending_run(1, 42, "AutoFix", Payload::new()),
            pending_run(2, 42, "AutoFix", Payload::new()),
            pending_run(3, 42, "AutoFix", Payload::new()),
        ]));
        repository.fail_writes_to(1, RunStatus::Running);
        repository.fail_writes_to(2, RunStatus::Completed);
        let executor = Arc::new(ScriptedExecutor::default());

        let summary = driver(&repository, &executor, false).run().await.unwrap();

        // A failed claim means the run is never executed.
        assert_eq!(executor.executed(), vec![2, 3]);
        assert_eq!(summary.persistence_errors, 2);
        assert_eq!(repository.get(1).unwrap().status, RunStatus::Pending);
        assert_eq!(repository.get(2).unwrap().status, RunStatus::Running);
        assert_eq!(repository.get(3).unwrap().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_deadline_defers_remaining_runs() {
        let slow: Payload = [("sleep_ms", json!(150))].into_iter().collect();
        let repository = Arc::new(InMemoryRunRepository::new(vec![
            pending_run(1, 42, "AutoFix", slow),
            pending_run(2, 42, "AutoFix", Payload::new()),
            pending_run(3, 42, "AutoFix", Payload::new()),
        ]));
        let executor = Arc::new(ScriptedExecutor::default());

        let summary = driver(&repository, &executor, false)
            .with_deadline(Some(Duration::from_millis(100)))
            .run()
            .await
            .unwrap();

        assert_eq!(executor.executed(), vec![1]);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.deferred, 2);
        assert_eq!(repository.get(2).unwrap().status, RunStatus::Pending);
        assert_eq!(repository.get(3).unwrap().status, RunStatus::Pending);
    }

    #[test]
    fn test_summary_display() {
        let summary = BatchSummary {
            fetched: 3,
            completed: 1,
            failed: 1,
            skipped: 1,
            ..Default::default()
        };

        assert_eq!(
            summary.to_string(),
            "fetched=3 completed=1 failed=1 skipped=1 deferred=0 persistence_errors=0"
        );
    }
}
