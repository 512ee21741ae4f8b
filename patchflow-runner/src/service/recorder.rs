//! Result recorder
//!
//! Writes run status transitions back to the store. In dry-run mode nothing
//! is written; the intended write is logged and reported as applied.

use chrono::Utc;
use patchflow_core::domain::run::Run;
use patchflow_core::dto::run::RunUpdate;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::StoreError;
use crate::execution::ExecutionOutcome;
use crate::repository::{RunRepository, WriteOutcome};

pub struct ResultRecorder {
    repository: Arc<dyn RunRepository>,
    dry_run: bool,
    excerpt_chars: usize,
}

impl ResultRecorder {
    pub fn new(repository: Arc<dyn RunRepository>, dry_run: bool, excerpt_chars: usize) -> Self {
        Self {
            repository,
            dry_run,
            excerpt_chars,
        }
    }

    pub fn from_config(repository: Arc<dyn RunRepository>, config: &Config) -> Self {
        Self::new(repository, config.read_only, config.error_excerpt_chars)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Moves a pending run to running
    ///
    /// Returns [`WriteOutcome::Stale`] when the run is no longer pending,
    /// meaning another invocation got to it first.
    pub async fn claim(&self, run: &Run) -> Result<WriteOutcome, StoreError> {
        self.write(run, RunUpdate::claim(Utc::now())).await
    }

    /// Records the terminal status for an executed run
    pub async fn record(
        &self,
        run: &Run,
        outcome: ExecutionOutcome,
    ) -> Result<WriteOutcome, StoreError> {
        let update = outcome.into_update(Utc::now(), self.excerpt_chars);
        self.write(run, update).await
    }

    async fn write(&self, run: &Run, update: RunUpdate) -> Result<WriteOutcome, StoreError> {
        if self.dry_run {
            info!(
                run_id = run.id,
                "Read-only mode, would update status to {}: {:?}", update.status, update
            );
            return Ok(WriteOutcome::Applied);
        }

        let outcome = self.repository.update_run(run.id, &update).await?;
        if outcome == WriteOutcome::Applied {
            debug!(run_id = run.id, "Status updated to {}", update.status);
        }
        Ok(outcome)
    }
}
