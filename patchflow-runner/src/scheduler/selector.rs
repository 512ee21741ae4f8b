//! Run selector
//!
//! Fetches the pending private runs of the configured organization and
//! re-checks eligibility on the returned rows, so a backend whose filter
//! drifts can never hand the batch a run it must not touch.

use patchflow_core::domain::run::Run;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::repository::RunRepository;

pub struct RunSelector {
    repository: Arc<dyn RunRepository>,
    organization_id: i64,
    limit: usize,
}

impl RunSelector {
    pub fn new(repository: Arc<dyn RunRepository>, organization_id: i64, limit: usize) -> Self {
        Self {
            repository,
            organization_id,
            limit,
        }
    }

    pub fn organization_id(&self) -> i64 {
        self.organization_id
    }

    /// Returns the runs to process, oldest first
    ///
    /// Each run appears at most once. Rows that are not pending, private and
    /// owned by the organization are dropped with a warning.
    pub async fn select(&self) -> Result<Vec<Run>, StoreError> {
        let fetched = self
            .repository
            .fetch_pending(self.organization_id, self.limit)
            .await?;

        debug!("Store returned {} row(s)", fetched.len());

        let mut seen = HashSet::new();
        let mut runs = Vec::with_capacity(fetched.len());

        for run in fetched {
            if !run.is_eligible(self.organization_id) {
                warn!(
                    run_id = run.id,
                    status = %run.status,
                    organization_id = run.organization_id,
                    "Store returned an ineligible run, skipping it"
                );
                continue;
            }
            if !seen.insert(run.id) {
                warn!(run_id = run.id, "Store returned a run twice, skipping the duplicate");
                continue;
            }
            runs.push(run);
        }

        runs.truncate(self.limit);
        Ok(runs)
    }
}
