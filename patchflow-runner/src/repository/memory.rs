//! In-memory run repository for tests
//!
//! Mirrors the conditional-write semantics of the real backends and lets
//! tests inject the failures the batch driver has to survive.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use patchflow_core::domain::payload::Payload;
use patchflow_core::domain::run::{Patchflow, Run, RunStatus, Visibility};
use patchflow_core::dto::run::RunUpdate;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{RunRepository, WriteOutcome};
use crate::error::StoreError;

/// Creation time of the first sample run
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A pending private run created `id` minutes after [`epoch`]
pub fn pending_run(id: i64, organization_id: i64, patchflow: &str, inputs: Payload) -> Run {
    let created_at = epoch() + Duration::minutes(id);
    Run {
        id,
        organization_id,
        visibility: Visibility::Private,
        status: RunStatus::Pending,
        inputs,
        outputs: None,
        error: None,
        created_at,
        updated_at: created_at,
        patchflow: Some(Patchflow {
            name: None,
            graph: json!({ "name": patchflow }),
        }),
    }
}

#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: Mutex<Vec<Run>>,
    unreachable: AtomicBool,
    failing_writes: Mutex<Vec<(i64, RunStatus)>>,
    taken_after_fetch: Mutex<HashSet<i64>>,
    writes: Mutex<Vec<(i64, RunUpdate)>>,
}

impl InMemoryRunRepository {
    pub fn new(runs: Vec<Run>) -> Self {
        Self {
            runs: Mutex::new(runs),
            ..Default::default()
        }
    }

    /// Makes every fetch fail as if the store were down
    pub fn set_unreachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    /// Makes writes of `status` to `run_id` fail
    pub fn fail_writes_to(&self, run_id: i64, status: RunStatus) {
        self.failing_writes.lock().unwrap().push((run_id, status));
    }

    /// Simulates another invocation claiming `run_id` right after a fetch
    pub fn take_after_fetch(&self, run_id: i64) {
        self.taken_after_fetch.lock().unwrap().insert(run_id);
    }

    pub fn get(&self, run_id: i64) -> Option<Run> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == run_id)
            .cloned()
    }

    /// Applied writes, in order
    pub fn writes(&self) -> Vec<(i64, RunUpdate)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn fetch_pending(
        &self,
        organization_id: i64,
        limit: usize,
    ) -> Result<Vec<Run>, StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection refused".to_string()));
        }

        let mut runs = self.runs.lock().unwrap();
        let mut pending: Vec<Run> = runs
            .iter()
            .filter(|r| r.is_eligible(organization_id))
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.created_at, r.id));
        pending.truncate(limit);

        let taken = self.taken_after_fetch.lock().unwrap();
        for run in runs.iter_mut().filter(|r| taken.contains(&r.id)) {
            run.status = RunStatus::Running;
        }

        Ok(pending)
    }

    async fn update_run(
        &self,
        run_id: i64,
        update: &RunUpdate,
    ) -> Result<WriteOutcome, StoreError> {
        let failing = self.failing_writes.lock().unwrap();
        if failing.contains(&(run_id, update.status.clone())) {
            return Err(StoreError::Query(format!("injected failure for run {}", run_id)));
        }

        let mut runs = self.runs.lock().unwrap();
        let Some(run) = runs.iter_mut().find(|r| r.id == run_id) else {
            return Ok(WriteOutcome::Stale);
        };

        if let Some(expected) = &update.expected_status {
            if &run.status != expected {
                return Ok(WriteOutcome::Stale);
            }
        }

        run.status = update.status.clone();
        if let Some(outputs) = &update.outputs {
            run.outputs = Some(outputs.clone());
        }
        run.error = update.error.clone();
        run.updated_at = update.updated_at;

        self.writes.lock().unwrap().push((run_id, update.clone()));
        Ok(WriteOutcome::Applied)
    }
}
