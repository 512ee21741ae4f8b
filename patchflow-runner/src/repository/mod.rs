//! Repository layer
//!
//! Repositories abstract the run table. Two backends satisfy the same
//! contract: a direct Postgres connection and the managed backend's table
//! API. Neither contains business logic; the selector, recorder and batch
//! driver decide what to read and write.
//!
//! Every write is conditional on the run's current status, so a run another
//! invocation already moved on is reported as [`WriteOutcome::Stale`] instead
//! of being overwritten.

#[cfg(test)]
pub mod memory;
mod postgres;
mod rest;

use async_trait::async_trait;
use patchflow_core::domain::run::Run;
use patchflow_core::dto::run::RunUpdate;

use crate::error::StoreError;

pub use postgres::PgRunRepository;
pub use rest::RestRunRepository;

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The row matched the guard and was updated
    Applied,
    /// The row's status no longer matched the guard; nothing was written
    Stale,
}

/// Repository trait for the run table
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Fetches pending private runs of an organization
    ///
    /// Runs are returned oldest first (by `created_at`, then `id`), at most
    /// `limit` of them.
    async fn fetch_pending(
        &self,
        organization_id: i64,
        limit: usize,
    ) -> Result<Vec<Run>, StoreError>;

    /// Applies an update to one run
    ///
    /// # Arguments
    /// * `run_id` - The ID of the run to update
    /// * `update` - The fields to write and the status guard
    async fn update_run(
        &self,
        run_id: i64,
        update: &RunUpdate,
    ) -> Result<WriteOutcome, StoreError>;
}
