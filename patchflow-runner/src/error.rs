//! Store error types
//!
//! Store failures are split by whether the backend could be reached at all.
//! Both kinds are fatal when fetching the batch; on a per-run write they are
//! logged and the batch moves on.

use thiserror::Error;

/// Errors returned by a run repository
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached
    #[error("store unreachable: {0}")]
    Connection(String),

    /// The store was reached but rejected or failed the operation
    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => StoreError::Connection(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

impl From<patchflow_client::ClientError> for StoreError {
    fn from(err: patchflow_client::ClientError) -> Self {
        if err.is_connection() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Query(err.to_string())
        }
    }
}
