//! Run DTOs
//!
//! Data transfer objects for run status writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::payload::Payload;
use crate::domain::run::RunStatus;

/// Conditional status write for a single run
///
/// Backends apply the update only while the stored status still equals
/// `expected_status`. The guard is not part of the serialized body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    /// Status to write
    pub status: RunStatus,

    /// Status the row must currently have for the write to apply
    #[serde(skip)]
    pub expected_status: Option<RunStatus>,

    /// Parsed outputs, only set on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Payload>,

    /// Failure detail; `None` clears any previous error
    pub error: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl RunUpdate {
    /// Claims a pending run for execution
    pub fn claim(now: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Running,
            expected_status: Some(RunStatus::Pending),
            outputs: None,
            error: None,
            updated_at: now,
        }
    }

    /// Marks a claimed run as completed with its outputs
    pub fn completed(outputs: Payload, now: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Completed,
            expected_status: Some(RunStatus::Running),
            outputs: Some(outputs),
            error: None,
            updated_at: now,
        }
    }

    /// Marks a claimed run as failed with an error detail
    pub fn failed(error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Failed,
            expected_status: Some(RunStatus::Running),
            outputs: None,
            error: Some(error.into()),
            updated_at: now,
        }
    }
}
