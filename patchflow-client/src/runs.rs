//! Run table endpoints

use chrono::{DateTime, Utc};
use patchflow_core::domain::payload::Payload;
use patchflow_core::domain::run::{Patchflow, Run, RunStatus, Visibility};
use patchflow_core::dto::run::RunUpdate;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::{Session, handle_response};

/// Table holding patchflow runs
pub const RUNS_TABLE: &str = "custom_patchflow_runs";

/// Column selection for run reads, embedding the run's patchflow definition
const RUN_SELECT: &str = "*,patchflow:custom_patchflows(name,graph)";

/// Filter for listing runs
#[derive(Debug, Clone, PartialEq)]
pub struct RunQuery {
    pub organization_id: i64,
    pub status: RunStatus,
    /// Restrict to runs whose `meta.is_private` flag is set
    pub private_only: bool,
    pub limit: usize,
}

impl RunQuery {
    /// Pending private runs of an organization, oldest first
    pub fn pending(organization_id: i64, limit: usize) -> Self {
        Self {
            organization_id,
            status: RunStatus::Pending,
            private_only: true,
            limit,
        }
    }

    /// Query-string parameters for the table endpoint
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("select", RUN_SELECT.to_string()),
            ("status", format!("eq.{}", self.status)),
            ("organization_id", format!("eq.{}", self.organization_id)),
        ];

        if self.private_only {
            params.push(("meta->>is_private", "eq.true".to_string()));
        }

        params.push(("order", "created_at.asc,id.asc".to_string()));
        params.push(("limit", self.limit.to_string()));
        params
    }
}

/// Run row as returned by the table API
#[derive(Debug, Clone, Deserialize)]
pub struct RunRow {
    pub id: i64,
    pub organization_id: i64,
    pub status: String,
    #[serde(default)]
    pub inputs: Option<JsonValue>,
    #[serde(default)]
    pub outputs: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub meta: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub patchflow: Option<PatchflowRow>,
}

/// Embedded patchflow definition
#[derive(Debug, Clone, Deserialize)]
pub struct PatchflowRow {
    pub name: Option<String>,
    #[serde(default)]
    pub graph: Option<JsonValue>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        let inputs = row
            .inputs
            .and_then(|value| {
                let payload = Payload::from_value(value);
                if payload.is_none() {
                    tracing::warn!("Run {} has non-object inputs, ignoring them", row.id);
                }
                payload
            })
            .unwrap_or_default();

        Run {
            id: row.id,
            organization_id: row.organization_id,
            visibility: Visibility::from_meta(row.meta.as_ref()),
            status: RunStatus::from(row.status),
            inputs,
            outputs: row.outputs.and_then(Payload::from_value),
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at.unwrap_or(row.created_at),
            patchflow: row.patchflow.map(|p| Patchflow {
                name: p.name,
                graph: p.graph.unwrap_or(JsonValue::Null),
            }),
        }
    }
}

impl Session {
    // =============================================================================
    // Run Table
    // =============================================================================

    /// List runs matching a query
    ///
    /// # Arguments
    /// * `query` - The filter, ordering and limit to apply
    ///
    /// # Returns
    /// The matching rows in table order
    pub async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunRow>> {
        let url = self.table_url(RUNS_TABLE);
        let response = self
            .authorize(self.client.get(&url))
            .query(&query.params())
            .send()
            .await?;

        handle_response(response).await
    }

    /// Apply an update to one run
    ///
    /// When `update.expected_status` is set the write is conditional on the
    /// row still having that status.
    ///
    /// # Arguments
    /// * `run_id` - The ID of the run to update
    /// * `update` - The fields to write
    ///
    /// # Returns
    /// The number of rows the write touched (0 or 1)
    pub async fn update_run(&self, run_id: i64, update: &RunUpdate) -> Result<usize> {
        let url = self.table_url(RUNS_TABLE);
        let response = self
            .authorize(self.client.patch(&url))
            .query(&update_params(run_id, update))
            .header("Prefer", "return=representation")
            .json(update)
            .send()
            .await?;

        let rows: Vec<JsonValue> = handle_response(response).await?;
        Ok(rows.len())
    }
}

/// Row filter for a conditional update
fn update_params(run_id: i64, update: &RunUpdate) -> Vec<(&'static str, String)> {
    let mut params = vec![("id", format!("eq.{}", run_id)), ("select", "id".to_string())];

    if let Some(expected) = &update.expected_status {
        params.push(("status", format!("eq.{}", expected)));
    }

    params
}
