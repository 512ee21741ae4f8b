//! Postgres run repository
//!
//! Talks to the run table over a direct database connection.
//!
//! Reads cast every column, so any compatible column type decodes. Writes
//! assume `status` is `text` and `outputs` is `jsonb`; an enum status column
//! would need an explicit cast in the `UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patchflow_core::domain::payload::Payload;
use patchflow_core::domain::run::{Patchflow, Run, RunStatus, Visibility};
use patchflow_core::dto::run::RunUpdate;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use super::{RunRepository, WriteOutcome};
use crate::config::PostgresConfig;
use crate::error::StoreError;

/// Pending private runs of one organization, oldest first
const FETCH_PENDING_SQL: &str = r#"
    SELECT r.id::BIGINT AS id,
           r.organization_id::BIGINT AS organization_id,
           r.status::TEXT AS status,
           r.inputs::JSONB AS inputs,
           r.outputs::JSONB AS outputs,
           r.error::TEXT AS error,
           r.meta::JSONB AS meta,
           r.created_at::TIMESTAMPTZ AS created_at,
           r.updated_at::TIMESTAMPTZ AS updated_at,
           p.name::TEXT AS patchflow_name,
           p.graph::JSONB AS patchflow_graph
    FROM custom_patchflow_runs r
    LEFT JOIN custom_patchflows p ON r.custom_patchflow_id = p.id
    WHERE r.status::TEXT = $1
      AND r.organization_id = $2
      AND r.meta->>'is_private' = 'true'
    ORDER BY r.created_at ASC, r.id ASC
    LIMIT $3
"#;

/// Conditional status write; `$6` is the expected current status, or NULL
const UPDATE_RUN_SQL: &str = r#"
    UPDATE custom_patchflow_runs
    SET status = $1,
        outputs = COALESCE($2::JSONB, outputs),
        error = $3,
        updated_at = $4
    WHERE id = $5
      AND ($6::TEXT IS NULL OR status::TEXT = $6)
"#;

/// Postgres implementation of RunRepository
pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    /// Creates a repository over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a repository from connection parameters
    ///
    /// The pool connects lazily, so an unreachable database surfaces on the
    /// first query rather than here.
    pub fn connect(config: &PostgresConfig) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(config.connect_options());

        Self::new(pool)
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn fetch_pending(
        &self,
        organization_id: i64,
        limit: usize,
    ) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query_as::<_, RunRow>(FETCH_PENDING_SQL)
            .bind(RunStatus::Pending.as_str())
            .bind(organization_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Run::from).collect())
    }

    async fn update_run(
        &self,
        run_id: i64,
        update: &RunUpdate,
    ) -> Result<WriteOutcome, StoreError> {
        let result = sqlx::query(UPDATE_RUN_SQL)
            .bind(update.status.as_str())
            .bind(update.outputs.clone().map(Payload::into_value))
            .bind(update.error.as_deref())
            .bind(update.updated_at)
            .bind(run_id)
            .bind(update.expected_status.as_ref().map(RunStatus::as_str))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            Ok(WriteOutcome::Applied)
        } else {
            Ok(WriteOutcome::Stale)
        }
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    organization_id: i64,
    status: String,
    inputs: Option<JsonValue>,
    outputs: Option<JsonValue>,
    error: Option<String>,
    meta: Option<JsonValue>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    patchflow_name: Option<String>,
    patchflow_graph: Option<JsonValue>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        let inputs = match row.inputs.map(Payload::from_value) {
            Some(Some(payload)) => payload,
            Some(None) => {
                tracing::warn!(run_id = row.id, "Run has non-object inputs, ignoring them");
                Payload::new()
            }
            None => Payload::new(),
        };

        let patchflow = match (row.patchflow_name, row.patchflow_graph) {
            (None, None) => None,
            (name, graph) => Some(Patchflow {
                name,
                graph: graph.unwrap_or(JsonValue::Null),
            }),
        };

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
            patchflow,
        }
    }
}
