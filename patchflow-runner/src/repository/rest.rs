//! Table API run repository
//!
//! Talks to the run table through the managed backend's REST interface using
//! a session acquired once at startup.

use async_trait::async_trait;
use patchflow_client::{AuthClient, RunQuery, Session};
use patchflow_core::domain::run::Run;
use patchflow_core::dto::run::RunUpdate;
use tracing::info;

use super::{RunRepository, WriteOutcome};
use crate::config::RestConfig;
use crate::error::StoreError;

/// Table API implementation of RunRepository
pub struct RestRunRepository {
    session: Session,
}

impl RestRunRepository {
    /// Creates a repository over an authenticated session
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Signs in with the configured credentials
    pub async fn sign_in(config: &RestConfig) -> Result<Self, StoreError> {
        let session = AuthClient::new(&config.url, &config.api_key)
            .sign_in(&config.email, &config.password)
            .await?;

        info!("Signed in to {} as {}", session.base_url(), config.email);
        Ok(Self::new(session))
    }
}

#[async_trait]
impl RunRepository for RestRunRepository {
    async fn fetch_pending(
        &self,
        organization_id: i64,
        limit: usize,
    ) -> Result<Vec<Run>, StoreError> {
        let rows = self
            .session
            .list_runs(&RunQuery::pending(organization_id, limit))
            .await?;

        Ok(rows.into_iter().map(Run::from).collect())
    }

    async fn update_run(
        &self,
        run_id: i64,
        update: &RunUpdate,
    ) -> Result<WriteOutcome, StoreError> {
        let touched = self.session.update_run(run_id, update).await?;

        if touched > 0 {
            Ok(WriteOutcome::Applied)
        } else {
            Ok(WriteOutcome::Stale)
        }
    }
}
