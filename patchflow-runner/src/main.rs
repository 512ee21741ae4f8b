//! Patchflow Runner
//!
//! A one-shot worker that executes the pending private patchflow runs of one
//! organization and records their results.
//!
//! Architecture:
//! - Configuration: Load settings from the environment once at startup
//! - Repositories: Run table access over Postgres or the table REST API
//! - Services: Business logic (process execution, result recording)
//! - Scheduler: Run selection and the per-run claim/execute/record cycle
//!
//! Each invocation processes a single batch and exits. The exit code is
//! non-zero only when the pending runs could not be fetched; per-run failures
//! are recorded on the runs themselves.

mod config;
mod error;
mod execution;
mod repository;
mod scheduler;
mod service;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, StoreConfig};
use crate::repository::{PgRunRepository, RestRunRepository, RunRepository};
use crate::scheduler::BatchDriver;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the process environment still applies.
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "patchflow_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Patchflow Runner");
    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to load .env file: {}", e),
    }

    let mut config = load_config()?;
    info!(
        "Loaded configuration: store={}, organization_id={}, read_only={}, batch_limit={}",
        config.store.kind(),
        config.organization_id,
        config.read_only,
        config.batch_limit
    );

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {}",
                config.output_dir.display()
            )
        })?;
    // The executable runs inside the output directory, so its output file
    // path must not be relative to ours.
    config.output_dir = tokio::fs::canonicalize(&config.output_dir)
        .await
        .context("Failed to resolve output directory")?;

    let repository = connect_store(&config.store).await?;
    info!("Run store initialized");

    let driver = BatchDriver::from_config(&config, repository);

    match driver.run().await {
        Ok(summary) => {
            info!("Runner finished: {}", summary);
            Ok(())
        }
        Err(e) => {
            error!("Batch aborted: {:#}", e);
            Err(e)
        }
    }
}

/// Loads and validates configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    Ok(config)
}

/// Opens the configured run store
///
/// Signing in to the REST backend happens here, so bad credentials fail the
/// invocation before any run is touched.
async fn connect_store(store: &StoreConfig) -> Result<Arc<dyn RunRepository>> {
    let repository: Arc<dyn RunRepository> = match store {
        StoreConfig::Postgres(pg) => {
            info!("Using Postgres at {}:{}/{}", pg.host, pg.port, pg.database);
            Arc::new(PgRunRepository::connect(pg))
        }
        StoreConfig::Rest(rest) => {
            info!("Using table API at {}", rest.url);
            Arc::new(
                RestRunRepository::sign_in(rest)
                    .await
                    .context("Failed to sign in to the table API")?,
            )
        }
    };

    Ok(repository)
}
