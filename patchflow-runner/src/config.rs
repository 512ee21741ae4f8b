//! Runner configuration
//!
//! Defines every parameter of a batch invocation: which store to talk to,
//! which organization's runs to pick up, which executable to run them with,
//! and the optional bounds on a single invocation.
//!
//! Configuration is read once from the environment at startup and passed by
//! reference to every component afterwards.

use std::path::PathBuf;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

/// Default number of runs fetched per invocation
pub const DEFAULT_BATCH_LIMIT: usize = 10;

/// Default bound on the output excerpt stored in a failed run's error
pub const DEFAULT_ERROR_EXCERPT_CHARS: usize = 2000;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend holding the run table
    pub store: StoreConfig,

    /// Organization whose runs are processed
    pub organization_id: i64,

    /// Path to the patchflow executable
    pub patchwork_exec: PathBuf,

    /// Working directory of the executable and home of its output files
    pub output_dir: PathBuf,

    /// Log store writes instead of performing them
    pub read_only: bool,

    /// Maximum number of runs fetched per invocation
    pub batch_limit: usize,

    /// Kill the executable after this long; `None` waits indefinitely
    pub exec_timeout: Option<Duration>,

    /// Stop starting new runs once the batch has been going this long
    pub batch_deadline: Option<Duration>,

    /// Maximum characters of captured output kept in a failure's error
    pub error_excerpt_chars: usize,
}

/// Run table backend
#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    Postgres(PostgresConfig),
    Rest(RestConfig),
}

impl StoreConfig {
    /// Short backend name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            StoreConfig::Postgres(_) => "postgres",
            StoreConfig::Rest(_) => "rest",
        }
    }
}

/// Direct database connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl PostgresConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

/// Managed backend (table API) parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RestConfig {
    pub url: String,
    pub api_key: String,
    pub email: String,
    pub password: String,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - ORGANIZATION_ID (required, integer)
    /// - PATCHWORK_EXEC (required)
    /// - OUTPUT_DIR (required)
    /// - STORE_BACKEND (optional, "postgres" or "rest", default: postgres)
    /// - DB_HOST, DB_NAME, DB_USER, DB_PASSWORD (required for postgres)
    /// - DB_PORT (optional, default: 5432)
    /// - SUPABASE_URL, SUPABASE_KEY, SUPABASE_EMAIL, SUPABASE_PASSWORD (required for rest)
    /// - READ_ONLY (optional, "true" enables dry-run, default: false)
    /// - BATCH_LIMIT (optional, default: 10)
    /// - EXEC_TIMEOUT_SECS (optional, default: no timeout)
    /// - BATCH_DEADLINE_SECS (optional, default: no deadline)
    /// - ERROR_EXCERPT_CHARS (optional, default: 2000)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| anyhow::anyhow!("{} environment variable not set", key))
        };

        let store = match var("STORE_BACKEND").as_deref().map(str::to_ascii_lowercase) {
            None => Self::postgres_from(&required, &var)?,
            Some(kind) if kind == "postgres" => Self::postgres_from(&required, &var)?,
            Some(kind) if kind == "rest" => StoreConfig::Rest(RestConfig {
                url: required("SUPABASE_URL")?,
                api_key: required("SUPABASE_KEY")?,
                email: required("SUPABASE_EMAIL")?,
                password: required("SUPABASE_PASSWORD")?,
            }),
            Some(other) => anyhow::bail!("unknown STORE_BACKEND '{}'", other),
        };

        let organization_id = required("ORGANIZATION_ID")?
            .trim()
            .parse::<i64>()
            .map_err(|e| anyhow::anyhow!("ORGANIZATION_ID must be an integer: {}", e))?;

        let read_only = var("READ_ONLY")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            store,
            organization_id,
            patchwork_exec: PathBuf::from(required("PATCHWORK_EXEC")?),
            output_dir: PathBuf::from(required("OUTPUT_DIR")?),
            read_only,
            batch_limit: parse_or(&var, "BATCH_LIMIT", DEFAULT_BATCH_LIMIT)?,
            exec_timeout: parse_secs(&var, "EXEC_TIMEOUT_SECS")?,
            batch_deadline: parse_secs(&var, "BATCH_DEADLINE_SECS")?,
            error_excerpt_chars: parse_or(
                &var,
                "ERROR_EXCERPT_CHARS",
                DEFAULT_ERROR_EXCERPT_CHARS,
            )?,
        })
    }

    fn postgres_from(
        required: &impl Fn(&str) -> anyhow::Result<String>,
        var: &impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<StoreConfig> {
        Ok(StoreConfig::Postgres(PostgresConfig {
            host: required("DB_HOST")?,
            port: parse_or(var, "DB_PORT", 5432)?,
            database: required("DB_NAME")?,
            user: required("DB_USER")?,
            password: required("DB_PASSWORD")?,
        }))
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.patchwork_exec.as_os_str().is_empty() {
            anyhow::bail!("patchwork_exec cannot be empty");
        }

        if self.output_dir.as_os_str().is_empty() {
            anyhow::bail!("output_dir cannot be empty");
        }

        if self.batch_limit == 0 {
            anyhow::bail!("batch_limit must be greater than 0");
        }

        if self.exec_timeout.is_some_and(|t| t.is_zero()) {
            anyhow::bail!("exec_timeout must be greater than 0");
        }

        if self.batch_deadline.is_some_and(|t| t.is_zero()) {
            anyhow::bail!("batch_deadline must be greater than 0");
        }

        if let StoreConfig::Rest(rest) = &self.store {
            if !rest.url.starts_with("http://") && !rest.url.starts_with("https://") {
                anyhow::bail!("SUPABASE_URL must start with http:// or https://");
            }
        }

        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

fn parse_secs(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<Duration>> {
    match var(key) {
        Some(_) => parse_or(var, key, 0u64).map(|secs| Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}
