//! Patchflow table client
//!
//! A small HTTP client for the managed backend that hosts the patchflow run
//! table. Access is two-phase: an [`AuthClient`] holds the project URL and API
//! key and signs in once, yielding a [`Session`] that carries the access token
//! and exposes the table operations. Sessions are not refreshed; they are
//! meant to live for a single short batch.
//!
//! # Example
//!
//! ```no_run
//! use patchflow_client::{AuthClient, RunQuery};
//!
//! #[tokio::main]
//! async fn main() -> patchflow_client::Result<()> {
//!     let session = AuthClient::new("https://project.supabase.co", "anon-key")
//!         .sign_in("runner@example.com", "secret")
//!         .await?;
//!
//!     let rows = session.list_runs(&RunQuery::pending(42, 10)).await?;
//!     println!("{} pending run(s)", rows.len());
//!     Ok(())
//! }
//! ```

pub mod error;
mod runs;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use runs::{PatchflowRow, RunQuery, RunRow};

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Unauthenticated client for the managed backend
///
/// Only able to sign in; table access requires a [`Session`].
#[derive(Debug, Clone)]
pub struct AuthClient {
    /// Base URL of the project (e.g., "https://project.supabase.co")
    base_url: String,
    /// Public API key sent with every request
    api_key: String,
    /// HTTP client instance
    client: Client,
}

impl AuthClient {
    /// Create a new client for the given project
    ///
    /// # Arguments
    /// * `base_url` - The project URL
    /// * `api_key` - The project's public API key
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(base_url, api_key, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Get the base URL of the project
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sign in with email and password
    ///
    /// Consumes the client; the returned session reuses its HTTP connection pool.
    pub async fn sign_in(self, email: &str, password: &str) -> Result<Session> {
        let url = format!("{}/auth/v1/token", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("grant_type", "password")])
            .header("apikey", &self.api_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::AuthFailed(format!("{}: {}", status, message)));
        }

        let token: TokenResponse = handle_response(response).await?;
        tracing::debug!("Signed in to {}", self.base_url);

        Ok(Session {
            base_url: self.base_url,
            api_key: self.api_key,
            access_token: token.access_token,
            client: self.client,
        })
    }
}

/// Authenticated session against the run table
///
/// Valid for the lifetime of the process; no token refresh is attempted.
#[derive(Debug, Clone)]
pub struct Session {
    base_url: String,
    api_key: String,
    access_token: String,
    client: Client,
}

impl Session {
    /// Get the base URL of the project
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the URL of a table endpoint
    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Attaches the API key and bearer token to a request
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
    }
}

#[derive(Debug, Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

// =============================================================================
// Response Handlers
// =============================================================================

/// Handle an API response and deserialize JSON
///
/// Checks the status code and returns an appropriate error if the request
/// failed, or deserializes the response body if successful.
pub(crate) async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}
