//! Error types for the patchflow table client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the remote run table
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed before a response was received
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The table API answered with a non-2xx status
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Sign-in was rejected
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Response body did not match the expected shape
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if the remote service could not be reached at all
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::RequestFailed(e) if !e.is_decode() && !e.is_builder())
    }
}
