//! Error types for the relay client.

use thiserror::Error;

/// Result type for relay client operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay client errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration error (malformed URL, client build failure)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection refused, timeout, stream dropped)
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response from the relay server
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl RelayError {
    /// Whether the failure happened before or while talking to the server,
    /// as opposed to the server answering with an error status.
    pub fn is_connection(&self) -> bool {
        matches!(self, RelayError::Network(_))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Network(e.to_string())
    }
}
