//! Error types for network operations

use thiserror::Error;

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors that can occur during network operations
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Malformed, cross-origin or disallowed-scheme URL
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Request timeout
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// Network connection failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// HTTP exchange failed after the status line
    #[error("HTTP error: {status} - {message}")]
    Http {
        status: u16,
        message: String,
    },

    /// Request aborted by its owner
    #[error("Request cancelled")]
    Cancelled,

    /// Client configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl NetworkError {
    /// Check if error is retryable.
    ///
    /// Only transport-level failures are retried; cancellation is an abort.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetworkError::Timeout(_) | NetworkError::Connection(_))
    }

    /// Check if the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetworkError::Timeout(_))
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NetworkError::Timeout(0)
        } else if e.is_builder() {
            NetworkError::InvalidRequest(e.to_string())
        } else if let Some(status) = e.status() {
            NetworkError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            NetworkError::Connection(e.to_string())
        }
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(e: url::ParseError) -> Self {
        NetworkError::InvalidRequest(e.to_string())
    }
}
