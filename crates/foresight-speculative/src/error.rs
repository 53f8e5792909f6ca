//! Error types for prefetch coordination

use foresight_cache::CacheError;
use foresight_network::NetworkError;
use thiserror::Error;

/// Result type for prefetch operations
pub type Result<T> = std::result::Result<T, PrefetchError>;

/// Errors that can occur while admitting or coordinating prefetches
#[derive(Error, Debug)]
pub enum PrefetchError {
    /// Malformed, cross-origin or disallowed-scheme URL, or a bad payload
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cross-actor call unanswered within its budget
    #[error("Coordination request {id} timed out after {after_ms}ms")]
    CoordinationTimeout {
        id: u64,
        after_ms: u64,
    },

    /// Message bus or channel closed
    #[error("Coordination channel closed")]
    ChannelClosed,

    /// Background actor reported a failure
    #[error("Background worker error: {0}")]
    Remote(String),

    /// Engine already shut down
    #[error("Prefetch engine is shut down")]
    ShutDown,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl PrefetchError {
    /// Check if the error is a coordination timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, PrefetchError::CoordinationTimeout { .. })
    }
}

impl From<serde_json::Error> for PrefetchError {
    fn from(e: serde_json::Error) -> Self {
        PrefetchError::InvalidRequest(format!("payload: {}", e))
    }
}
