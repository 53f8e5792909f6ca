//! Error types for the cache store

use thiserror::Error;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while reading or writing the cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backing store is not attached or failed to initialize
    #[error("Cache store unavailable: {0}")]
    StoreUnavailable(String),

    /// Stored record could not be decoded or carries an unknown version
    #[error("Corrupt cache entry {key}: {reason}")]
    Corrupt {
        key: String,
        reason: String,
    },

    /// Entry could not be encoded for storage
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Primary sanitizer missing, permissive fallback in use
    #[error("Primary sanitizer unavailable, using best-effort fallback")]
    SanitizationUnavailable,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Check if the error means the store as a whole cannot be used
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::StoreUnavailable(_) | CacheError::Io(_))
    }
}

impl From<bincode::Error> for CacheError {
    fn from(e: bincode::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
