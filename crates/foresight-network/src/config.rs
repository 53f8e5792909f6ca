//! Network configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default allow-pattern for cacheable API paths
pub const DEFAULT_API_CACHE_PATTERN: &str = r"^/api/(public|config|static-data)(/|$)";

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Fetch and strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-attempt fetch timeout
    pub timeout: Duration,
    /// Retry policy applied to every fetch
    pub retry: RetryConfig,
    /// Age after which a cache-first hit is refreshed in the background
    pub staleness_threshold: Duration,
    /// Path regexes for API responses that may be cached
    pub api_cache_patterns: Vec<String>,
    /// User agent string
    pub user_agent: String,
    /// Enable compression
    pub compression: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            retry: RetryConfig::default(),
            staleness_threshold: Duration::from_secs(60 * 60),
            api_cache_patterns: vec![DEFAULT_API_CACHE_PATTERN.to_string()],
            user_agent: format!("foresight/{}", env!("CARGO_PKG_VERSION")),
            compression: true,
        }
    }
}

impl NetworkConfig {
    /// Timeout for API requests (half the regular timeout)
    pub fn api_timeout(&self) -> Duration {
        self.timeout / 2
    }

    /// Set fetch timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set staleness threshold
    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// Add a cacheable API path pattern
    pub fn with_api_cache_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.api_cache_patterns.push(pattern.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(3000));
        assert_eq!(config.api_timeout(), Duration::from_millis(1500));
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.backoff, Duration::from_secs(1));
    }
}
