//! Top-level prefetcher configuration

use crate::channel::ChannelConfig;
use crate::scheduler::SchedulerConfig;
use crate::worker::WorkerConfig;
use crate::{PrefetchError, PriorityWeights, Result};
use foresight_cache::{CacheConfig, PartitionCapacities};
use foresight_network::NetworkConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Prefetcher configuration, as read from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchConfig {
    /// Origin that scopes admissible URLs
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Ceiling on cached entries across all partitions
    #[serde(default = "default_max_cached_entries")]
    pub max_cached_entries: usize,
    /// Ceiling on concurrently running prefetches
    #[serde(default = "default_max_concurrent_prefetch")]
    pub max_concurrent_prefetch: usize,
    /// Fetch and coordination timeout
    #[serde(default = "default_prefetch_timeout_ms")]
    pub prefetch_timeout_ms: u64,
    /// Interval of cleanup sweeps and analytics pruning
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default)]
    pub priority_weights: PriorityWeights,
    #[serde(default)]
    pub partition_capacities: PartitionCapacities,
    /// Age after which a cache-first hit is refreshed
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,
    /// Slack left below capacity after an eviction
    #[serde(default = "default_eviction_buffer")]
    pub eviction_buffer: usize,
}

fn default_origin() -> String {
    "http://localhost/".to_string()
}

fn default_max_cached_entries() -> usize {
    500
}

fn default_max_concurrent_prefetch() -> usize {
    3
}

fn default_prefetch_timeout_ms() -> u64 {
    3000
}

fn default_cleanup_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_staleness_threshold_ms() -> u64 {
    60 * 60 * 1000
}

fn default_eviction_buffer() -> usize {
    foresight_cache::DEFAULT_EVICTION_BUFFER
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            max_cached_entries: default_max_cached_entries(),
            max_concurrent_prefetch: default_max_concurrent_prefetch(),
            prefetch_timeout_ms: default_prefetch_timeout_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            priority_weights: PriorityWeights::default(),
            partition_capacities: PartitionCapacities::default(),
            staleness_threshold_ms: default_staleness_threshold_ms(),
            eviction_buffer: default_eviction_buffer(),
        }
    }
}

impl PrefetchConfig {
    /// Configuration for an origin with defaults elsewhere
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PrefetchError::Config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| PrefetchError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Reject settings the prefetcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_prefetch == 0 {
            return Err(PrefetchError::Config(
                "maxConcurrentPrefetch must be at least 1".to_string(),
            ));
        }
        if self.prefetch_timeout_ms == 0 {
            return Err(PrefetchError::Config(
                "prefetchTimeoutMs must be positive".to_string(),
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(PrefetchError::Config(
                "cleanupIntervalMs must be positive".to_string(),
            ));
        }
        self.origin_url()?;
        Ok(())
    }

    /// Parsed origin
    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(&self.origin)
            .map_err(|e| PrefetchError::Config(format!("origin {}: {}", self.origin, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PrefetchError::Config(format!(
                "origin {} must be http or https",
                self.origin
            )));
        }
        Ok(url)
    }

    /// Fetch and coordination timeout
    pub fn prefetch_timeout(&self) -> Duration {
        Duration::from_millis(self.prefetch_timeout_ms)
    }

    /// Cleanup interval
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl From<&PrefetchConfig> for CacheConfig {
    fn from(config: &PrefetchConfig) -> Self {
        Self {
            capacities: config.partition_capacities,
            eviction_buffer: config.eviction_buffer,
            max_entries: config.max_cached_entries,
            cleanup_interval: config.cleanup_interval(),
        }
    }
}

impl From<&PrefetchConfig> for NetworkConfig {
    fn from(config: &PrefetchConfig) -> Self {
        NetworkConfig::default()
            .with_timeout(config.prefetch_timeout())
            .with_staleness_threshold(Duration::from_millis(config.staleness_threshold_ms))
    }
}

impl From<&PrefetchConfig> for SchedulerConfig {
    fn from(config: &PrefetchConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_prefetch,
            ..Default::default()
        }
    }
}

impl From<&PrefetchConfig> for ChannelConfig {
    fn from(config: &PrefetchConfig) -> Self {
        Self {
            timeout: config.prefetch_timeout(),
            ..Default::default()
        }
    }
}

impl From<&PrefetchConfig> for WorkerConfig {
    fn from(config: &PrefetchConfig) -> Self {
        Self {
            cleanup_interval: config.cleanup_interval(),
        }
    }
}
