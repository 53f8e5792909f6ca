//! Fetch strategy engine
//!
//! Answers a classified request from the cache, the network or both, and
//! keeps the cache up to date as a side effect. Execution errors never leave
//! this module: every path ends in a cached fallback, a network result or a
//! synthesized offline response.

use crate::classify::{FetchStrategy, RequestDescriptor, ResourceClass};
use crate::client::{fetch_with_retry, FetchResponse, Fetcher};
use crate::{NetworkConfig, NetworkError, Result};
use bytes::Bytes;
use foresight_cache::{now_millis, CacheEntry, CacheError, CacheStore, Partition, Payload, SanitizationPipeline};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Status of a synthesized offline response
pub const OFFLINE_STATUS: u16 = 503;

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// Cache hit
    Cache,
    /// Network result
    Network,
    /// Synthesized placeholder
    Offline,
}

/// Response produced by a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyResponse {
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
    /// Origin of the response
    pub source: ResponseSource,
    /// Strategy that produced it
    pub strategy: FetchStrategy,
}

impl StrategyResponse {
    fn from_entry(entry: CacheEntry, strategy: FetchStrategy) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers,
            body: entry.payload.into_bytes(),
            source: ResponseSource::Cache,
            strategy,
        }
    }

    fn from_network(response: FetchResponse, strategy: FetchStrategy) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            source: ResponseSource::Network,
            strategy,
        }
    }

    /// Placeholder returned when neither cache nor network can answer
    pub fn offline(strategy: FetchStrategy) -> Self {
        Self {
            status: OFFLINE_STATUS,
            headers: vec![("content-type".into(), "text/plain; charset=utf-8".into())],
            body: Bytes::from_static(b"Offline: this resource is not available right now."),
            source: ResponseSource::Offline,
            strategy,
        }
    }

    /// Check if the response came from the cache
    pub fn is_cached(&self) -> bool {
        self.source == ResponseSource::Cache
    }

    /// Check if the response is the offline placeholder
    pub fn is_offline(&self) -> bool {
        self.source == ResponseSource::Offline
    }
}

/// Executes cache-first, network-first and stale-while-revalidate fetches.
///
/// Cloning is cheap; clones share the store, the fetcher and the set of
/// background revalidations.
#[derive(Clone)]
pub struct StrategyEngine {
    config: Arc<NetworkConfig>,
    store: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    sanitizer: Arc<SanitizationPipeline>,
    api_patterns: Arc<Vec<Regex>>,
    unavailable_logged: Arc<AtomicBool>,
    /// Background refetches keyed by URL
    revalidations: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl StrategyEngine {
    /// Create an engine over a store and a fetcher
    pub fn new(
        config: NetworkConfig,
        store: Arc<CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let api_patterns = config
            .api_cache_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    NetworkError::Configuration(format!("api cache pattern {}: {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config: Arc::new(config),
            store,
            fetcher,
            sanitizer: Arc::new(SanitizationPipeline::default()),
            api_patterns: Arc::new(api_patterns),
            unavailable_logged: Arc::new(AtomicBool::new(false)),
            revalidations: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Replace the sanitization pipeline
    pub fn with_sanitizer(mut self, sanitizer: Arc<SanitizationPipeline>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Cache store written by this engine
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Answer a request with the strategy its class selects
    pub async fn handle(&self, request: &RequestDescriptor) -> StrategyResponse {
        let class = request.class();
        let strategy = class.strategy();

        let response = match strategy {
            FetchStrategy::CacheFirst => self.cache_first(request, class).await,
            FetchStrategy::NetworkFirst => self.network_first(request, class).await,
            FetchStrategy::StaleWhileRevalidate => self.stale_while_revalidate(request, class).await,
        };

        debug!(
            "Served {} via {} from {:?} ({})",
            request.key(),
            strategy,
            response.source,
            response.status
        );
        response
    }

    /// Refetch a request now and replace its cached copy.
    ///
    /// Returns whether the cache was updated.
    pub async fn revalidate(&self, request: &RequestDescriptor) -> Result<bool> {
        let class = request.class();
        let response = self.fetch(request, class).await?;
        if response.is_ok() && self.should_cache(request, class) {
            return Ok(self.write_through(request, class.partition(), &response).await);
        }
        Ok(false)
    }

    /// Wait for every background revalidation started so far
    pub async fn wait_for_revalidations(&self) {
        loop {
            let handles = std::mem::take(&mut *self.revalidations.lock().await);
            if handles.is_empty() {
                break;
            }
            for handle in handles.into_values() {
                let _ = handle.await;
            }
        }
    }

    /// Number of background revalidations not yet finished
    pub async fn pending_revalidations(&self) -> usize {
        let mut tasks = self.revalidations.lock().await;
        tasks.retain(|_, t| !t.is_finished());
        tasks.len()
    }

    async fn cache_first(&self, request: &RequestDescriptor, class: ResourceClass) -> StrategyResponse {
        let strategy = FetchStrategy::CacheFirst;

        if let Some(entry) = self.cached_anywhere(class.partition(), request.key()).await {
            let threshold = self.config.staleness_threshold.as_millis() as u64;
            if entry.is_stale(now_millis(), threshold) {
                debug!("Stale hit for {}, refreshing in background", request.key());
                self.spawn_revalidation(request).await;
            }
            return StrategyResponse::from_entry(entry, strategy);
        }

        match self.fetch(request, class).await {
            Ok(response) => {
                if response.is_ok() {
                    self.write_through(request, class.partition(), &response).await;
                }
                StrategyResponse::from_network(response, strategy)
            }
            Err(e) => {
                debug!("Fetch of {} failed with no cached copy: {}", request.key(), e);
                StrategyResponse::offline(strategy)
            }
        }
    }

    async fn network_first(&self, request: &RequestDescriptor, class: ResourceClass) -> StrategyResponse {
        let strategy = FetchStrategy::NetworkFirst;

        match self.fetch(request, class).await {
            Ok(response) if response.is_ok() => {
                if self.should_cache(request, class) {
                    self.write_through(request, class.partition(), &response).await;
                }
                StrategyResponse::from_network(response, strategy)
            }
            Ok(response) => match self.cached_anywhere(class.partition(), request.key()).await {
                Some(entry) => StrategyResponse::from_entry(entry, strategy),
                None => StrategyResponse::from_network(response, strategy),
            },
            Err(e) => {
                debug!("Fetch of {} failed, trying cache: {}", request.key(), e);
                match self.cached_anywhere(class.partition(), request.key()).await {
                    Some(entry) => StrategyResponse::from_entry(entry, strategy),
                    None => StrategyResponse::offline(strategy),
                }
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &RequestDescriptor,
        class: ResourceClass,
    ) -> StrategyResponse {
        let strategy = FetchStrategy::StaleWhileRevalidate;

        if let Some(entry) = self.cached(class.partition(), request.key()).await {
            self.spawn_revalidation(request).await;
            return StrategyResponse::from_entry(entry, strategy);
        }

        match self.fetch(request, class).await {
            Ok(response) => {
                if response.is_ok() {
                    self.write_through(request, class.partition(), &response).await;
                }
                StrategyResponse::from_network(response, strategy)
            }
            Err(e) => {
                debug!("Fetch of {} failed with no cached copy: {}", request.key(), e);
                StrategyResponse::offline(strategy)
            }
        }
    }

    async fn spawn_revalidation(&self, request: &RequestDescriptor) {
        let mut tasks = self.revalidations.lock().await;
        tasks.retain(|_, t| !t.is_finished());
        if tasks.contains_key(request.key()) {
            debug!("Revalidation of {} already in flight", request.key());
            return;
        }

        let engine = self.clone();
        let request = request.clone();
        let key = request.key().to_string();

        let handle = tokio::spawn(async move {
            match engine.revalidate(&request).await {
                Ok(true) => debug!("Revalidated {}", request.key()),
                Ok(false) => debug!("Revalidation of {} left cache unchanged", request.key()),
                Err(e) => debug!("Revalidation of {} failed: {}", request.key(), e),
            }
        });
        tasks.insert(key, handle);
    }

    fn timeout_for(&self, class: ResourceClass) -> Duration {
        match class {
            ResourceClass::Api => self.config.api_timeout(),
            _ => self.config.timeout,
        }
    }

    async fn fetch(&self, request: &RequestDescriptor, class: ResourceClass) -> Result<FetchResponse> {
        fetch_with_retry(
            self.fetcher.as_ref(),
            request.key(),
            self.timeout_for(class),
            &self.config.retry,
        )
        .await
    }

    /// API responses are cached only for allow-listed paths
    fn should_cache(&self, request: &RequestDescriptor, class: ResourceClass) -> bool {
        match class {
            ResourceClass::Api => {
                let path = request.url.path();
                self.api_patterns.iter().any(|p| p.is_match(path))
            }
            _ => true,
        }
    }

    async fn cached(&self, partition: Partition, key: &str) -> Option<CacheEntry> {
        match self.store.get(partition, key).await {
            Ok(entry) => entry,
            Err(e) => {
                self.note_store_error(&e);
                None
            }
        }
    }

    /// Own partition first, then any other (e.g. a prefetched copy)
    async fn cached_anywhere(&self, partition: Partition, key: &str) -> Option<CacheEntry> {
        match self.store.lookup(partition, key).await {
            Ok(entry) => entry,
            Err(e) => {
                self.note_store_error(&e);
                None
            }
        }
    }

    async fn write_through(
        &self,
        request: &RequestDescriptor,
        partition: Partition,
        response: &FetchResponse,
    ) -> bool {
        let is_markup = response
            .content_type()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"));

        let payload = if is_markup {
            let raw = String::from_utf8_lossy(&response.body);
            Payload::Text(self.sanitizer.sanitize(&raw))
        } else {
            Payload::Binary(response.body.clone())
        };

        let entry = CacheEntry::new(request.key(), partition, payload)
            .with_status(response.status)
            .with_headers(response.headers.clone())
            .with_priority(request.priority);

        match self.store.put(partition, entry).await {
            Ok(_) => true,
            Err(e) => {
                self.note_store_error(&e);
                false
            }
        }
    }

    fn note_store_error(&self, error: &CacheError) {
        if error.is_unavailable() {
            if !self.unavailable_logged.swap(true, Ordering::Relaxed) {
                warn!("Cache store unavailable, serving network only: {}", error);
            }
        } else {
            warn!("Cache operation failed: {}", error);
        }
    }
}
