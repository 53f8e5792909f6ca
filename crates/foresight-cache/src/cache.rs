//! Partitioned cache store with capacity-driven eviction

use crate::eviction::{select_victims, EvictionPolicy, WeightedRecency};
use crate::{now_millis, CacheEntry, CacheError, Partition, Result, StoreBackend};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-partition entry limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionCapacities {
    /// Static assets and media
    #[serde(rename = "static")]
    pub static_assets: usize,
    /// Documents and dynamic content
    pub dynamic: usize,
    /// Prefetched resources
    pub prefetch: usize,
    /// API responses
    pub api: usize,
}

impl PartitionCapacities {
    /// Capacity of a partition
    pub fn get(&self, partition: Partition) -> usize {
        match partition {
            Partition::Static => self.static_assets,
            Partition::Dynamic => self.dynamic,
            Partition::Prefetch => self.prefetch,
            Partition::Api => self.api,
        }
    }

    /// Sum over all partitions
    pub fn total(&self) -> usize {
        self.static_assets + self.dynamic + self.prefetch + self.api
    }
}

impl Default for PartitionCapacities {
    fn default() -> Self {
        Self {
            static_assets: 50,
            dynamic: 100,
            prefetch: 200,
            api: 30,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Per-partition capacity
    pub capacities: PartitionCapacities,
    /// Slack left below capacity after an eviction
    pub eviction_buffer: usize,
    /// Ceiling on entries across all partitions
    pub max_entries: usize,
    /// Interval of the background sweep
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacities: PartitionCapacities::default(),
            eviction_buffer: crate::DEFAULT_EVICTION_BUFFER,
            max_entries: 500,
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Whether a backend is attached
    pub available: bool,
    /// Entry count per partition
    pub partition_sizes: Vec<(Partition, usize)>,
    /// Cache hits
    pub hits: u64,
    /// Cache misses
    pub misses: u64,
    /// Entries removed by eviction
    pub evictions: u64,
    /// Corrupt or outdated entries dropped
    pub corrupt: u64,
}

impl CacheStats {
    /// Hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total entries
    pub fn entries(&self) -> usize {
        self.partition_sizes.iter().map(|(_, n)| n).sum()
    }
}

/// Outcome of a cleanup sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Entries evicted for capacity
    pub evicted: usize,
    /// Corrupt or outdated entries removed
    pub corrupt_removed: usize,
}

#[derive(Default)]
struct CacheStatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    corrupt: AtomicU64,
}

/// Partitioned cache store.
///
/// The store is the only writer of persisted entries. Mutations of one
/// partition are serialized by that partition's lock; partitions are
/// independent of each other.
pub struct CacheStore {
    config: CacheConfig,
    backend: RwLock<Option<Arc<dyn StoreBackend>>>,
    policy: Arc<dyn EvictionPolicy>,
    locks: [Mutex<()>; 4],
    stats: CacheStatsInner,
}

impl CacheStore {
    /// Create a store over an initialized backend
    pub fn new(config: CacheConfig, backend: Arc<dyn StoreBackend>) -> Self {
        Self::with_slot(config, Some(backend))
    }

    /// Create a store whose backend is not ready yet.
    ///
    /// Every operation fails with [`CacheError::StoreUnavailable`] until
    /// [`attach`](Self::attach) is called.
    pub fn unavailable(config: CacheConfig) -> Self {
        Self::with_slot(config, None)
    }

    fn with_slot(config: CacheConfig, backend: Option<Arc<dyn StoreBackend>>) -> Self {
        Self {
            config,
            backend: RwLock::new(backend),
            policy: Arc::new(WeightedRecency),
            locks: Default::default(),
            stats: CacheStatsInner::default(),
        }
    }

    /// Replace the eviction policy
    pub fn with_policy(mut self, policy: Arc<dyn EvictionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Name of the eviction policy in use
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Attach a backend once persistence is initialized
    pub async fn attach(&self, backend: Arc<dyn StoreBackend>) {
        *self.backend.write().await = Some(backend);
        info!("Cache store attached");
    }

    /// Detach the backend; later operations fail as unavailable
    pub async fn close(&self) {
        *self.backend.write().await = None;
        info!("Cache store closed");
    }

    /// Check if a backend is attached
    pub async fn is_available(&self) -> bool {
        self.backend.read().await.is_some()
    }

    async fn backend(&self) -> Result<Arc<dyn StoreBackend>> {
        self.backend
            .read()
            .await
            .clone()
            .ok_or_else(|| CacheError::StoreUnavailable("backend not initialized".into()))
    }

    fn capacity(&self, partition: Partition) -> usize {
        self.config.capacities.get(partition)
    }

    /// Get an entry, recording the access
    pub async fn get(&self, partition: Partition, key: &str) -> Result<Option<CacheEntry>> {
        let backend = self.backend().await?;
        let entry = self.touch(backend.as_ref(), partition, key).await?;
        self.record_lookup(entry.is_some());
        Ok(entry)
    }

    /// Get an entry from `preferred`, or else from any other partition.
    ///
    /// Counts as a single hit or miss.
    pub async fn lookup(&self, preferred: Partition, key: &str) -> Result<Option<CacheEntry>> {
        let backend = self.backend().await?;
        let others = Partition::ALL.into_iter().filter(|p| *p != preferred);

        for partition in std::iter::once(preferred).chain(others) {
            if let Some(entry) = self.touch(backend.as_ref(), partition, key).await? {
                if partition != preferred {
                    debug!("Found {} in {} partition instead of {}", key, partition, preferred);
                }
                self.record_lookup(true);
                return Ok(Some(entry));
            }
        }

        self.record_lookup(false);
        Ok(None)
    }

    async fn touch(
        &self,
        backend: &dyn StoreBackend,
        partition: Partition,
        key: &str,
    ) -> Result<Option<CacheEntry>> {
        let _guard = self.locks[partition.index()].lock().await;

        let Some(mut entry) = self.load(backend, partition, key).await? else {
            return Ok(None);
        };

        entry.touch_at(now_millis());
        backend.put(partition, key, encode(&entry)?).await?;
        Ok(Some(entry))
    }

    fn record_lookup(&self, hit: bool) {
        let counter = if hit { &self.stats.hits } else { &self.stats.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read an entry without recording an access
    pub async fn peek(&self, partition: Partition, key: &str) -> Result<Option<CacheEntry>> {
        let backend = self.backend().await?;
        let _guard = self.locks[partition.index()].lock().await;
        self.load(backend.as_ref(), partition, key).await
    }

    /// Check if a key is cached in a partition
    pub async fn contains(&self, partition: Partition, key: &str) -> Result<bool> {
        Ok(self.peek(partition, key).await?.is_some())
    }

    /// Insert or replace an entry.
    ///
    /// A new key entering a full partition first evicts down to
    /// `capacity - eviction_buffer - 1` so that the partition ends at most at
    /// `capacity - eviction_buffer`. Returns the number of evicted entries.
    pub async fn put(&self, partition: Partition, mut entry: CacheEntry) -> Result<usize> {
        let backend = self.backend().await?;
        let _guard = self.locks[partition.index()].lock().await;

        let now = now_millis();
        entry.partition = partition;
        entry.version = crate::ENTRY_VERSION;
        entry.last_accessed = now.max(entry.created_at);
        entry.access_count = entry.access_count.max(1);

        let mut evicted = 0;
        match self.load(backend.as_ref(), partition, &entry.key).await? {
            Some(existing) => {
                entry.access_count = entry.access_count.max(existing.access_count);
            }
            None => {
                let capacity = self.capacity(partition);
                if backend.count(partition).await? >= capacity {
                    let target = capacity.saturating_sub(self.config.eviction_buffer + 1);
                    evicted = self
                        .evict_locked(backend.as_ref(), partition, target, now)
                        .await?;
                }
            }
        }

        backend.put(partition, &entry.key, encode(&entry)?).await?;
        debug!("Cached {} in {} partition", entry.key, partition);

        Ok(evicted)
    }

    /// Evict an overflowing partition down to `capacity - eviction_buffer`
    pub async fn evict(&self, partition: Partition) -> Result<usize> {
        let backend = self.backend().await?;
        let _guard = self.locks[partition.index()].lock().await;

        let capacity = self.capacity(partition);
        if backend.count(partition).await? <= capacity {
            return Ok(0);
        }

        let target = capacity.saturating_sub(self.config.eviction_buffer);
        self.evict_locked(backend.as_ref(), partition, target, now_millis())
            .await
    }

    /// Remove an entry
    pub async fn delete(&self, partition: Partition, key: &str) -> Result<bool> {
        let backend = self.backend().await?;
        let _guard = self.locks[partition.index()].lock().await;
        backend.delete(partition, key).await
    }

    /// Remove a key from every partition, returning how many copies existed
    pub async fn delete_everywhere(&self, key: &str) -> Result<usize> {
        let mut removed = 0;
        for partition in Partition::ALL {
            if self.delete(partition, key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Number of entries in a partition
    pub async fn len(&self, partition: Partition) -> Result<usize> {
        self.backend().await?.count(partition).await
    }

    /// Check if a partition is empty
    pub async fn is_empty(&self, partition: Partition) -> Result<bool> {
        Ok(self.len(partition).await? == 0)
    }

    /// Remove every entry of a partition
    pub async fn clear(&self, partition: Partition) -> Result<()> {
        let backend = self.backend().await?;
        let _guard = self.locks[partition.index()].lock().await;
        backend.clear(partition).await?;
        info!("Cleared {} partition", partition);
        Ok(())
    }

    /// Sweep every partition.
    ///
    /// Drops corrupt or outdated entries, evicts partitions that grew past
    /// capacity, then enforces `max_entries` across all partitions.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let backend = self.backend().await?;
        let now = now_millis();
        let mut report = CleanupReport::default();

        let mut survivors = Vec::new();
        for partition in Partition::ALL {
            let _guard = self.locks[partition.index()].lock().await;

            let capacity = self.capacity(partition);
            let Snapshot { entries, dropped } = self.load_all(backend.as_ref(), partition).await?;
            report.corrupt_removed += dropped;
            if entries.len() > capacity {
                let target = capacity.saturating_sub(self.config.eviction_buffer);
                report.evicted += self
                    .remove_victims(backend.as_ref(), partition, entries, target, now)
                    .await?;
            }
            survivors.push(backend.count(partition).await?);
        }

        let total: usize = survivors.iter().sum();
        if total > self.config.max_entries {
            report.evicted += self.enforce_global_limit(backend.as_ref(), now).await?;
        }

        if report.evicted > 0 || report.corrupt_removed > 0 {
            info!(
                "Cleanup removed {} evicted and {} corrupt entries",
                report.evicted, report.corrupt_removed
            );
        }

        Ok(report)
    }

    /// Run [`cleanup`](Self::cleanup) on a fixed interval until stopped
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> CleanupHandle {
        let store = Arc::clone(self);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = store.cleanup().await {
                            debug!("Scheduled cleanup skipped: {}", e);
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        CleanupHandle { stop: stop_tx, task }
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let mut partition_sizes = Vec::with_capacity(Partition::ALL.len());
        let available = match self.backend().await {
            Ok(backend) => {
                for partition in Partition::ALL {
                    let size = backend.count(partition).await.unwrap_or(0);
                    partition_sizes.push((partition, size));
                }
                true
            }
            Err(_) => false,
        };

        CacheStats {
            available,
            partition_sizes,
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            corrupt: self.stats.corrupt.load(Ordering::Relaxed),
        }
    }

    /// Decode one entry, deleting it if it is corrupt or outdated
    async fn load(
        &self,
        backend: &dyn StoreBackend,
        partition: Partition,
        key: &str,
    ) -> Result<Option<CacheEntry>> {
        match self.load_checked(backend, partition, key).await? {
            Loaded::Entry(entry) => Ok(Some(entry)),
            Loaded::Missing | Loaded::Dropped => Ok(None),
        }
    }

    async fn load_checked(
        &self,
        backend: &dyn StoreBackend,
        partition: Partition,
        key: &str,
    ) -> Result<Loaded> {
        let decoded = match backend.get(partition, key).await {
            Ok(Some(record)) => decode(key, &record),
            Ok(None) => return Ok(Loaded::Missing),
            // Backend could not unwrap its own record
            Err(e @ CacheError::Corrupt { .. }) => Err(e),
            Err(e) => return Err(e),
        };

        match decoded {
            Ok(entry) => Ok(Loaded::Entry(entry)),
            Err(e) => {
                warn!("Dropping {} entry: {}", partition, e);
                backend.delete(partition, key).await?;
                self.stats.corrupt.fetch_add(1, Ordering::Relaxed);
                Ok(Loaded::Dropped)
            }
        }
    }

    /// Decode a snapshot of a partition
    async fn load_all(&self, backend: &dyn StoreBackend, partition: Partition) -> Result<Snapshot> {
        let keys = backend.keys(partition).await?;
        let mut snapshot = Snapshot {
            entries: Vec::with_capacity(keys.len()),
            dropped: 0,
        };
        for key in keys {
            match self.load_checked(backend, partition, &key).await? {
                Loaded::Entry(entry) => snapshot.entries.push(entry),
                Loaded::Dropped => snapshot.dropped += 1,
                Loaded::Missing => {}
            }
        }
        Ok(snapshot)
    }

    async fn evict_locked(
        &self,
        backend: &dyn StoreBackend,
        partition: Partition,
        target: usize,
        now: u64,
    ) -> Result<usize> {
        let entries = self.load_all(backend, partition).await?.entries;
        self.remove_victims(backend, partition, entries, target, now)
            .await
    }

    async fn remove_victims(
        &self,
        backend: &dyn StoreBackend,
        partition: Partition,
        entries: Vec<CacheEntry>,
        target: usize,
        now: u64,
    ) -> Result<usize> {
        let victims = select_victims(self.policy.as_ref(), entries, now, target);

        let mut removed = 0;
        for victim in &victims {
            if backend.delete(partition, &victim.key).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(
                "Evicted {} entries from {} partition ({})",
                removed,
                partition,
                self.policy.name()
            );
        }

        Ok(removed)
    }

    /// Evict the globally lowest-ranked entries until `max_entries` remain
    async fn enforce_global_limit(&self, backend: &dyn StoreBackend, now: u64) -> Result<usize> {
        // Locks are taken in partition order, the same order every sweep uses
        let mut guards = Vec::with_capacity(Partition::ALL.len());
        for partition in Partition::ALL {
            guards.push(self.locks[partition.index()].lock().await);
        }

        let mut everything = Vec::new();
        for partition in Partition::ALL {
            everything.extend(self.load_all(backend, partition).await?.entries);
        }

        let victims = select_victims(
            self.policy.as_ref(),
            everything,
            now,
            self.config.max_entries,
        );

        let mut removed = 0;
        for victim in &victims {
            if backend.delete(victim.partition, &victim.key).await? {
                removed += 1;
            }
        }
        self.stats
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);

        drop(guards);
        Ok(removed)
    }
}

enum Loaded {
    Entry(CacheEntry),
    Missing,
    /// Corrupt or outdated, removed from the backend
    Dropped,
}

struct Snapshot {
    entries: Vec<CacheEntry>,
    dropped: usize,
}

/// Handle to a periodic cleanup task
pub struct CleanupHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupHandle {
    /// Stop the sweep and wait for the task to exit
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

fn encode(entry: &CacheEntry) -> Result<Bytes> {
    Ok(Bytes::from(bincode::serialize(entry)?))
}

fn decode(key: &str, record: &[u8]) -> Result<CacheEntry> {
    let entry: CacheEntry = bincode::deserialize(record).map_err(|e| CacheError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    if !entry.is_current() {
        return Err(CacheError::Corrupt {
            key: key.to_string(),
            reason: format!("version {} != {}", entry.version, crate::ENTRY_VERSION),
        });
    }
    if entry.key != key {
        return Err(CacheError::Corrupt {
            key: key.to_string(),
            reason: format!("record belongs to {}", entry.key),
        });
    }

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBackend, Payload};

    const HOUR: u64 = 3_600_000;

    fn store_with(capacities: PartitionCapacities, buffer: usize) -> (CacheStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let config = CacheConfig {
            capacities,
            eviction_buffer: buffer,
            ..Default::default()
        };
        (CacheStore::new(config, backend.clone()), backend)
    }

    fn caps(n: usize) -> PartitionCapacities {
        PartitionCapacities {
            static_assets: n,
            dynamic: n,
            prefetch: n,
            api: n,
        }
    }

    fn text(key: &str) -> CacheEntry {
        CacheEntry::new(key, Partition::Prefetch, Payload::Text(format!("body of {}", key)))
    }

    #[tokio::test]
    async fn test_put_then_get_counts_one_access() {
        let (store, _) = store_with(caps(10), 0);
        let entry = text("https://a.test/x");
        let before = entry.access_count;

        store.put(Partition::Prefetch, entry).await.unwrap();
        let hit = store
            .get(Partition::Prefetch, "https://a.test/x")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(hit.access_count, before + 1);
        assert!(hit.last_accessed >= hit.created_at);
        assert_eq!(store.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_get_miss_is_counted() {
        let (store, _) = store_with(caps(10), 0);
        assert!(store.get(Partition::Static, "nope").await.unwrap().is_none());
        assert_eq!(store.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_overflowing_put_evicts_lowest_ranked() {
        let (store, _) = store_with(caps(3), 0);
        let now = now_millis();

        // Increasing access counts; "a" is the oldest and least used
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            let entry = text(key)
                .with_timestamps(now - (3 - i as u64) * HOUR, now - (3 - i as u64) * HOUR)
                .with_access_count(i as u32 + 1);
            store.put(Partition::Prefetch, entry).await.unwrap();
        }

        let evicted = store
            .put(Partition::Prefetch, text("d").with_access_count(4))
            .await
            .unwrap();

        assert_eq!(evicted, 1);
        assert_eq!(store.len(Partition::Prefetch).await.unwrap(), 3);
        assert!(!store.contains(Partition::Prefetch, "a").await.unwrap());
        assert!(store.contains(Partition::Prefetch, "d").await.unwrap());
    }

    #[tokio::test]
    async fn test_buffer_leaves_slack_after_eviction() {
        let (store, _) = store_with(caps(10), 5);
        for i in 0..10 {
            store.put(Partition::Static, text(&format!("k{}", i))).await.unwrap();
        }

        let evicted = store.put(Partition::Static, text("new")).await.unwrap();
        assert_eq!(evicted, 6);
        assert!(store.len(Partition::Static).await.unwrap() <= 10 - 5 + 1);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let (store, _) = store_with(caps(2), 0);
        store.put(Partition::Api, text("a")).await.unwrap();
        store.put(Partition::Api, text("b")).await.unwrap();

        let evicted = store.put(Partition::Api, text("a")).await.unwrap();
        assert_eq!(evicted, 0);
        assert_eq!(store.len(Partition::Api).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_access_history() {
        let (store, _) = store_with(caps(5), 0);
        store
            .put(Partition::Dynamic, text("a").with_access_count(7))
            .await
            .unwrap();
        store.put(Partition::Dynamic, text("a")).await.unwrap();

        let entry = store.peek(Partition::Dynamic, "a").await.unwrap().unwrap();
        assert_eq!(entry.access_count, 7);
        assert_eq!(entry.partition, Partition::Dynamic);
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_absent_and_is_deleted() {
        let (store, backend) = store_with(caps(5), 0);
        backend
            .put(Partition::Static, "bad", Bytes::from_static(b"\xff\x00"))
            .await
            .unwrap();

        assert!(store.get(Partition::Static, "bad").await.unwrap().is_none());
        assert!(backend.get(Partition::Static, "bad").await.unwrap().is_none());
        assert_eq!(store.stats().await.corrupt, 1);
    }

    #[tokio::test]
    async fn test_outdated_version_is_dropped() {
        let (store, backend) = store_with(caps(5), 0);
        let mut old = text("old");
        old.version = crate::ENTRY_VERSION + 1;
        backend
            .put(Partition::Prefetch, "old", encode(&old).unwrap())
            .await
            .unwrap();

        assert!(store.get(Partition::Prefetch, "old").await.unwrap().is_none());
        assert_eq!(backend.count(Partition::Prefetch).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = CacheStore::unavailable(CacheConfig::default());

        let err = store.get(Partition::Static, "k").await.unwrap_err();
        assert!(matches!(err, CacheError::StoreUnavailable(_)));
        assert!(store.put(Partition::Static, text("k")).await.is_err());
        assert!(!store.stats().await.available);

        store.attach(Arc::new(MemoryBackend::new())).await;
        store.put(Partition::Static, text("k")).await.unwrap();
        assert!(store.contains(Partition::Static, "k").await.unwrap());

        store.close().await;
        assert!(!store.is_available().await);
    }

    #[tokio::test]
    async fn test_cleanup_trims_partitions_grown_outside_put() {
        let (store, backend) = store_with(caps(4), 1);

        // Write straight to the backend to simulate external tier growth
        for i in 0..8 {
            let entry = text(&format!("k{}", i));
            backend
                .put(Partition::Prefetch, &entry.key, encode(&entry).unwrap())
                .await
                .unwrap();
        }
        backend
            .put(Partition::Prefetch, "junk", Bytes::from_static(b"\x00"))
            .await
            .unwrap();

        let report = store.cleanup().await.unwrap();
        assert_eq!(report.corrupt_removed, 1);
        assert_eq!(report.evicted, 5);
        assert_eq!(store.len(Partition::Prefetch).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cleanup_reports_only_its_own_corrupt_removals() {
        let (store, backend) = store_with(caps(5), 0);
        for key in ["a", "b"] {
            backend
                .put(Partition::Dynamic, key, Bytes::from_static(b"\x00"))
                .await
                .unwrap();
        }

        // Dropped by a read before the sweep starts
        assert!(store.get(Partition::Dynamic, "a").await.unwrap().is_none());

        let report = store.cleanup().await.unwrap();
        assert_eq!(report.corrupt_removed, 1);
        assert_eq!(store.stats().await.corrupt, 2);
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_other_partitions() {
        let (store, _) = store_with(caps(5), 0);
        store.put(Partition::Prefetch, text("https://a.test/next")).await.unwrap();

        let entry = store
            .lookup(Partition::Dynamic, "https://a.test/next")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.partition, Partition::Prefetch);
        assert_eq!(entry.access_count, 2);

        assert!(store.lookup(Partition::Static, "https://a.test/none").await.unwrap().is_none());
        let stats = store.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_lookup_prefers_requested_partition() {
        let (store, _) = store_with(caps(5), 0);
        store.put(Partition::Prefetch, text("k")).await.unwrap();
        store.put(Partition::Dynamic, text("k")).await.unwrap();

        let entry = store.lookup(Partition::Dynamic, "k").await.unwrap().unwrap();
        assert_eq!(entry.partition, Partition::Dynamic);
    }

    #[test]
    fn test_partial_capacities_keep_defaults() {
        let caps: PartitionCapacities = serde_json::from_str(r#"{"api": 10}"#).unwrap();
        assert_eq!(caps.api, 10);
        assert_eq!(caps.prefetch, PartitionCapacities::default().prefetch);
        assert_eq!(caps.static_assets, 50);
    }

    #[tokio::test]
    async fn test_cleanup_enforces_global_limit() {
        let backend = Arc::new(MemoryBackend::new());
        let config = CacheConfig {
            capacities: caps(10),
            eviction_buffer: 0,
            max_entries: 4,
            ..Default::default()
        };
        let store = CacheStore::new(config, backend);

        for partition in [Partition::Static, Partition::Api] {
            for i in 0..3 {
                store.put(partition, text(&format!("{}-{}", partition, i))).await.unwrap();
            }
        }

        let report = store.cleanup().await.unwrap();
        assert_eq!(report.evicted, 2);
        assert_eq!(store.stats().await.entries(), 4);
    }

    #[tokio::test]
    async fn test_delete_everywhere() {
        let (store, _) = store_with(caps(5), 0);
        store.put(Partition::Static, text("k")).await.unwrap();
        store.put(Partition::Prefetch, text("k")).await.unwrap();

        assert_eq!(store.delete_everywhere("k").await.unwrap(), 2);
        assert_eq!(store.delete_everywhere("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_policy_swap() {
        let (store, _) = store_with(caps(2), 0);
        let store = store.with_policy(Arc::new(crate::LeastFrequentlyUsed));
        assert_eq!(store.policy_name(), "lfu");

        store
            .put(Partition::Static, text("hot").with_access_count(50))
            .await
            .unwrap();
        store.put(Partition::Static, text("cold")).await.unwrap();
        store.put(Partition::Static, text("newer")).await.unwrap();

        assert!(store.contains(Partition::Static, "hot").await.unwrap());
        assert!(!store.contains(Partition::Static, "cold").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_cleanup_runs_on_interval() {
        let (store, backend) = store_with(caps(1), 0);
        let store = Arc::new(store);
        for i in 0..3 {
            let entry = text(&format!("k{}", i));
            backend
                .put(Partition::Api, &entry.key, encode(&entry).unwrap())
                .await
                .unwrap();
        }

        let handle = store.spawn_cleanup(Duration::from_secs(300));
        tokio::time::sleep(Duration::from_secs(301)).await;
        // Let the sweep finish its backend calls
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(store.len(Partition::Api).await.unwrap(), 1);
        handle.stop().await;
    }
}
