//! Partitioned Response Cache
//!
//! This crate implements the storage side of the foresight prefetcher:
//!
//! - **Partitions**: static, dynamic, prefetch and api, each with its own
//!   capacity and evicted independently
//! - **Eviction**: pluggable ranking ([`WeightedRecency`] by default, LRU and
//!   LFU available) applied synchronously on overflowing writes and by a
//!   periodic sweep
//! - **Versioned entries**: corrupt or outdated records read as absent and are
//!   deleted
//! - **Backends**: in-memory or file-per-record on disk
//! - **Sanitization**: markup is filtered before it is written
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        CacheStore                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │   put ──> [partition lock] ──> evict? ──> encode ──> backend │
//! │   get ──> [partition lock] ──> decode ──> touch  ──> backend │
//! │                                   │                          │
//! │                         corrupt / old version                │
//! │                                   ↓                          │
//! │                                delete                        │
//! │                                                              │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────┐ │
//! │  │ static  50 │  │ dynamic 100│  │ prefetch200│  │ api 30 │ │
//! │  └────────────┘  └────────────┘  └────────────┘  └────────┘ │
//! │                                                              │
//! │   cleanup timer (5 min) ──> sweep every partition            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod cache;
mod entry;
mod error;
pub mod eviction;
pub mod sanitize;
mod storage;

pub use cache::{
    CacheConfig, CacheStats, CacheStore, CleanupHandle, CleanupReport, PartitionCapacities,
};
pub use entry::{now_millis, CacheEntry, Partition, Payload, ENTRY_VERSION};
pub use error::{CacheError, Result};
pub use eviction::{EvictionPolicy, LeastFrequentlyUsed, LeastRecentlyUsed, WeightedRecency};
pub use sanitize::{AllowListSanitizer, FallbackSanitizer, SanitizationPipeline, Sanitizer};
pub use storage::{DiskBackend, MemoryBackend, StoreBackend};

/// Default slack left below capacity after an eviction
pub const DEFAULT_EVICTION_BUFFER: usize = 5;

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        CacheConfig, CacheEntry, CacheStore, MemoryBackend, Partition, Payload, Result,
        SanitizationPipeline,
    };
}
