//! Speculative Prefetching
//!
//! This crate decides what to fetch before the user asks for it:
//!
//! - **Priority scoring**: trigger weight, context boosts and visit history
//! - **Admission**: per-URL dedup, priority order and a concurrency ceiling
//! - **Coordination**: correlated request/response messages with timeouts
//!   between a foreground engine and a background worker
//! - **Analytics**: per-URL visit counts with a 24 hour retention window
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        PrefetchEngine                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  Signal ──> canonicalize ──> PriorityCalculator ──> Scheduler   │
//! │  (hover)     (same origin)     ↑ analytics           (ceiling 3)│
//! │                                                          │      │
//! │                                          drain_ready ────┘      │
//! │                                                ↓                │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │           CoordinationChannel (pending map + timers)      │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! └────────────────────────────│────────────────────────────────────┘
//!                      message bus (PREFETCH, STATS, ...)
//! ┌────────────────────────────↓────────────────────────────────────┐
//! │  BackgroundWorker ──> StrategyEngine ──> CacheStore              │
//! │        └── periodic cleanup sweep                                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use foresight_cache::{CacheConfig, CacheStore, MemoryBackend};
//! use foresight_network::{ClientConfig, HttpClient, NetworkConfig};
//! use foresight_speculative::prelude::*;
//!
//! let config = PrefetchConfig::for_origin("https://shop.test");
//! let store = Arc::new(CacheStore::new(CacheConfig::from(&config), Arc::new(MemoryBackend::new())));
//! let fetcher = Arc::new(HttpClient::new(ClientConfig::from(&NetworkConfig::from(&config)))?);
//! let foresight = foresight_speculative::spawn(config, store, fetcher)?;
//!
//! foresight.engine.on_signal(&SignalEvent::new("/checkout", Trigger::Hover))?;
//! ```

mod analytics;
pub mod bus;
mod channel;
mod config;
mod engine;
mod error;
mod message;
mod priority;
mod scheduler;
mod worker;

pub use analytics::{AnalyticsAggregator, AnalyticsRecord, AnalyticsSnapshot, DEFAULT_RETENTION};
pub use channel::{ChannelConfig, CoordinationChannel, PendingReply, Reply};
pub use config::PrefetchConfig;
pub use engine::{spawn, EngineStats, Foresight, PrefetchEngine, SignalEvent, DEFAULT_BUS_CAPACITY};
pub use error::{PrefetchError, Result};
pub use message::{CoordinationMessage, MessageKind};
pub use priority::{
    ContextSignals, PriorityCalculator, PriorityWeights, Trigger, HIGH_PRIORITY_TAG,
    NAVIGATION_TAG, PRIMARY_CONTENT_TAG,
};
pub use scheduler::{
    Admission, AdmissionScheduler, Dispatch, PrefetchRequest, SchedulerConfig, SchedulerStats,
};
pub use worker::{BackgroundWorker, UrlPayload, WorkerConfig, WorkerHandle, CACHE_UPDATED_EVENT};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        Admission, Foresight, PrefetchConfig, PrefetchEngine, PrefetchError, Result, SignalEvent,
        Trigger,
    };
}
