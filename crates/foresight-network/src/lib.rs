//! Request Classification and Fetch Strategies
//!
//! This crate turns a request into a response using the cache and the
//! network:
//!
//! - **Classification**: pure mapping from a request to its content class,
//!   strategy and cache partition
//! - **Canonicalization**: same-origin http(s) URLs only
//! - **Strategies**: cache-first, network-first, stale-while-revalidate
//! - **Bounded fetches**: every fetch has a timeout and exactly one retry
//! - **Offline fallback**: failures end in a cached copy or a placeholder
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       StrategyEngine                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐      │
//! │  │  Classifier  │ -> │   Strategy   │ -> │   Fetcher    │      │
//! │  │ (class/part.)│    │  (3 modes)   │    │ (timeout+1x) │      │
//! │  └──────────────┘    └──────────────┘    └──────────────┘      │
//! │                             ↓ ↑                 ↓              │
//! │                      ┌──────────────┐   ┌──────────────┐      │
//! │                      │  CacheStore  │ <-│  Sanitizer   │      │
//! │                      └──────────────┘   └──────────────┘      │
//! │                                                                  │
//! │  background revalidations ──> refetch ──> replace cached copy   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod classify;
mod client;
mod config;
mod error;
mod strategy;

pub use classify::{canonicalize, classify, FetchStrategy, RequestDescriptor, ResourceClass};
pub use client::{fetch_with_retry, ClientConfig, FetchResponse, Fetcher, HttpClient};
pub use config::{NetworkConfig, RetryConfig, DEFAULT_API_CACHE_PATTERN};
pub use error::{NetworkError, Result};
pub use strategy::{ResponseSource, StrategyEngine, StrategyResponse, OFFLINE_STATUS};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        Fetcher, HttpClient, NetworkConfig, RequestDescriptor, ResourceClass, Result,
        StrategyEngine, StrategyResponse,
    };
}
