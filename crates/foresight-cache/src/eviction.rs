//! Eviction policies
//!
//! A policy only ranks entries. The store decides when to evict and how many
//! entries to remove; the policy decides which ones go first.

use crate::CacheEntry;
use std::fmt;

const MS_PER_MINUTE: f64 = 60_000.0;
const MS_PER_HOUR: f64 = 3_600_000.0;

/// Ranking used to pick eviction victims
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Policy name for logs and stats
    fn name(&self) -> &'static str;

    /// Compute eviction score (lower = evict first)
    fn score(&self, entry: &CacheEntry, now: u64) -> f64;
}

/// Age and idle time weighed against access frequency.
///
/// Staleness is `age_hours + minutes_since_last_access - access_count * 10`;
/// the score is its negation so the stalest, least used entries rank lowest.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedRecency;

impl WeightedRecency {
    /// Staleness of an entry at `now` (higher = staler)
    pub fn staleness(entry: &CacheEntry, now: u64) -> f64 {
        let age_hours = entry.age_ms(now) as f64 / MS_PER_HOUR;
        let idle_minutes = entry.idle_ms(now) as f64 / MS_PER_MINUTE;
        age_hours + idle_minutes - entry.access_count as f64 * 10.0
    }
}

impl EvictionPolicy for WeightedRecency {
    fn name(&self) -> &'static str {
        "weighted-recency"
    }

    fn score(&self, entry: &CacheEntry, now: u64) -> f64 {
        -Self::staleness(entry, now)
    }
}

/// Pure LRU
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastRecentlyUsed;

impl EvictionPolicy for LeastRecentlyUsed {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn score(&self, entry: &CacheEntry, _now: u64) -> f64 {
        entry.last_accessed as f64
    }
}

/// Pure LFU, recency breaks ties
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastFrequentlyUsed;

impl EvictionPolicy for LeastFrequentlyUsed {
    fn name(&self) -> &'static str {
        "lfu"
    }

    fn score(&self, entry: &CacheEntry, _now: u64) -> f64 {
        entry.access_count as f64
    }
}

/// Pick the entries to remove so that at most `target_len` remain.
///
/// Ties on score fall back to least recent access, then key, so the choice is
/// deterministic.
pub fn select_victims(
    policy: &dyn EvictionPolicy,
    entries: Vec<CacheEntry>,
    now: u64,
    target_len: usize,
) -> Vec<CacheEntry> {
    if entries.len() <= target_len {
        return Vec::new();
    }

    let excess = entries.len() - target_len;
    let mut scored: Vec<(f64, CacheEntry)> = entries
        .into_iter()
        .map(|entry| (policy.score(&entry, now), entry))
        .collect();

    scored.sort_by(|(a_score, a), (b_score, b)| {
        a_score
            .total_cmp(b_score)
            .then_with(|| a.last_accessed.cmp(&b.last_accessed))
            .then_with(|| a.key.cmp(&b.key))
    });

    scored.into_iter().take(excess).map(|(_, entry)| entry).collect()
}
