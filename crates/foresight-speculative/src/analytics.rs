//! Per-URL visit analytics

use dashmap::DashMap;
use foresight_cache::now_millis;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// How long a record survives without a visit
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Visit statistics of one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub url: String,
    pub visit_count: u64,
    /// Unix ms of the latest visit
    pub last_visit: u64,
    pub total_load_time_ms: u64,
    pub avg_load_time_ms: f64,
}

impl AnalyticsRecord {
    /// Empty record for a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            visit_count: 0,
            last_visit: 0,
            total_load_time_ms: 0,
            avg_load_time_ms: 0.0,
        }
    }

    fn record(&mut self, load_time: Duration, now: u64) {
        self.visit_count += 1;
        self.last_visit = self.last_visit.max(now);
        self.total_load_time_ms += load_time.as_millis() as u64;
        self.avg_load_time_ms = self.total_load_time_ms as f64 / self.visit_count as f64;
    }
}

/// Read-only view of the aggregator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    /// URLs with a live record
    pub tracked_urls: usize,
    /// Visits across all URLs
    pub total_visits: u64,
    /// Records, most visited first
    pub records: Vec<AnalyticsRecord>,
}

/// Lock-free visit counters keyed by URL
#[derive(Debug)]
pub struct AnalyticsAggregator {
    records: DashMap<String, AnalyticsRecord>,
    retention: Duration,
}

impl Default for AnalyticsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl AnalyticsAggregator {
    /// Create an aggregator with a retention window
    pub fn new(retention: Duration) -> Self {
        Self {
            records: DashMap::new(),
            retention,
        }
    }

    /// Record a visit now
    pub fn record_visit(&self, url: &str, load_time: Duration) {
        self.record_visit_at(url, load_time, now_millis());
    }

    /// Record a visit at `now` (unix ms)
    pub fn record_visit_at(&self, url: &str, load_time: Duration, now: u64) {
        self.records
            .entry(url.to_string())
            .or_insert_with(|| AnalyticsRecord::new(url))
            .record(load_time, now);
    }

    /// Record of a URL
    pub fn get(&self, url: &str) -> Option<AnalyticsRecord> {
        self.records.get(url).map(|r| r.value().clone())
    }

    /// Visits of a URL
    pub fn visit_count(&self, url: &str) -> u64 {
        self.records.get(url).map_or(0, |r| r.visit_count)
    }

    /// Number of tracked URLs
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records whose last visit is older than the retention window
    pub fn prune_at(&self, now: u64) -> usize {
        let retention = self.retention.as_millis() as u64;
        let before = self.records.len();
        self.records
            .retain(|_, r| now.saturating_sub(r.last_visit) <= retention);
        let pruned = before.saturating_sub(self.records.len());

        if pruned > 0 {
            debug!("Pruned {} expired analytics records", pruned);
        }
        pruned
    }

    /// Drop expired records now
    pub fn prune_expired(&self) -> usize {
        self.prune_at(now_millis())
    }

    /// Snapshot of every record
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let mut records: Vec<AnalyticsRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| {
            b.visit_count
                .cmp(&a.visit_count)
                .then_with(|| a.url.cmp(&b.url))
        });

        AnalyticsSnapshot {
            tracked_urls: records.len(),
            total_visits: records.iter().map(|r| r.visit_count).sum(),
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: u64 = 3_600_000;

    #[test]
    fn test_counts_and_average() {
        let analytics = AnalyticsAggregator::default();
        analytics.record_visit_at("/a", Duration::from_millis(100), 1_000);
        analytics.record_visit_at("/a", Duration::from_millis(300), 2_000);

        let record = analytics.get("/a").unwrap();
        assert_eq!(record.visit_count, 2);
        assert_eq!(record.last_visit, 2_000);
        assert_eq!(record.total_load_time_ms, 400);
        assert!((record.avg_load_time_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(analytics.visit_count("/missing"), 0);
    }

    #[test]
    fn test_prune_after_retention() {
        let analytics = AnalyticsAggregator::default();
        analytics.record_visit_at("/old", Duration::ZERO, 0);
        analytics.record_visit_at("/new", Duration::ZERO, 20 * HOUR);

        assert_eq!(analytics.prune_at(24 * HOUR), 0);
        assert_eq!(analytics.prune_at(25 * HOUR), 1);
        assert!(analytics.get("/old").is_none());
        assert!(analytics.get("/new").is_some());
    }

    #[test]
    fn test_snapshot_orders_by_visits() {
        let analytics = AnalyticsAggregator::default();
        analytics.record_visit_at("/b", Duration::ZERO, 1);
        for _ in 0..3 {
            analytics.record_visit_at("/a", Duration::ZERO, 1);
        }

        let snapshot = analytics.snapshot();
        assert_eq!(snapshot.tracked_urls, 2);
        assert_eq!(snapshot.total_visits, 4);
        assert_eq!(snapshot.records[0].url, "/a");
    }

    #[test]
    fn test_concurrent_increments_commute() {
        let analytics = std::sync::Arc::new(AnalyticsAggregator::default());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let analytics = analytics.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        analytics.record_visit("/hot", Duration::from_millis(1));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(analytics.visit_count("/hot"), 1000);
    }
}
