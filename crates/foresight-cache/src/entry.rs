//! Cache entries and the partitions they live in

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Revision of the stored entry layout and sanitizer rules.
///
/// Entries written under another revision are dropped when read.
pub const ENTRY_VERSION: u32 = 1;

/// Independently capacity-bounded subdivision of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Scripts, stylesheets, fonts, images and media
    Static,
    /// HTML documents and other network-first content
    Dynamic,
    /// Speculatively fetched resources
    Prefetch,
    /// Allow-listed API responses
    Api,
}

impl Partition {
    /// Every partition, in sweep order
    pub const ALL: [Partition; 4] = [
        Partition::Static,
        Partition::Dynamic,
        Partition::Prefetch,
        Partition::Api,
    ];

    /// Stable name used for directories and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Static => "static",
            Partition::Dynamic => "dynamic",
            Partition::Prefetch => "prefetch",
            Partition::Api => "api",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Partition::Static => 0,
            Partition::Dynamic => 1,
            Partition::Prefetch => 2,
            Partition::Api => 3,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Sanitized markup or plain text
    Text(String),
    /// Opaque bytes stored as fetched
    Binary(Bytes),
}

impl Payload {
    /// Size in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes of the payload
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    /// Convert into a byte buffer
    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Text(text) => Bytes::from(text),
            Payload::Binary(bytes) => bytes,
        }
    }
}

/// A cached response with its access metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical URL
    pub key: String,
    /// Response body
    pub payload: Payload,
    /// HTTP status of the cached response
    pub status: u16,
    /// Response headers worth replaying
    pub headers: Vec<(String, String)>,
    /// Write timestamp (unix ms)
    pub created_at: u64,
    /// Last read or write (unix ms)
    pub last_accessed: u64,
    /// Reads and writes seen so far
    pub access_count: u32,
    /// Admission priority the entry was fetched with
    pub priority: u32,
    /// Owning partition
    pub partition: Partition,
    /// Layout/sanitizer revision
    pub version: u32,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time
    pub fn new(key: impl Into<String>, partition: Partition, payload: Payload) -> Self {
        let now = now_millis();
        Self {
            key: key.into(),
            payload,
            status: 200,
            headers: Vec::new(),
            created_at: now,
            last_accessed: now,
            access_count: 1,
            priority: 0,
            partition,
            version: ENTRY_VERSION,
        }
    }

    /// With status
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// With headers
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// With priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Override both timestamps (imports and tests)
    pub fn with_timestamps(mut self, created_at: u64, last_accessed: u64) -> Self {
        self.created_at = created_at;
        self.last_accessed = last_accessed.max(created_at);
        self
    }

    /// With access count
    pub fn with_access_count(mut self, access_count: u32) -> Self {
        self.access_count = access_count;
        self
    }

    /// Record an access at `now`
    pub fn touch_at(&mut self, now: u64) {
        self.last_accessed = now.max(self.created_at);
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Record an access now
    pub fn touch(&mut self) {
        self.touch_at(now_millis());
    }

    /// Milliseconds since the entry was written
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// Milliseconds since the entry was last read or written
    pub fn idle_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_accessed)
    }

    /// Check if the entry is older than `threshold_ms`
    pub fn is_stale(&self, now: u64, threshold_ms: u64) -> bool {
        self.age_ms(now) > threshold_ms
    }

    /// Check if the entry was written under the current revision
    pub fn is_current(&self) -> bool {
        self.version == ENTRY_VERSION
    }

    /// Value of the `content-type` header, if recorded
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }
}

/// Current unix time in milliseconds
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_counts_first_write() {
        let entry = CacheEntry::new("https://a.test/", Partition::Dynamic, Payload::Text("hi".into()));
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.version, ENTRY_VERSION);
        assert!(entry.last_accessed >= entry.created_at);
    }

    #[test]
    fn test_touch_never_moves_before_creation() {
        let mut entry = CacheEntry::new("k", Partition::Static, Payload::Binary(Bytes::new()))
            .with_timestamps(10_000, 10_000);
        entry.touch_at(5_000);
        assert_eq!(entry.last_accessed, 10_000);
        assert_eq!(entry.access_count, 2);
    }

    #[test]
    fn test_staleness() {
        let entry = CacheEntry::new("k", Partition::Static, Payload::Text(String::new()))
            .with_timestamps(0, 0);
        assert!(!entry.is_stale(3_600_000, 3_600_000));
        assert!(entry.is_stale(3_600_001, 3_600_000));
    }

    #[test]
    fn test_content_type_lookup_is_case_insensitive() {
        let entry = CacheEntry::new("k", Partition::Dynamic, Payload::Text(String::new()))
            .with_headers(vec![("Content-Type".into(), "text/html".into())]);
        assert_eq!(entry.content_type(), Some("text/html"));
    }

    #[test]
    fn test_partition_names() {
        let names: Vec<_> = Partition::ALL.iter().map(|p| p.as_str()).collect();
        assert_eq!(names, ["static", "dynamic", "prefetch", "api"]);
    }
}
