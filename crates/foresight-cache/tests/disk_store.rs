//! CacheStore over the on-disk backend

use bytes::Bytes;
use foresight_cache::prelude::*;
use foresight_cache::{DiskBackend, PartitionCapacities, StoreBackend};
use std::sync::Arc;
use tempfile::tempdir;

fn config(capacity: usize) -> CacheConfig {
    CacheConfig {
        capacities: PartitionCapacities {
            static_assets: capacity,
            dynamic: capacity,
            prefetch: capacity,
            api: capacity,
        },
        eviction_buffer: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_entries_survive_restart() {
    let dir = tempdir().unwrap();

    {
        let backend = Arc::new(DiskBackend::open(dir.path()).await.unwrap());
        let store = CacheStore::new(config(10), backend);
        let entry = CacheEntry::new(
            "https://a.test/app.js",
            Partition::Static,
            Payload::Binary(Bytes::from_static(b"console.log(1)")),
        )
        .with_headers(vec![("content-type".into(), "text/javascript".into())]);
        store.put(Partition::Static, entry).await.unwrap();
        store.close().await;
    }

    let backend = Arc::new(DiskBackend::open(dir.path()).await.unwrap());
    let store = CacheStore::new(config(10), backend);
    let entry = store
        .get(Partition::Static, "https://a.test/app.js")
        .await
        .unwrap()
        .expect("entry persisted");

    assert_eq!(entry.payload.as_bytes(), b"console.log(1)");
    assert_eq!(entry.content_type(), Some("text/javascript"));
    assert_eq!(entry.access_count, 2);
}

#[tokio::test]
async fn test_disk_partition_stays_within_capacity() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(DiskBackend::open(dir.path()).await.unwrap());
    let store = CacheStore::new(config(3), backend.clone());

    for i in 0..10 {
        let key = format!("https://a.test/page/{}", i);
        store
            .put(
                Partition::Prefetch,
                CacheEntry::new(key, Partition::Prefetch, Payload::Text("x".into())),
            )
            .await
            .unwrap();
        assert!(store.len(Partition::Prefetch).await.unwrap() <= 3);
    }

    assert_eq!(backend.count(Partition::Prefetch).await.unwrap(), 3);
    assert!(store.stats().await.evictions >= 7);
}

#[tokio::test]
async fn test_sanitized_markup_is_what_gets_cached() {
    let store = CacheStore::new(config(5), Arc::new(MemoryBackend::new()));
    let pipeline = SanitizationPipeline::default();

    let raw = r#"<h1 onclick="x()">Title</h1><script>steal()</script><p>Body</p>"#;
    let clean = pipeline.sanitize(raw);
    store
        .put(
            Partition::Dynamic,
            CacheEntry::new("https://a.test/", Partition::Dynamic, Payload::Text(clean)),
        )
        .await
        .unwrap();

    let cached = store
        .peek(Partition::Dynamic, "https://a.test/")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        cached.payload,
        Payload::Text("<h1>Title</h1><p>Body</p>".into())
    );
}

/// Overwrite every record file of a partition with garbage
fn corrupt_records(root: &std::path::Path, partition: Partition) -> usize {
    let mut corrupted = 0;
    for shard in std::fs::read_dir(root.join(partition.as_str())).unwrap() {
        let shard = shard.unwrap().path();
        if !shard.is_dir() {
            continue;
        }
        for file in std::fs::read_dir(shard).unwrap() {
            let path = file.unwrap().path();
            if path.extension().and_then(|e| e.to_str()) == Some("bin") {
                std::fs::write(&path, b"\x01").unwrap();
                corrupted += 1;
            }
        }
    }
    corrupted
}

fn binary(key: &str, body: &'static [u8]) -> CacheEntry {
    CacheEntry::new(key, Partition::Static, Payload::Binary(Bytes::from_static(body)))
}

#[tokio::test]
async fn test_unreadable_record_reads_as_absent_and_is_replaced() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(DiskBackend::open(dir.path()).await.unwrap());
    let store = CacheStore::new(config(10), backend.clone());
    let key = "https://a.test/app.js";

    store.put(Partition::Static, binary(key, b"v1")).await.unwrap();
    assert_eq!(corrupt_records(dir.path(), Partition::Static), 1);

    assert!(store.get(Partition::Static, key).await.unwrap().is_none());
    assert_eq!(backend.count(Partition::Static).await.unwrap(), 0);
    assert_eq!(store.stats().await.corrupt, 1);

    store.put(Partition::Static, binary(key, b"v2")).await.unwrap();
    let entry = store.get(Partition::Static, key).await.unwrap().unwrap();
    assert_eq!(entry.payload.as_bytes(), b"v2");
}

#[tokio::test]
async fn test_cleanup_sweeps_unreadable_records() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(DiskBackend::open(dir.path()).await.unwrap());
    let store = CacheStore::new(config(10), backend);

    for i in 0..2 {
        let key = format!("https://a.test/{}.css", i);
        store.put(Partition::Static, binary(&key, b"body")).await.unwrap();
    }
    assert_eq!(corrupt_records(dir.path(), Partition::Static), 2);

    let report = store.cleanup().await.unwrap();
    assert_eq!(report.corrupt_removed, 2);
    assert!(store.is_empty(Partition::Static).await.unwrap());
}
