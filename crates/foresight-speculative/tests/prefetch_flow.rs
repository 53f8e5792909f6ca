//! Foreground engine and background worker over a mock origin

use foresight_cache::{CacheConfig, CacheStore, MemoryBackend, Partition};
use foresight_network::{ClientConfig, HttpClient, NetworkConfig};
use foresight_speculative::prelude::*;
use foresight_speculative::{MessageKind, CACHE_UPDATED_EVENT};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start(server: &MockServer) -> (Foresight, Arc<CacheStore>) {
    init_tracing();
    let config = PrefetchConfig::for_origin(server.uri());
    let store = Arc::new(CacheStore::new(
        CacheConfig::from(&config),
        Arc::new(MemoryBackend::new()),
    ));
    let fetcher = Arc::new(HttpClient::new(ClientConfig::from(&NetworkConfig::from(&config))).unwrap());

    let foresight = foresight_speculative::spawn(config, store.clone(), fetcher).unwrap();
    (foresight, store)
}

async fn wait_for_completions(engine: &PrefetchEngine, completed: u64) {
    for _ in 0..200 {
        let stats = engine.scheduler().stats();
        if stats.completed + stats.failed >= completed {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("prefetches did not complete");
}

#[tokio::test]
async fn test_hover_prefetches_into_cache_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/checkout"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<h1>Checkout</h1><script>steal()</script>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (foresight, store) = start(&server).await;
    let mut events = foresight.engine.subscribe();

    let first = foresight
        .engine
        .on_signal(&SignalEvent::new("/checkout", Trigger::Hover))
        .unwrap();
    assert_eq!(first, Admission::Accepted);
    wait_for_completions(&foresight.engine, 1).await;

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, MessageKind::Status);
    assert_eq!(event.payload["event"], CACHE_UPDATED_EVENT);

    let key = format!("{}/checkout", server.uri());
    let entry = store.peek(Partition::Prefetch, &key).await.unwrap().unwrap();
    assert_eq!(entry.payload.as_bytes(), b"<h1>Checkout</h1>");

    // Served within the window; no second fetch
    let again = foresight
        .engine
        .on_signal(&SignalEvent::new("/checkout", Trigger::Hover))
        .unwrap();
    assert_eq!(again, Admission::Superseded);

    let stats = foresight.engine.stats().await;
    let cache = stats.cache.unwrap();
    assert_eq!(cache.entries(), 1);
    assert_eq!(stats.active_count, 0);

    foresight.shutdown().await;
}

#[tokio::test]
async fn test_invalidate_refresh_and_cleanup_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200).set_body_string("products"))
        .mount(&server)
        .await;

    let (foresight, store) = start(&server).await;
    let key = format!("{}/products", server.uri());

    assert!(foresight.engine.refresh("/products").await.unwrap());
    assert!(store.contains(Partition::Dynamic, &key).await.unwrap());

    assert_eq!(foresight.engine.invalidate("/products").await.unwrap(), 1);
    assert!(!store.contains(Partition::Dynamic, &key).await.unwrap());
    assert_eq!(foresight.engine.invalidate("/products").await.unwrap(), 0);

    let report = foresight.engine.cleanup().await.unwrap();
    assert_eq!(report.evicted, 0);

    foresight.shutdown().await;
}

#[tokio::test]
async fn test_failed_prefetch_frees_the_slot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (foresight, store) = start(&server).await;

    foresight
        .engine
        .on_signal(&SignalEvent::new("/gone", Trigger::Click))
        .unwrap();
    wait_for_completions(&foresight.engine, 1).await;

    let stats = foresight.engine.scheduler().stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.active, 0);
    assert!(store.is_empty(Partition::Prefetch).await.unwrap());

    // Not served, so a retry is admitted
    let retry = foresight
        .engine
        .on_signal(&SignalEvent::new("/gone", Trigger::Click))
        .unwrap();
    assert_eq!(retry, Admission::Accepted);

    foresight.shutdown().await;
}
