//! Background execution actor
//!
//! Owns the strategy engine (and through it the cache store), answers
//! coordination requests and runs the periodic cleanup sweep. Requests are
//! served concurrently, one task each; the foreground scheduler bounds how
//! many prefetches are in flight.

use crate::bus::{BusEndpoint, BusSender};
use crate::{CoordinationMessage, MessageKind, PrefetchError, Result};
use foresight_network::{RequestDescriptor, StrategyEngine, StrategyResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Event name broadcast after the cache changed
pub const CACHE_UPDATED_EVENT: &str = "cache-updated";

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Interval of the periodic cleanup sweep
    pub cleanup_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Payload of URL-addressed requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPayload {
    pub url: String,
    #[serde(default)]
    pub priority: u32,
}

impl UrlPayload {
    /// Payload for a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: 0,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Encode as a message payload
    pub fn to_value(&self) -> Value {
        json!({ "url": self.url, "priority": self.priority })
    }
}

/// Background actor serving coordination requests
pub struct BackgroundWorker {
    engine: StrategyEngine,
    origin: Url,
    config: WorkerConfig,
    next_id: AtomicU64,
}

impl BackgroundWorker {
    /// Create a worker for an origin
    pub fn new(engine: StrategyEngine, origin: Url, config: WorkerConfig) -> Self {
        Self {
            engine,
            origin,
            config,
            // Kept apart from foreground request ids
            next_id: AtomicU64::new(1 << 32),
        }
    }

    /// Strategy engine in use
    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    /// Start serving messages from the bus
    pub fn spawn(self, endpoint: BusEndpoint) -> WorkerHandle {
        let (outgoing, incoming) = endpoint.split();
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Arc::new(self);

        let task = tokio::spawn(Arc::clone(&worker).run(outgoing, incoming, stop_rx));

        WorkerHandle {
            stop: stop_tx,
            task,
            worker,
        }
    }

    async fn run(
        self: Arc<Self>,
        outgoing: BusSender,
        mut incoming: mpsc::Receiver<CoordinationMessage>,
        mut stop: watch::Receiver<bool>,
    ) {
        let cleanup = self
            .engine
            .store()
            .spawn_cleanup(self.config.cleanup_interval);
        info!("Background worker started for {}", self.origin);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                message = incoming.recv() => {
                    let Some(message) = message else {
                        debug!("Message bus closed, stopping worker");
                        break;
                    };
                    if message.is_response() || message.kind == MessageKind::Status {
                        debug!("Ignoring {} message {}", message.kind, message.message_id);
                        continue;
                    }

                    let worker = Arc::clone(&self);
                    let outgoing = outgoing.clone();
                    tokio::spawn(async move { worker.serve(message, outgoing).await });
                }
            }
        }

        cleanup.stop().await;
        info!("Background worker stopped");
    }

    async fn serve(&self, message: CoordinationMessage, outgoing: BusSender) {
        let (reply, updated) = self.respond(&message).await;
        if outgoing.send(reply).await.is_err() {
            debug!("Dropping reply to {}: foreground gone", message.message_id);
            return;
        }

        if let Some(url) = updated {
            let event = CoordinationMessage::status(
                self.next_id(),
                json!({ "event": CACHE_UPDATED_EVENT, "url": url }),
            );
            // Events are best effort
            let _ = outgoing.send(event).await;
        }
    }

    /// Serve one request and build its reply
    pub async fn handle(&self, message: &CoordinationMessage) -> CoordinationMessage {
        self.respond(message).await.0
    }

    async fn respond(&self, message: &CoordinationMessage) -> (CoordinationMessage, Option<String>) {
        let id = self.next_id();
        match self.execute(message).await {
            Ok(outcome) => (
                message.reply(id, outcome.success, outcome.payload),
                outcome.updated,
            ),
            Err(e) => {
                warn!("{} request {} failed: {}", message.kind, message.message_id, e);
                (message.reply(id, false, json!({ "error": e.to_string() })), None)
            }
        }
    }

    async fn execute(&self, message: &CoordinationMessage) -> Result<Outcome> {
        let store = self.engine.store();

        match message.kind {
            MessageKind::Prefetch => {
                let payload = self.url_payload(message)?;
                let request = RequestDescriptor::parse(&payload.url, &self.origin)?
                    .prefetch()
                    .with_priority(payload.priority);
                let response = self.engine.handle(&request).await;
                Ok(fetched(&request, &response))
            }
            MessageKind::Prerender => {
                let payload = self.url_payload(message)?;
                let request = RequestDescriptor::parse(&payload.url, &self.origin)?
                    .with_destination("document")
                    .with_priority(payload.priority);
                let response = self.engine.handle(&request).await;
                Ok(fetched(&request, &response))
            }
            MessageKind::Invalidate => {
                let payload = self.url_payload(message)?;
                let request = RequestDescriptor::parse(&payload.url, &self.origin)?;
                let removed = store.delete_everywhere(request.key()).await?;
                Ok(Outcome::done(json!({ "removed": removed }))
                    .updating(request.key(), removed > 0))
            }
            MessageKind::Stats => {
                let stats = store.stats().await;
                Ok(Outcome::done(serde_json::to_value(stats)?))
            }
            MessageKind::Refresh => {
                let payload = self.url_payload(message)?;
                let request = RequestDescriptor::parse(&payload.url, &self.origin)?;
                let updated = self.engine.revalidate(&request).await?;
                Ok(Outcome::done(json!({ "updated": updated }))
                    .updating(request.key(), updated))
            }
            MessageKind::Cleanup => {
                let report = store.cleanup().await?;
                Ok(Outcome::done(serde_json::to_value(report)?))
            }
            MessageKind::Status => Err(PrefetchError::InvalidRequest(
                "STATUS is not a request".to_string(),
            )),
        }
    }

    fn url_payload(&self, message: &CoordinationMessage) -> Result<UrlPayload> {
        Ok(serde_json::from_value(message.payload.clone())?)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

struct Outcome {
    success: bool,
    payload: Value,
    /// Key whose cached copy changed
    updated: Option<String>,
}

impl Outcome {
    fn done(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            updated: None,
        }
    }

    fn updating(mut self, key: &str, changed: bool) -> Self {
        if changed {
            self.updated = Some(key.to_string());
        }
        self
    }
}

fn fetched(request: &RequestDescriptor, response: &StrategyResponse) -> Outcome {
    let success = response.status == 200;
    Outcome {
        success,
        payload: json!({
            "url": request.key(),
            "status": response.status,
            "source": response.source,
        }),
        updated: (success && !response.is_cached()).then(|| request.key().to_string()),
    }
}

/// Handle to a running worker
pub struct WorkerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    worker: Arc<BackgroundWorker>,
}

impl WorkerHandle {
    /// Strategy engine of the worker
    pub fn engine(&self) -> &StrategyEngine {
        self.worker.engine()
    }

    /// Stop accepting messages; in-flight requests run to completion
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("Background worker task failed: {}", e);
        }
        self.worker.engine.wait_for_revalidations().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use async_trait::async_trait;
    use foresight_cache::{CacheConfig, CacheStore, MemoryBackend, Partition};
    use foresight_network::{FetchResponse, Fetcher, NetworkConfig, NetworkError};
    use std::collections::HashMap;

    const ORIGIN: &str = "https://shop.test/";

    #[derive(Default)]
    struct PageFetcher {
        pages: std::sync::Mutex<HashMap<String, &'static str>>,
    }

    impl PageFetcher {
        fn serve(&self, path: &str, body: &'static str) {
            self.pages
                .lock()
                .unwrap()
                .insert(format!("https://shop.test{}", path), body);
        }
    }

    #[async_trait]
    impl Fetcher for PageFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> foresight_network::Result<FetchResponse> {
            match self.pages.lock().unwrap().get(url) {
                Some(body) => Ok(FetchResponse::new(200, *body).with_header("content-type", "text/plain")),
                None => Ok(FetchResponse::new(404, "missing")),
            }
        }
    }

    struct DownFetcher;

    #[async_trait]
    impl Fetcher for DownFetcher {
        async fn fetch(&self, _url: &str, _timeout: Duration) -> foresight_network::Result<FetchResponse> {
            Err(NetworkError::Connection("refused".into()))
        }
    }

    fn worker(fetcher: Arc<dyn Fetcher>) -> (BackgroundWorker, Arc<CacheStore>) {
        let store = Arc::new(CacheStore::new(
            CacheConfig::default(),
            Arc::new(MemoryBackend::new()),
        ));
        let engine = StrategyEngine::new(NetworkConfig::default(), store.clone(), fetcher).unwrap();
        let worker = BackgroundWorker::new(engine, Url::parse(ORIGIN).unwrap(), WorkerConfig::default());
        (worker, store)
    }

    fn request(kind: MessageKind, path: &str) -> CoordinationMessage {
        CoordinationMessage::request(1, kind, UrlPayload::new(path).with_priority(10).to_value())
    }

    #[tokio::test]
    async fn test_prefetch_fills_prefetch_partition() {
        let fetcher = Arc::new(PageFetcher::default());
        fetcher.serve("/next", "next page");
        let (worker, store) = worker(fetcher);

        let reply = worker.handle(&request(MessageKind::Prefetch, "/next")).await;

        assert!(reply.success);
        assert_eq!(reply.correlates_to, Some(1));
        assert_eq!(reply.payload["status"], 200);
        let entry = store
            .peek(Partition::Prefetch, "https://shop.test/next")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.payload.as_bytes(), b"next page");
        assert_eq!(entry.priority, 10);
    }

    #[tokio::test]
    async fn test_prerender_fills_dynamic_partition() {
        let fetcher = Arc::new(PageFetcher::default());
        fetcher.serve("/checkout", "checkout");
        let (worker, store) = worker(fetcher);

        let reply = worker.handle(&request(MessageKind::Prerender, "/checkout")).await;

        assert!(reply.success);
        assert!(store
            .contains(Partition::Dynamic, "https://shop.test/checkout")
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_failure_is_reported_not_raised() {
        let (worker, store) = worker(Arc::new(DownFetcher));

        let reply = worker.handle(&request(MessageKind::Prefetch, "/next")).await;

        assert!(!reply.success);
        assert_eq!(reply.payload["source"], "offline");
        assert_eq!(store.len(Partition::Prefetch).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_and_stats() {
        let fetcher = Arc::new(PageFetcher::default());
        fetcher.serve("/a", "a");
        let (worker, _) = worker(fetcher);
        worker.handle(&request(MessageKind::Prefetch, "/a")).await;

        let stats = worker
            .handle(&CoordinationMessage::request(2, MessageKind::Stats, Value::Null))
            .await;
        assert!(stats.success);
        assert_eq!(stats.payload["available"], true);

        let reply = worker.handle(&request(MessageKind::Invalidate, "/a")).await;
        assert!(reply.success);
        assert_eq!(reply.payload["removed"], 1);
    }

    #[tokio::test]
    async fn test_bad_payload_and_cross_origin_fail() {
        let (worker, _) = worker(Arc::new(PageFetcher::default()));

        let reply = worker
            .handle(&CoordinationMessage::request(3, MessageKind::Prefetch, json!({"href": "/a"})))
            .await;
        assert!(!reply.success);

        let reply = worker
            .handle(&request(MessageKind::Refresh, "https://elsewhere.test/a"))
            .await;
        assert!(!reply.success);
        assert!(reply.payload["error"].as_str().unwrap().contains("Invalid request"));
    }

    #[tokio::test]
    async fn test_spawned_worker_replies_and_broadcasts_updates() {
        let fetcher = Arc::new(PageFetcher::default());
        fetcher.serve("/a", "a");
        let (worker, _) = worker(fetcher);
        let (fg, bg) = bus::pair(8);
        let handle = worker.spawn(bg);
        let (tx, mut rx) = fg.split();

        tx.send(request(MessageKind::Refresh, "/a")).await.unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.correlates_to, Some(1));
        assert_eq!(reply.payload["updated"], true);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, MessageKind::Status);
        assert_eq!(event.payload["event"], CACHE_UPDATED_EVENT);
        assert_eq!(event.payload["url"], "https://shop.test/a");

        handle.shutdown().await;
    }
}
