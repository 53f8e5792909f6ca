//! Foreground decision actor
//!
//! Turns interaction signals into prioritized, admitted prefetches and hands
//! them to the background worker over the coordination channel. The engine
//! never touches the cache store directly; everything it learns about the
//! cache comes back as a message.

use crate::bus::{self, BusEndpoint};
use crate::channel::{ChannelConfig, CoordinationChannel};
use crate::scheduler::{Admission, AdmissionScheduler, PrefetchRequest, SchedulerConfig, SchedulerStats};
use crate::worker::{BackgroundWorker, UrlPayload, WorkerConfig, WorkerHandle};
use crate::{
    AnalyticsAggregator, AnalyticsSnapshot, ContextSignals, CoordinationMessage, MessageKind,
    PrefetchConfig, PrefetchError, PriorityCalculator, Result, Trigger,
};
use foresight_cache::{CacheStats, CacheStore, CleanupReport};
use foresight_network::{canonicalize, Fetcher, NetworkConfig, StrategyEngine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Messages buffered on each side of the in-process bus
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Interaction reported by a signal source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// Target URL, absolute or relative to the origin
    pub url: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub context: ContextSignals,
}

impl SignalEvent {
    /// Signal without context tags
    pub fn new(url: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            url: url.into(),
            trigger,
            context: ContextSignals::default(),
        }
    }

    /// Add a context tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.context = self.context.with_tag(tag);
        self
    }
}

/// Read-only view of both actors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Cache statistics reported by the worker, if it answered
    pub cache: Option<CacheStats>,
    pub pending_count: usize,
    pub active_count: usize,
    pub scheduler: SchedulerStats,
    pub analytics: AnalyticsSnapshot,
}

/// Foreground prefetch engine
pub struct PrefetchEngine {
    config: PrefetchConfig,
    origin: Url,
    calculator: PriorityCalculator,
    analytics: Arc<AnalyticsAggregator>,
    scheduler: AdmissionScheduler,
    channel: Arc<CoordinationChannel>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl PrefetchEngine {
    /// Start the engine on one end of a message bus
    pub fn new(config: PrefetchConfig, endpoint: BusEndpoint) -> Result<Self> {
        config.validate()?;
        let origin = config.origin_url()?;

        let scheduler = AdmissionScheduler::new(SchedulerConfig::from(&config));
        let channel = Arc::new(CoordinationChannel::new(endpoint, ChannelConfig::from(&config)));
        let analytics = Arc::new(AnalyticsAggregator::default());
        let (stop, stop_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(dispatch_loop(
            scheduler.clone(),
            Arc::clone(&channel),
            config.max_concurrent_prefetch,
            stop_rx.clone(),
        ));
        let pruner = tokio::spawn(prune_loop(
            Arc::clone(&analytics),
            config.cleanup_interval(),
            stop_rx,
        ));

        info!(
            "Prefetch engine started for {} (max {} concurrent)",
            origin, config.max_concurrent_prefetch
        );

        Ok(Self {
            calculator: PriorityCalculator::new(config.priority_weights),
            config,
            origin,
            analytics,
            scheduler,
            channel,
            stop,
            tasks: Mutex::new(vec![dispatcher, pruner]),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Visit analytics
    pub fn analytics(&self) -> &AnalyticsAggregator {
        &self.analytics
    }

    /// Admission scheduler
    pub fn scheduler(&self) -> &AdmissionScheduler {
        &self.scheduler
    }

    /// Score a signal and submit it for admission.
    ///
    /// Malformed, cross-origin and non-http(s) URLs fail with
    /// [`PrefetchError::InvalidRequest`] and are never queued.
    pub fn on_signal(&self, event: &SignalEvent) -> Result<Admission> {
        self.ensure_running()?;
        let url = self.canonical(&event.url)?;

        let record = self.analytics.get(url.as_str());
        let priority = self
            .calculator
            .calculate(event.trigger, &event.context, record.as_ref());

        let admission = self
            .scheduler
            .submit(PrefetchRequest::new(url, event.trigger, priority));
        debug!(
            "{} on {} scored {}: {:?}",
            event.trigger, event.url, priority, admission
        );
        Ok(admission)
    }

    /// Record a completed page visit
    pub fn record_visit(&self, url: &str, load_time: Duration) -> Result<()> {
        let url = self.canonical(url)?;
        self.analytics.record_visit(url.as_str(), load_time);
        Ok(())
    }

    /// Stop draining new prefetches; running ones finish
    pub fn pause(&self) {
        self.scheduler.pause();
    }

    /// Resume draining
    pub fn resume(&self) {
        self.scheduler.resume();
    }

    /// Remove a URL from every cache partition
    pub async fn invalidate(&self, url: &str) -> Result<usize> {
        let value = self.url_request(MessageKind::Invalidate, url).await?;
        Ok(value.get("removed").and_then(Value::as_u64).unwrap_or(0) as usize)
    }

    /// Refetch a URL and replace its cached copy
    pub async fn refresh(&self, url: &str) -> Result<bool> {
        let value = self.url_request(MessageKind::Refresh, url).await?;
        Ok(value.get("updated").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Prerender a document into the dynamic partition
    pub async fn prerender(&self, url: &str) -> Result<bool> {
        let value = self.url_request(MessageKind::Prerender, url).await?;
        Ok(value.get("status").and_then(Value::as_u64) == Some(200))
    }

    /// Prune analytics and run a cache cleanup sweep
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        self.ensure_running()?;
        self.analytics.prune_expired();
        let value = self.channel.request(MessageKind::Cleanup, Value::Null).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Snapshot of both actors
    pub async fn stats(&self) -> EngineStats {
        let cache = match self.channel.request(MessageKind::Stats, Value::Null).await {
            Ok(value) => serde_json::from_value(value).ok(),
            Err(e) => {
                debug!("Cache stats unavailable: {}", e);
                None
            }
        };

        let scheduler = self.scheduler.stats();
        EngineStats {
            cache,
            pending_count: scheduler.pending,
            active_count: scheduler.active,
            scheduler,
            analytics: self.analytics.snapshot(),
        }
    }

    /// Receive unsolicited worker events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationMessage> {
        self.channel.subscribe()
    }

    /// Check if the engine was shut down
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop admitting, cancel coordination waits and stop the engine tasks.
    ///
    /// Fetches already handed to the worker are not aborted.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let dropped = self.scheduler.close();
        let _ = self.stop.send(true);
        self.channel.close();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Engine task failed: {}", e);
            }
        }
        info!("Prefetch engine shut down, {} pending prefetches dropped", dropped);
    }

    async fn url_request(&self, kind: MessageKind, url: &str) -> Result<Value> {
        self.ensure_running()?;
        let url = self.canonical(url)?;
        self.channel
            .request(kind, UrlPayload::new(url.as_str()).to_value())
            .await
    }

    fn canonical(&self, raw: &str) -> Result<Url> {
        canonicalize(raw, &self.origin).map_err(|e| PrefetchError::InvalidRequest(e.to_string()))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(PrefetchError::ShutDown);
        }
        Ok(())
    }
}

impl Drop for PrefetchEngine {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
        for task in self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
    }
}

async fn dispatch_loop(
    scheduler: AdmissionScheduler,
    channel: Arc<CoordinationChannel>,
    max_concurrent: usize,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        for dispatch in scheduler.drain_ready(max_concurrent) {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let request = dispatch.request();
                let url = request.url.to_string();
                let payload = UrlPayload::new(url.as_str())
                    .with_priority(request.priority)
                    .to_value();

                let result = channel.request(MessageKind::Prefetch, payload).await;
                if let Err(e) = &result {
                    debug!("Prefetch of {} failed: {}", url, e);
                }
                dispatch.complete(result.is_ok());
            });
        }

        if scheduler.is_closed() {
            break;
        }

        tokio::select! {
            _ = scheduler.ready() => {}
            _ = stop.changed() => break,
        }
    }
}

async fn prune_loop(
    analytics: Arc<AnalyticsAggregator>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                analytics.prune_expired();
            }
            _ = stop.changed() => break,
        }
    }
}

/// Both actors wired over an in-process bus
pub struct Foresight {
    /// Foreground engine
    pub engine: PrefetchEngine,
    worker: WorkerHandle,
}

impl Foresight {
    /// Cache store owned by the worker
    pub fn store(&self) -> &Arc<CacheStore> {
        self.worker.engine().store()
    }

    /// Shut down the engine, then the worker
    pub async fn shutdown(self) {
        self.engine.shutdown().await;
        self.worker.shutdown().await;
    }
}

/// Start a foreground engine and a background worker over an injected store
/// and fetcher.
pub fn spawn(
    config: PrefetchConfig,
    store: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
) -> Result<Foresight> {
    config.validate()?;
    let origin = config.origin_url()?;

    let strategy = StrategyEngine::new(NetworkConfig::from(&config), store, fetcher)?;
    let (foreground, background) = bus::pair(DEFAULT_BUS_CAPACITY);

    let worker = BackgroundWorker::new(strategy, origin, WorkerConfig::from(&config))
        .spawn(background);
    let engine = PrefetchEngine::new(config, foreground)?;

    Ok(Foresight { engine, worker })
}
