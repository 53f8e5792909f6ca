//! Request/response correlation over the message bus
//!
//! Every outgoing request gets a pending slot and its own timer task. The
//! first matching response resolves the slot; anything else is either an
//! unsolicited event (broadcast to subscribers) or a stale response that is
//! logged and dropped.

use crate::bus::{BusEndpoint, BusSender};
use crate::{CoordinationMessage, MessageKind, PrefetchError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Budget for each request
    pub timeout: Duration,
    /// Buffered unsolicited events per subscriber
    pub event_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            event_capacity: 64,
        }
    }
}

/// Resolved response
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Remote outcome
    pub success: bool,
    /// Response payload
    pub payload: Value,
}

impl Reply {
    /// Convert a failed reply into [`PrefetchError::Remote`]
    pub fn into_result(self) -> Result<Value> {
        if self.success {
            return Ok(self.payload);
        }
        let reason = self
            .payload
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.payload.to_string());
        Err(PrefetchError::Remote(reason))
    }
}

struct PendingCall {
    kind: MessageKind,
    issued_at: Instant,
    reply: oneshot::Sender<Result<Reply>>,
    timer: JoinHandle<()>,
}

struct Shared {
    pending: Mutex<HashMap<u64, PendingCall>>,
    events: broadcast::Sender<CoordinationMessage>,
    closed: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_message(&self, incoming: CoordinationMessage) {
        let Some(request_id) = incoming.correlates_to else {
            // No receivers is fine for events
            let _ = self.events.send(incoming);
            return;
        };

        let call = self.pending().remove(&request_id);
        match call {
            Some(call) => {
                call.timer.abort();
                debug!(
                    "{} request {} answered in {:?}",
                    call.kind,
                    request_id,
                    call.issued_at.elapsed()
                );
                let _ = call.reply.send(Ok(Reply {
                    success: incoming.success,
                    payload: incoming.payload,
                }));
            }
            None => debug!(
                "Dropping response {} for unknown or resolved request {}",
                incoming.message_id, request_id
            ),
        }
    }

    fn expire(&self, id: u64, after: Duration) {
        let call = self.pending().remove(&id);
        if let Some(call) = call {
            warn!(
                "{} request {} timed out after {}ms",
                call.kind,
                id,
                after.as_millis()
            );
            let _ = call.reply.send(Err(PrefetchError::CoordinationTimeout {
                id,
                after_ms: after.as_millis() as u64,
            }));
        }
    }

    fn fail_all(&self) -> usize {
        let calls: Vec<PendingCall> = self.pending().drain().map(|(_, call)| call).collect();
        let failed = calls.len();
        for call in calls {
            call.timer.abort();
            let _ = call.reply.send(Err(PrefetchError::ChannelClosed));
        }
        failed
    }
}

/// Handle to an outstanding request
#[derive(Debug)]
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<Result<Reply>>,
}

impl PendingReply {
    /// Message id of the request
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the response, the timeout or the channel closing
    pub async fn wait(self) -> Result<Reply> {
        self.rx.await.unwrap_or(Err(PrefetchError::ChannelClosed))
    }
}

/// Foreground side of the coordination protocol
pub struct CoordinationChannel {
    config: ChannelConfig,
    outgoing: BusSender,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl CoordinationChannel {
    /// Attach to a bus endpoint and start reading from it
    pub fn new(endpoint: BusEndpoint, config: ChannelConfig) -> Self {
        let (outgoing, incoming) = endpoint.split();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
        });

        let reader = tokio::spawn(read_loop(incoming, Arc::clone(&shared)));

        Self {
            config,
            outgoing,
            shared,
            next_id: AtomicU64::new(1),
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Issue a request and return a handle to its response
    pub async fn send(&self, kind: MessageKind, payload: Value) -> Result<PendingReply> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PrefetchError::ChannelClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        let timeout = self.config.timeout;

        {
            // The timer cannot expire the slot before it is inserted
            let mut pending = self.shared.pending();
            let shared = Arc::clone(&self.shared);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                shared.expire(id, timeout);
            });
            pending.insert(
                id,
                PendingCall {
                    kind,
                    issued_at: Instant::now(),
                    reply,
                    timer,
                },
            );
        }

        let message = CoordinationMessage::request(id, kind, payload);
        if let Err(e) = self.outgoing.send(message).await {
            if let Some(call) = self.shared.pending().remove(&id) {
                call.timer.abort();
            }
            return Err(e);
        }

        debug!("Sent {} request {}", kind, id);
        Ok(PendingReply { id, rx })
    }

    /// Issue a request and wait for a successful response payload
    pub async fn request(&self, kind: MessageKind, payload: Value) -> Result<Value> {
        self.send(kind, payload).await?.wait().await?.into_result()
    }

    /// Handle a message that arrived outside the bus reader
    pub fn on_message(&self, incoming: CoordinationMessage) {
        self.shared.on_message(incoming);
    }

    /// Receive unsolicited events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationMessage> {
        self.shared.events.subscribe()
    }

    /// Outstanding requests
    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    /// Check if the channel is closed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop reading, cancel every timer and fail every pending wait
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }

        let failed = self.shared.fail_all();
        debug!("Coordination channel closed, {} pending requests failed", failed);
    }
}

impl Drop for CoordinationChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop(mut incoming: mpsc::Receiver<CoordinationMessage>, shared: Arc<Shared>) {
    while let Some(message) = incoming.recv().await {
        shared.on_message(message);
    }

    // Peer gone; nobody will answer what is still pending
    shared.closed.store(true, Ordering::Release);
    let failed = shared.fail_all();
    if failed > 0 {
        warn!("Message bus closed with {} pending requests", failed);
    }
}
