//! Prefetch admission scheduler
//!
//! Deduplicates, priority-orders and throttles prefetch requests. The
//! concurrency ceiling is a semaphore; every dispatched request holds a permit
//! inside a [`Dispatch`] guard whose drop releases it exactly once.

use crate::Trigger;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ceiling on concurrently running prefetches
    pub max_concurrent: usize,
    /// How long a served URL suppresses equal-or-lower resubmissions
    pub served_window: Duration,
    /// Maximum pending requests
    pub max_pending: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            served_window: Duration::from_secs(60),
            max_pending: 256,
        }
    }
}

/// A request waiting for admission to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchRequest {
    /// Canonical URL
    pub url: Url,
    /// Interaction that produced it
    pub trigger: Trigger,
    /// Priority (higher runs first)
    pub priority: u32,
    /// Time of submission
    pub enqueued_at: Instant,
}

impl PrefetchRequest {
    /// Create a request stamped now
    pub fn new(url: Url, trigger: Trigger, priority: u32) -> Self {
        Self {
            url,
            trigger,
            priority,
            enqueued_at: Instant::now(),
        }
    }
}

/// Outcome of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Admission {
    /// Added to the pending set, or replaced a lower-priority entry
    Accepted,
    /// Dropped in favor of an equal-or-higher pending, running or served request
    Superseded,
    /// Refused (scheduler closed or pending set full)
    Rejected,
}

/// Heap slot; stale slots are skipped when popped
#[derive(Debug, PartialEq, Eq)]
struct Slot {
    priority: u32,
    seq: u64,
    url: String,
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        // Highest priority first, then earliest enqueue
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct State {
    pending: HashMap<String, (u64, PrefetchRequest)>,
    heap: BinaryHeap<Slot>,
    in_flight: HashMap<String, u32>,
    served: HashMap<String, (u32, Instant)>,
    next_seq: u64,
    active: usize,
    paused: bool,
    closed: bool,
    completed: u64,
    failed: u64,
    superseded: u64,
    rejected: u64,
}

struct Shared {
    config: SchedulerConfig,
    state: Mutex<State>,
    semaphore: Arc<Semaphore>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Requests waiting for a slot
    pub pending: usize,
    /// Requests currently running
    pub active: usize,
    /// Dispatches that completed successfully
    pub completed: u64,
    /// Dispatches that failed
    pub failed: u64,
    /// Submissions dropped by the supersede rule
    pub superseded: u64,
    /// Submissions refused
    pub rejected: u64,
    /// Whether drains are halted
    pub paused: bool,
}

/// Priority-ordered, deduplicating, concurrency-bounded admission queue.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct AdmissionScheduler {
    shared: Arc<Shared>,
}

impl AdmissionScheduler {
    /// Create a new scheduler
    pub fn new(config: SchedulerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::default()),
                semaphore,
                notify: Notify::new(),
            }),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Submit a request for admission
    pub fn submit(&self, request: PrefetchRequest) -> Admission {
        let key = request.url.as_str().to_string();
        let mut state = self.shared.lock();

        if state.closed {
            state.rejected += 1;
            return Admission::Rejected;
        }

        let window = self.shared.config.served_window;
        let now = Instant::now();
        state
            .served
            .retain(|_, (_, at)| now.saturating_duration_since(*at) < window);

        let blocking = [
            state.served.get(&key).map(|(p, _)| *p),
            state.in_flight.get(&key).copied(),
            state.pending.get(&key).map(|(_, r)| r.priority),
        ];
        if let Some(existing) = blocking
            .into_iter()
            .flatten()
            .find(|p| request.priority <= *p)
        {
            state.superseded += 1;
            debug!(
                "Superseded {} at priority {} (existing {})",
                key, request.priority, existing
            );
            return Admission::Superseded;
        }

        let replacing = state.pending.contains_key(&key);
        if !replacing && state.pending.len() >= self.shared.config.max_pending {
            state.rejected += 1;
            debug!("Rejected {}: pending set full", key);
            return Admission::Rejected;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Slot {
            priority: request.priority,
            seq,
            url: key.clone(),
        });
        state.pending.insert(key.clone(), (seq, request));
        drop(state);

        if replacing {
            debug!("Replaced pending {} with a higher priority", key);
        }
        self.shared.notify.notify_one();
        Admission::Accepted
    }

    /// Pop up to `max_concurrent - active` highest-priority requests.
    ///
    /// Each returned [`Dispatch`] holds a concurrency permit until it is
    /// completed or dropped. Returns nothing while paused or at the ceiling.
    pub fn drain_ready(&self, max_concurrent: usize) -> Vec<Dispatch> {
        let mut state = self.shared.lock();
        if state.paused || state.closed {
            return Vec::new();
        }

        let mut ready = Vec::new();
        while state.active < max_concurrent {
            let Some(slot) = state.heap.pop() else { break };

            let live = matches!(state.pending.get(&slot.url), Some((seq, _)) if *seq == slot.seq);
            if !live {
                continue;
            }

            let Ok(permit) = self.shared.semaphore.clone().try_acquire_owned() else {
                state.heap.push(slot);
                break;
            };

            let Some((_, request)) = state.pending.remove(&slot.url) else {
                continue;
            };
            state.in_flight.insert(slot.url, request.priority);
            state.active += 1;

            ready.push(Dispatch {
                request,
                permit: Some(permit),
                shared: Arc::clone(&self.shared),
                success: false,
            });
        }

        ready
    }

    /// Halt drains; running dispatches finish normally
    pub fn pause(&self) {
        self.shared.lock().paused = true;
        debug!("Admission paused");
    }

    /// Resume drains and wake the dispatcher
    pub fn resume(&self) {
        self.shared.lock().paused = false;
        debug!("Admission resumed");
        self.shared.notify.notify_one();
    }

    /// Refuse further submissions and drop everything pending.
    ///
    /// Returns the number of dropped requests.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut state = self.shared.lock();
            state.closed = true;
            state.heap.clear();
            let dropped = state.pending.len();
            state.pending.clear();
            dropped
        };
        self.shared.notify.notify_one();
        dropped
    }

    /// Check if the scheduler is closed
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Check if drains are halted
    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Wait until a submission, completion, resume or close happened
    pub async fn ready(&self) {
        self.shared.notify.notified().await;
    }

    /// Requests waiting for a slot
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Requests currently running
    pub fn active_count(&self) -> usize {
        self.shared.lock().active
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.lock();
        SchedulerStats {
            pending: state.pending.len(),
            active: state.active,
            completed: state.completed,
            failed: state.failed,
            superseded: state.superseded,
            rejected: state.rejected,
            paused: state.paused,
        }
    }
}

/// A running prefetch.
///
/// Dropping the guard releases the concurrency slot; a guard dropped without
/// [`complete`](Self::complete) counts as a failure.
pub struct Dispatch {
    request: PrefetchRequest,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared>,
    success: bool,
}

impl Dispatch {
    /// Request being executed
    pub fn request(&self) -> &PrefetchRequest {
        &self.request
    }

    /// Finish the dispatch with its outcome
    pub fn complete(mut self, success: bool) {
        self.success = success;
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        let key = self.request.url.as_str();
        {
            let mut state = self.shared.lock();
            state.active = state.active.saturating_sub(1);
            if state.in_flight.get(key) == Some(&self.request.priority) {
                state.in_flight.remove(key);
            }

            if self.success {
                state.completed += 1;
                state
                    .served
                    .insert(key.to_string(), (self.request.priority, Instant::now()));
            } else {
                state.failed += 1;
            }
        }

        // Release the slot before waking the dispatcher so its next drain sees it
        drop(self.permit.take());
        self.shared.notify.notify_one();
    }
}
