//! Deduplicating work queue with in-flight tracking and rate-limited requeues.
//!
//! A key is in at most one of three places:
//!
//! ```text
//!   add ──► dirty + queue ──get──► processing ──done──► (gone)
//!                 ▲                    │
//!                 └──── re-added while processing (dirty) ◄┘
//! ```
//!
//! - A key already waiting in the queue is not queued twice.
//! - A key added while it is being processed is marked dirty and only
//!   re-queued when the worker calls [`WorkQueue::done`], so a key is never
//!   handed to two workers at once.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::lock;
use crate::rate_limiter::{RateLimiter, default_controller_rate_limiter};

/// Bookkeeping protected by the queue lock.
struct QueueState<K> {
    /// Keys waiting to be handed out, in FIFO order.
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or re-added while processing).
    dirty: HashSet<K>,
    /// Keys handed out by `get` and not yet `done`.
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Shared<K> {
    state: Mutex<QueueState<K>>,
    /// Signalled when a key becomes available or the queue shuts down.
    available: Notify,
    /// Signalled whenever a processing key is released.
    released: Notify,
    limiter: Box<dyn RateLimiter<K>>,
}

/// Work queue shared by the producer and any number of workers.
///
/// Cheap to clone; every clone refers to the same queue.
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    /// Create a queue using [`default_controller_rate_limiter`].
    pub fn new() -> Self {
        Self::with_rate_limiter(default_controller_rate_limiter())
    }

    /// Create a queue with a custom rate limiter.
    pub fn with_rate_limiter(limiter: impl RateLimiter<K> + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                available: Notify::new(),
                released: Notify::new(),
                limiter: Box::new(limiter),
            }),
        }
    }

    /// Add a key for processing.
    ///
    /// No-op if the key is already waiting. If the key is being processed it
    /// is queued again once the current attempt calls [`done`](Self::done).
    /// Keys added after shutdown are dropped.
    pub fn add(&self, key: K) {
        let mut state = lock(&self.shared.state);

        if state.shutting_down {
            trace!(key = ?key, "Queue shutting down, dropping key");
            return;
        }
        if state.dirty.contains(&key) {
            trace!(key = ?key, "Key already pending");
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(key = ?key, "Key in flight, will requeue when done");
            return;
        }

        state.queue.push_back(key);
        drop(state);
        self.shared.available.notify_one();
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue has been shut down, including for calls
    /// that were already waiting.
    pub async fn get(&self) -> Option<K> {
        loop {
            // Register interest before inspecting state so a concurrent
            // `add` or `shut_down` cannot slip between the check and the wait.
            let notified = self.shared.available.notified();

            {
                let mut state = lock(&self.shared.state);
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key returned by [`get`](Self::get) as finished.
    pub fn done(&self, key: &K) {
        let mut state = lock(&self.shared.state);
        state.processing.remove(key);

        let requeue = !state.shutting_down && state.dirty.contains(key);
        if requeue {
            state.queue.push_back(key.clone());
        }
        drop(state);

        if requeue {
            self.shared.available.notify_one();
        }
        self.shared.released.notify_waiters();
    }

    /// Clear the retry counter of a key.
    pub fn forget(&self, key: &K) {
        self.shared.limiter.forget(key);
    }

    /// Number of rate-limited requeues of a key since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.shared.limiter.num_requeues(key)
    }

    /// Re-add a key after the rate limiter's delay, counting a requeue.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.shared.limiter.when(&key);
        debug!(key = ?key, delay_ms = delay.as_millis(), "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Add a key once `delay` has elapsed.
    ///
    /// Must be called from within a tokio runtime when `delay` is non-zero.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Stop handing out work. Waiting and future `get` calls return `None`.
    pub fn shut_down(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        debug!("Work queue shut down");
        self.shared.available.notify_waiters();
    }

    /// Shut down, then wait until every key handed out has been marked done.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();

        loop {
            let released = self.shared.released.notified();
            if lock(&self.shared.state).processing.is_empty() {
                return;
            }
            released.await;
        }
    }

    /// Whether [`shut_down`](Self::shut_down) has been called.
    pub fn is_shutting_down(&self) -> bool {
        lock(&self.shared.state).shutting_down
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    /// Whether no keys are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently being processed.
    pub fn in_flight(&self) -> usize {
        lock(&self.shared.state).processing.len()
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
