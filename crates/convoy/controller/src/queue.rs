//! Deduplicating work queue
//!
//! A key is queued at most once, handed to at most one worker at a time, and
//! re-queued exactly once if it was added again while being processed.
//! Per-key failure counts drive the retry backoff.
//!
//! Delayed adds are coalesced: a key holds at most one pending timer, the
//! earliest deadline wins, and handing the key to a worker cancels it.

use crate::backoff::Backoff;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::Instant;

struct QueueState<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed (queued, or re-added while processing)
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    /// Pending delayed add per key
    waiting: HashMap<K, (Instant, AbortHandle)>,
    shutting_down: bool,
}

impl<K: Eq + Hash> QueueState<K> {
    fn cancel_waiting(&mut self, key: &K) {
        if let Some((_, timer)) = self.waiting.remove(key) {
            timer.abort();
        }
    }
}

pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                waiting: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed. An earlier pending deadline for
    /// the same key is kept; a later one replaces it.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        if let Some((pending, _)) = state.waiting.get(&key) {
            if *pending <= deadline {
                return;
            }
        }
        state.cancel_waiting(&key);

        let queue = Arc::clone(self);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            queue.fire(timer_key, deadline);
        });
        state.waiting.insert(key, (deadline, timer.abort_handle()));
    }

    fn fire(&self, key: K, deadline: Instant) {
        {
            let mut state = self.state();
            let current = state.waiting.get(&key).map(|(pending, _)| *pending) == Some(deadline);
            // superseded or cancelled
            if !current {
                return;
            }
            state.waiting.remove(&key);
        }
        self.add(key);
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.cancel_waiting(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`; re-queues it if it was added meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Count a failure for `key` and schedule a retry after the backoff delay.
    /// Returns the failure count and the delay used.
    pub fn requeue(self: &Arc<Self>, key: K, backoff: &Backoff) -> (u32, Duration) {
        let failures = {
            let mut state = self.state();
            let count = state.failures.entry(key.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let delay = backoff.delay(failures);
        self.add_after(key, delay);
        (failures, delay)
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &K) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Reset the failure count of `key`
    pub fn forget(&self, key: &K) {
        self.state().failures.remove(key);
    }

    /// Keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing queued and nothing being processed
    pub fn is_idle(&self) -> bool {
        let state = self.state();
        state.queue.is_empty() && state.processing.is_empty()
    }

    pub fn is_processing(&self, key: &K) -> bool {
        self.state().processing.contains(key)
    }

    /// Keys with a pending delayed add
    pub fn waiting(&self) -> usize {
        self.state().waiting.len()
    }

    /// Stop handing out keys; waiting workers receive `None`
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            for (_, (_, timer)) in state.waiting.drain() {
                timer.abort();
            }
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
