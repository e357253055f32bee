//! De-duplicating work queue for reconcile keys
//!
//! Semantics:
//! - A key queued more than once before it is picked up is delivered once.
//! - A key is never handed to two workers at the same time.
//! - A key re-added while a worker holds it is delivered again after
//!   [`WorkQueue::done`], so the newest state is always observed.
//! - Failing keys are re-added with per-key exponential backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::backoff::BackoffConfig;

/// Anything usable as a queue key
pub trait QueueKey: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {}

impl<T> QueueKey for T where T: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {}

struct State<K> {
    /// Keys waiting for a worker, in arrival order
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or re-added while in flight)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    /// Consecutive failures per key
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

/// Work queue with client-go style semantics
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    backoff: BackoffConfig,
}

impl<K: QueueKey> WorkQueue<K> {
    /// Create an empty queue using `backoff` for failed keys
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            backoff,
        }
    }

    /// Mark `key` as needing a reconcile
    pub fn add(&self, key: K) {
        let mut state = self.state.lock();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        // In flight: `done` puts it back
        if state.processing.contains(&key) {
            return;
        }
        trace!(%key, "queued");
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Record a failure for `key` and add it back after its backoff delay
    pub fn add_rate_limited(self: &Arc<Self>, key: K) -> Duration {
        let failures = {
            let mut state = self.state.lock();
            let count = state.failures.entry(key.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let delay = self.backoff.delay(failures);
        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count for `key`
    pub fn forget(&self, key: &K) {
        self.state.lock().failures.remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key, or `None` once the queue is shut down
    ///
    /// The caller must hand the key back with [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            // Register interest before checking so a concurrent add or
            // shutdown cannot slip between the check and the wait.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
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

    /// Release `key` after a worker finished with it
    pub fn done(&self, key: &K) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Number of keys waiting for a worker
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shutdown`] was called
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}

impl<K: QueueKey> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn queue() -> Arc<WorkQueue<String>> {
        Arc::new(WorkQueue::new(BackoffConfig::fixed(Duration::from_millis(5))))
    }

    async fn next(q: &WorkQueue<String>) -> Option<String> {
        timeout(Duration::from_millis(200), q.get())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn duplicate_adds_are_delivered_once() {
        let q = queue();
        q.add("a".to_string());
        q.add("a".to_string());
        q.add("b".to_string());
        assert_eq!(q.len(), 2);

        assert_eq!(next(&q).await.as_deref(), Some("a"));
        assert_eq!(next(&q).await.as_deref(), Some("b"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn in_flight_key_is_not_handed_out_twice() {
        let q = queue();
        q.add("a".to_string());
        let key = next(&q).await.unwrap();

        q.add("a".to_string());
        assert!(q.is_empty());
        assert!(
            timeout(Duration::from_millis(50), q.get()).await.is_err(),
            "second worker must not receive an in-flight key"
        );

        q.done(&key);
        assert_eq!(next(&q).await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn done_without_readd_does_not_requeue() {
        let q = queue();
        q.add("a".to_string());
        let key = next(&q).await.unwrap();
        q.done(&key);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn waiting_worker_wakes_on_add() {
        let q = queue();
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.get().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.add("a".to_string());
        let got = timeout(Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn shutdown_releases_waiting_workers() {
        let q = queue();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let q = Arc::clone(&q);
                tokio::spawn(async move { q.get().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.shutdown();

        for waiter in waiters {
            let got = timeout(Duration::from_millis(200), waiter)
                .await
                .unwrap()
                .unwrap();
            assert!(got.is_none());
        }
        q.add("late".to_string());
        assert!(q.is_empty());
        assert!(q.is_shutting_down());
    }

    #[tokio::test]
    async fn rate_limited_keys_count_failures_until_forgotten() {
        let q = queue();
        let key = "a".to_string();
        q.add_rate_limited(key.clone());
        q.add_rate_limited(key.clone());
        assert_eq!(q.num_requeues(&key), 2);

        assert_eq!(next(&q).await.as_deref(), Some("a"));
        q.forget(&key);
        assert_eq!(q.num_requeues(&key), 0);
    }

    #[tokio::test]
    async fn add_after_delays_delivery() {
        let q = queue();
        q.add_after("a".to_string(), Duration::from_millis(30));
        assert!(q.is_empty());
        assert_eq!(next(&q).await.as_deref(), Some("a"));
    }
}
