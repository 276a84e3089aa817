//! A rate-limited work queue.
//!
//! The shape follows the Kubernetes controller workqueue: keys are deduped
//! while queued, a key re-added during processing is re-queued when done,
//! and failed keys come back with per-key exponential backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(300);

struct QueueState<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty: HashSet<K>,
    failures: HashMap<K, u32>,
    shut_down: bool,
}

/// A deduplicating queue with per-key retry backoff.
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// An empty queue.
    pub fn new() -> Arc<WorkQueue<K>> {
        Arc::new(WorkQueue {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty: HashSet::new(),
                failures: HashMap::new(),
                shut_down: false,
            }),
            notify: Notify::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Adds a key. Keys already queued are deduped; keys being processed are
    /// marked dirty and re-queued once processing finishes.
    pub fn add(&self, key: K) {
        {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            if state.processing.contains(&key) {
                state.dirty.insert(key);
                return;
            }
            if !state.queued.insert(key.clone()) {
                return;
            }
            state.queue.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Re-adds a key after a failure, delayed by per-key exponential backoff.
    pub fn add_rate_limited(self: &Arc<Self>, key: K) {
        let delay = {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            let exp = (*failures - 1).min(20);
            BASE_DELAY
                .saturating_mul(2u32.saturating_pow(exp))
                .min(MAX_DELAY)
        };
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Clears the failure count after a successful reconcile.
    pub fn forget(&self, key: &K) {
        self.lock().failures.remove(key);
    }

    /// Waits for the next key; returns None once the queue is shut down and
    /// drained. The key stays marked as processing until `done`.
    pub async fn get(&self) -> Option<K> {
        loop {
            let waiter = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shut_down {
                    return None;
                }
            }
            waiter.await;
        }
    }

    /// Marks processing of a key finished; dirty keys go straight back in.
    pub fn done(&self, key: &K) {
        let requeue = {
            let mut state = self.lock();
            state.processing.remove(key);
            if state.dirty.remove(key) && !state.shut_down && state.queued.insert(key.clone()) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeue {
            self.notify.notify_one();
        }
    }

    /// Stops accepting keys and wakes all waiters.
    pub fn shut_down(&self) {
        self.lock().shut_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys waiting (excluding in-flight ones).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dedup_while_queued() {
        let queue: Arc<WorkQueue<String>> = WorkQueue::new();
        queue.add("a".to_string());
        queue.add("a".to_string());
        queue.add("b".to_string());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await.unwrap(), "a");
        assert_eq!(queue.get().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_dirty_key_requeued_after_done() {
        let queue: Arc<WorkQueue<String>> = WorkQueue::new();
        queue.add("a".to_string());
        let key = queue.get().await.unwrap();
        // re-added while processing: queued again only when done
        queue.add("a".to_string());
        assert_eq!(queue.len(), 0);
        queue.done(&key);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_retry_comes_back() {
        let queue: Arc<WorkQueue<String>> = WorkQueue::new();
        queue.add_rate_limited("a".to_string());
        let key = tokio::time::timeout(Duration::from_secs(2), queue.get())
            .await
            .expect("retry never arrived")
            .unwrap();
        assert_eq!(key, "a");
        queue.forget(&key);
        queue.done(&key);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let queue: Arc<WorkQueue<String>> = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);
    }
}
