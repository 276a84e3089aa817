//! In-memory backend.
//!
//! Implements the full backend contract against a revisioned BTreeMap with a
//! bounded event history for watch replay. Used by tests and in-process
//! deployments; the semantics (global revision, CAS, compaction window)
//! mirror the etcd-backed production configuration.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::backend::{Backend, BackendError, BackendEvent, EventType, RawObject};

const DEFAULT_HISTORY_LIMIT: usize = 2048;

struct Entry {
    data: Vec<u8>,
    revision: u64,
}

struct Subscriber {
    prefix: String,
    tx: mpsc::UnboundedSender<BackendEvent>,
}

struct Mem {
    revision: u64,
    tree: BTreeMap<String, Entry>,
    history: VecDeque<BackendEvent>,
    subscribers: Vec<Subscriber>,
}

impl Mem {
    fn broadcast(&mut self, event: BackendEvent, history_limit: usize) {
        self.history.push_back(event.clone());
        while self.history.len() > history_limit {
            self.history.pop_front();
        }
        self.subscribers
            .retain(|sub| !event.object.key.starts_with(&sub.prefix) || sub.tx.send(event.clone()).is_ok());
    }

    fn oldest_retained(&self) -> Option<u64> {
        self.history.front().map(|e| e.object.revision)
    }
}

/// A revisioned, watchable in-memory key/value store.
pub struct MemoryBackend {
    inner: Mutex<Mem>,
    history_limit: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend::new()
    }
}

impl MemoryBackend {
    /// A fresh empty backend.
    pub fn new() -> MemoryBackend {
        MemoryBackend {
            inner: Mutex::new(Mem {
                revision: 0,
                tree: BTreeMap::new(),
                history: VecDeque::new(),
                subscribers: Vec::new(),
            }),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// A backend retaining at most `limit` events for watch replay; small
    /// limits make compaction testable.
    pub fn with_history_limit(limit: usize) -> MemoryBackend {
        MemoryBackend {
            history_limit: limit.max(1),
            ..MemoryBackend::new()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Mem> {
        // lock poisoning only happens when a writer panicked; propagating
        // the panic is the least surprising option in a store
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn current_revision(&self) -> u64 {
        self.lock().revision
    }

    async fn get(&self, key: &str) -> Result<Option<RawObject>, BackendError> {
        let mem = self.lock();
        Ok(mem.tree.get(key).map(|entry| RawObject {
            key: key.to_string(),
            data: entry.data.clone(),
            revision: entry.revision,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<(Vec<RawObject>, u64), BackendError> {
        let mem = self.lock();
        let items = mem
            .tree
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| RawObject {
                key: key.clone(),
                data: entry.data.clone(),
                revision: entry.revision,
            })
            .collect();
        Ok((items, mem.revision))
    }

    async fn create(&self, key: &str, data: Vec<u8>) -> Result<u64, BackendError> {
        let mut mem = self.lock();
        if mem.tree.contains_key(key) {
            return Err(BackendError::AlreadyExists);
        }
        mem.revision += 1;
        let revision = mem.revision;
        mem.tree.insert(
            key.to_string(),
            Entry {
                data: data.clone(),
                revision,
            },
        );
        let limit = self.history_limit;
        mem.broadcast(
            BackendEvent {
                event_type: EventType::Added,
                object: RawObject {
                    key: key.to_string(),
                    data,
                    revision,
                },
            },
            limit,
        );
        Ok(revision)
    }

    async fn update(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_revision: u64,
    ) -> Result<u64, BackendError> {
        let mut mem = self.lock();
        let current = mem.tree.get(key).ok_or(BackendError::NotFound)?;
        if current.revision != expected_revision {
            return Err(BackendError::Conflict);
        }
        mem.revision += 1;
        let revision = mem.revision;
        mem.tree.insert(
            key.to_string(),
            Entry {
                data: data.clone(),
                revision,
            },
        );
        let limit = self.history_limit;
        mem.broadcast(
            BackendEvent {
                event_type: EventType::Modified,
                object: RawObject {
                    key: key.to_string(),
                    data,
                    revision,
                },
            },
            limit,
        );
        Ok(revision)
    }

    async fn delete(
        &self,
        key: &str,
        expected_revision: Option<u64>,
    ) -> Result<u64, BackendError> {
        let mut mem = self.lock();
        let current = mem.tree.get(key).ok_or(BackendError::NotFound)?;
        if let Some(expected) = expected_revision {
            if current.revision != expected {
                return Err(BackendError::Conflict);
            }
        }
        let data = current.data.clone();
        mem.tree.remove(key);
        mem.revision += 1;
        let revision = mem.revision;
        let limit = self.history_limit;
        mem.broadcast(
            BackendEvent {
                event_type: EventType::Deleted,
                object: RawObject {
                    key: key.to_string(),
                    data,
                    revision,
                },
            },
            limit,
        );
        Ok(revision)
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: u64,
    ) -> Result<mpsc::UnboundedReceiver<BackendEvent>, BackendError> {
        let mut mem = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();

        if from_revision > 0 && from_revision < mem.revision {
            // replay is only possible while the span is still retained
            match mem.oldest_retained() {
                Some(oldest) if oldest > from_revision + 1 => {
                    return Err(BackendError::Expired);
                }
                None if mem.revision > from_revision => {
                    return Err(BackendError::Expired);
                }
                _ => {}
            }
            for event in mem.history.iter() {
                if event.object.revision > from_revision && event.object.key.starts_with(prefix) {
                    // receiver not yet returned, send cannot fail
                    let _ = tx.send(event.clone());
                }
            }
        }

        mem.subscribers.push(Subscriber {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let backend = MemoryBackend::new();
        let rev1 = backend.create("/g/r/a", b"one".to_vec()).await.unwrap();
        assert_eq!(rev1, 1);
        assert_eq!(
            backend.create("/g/r/a", b"dup".to_vec()).await.unwrap_err(),
            BackendError::AlreadyExists
        );

        let got = backend.get("/g/r/a").await.unwrap().unwrap();
        assert_eq!(got.data, b"one");
        assert_eq!(got.revision, 1);

        let rev2 = backend.update("/g/r/a", b"two".to_vec(), rev1).await.unwrap();
        assert!(rev2 > rev1);
        assert_eq!(
            backend
                .update("/g/r/a", b"stale".to_vec(), rev1)
                .await
                .unwrap_err(),
            BackendError::Conflict
        );

        backend.delete("/g/r/a", Some(rev2)).await.unwrap();
        assert!(backend.get("/g/r/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_ordered() {
        let backend = MemoryBackend::new();
        backend.create("/g/r/b", b"2".to_vec()).await.unwrap();
        backend.create("/g/r/a", b"1".to_vec()).await.unwrap();
        backend.create("/g/other/c", b"3".to_vec()).await.unwrap();

        let (items, revision) = backend.list("/g/r/").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, "/g/r/a");
        assert_eq!(items[1].key, "/g/r/b");
        assert_eq!(revision, 3);
    }

    #[tokio::test]
    async fn test_watch_live_events_in_order() {
        let backend = MemoryBackend::new();
        let mut watch = backend.watch("/g/r/", 0).await.unwrap();

        let rev1 = backend.create("/g/r/a", b"1".to_vec()).await.unwrap();
        let rev2 = backend.update("/g/r/a", b"2".to_vec(), rev1).await.unwrap();
        backend.delete("/g/r/a", Some(rev2)).await.unwrap();
        backend.create("/elsewhere/x", b"x".to_vec()).await.unwrap();

        let e1 = watch.recv().await.unwrap();
        assert_eq!(e1.event_type, EventType::Added);
        let e2 = watch.recv().await.unwrap();
        assert_eq!(e2.event_type, EventType::Modified);
        let e3 = watch.recv().await.unwrap();
        assert_eq!(e3.event_type, EventType::Deleted);
        assert!(e1.object.revision < e2.object.revision);
        assert!(e2.object.revision < e3.object.revision);
        // the write outside the prefix is not delivered
        assert!(watch.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_replays_from_revision() {
        let backend = MemoryBackend::new();
        let rev1 = backend.create("/g/r/a", b"1".to_vec()).await.unwrap();
        backend.update("/g/r/a", b"2".to_vec(), rev1).await.unwrap();

        let mut watch = backend.watch("/g/r/", rev1).await.unwrap();
        let replayed = watch.recv().await.unwrap();
        assert_eq!(replayed.event_type, EventType::Modified);
        assert_eq!(replayed.object.data, b"2");
    }

    #[tokio::test]
    async fn test_watch_expired_after_compaction() {
        let backend = MemoryBackend::with_history_limit(2);
        let rev1 = backend.create("/g/r/a", b"1".to_vec()).await.unwrap();
        let rev2 = backend.update("/g/r/a", b"2".to_vec(), rev1).await.unwrap();
        let rev3 = backend.update("/g/r/a", b"3".to_vec(), rev2).await.unwrap();
        backend.update("/g/r/a", b"4".to_vec(), rev3).await.unwrap();

        assert_eq!(
            backend.watch("/g/r/", rev1).await.err(),
            Some(BackendError::Expired)
        );
        // starting from now still works
        assert!(backend.watch("/g/r/", 0).await.is_ok());
    }
}
