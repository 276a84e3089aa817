//! The key/value backend contract.
//!
//! The real deployment backs this with an etcd-compatible store; the
//! contract captures exactly what the resource layer needs: revisioned
//! reads, compare-and-swap writes, prefix listing and revision-anchored
//! watches. Revisions are global and strictly increasing.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Backend failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The key does not exist.
    #[error("key not found")]
    NotFound,

    /// A create collided with an existing key.
    #[error("key already exists")]
    AlreadyExists,

    /// A compare-and-swap lost against a newer revision.
    #[error("revision conflict")]
    Conflict,

    /// The requested watch start revision is older than the backend retains.
    #[error("requested revision has been compacted")]
    Expired,

    /// Anything else; carries the backend's own message.
    #[error("backend failure: {0}")]
    Internal(String),
}

/// A stored value with its key and modification revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawObject {
    /// Full key.
    pub key: String,
    /// Stored bytes.
    pub data: Vec<u8>,
    /// Revision of the write that produced this value.
    pub revision: u64,
}

/// Kind of a backend watch event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    /// Key created.
    Added,
    /// Key overwritten.
    Modified,
    /// Key removed; the event carries the last value.
    Deleted,
}

/// A single watch event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendEvent {
    /// What happened.
    pub event_type: EventType,
    /// The value after the write (or the last value for deletes).
    pub object: RawObject,
}

/// The storage contract. One loop per watch produces events; subscribers
/// receive them through their own queues and are never blocked by each
/// other.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The newest revision in the store.
    async fn current_revision(&self) -> u64;

    /// Reads one key.
    async fn get(&self, key: &str) -> Result<Option<RawObject>, BackendError>;

    /// Lists all keys under a prefix, plus the revision the listing is
    /// consistent at. Results are ordered by key.
    async fn list(&self, prefix: &str) -> Result<(Vec<RawObject>, u64), BackendError>;

    /// Creates a key that must not exist yet; returns the write revision.
    async fn create(&self, key: &str, data: Vec<u8>) -> Result<u64, BackendError>;

    /// Replaces a key iff its current revision matches; returns the write
    /// revision.
    async fn update(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_revision: u64,
    ) -> Result<u64, BackendError>;

    /// Deletes a key, optionally iff its revision matches; returns the
    /// delete revision.
    async fn delete(&self, key: &str, expected_revision: Option<u64>)
    -> Result<u64, BackendError>;

    /// Watches a prefix. `from_revision` 0 means "from now"; a non-zero
    /// value replays retained events newer than it and fails with
    /// [`BackendError::Expired`] when that span was compacted.
    async fn watch(
        &self,
        prefix: &str,
        from_revision: u64,
    ) -> Result<mpsc::UnboundedReceiver<BackendEvent>, BackendError>;
}
