//! The per-type resource store.
//!
//! A thin adapter over the backend contract for one (group, resource):
//! assigns UIDs and creation timestamps at create, stamps resourceVersions
//! from backend revisions on every read, enforces optimistic concurrency,
//! implements the two-phase finalizer delete, and serves selector-filtered,
//! paginated lists and revision-anchored watches.
//!
//! Keys follow the persisted layout `/{group}/{plural}[/{namespace}]/{name}`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::backend::{Backend, BackendError, EventType};
use super::selector::{FieldSelector, LabelSelector};
use super::watch::{WatchEvent, WatchEventType};
use crate::common::Timestamp;
use crate::unstructured;

/// Resource-layer storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The named object does not exist.
    #[error("\"{0}\" not found")]
    NotFound(String),

    /// A create collided with an existing object.
    #[error("\"{0}\" already exists")]
    AlreadyExists(String),

    /// Optimistic concurrency or precondition failure.
    #[error("operation cannot be fulfilled: {0}")]
    Conflict(String),

    /// A watch or list start point is older than the store retains.
    #[error("resource version is too old")]
    Expired,

    /// The request itself is unusable.
    #[error("invalid request: {0}")]
    InvalidInput(String),

    /// Backend or codec failure.
    #[error("storage error: {0}")]
    Internal(String),
}

impl From<BackendError> for StorageError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Expired => StorageError::Expired,
            BackendError::Conflict => StorageError::Conflict("object has been modified".to_string()),
            other => StorageError::Internal(other.to_string()),
        }
    }
}

/// Options accepted by list and watch.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Label selector filter.
    pub label_selector: Option<LabelSelector>,
    /// Field selector filter.
    pub field_selector: Option<FieldSelector>,
    /// Page size; unlimited when absent.
    pub limit: Option<usize>,
    /// Opaque continuation token from a previous page.
    pub continue_token: Option<String>,
    /// Start revision for watches and list consistency.
    pub resource_version: Option<String>,
}

/// One page of a list.
#[derive(Clone, Debug)]
pub struct ListResult {
    /// The matching objects, resourceVersions stamped.
    pub items: Vec<Value>,
    /// The revision the list is consistent at.
    pub resource_version: String,
    /// Continuation token when more data is available.
    pub continue_token: Option<String>,
    /// Number of items not included in this page.
    pub remaining: Option<i64>,
}

/// Delete preconditions.
#[derive(Clone, Debug, Default)]
pub struct Preconditions {
    /// Required uid of the object being deleted.
    pub uid: Option<String>,
    /// Required resourceVersion of the object being deleted.
    pub resource_version: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ContinueToken {
    rv: u64,
    start: String,
}

/// Per-(group, resource) storage adapter.
pub struct ResourceStore {
    backend: Arc<dyn Backend>,
    prefix: String,
    cluster_scoped: bool,
}

impl ResourceStore {
    /// Builds a store for the given resource.
    pub fn new(
        backend: Arc<dyn Backend>,
        group: &str,
        resource: &str,
        cluster_scoped: bool,
    ) -> ResourceStore {
        ResourceStore {
            backend,
            prefix: format!("/{}/{}", group, resource),
            cluster_scoped,
        }
    }

    /// The backend this store writes through.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn key(&self, namespace: Option<&str>, name: &str) -> String {
        match namespace {
            Some(ns) if !self.cluster_scoped => format!("{}/{}/{}", self.prefix, ns, name),
            _ => format!("{}/{}", self.prefix, name),
        }
    }

    fn list_prefix(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if !self.cluster_scoped => format!("{}/{}/", self.prefix, ns),
            _ => format!("{}/", self.prefix),
        }
    }

    fn decode(&self, data: &[u8], revision: u64) -> Result<Value, StorageError> {
        let mut object: Value = serde_json::from_slice(data)
            .map_err(|err| StorageError::Internal(format!("decoding stored object: {}", err)))?;
        unstructured::set_resource_version(&mut object, &revision.to_string());
        Ok(object)
    }

    fn encode(&self, object: &Value) -> Result<Vec<u8>, StorageError> {
        // resourceVersion is derived from the backend revision; persisting it
        // would go stale on the next write
        let mut stored = object.clone();
        unstructured::clear_resource_version(&mut stored);
        serde_json::to_vec(&stored)
            .map_err(|err| StorageError::Internal(format!("encoding object: {}", err)))
    }

    /// Creates an object, assigning name (for generateName), uid, creation
    /// timestamp and generation.
    pub async fn create(
        &self,
        namespace: Option<&str>,
        mut object: Value,
    ) -> Result<Value, StorageError> {
        if unstructured::uid(&object).is_empty() {
            unstructured::set_uid(&mut object, &new_uid());
        }
        let has_creation = unstructured::metadata(&object)
            .map(|m| m.contains_key("creationTimestamp"))
            .unwrap_or(false);
        if !has_creation {
            unstructured::set_creation_timestamp(&mut object, &Timestamp::now().to_rfc3339());
        }
        unstructured::set_generation(&mut object, 1);

        let explicit_name = !unstructured::name(&object).is_empty();
        let generate = unstructured::generate_name(&object).to_string();
        if !explicit_name {
            if generate.is_empty() {
                return Err(StorageError::InvalidInput(
                    "name or generateName is required".to_string(),
                ));
            }
        }

        let attempts = if explicit_name { 1 } else { 8 };
        for attempt in 0..attempts {
            let name = if explicit_name {
                unstructured::name(&object).to_string()
            } else {
                let candidate = format!("{}{}", generate, random_suffix(5));
                unstructured::set_name(&mut object, &candidate);
                candidate
            };
            let data = self.encode(&object)?;
            match self.backend.create(&self.key(namespace, &name), data).await {
                Ok(revision) => {
                    unstructured::set_resource_version(&mut object, &revision.to_string());
                    return Ok(object);
                }
                Err(BackendError::AlreadyExists) if attempt + 1 < attempts => continue,
                Err(BackendError::AlreadyExists) => {
                    return Err(StorageError::AlreadyExists(name));
                }
                Err(other) => return Err(other.into()),
            }
        }
        unreachable!("create attempts exhausted without a result")
    }

    /// Reads one object.
    pub async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Value, StorageError> {
        let raw = self
            .backend
            .get(&self.key(namespace, name))
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        self.decode(&raw.data, raw.revision)
    }

    /// Lists objects with selector filtering and pagination.
    pub async fn list(
        &self,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<ListResult, StorageError> {
        let (raw_items, revision) = self.backend.list(&self.list_prefix(namespace)).await?;

        let start_after = match options.continue_token.as_deref() {
            Some(token) => Some(decode_continue(token)?.start),
            None => None,
        };

        let mut matching = Vec::new();
        for raw in raw_items {
            let object = self.decode(&raw.data, raw.revision)?;
            if !matches_selectors(&object, options) {
                continue;
            }
            matching.push((raw.key, object));
        }

        if let Some(start) = start_after.as_deref() {
            matching.retain(|(key, _)| key.as_str() > start);
        }

        let total = matching.len();
        let (page, continue_token, remaining) = match options.limit {
            Some(limit) if limit > 0 && total > limit => {
                let last_key = matching[limit - 1].0.clone();
                let page: Vec<Value> =
                    matching.into_iter().take(limit).map(|(_, o)| o).collect();
                (
                    page,
                    Some(encode_continue(revision, &last_key)),
                    Some((total - limit) as i64),
                )
            }
            _ => (
                matching.into_iter().map(|(_, o)| o).collect(),
                None,
                None,
            ),
        };

        Ok(ListResult {
            items: page,
            resource_version: revision.to_string(),
            continue_token,
            remaining,
        })
    }

    /// Replaces an object, compare-and-swapping on resourceVersion. When the
    /// incoming object carries a deletionTimestamp and its finalizer list is
    /// empty, the update deletes instead; the second tuple element reports
    /// whether that happened.
    pub async fn update(
        &self,
        namespace: Option<&str>,
        name: &str,
        mut object: Value,
        expected_resource_version: Option<&str>,
    ) -> Result<(Value, bool), StorageError> {
        let key = self.key(namespace, name);
        let current = self
            .backend
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        if let Some(expected) = expected_resource_version {
            let expected = parse_revision(expected)?;
            if expected != current.revision {
                return Err(StorageError::Conflict(format!(
                    "the object has been modified; please apply your changes to the latest version (expected resourceVersion {}, current {})",
                    expected, current.revision
                )));
            }
        }

        // identity survives every update
        let existing = self.decode(&current.data, current.revision)?;
        unstructured::set_uid(&mut object, unstructured::uid(&existing));
        if let Some(created) = unstructured::metadata(&existing)
            .and_then(|m| m.get("creationTimestamp"))
            .cloned()
        {
            if let Some(meta) = unstructured::metadata_mut(&mut object) {
                meta.insert("creationTimestamp".to_string(), created);
            }
        }

        let deleting = unstructured::deletion_timestamp(&object).is_some()
            && unstructured::finalizers(&object).is_empty();
        if deleting {
            let revision = self.backend.delete(&key, Some(current.revision)).await?;
            unstructured::set_resource_version(&mut object, &revision.to_string());
            return Ok((object, true));
        }

        let data = self.encode(&object)?;
        let revision = self.backend.update(&key, data, current.revision).await?;
        unstructured::set_resource_version(&mut object, &revision.to_string());
        Ok((object, false))
    }

    /// Deletes an object. With finalizers present this writes the
    /// deletionTimestamp instead; the second tuple element reports whether
    /// the object is actually gone.
    pub async fn delete(
        &self,
        namespace: Option<&str>,
        name: &str,
        preconditions: &Preconditions,
    ) -> Result<(Value, bool), StorageError> {
        let key = self.key(namespace, name);
        let current = self
            .backend
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        let mut object = self.decode(&current.data, current.revision)?;

        if let Some(uid) = preconditions.uid.as_deref() {
            if unstructured::uid(&object) != uid {
                return Err(StorageError::Conflict(format!(
                    "the UID in the precondition ({}) does not match the UID in record ({})",
                    uid,
                    unstructured::uid(&object)
                )));
            }
        }
        if let Some(rv) = preconditions.resource_version.as_deref() {
            if parse_revision(rv)? != current.revision {
                return Err(StorageError::Conflict(
                    "the resourceVersion in the precondition does not match the record".to_string(),
                ));
            }
        }

        if !unstructured::finalizers(&object).is_empty() {
            if unstructured::deletion_timestamp(&object).is_none() {
                unstructured::set_deletion_timestamp(&mut object, &Timestamp::now().to_rfc3339());
                let data = self.encode(&object)?;
                let revision = self.backend.update(&key, data, current.revision).await?;
                unstructured::set_resource_version(&mut object, &revision.to_string());
            }
            return Ok((object, false));
        }

        self.backend.delete(&key, Some(current.revision)).await?;
        Ok((object, true))
    }

    /// Opens a watch. Events are decoded, stamped and selector-filtered on a
    /// dedicated task feeding the returned queue.
    pub async fn watch(
        &self,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>, StorageError> {
        let from_revision = match options.resource_version.as_deref() {
            Some("") | None => 0,
            Some(rv) => parse_revision(rv)?,
        };
        let mut backend_rx = self
            .backend
            .watch(&self.list_prefix(namespace), from_revision)
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let options = options.clone();
        let store_prefix = self.prefix.clone();
        tokio::spawn(async move {
            while let Some(event) = backend_rx.recv().await {
                let mut object: Value = match serde_json::from_slice(&event.object.data) {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::warn!(prefix = %store_prefix, "dropping undecodable watch event: {}", err);
                        continue;
                    }
                };
                unstructured::set_resource_version(
                    &mut object,
                    &event.object.revision.to_string(),
                );
                if !matches_selectors(&object, &options) {
                    continue;
                }
                let event_type = match event.event_type {
                    EventType::Added => WatchEventType::Added,
                    EventType::Modified => WatchEventType::Modified,
                    EventType::Deleted => WatchEventType::Deleted,
                };
                if tx.send(WatchEvent { event_type, object }).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

fn matches_selectors(object: &Value, options: &ListOptions) -> bool {
    if let Some(selector) = options.label_selector.as_ref() {
        if !selector.matches(&unstructured::labels(object)) {
            return false;
        }
    }
    if let Some(selector) = options.field_selector.as_ref() {
        let ok = selector.matches(|field| {
            let path = format!(".{}", field.trim_start_matches('.'));
            unstructured::nested_by_json_path(object, &path).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        });
        if !ok {
            return false;
        }
    }
    true
}

fn parse_revision(rv: &str) -> Result<u64, StorageError> {
    rv.parse::<u64>().map_err(|_| {
        StorageError::InvalidInput(format!("invalid resourceVersion: {:?}", rv))
    })
}

fn encode_continue(revision: u64, last_key: &str) -> String {
    let token = ContinueToken {
        rv: revision,
        start: last_key.to_string(),
    };
    STANDARD.encode(serde_json::to_vec(&token).unwrap_or_default())
}

fn decode_continue(token: &str) -> Result<ContinueToken, StorageError> {
    let bytes = STANDARD
        .decode(token.as_bytes())
        .map_err(|_| StorageError::InvalidInput("malformed continue token".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| StorageError::InvalidInput("malformed continue token".to_string()))
}

fn new_uid() -> String {
    let mut bytes: [u8; 16] = rand::random();
    // RFC 4122 variant/version bits so the uid reads as a v4 UUID
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn random_suffix(len: usize) -> String {
    // the vowel-free alphabet the server uses for generated name suffixes
    const ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
