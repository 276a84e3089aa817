//! The CRD registry: persisted CustomResourceDefinitions, a local cache and
//! the event bus the dispatcher and every controller observe.
//!
//! The registry is the single owner of CRD writes. It enforces the
//! registry-layer creation semantics (status cleared, storedVersions
//! initialized, cleanup finalizer added), keeps status out of main updates,
//! and fans out change events; observers hold no references to each other.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::apiextensions::internal::{
    self, CUSTOM_RESOURCE_CLEANUP_FINALIZER, CustomResourceDefinition,
};
use crate::apiextensions::validation as crd_validation;
use crate::common::validation::ErrorList;
use crate::server::error::ApiError;
use crate::storage::{
    Backend, ListOptions, Preconditions, ResourceStore, StorageError, WatchEventType,
};
use crate::unstructured;

/// A change observed on the CRD store.
#[derive(Clone, Debug)]
pub enum CrdEvent {
    /// A CRD appeared.
    Added(Arc<CustomResourceDefinition>),
    /// A CRD changed.
    Updated {
        /// The previous state.
        old: Arc<CustomResourceDefinition>,
        /// The new state.
        new: Arc<CustomResourceDefinition>,
    },
    /// A CRD was removed from the store.
    Deleted(Arc<CustomResourceDefinition>),
}

impl CrdEvent {
    /// The CRD after the event.
    pub fn crd(&self) -> &Arc<CustomResourceDefinition> {
        match self {
            CrdEvent::Added(crd) => crd,
            CrdEvent::Updated { new, .. } => new,
            CrdEvent::Deleted(crd) => crd,
        }
    }
}

/// The registry.
pub struct CrdRegistry {
    store: ResourceStore,
    cache: RwLock<HashMap<String, Arc<CustomResourceDefinition>>>,
    by_resource: RwLock<HashMap<(String, String), String>>,
    tx: broadcast::Sender<CrdEvent>,
    synced: AtomicBool,
}

const EVENT_CAPACITY: usize = 256;

impl CrdRegistry {
    /// Builds a registry over the backend; CRDs persist under the admin
    /// group's fixed prefix.
    pub fn new(backend: Arc<dyn Backend>) -> Arc<CrdRegistry> {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(CrdRegistry {
            store: ResourceStore::new(
                backend,
                "apiextensions.k8s.io",
                "customresourcedefinitions",
                true,
            ),
            cache: RwLock::new(HashMap::new()),
            by_resource: RwLock::new(HashMap::new()),
            tx,
            synced: AtomicBool::new(false),
        })
    }

    /// Subscribes to CRD events. Lagging receivers observe
    /// `RecvError::Lagged` and should relist.
    pub fn subscribe(&self) -> broadcast::Receiver<CrdEvent> {
        self.tx.subscribe()
    }

    /// The persistence backend the registry writes through; controllers
    /// build their instance stores over the same one.
    pub fn backend(&self) -> Arc<dyn Backend> {
        self.store.backend().clone()
    }

    /// Whether the initial list has been loaded.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// The cached CRDs, unordered.
    pub fn list(&self) -> Vec<Arc<CustomResourceDefinition>> {
        self.cache.read().unwrap().values().cloned().collect()
    }

    /// Reads one cached CRD by name.
    pub fn get(&self, name: &str) -> Option<Arc<CustomResourceDefinition>> {
        self.cache.read().unwrap().get(name).cloned()
    }

    /// Resolves (group, plural) to a cached CRD through accepted names.
    pub fn find_by_resource(
        &self,
        group: &str,
        resource: &str,
    ) -> Option<Arc<CustomResourceDefinition>> {
        let name = self
            .by_resource
            .read()
            .unwrap()
            .get(&(group.to_string(), resource.to_string()))
            .cloned()?;
        self.get(&name)
    }

    /// Runs the informer: initial list, then the watch loop keeping cache
    /// and index fresh and broadcasting events.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let initial = match self.store.list(None, &ListOptions::default()).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!("initial CRD list failed: {}", err);
                return;
            }
        };
        for item in &initial.items {
            if let Some(crd) = decode_crd(item) {
                self.insert_cached(Arc::new(crd), true);
            }
        }
        self.synced.store(true, Ordering::Release);
        tracing::debug!(count = initial.items.len(), "CRD cache synced");

        let options = ListOptions {
            resource_version: Some(initial.resource_version.clone()),
            ..Default::default()
        };
        let mut watch = match self.store.watch(None, &options).await {
            Ok(watch) => watch,
            Err(err) => {
                tracing::warn!("CRD watch failed: {}", err);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = watch.recv() => {
                    let Some(event) = event else { return };
                    let Some(crd) = decode_crd(&event.object) else { continue };
                    let crd = Arc::new(crd);
                    match event.event_type {
                        WatchEventType::Added | WatchEventType::Modified => {
                            self.insert_cached(crd, true);
                        }
                        WatchEventType::Deleted => {
                            self.remove_cached(&crd);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn insert_cached(&self, crd: Arc<CustomResourceDefinition>, broadcast: bool) {
        let name = crd.metadata.name().to_string();
        let old = self.cache.write().unwrap().insert(name.clone(), crd.clone());

        let plural = if crd.status.accepted_names.plural.is_empty() {
            crd.spec.names.plural.clone()
        } else {
            crd.status.accepted_names.plural.clone()
        };
        self.by_resource
            .write()
            .unwrap()
            .insert((crd.spec.group.clone(), plural), name);

        if broadcast {
            let event = match old {
                Some(old) if *old != *crd => CrdEvent::Updated { old, new: crd },
                Some(_) => return,
                None => CrdEvent::Added(crd),
            };
            let _ = self.tx.send(event);
        }
    }

    fn remove_cached(&self, crd: &Arc<CustomResourceDefinition>) {
        let name = crd.metadata.name();
        self.cache.write().unwrap().remove(name);
        self.by_resource
            .write()
            .unwrap()
            .retain(|_, cached_name| cached_name != name);
        let _ = self.tx.send(CrdEvent::Deleted(crd.clone()));
    }

    // ========================================================================
    // Write path (admin surface and controllers)
    // ========================================================================

    /// Creates a CRD: defaults, registry-layer creation semantics,
    /// validation, then persistence.
    pub async fn create(
        &self,
        mut crd: CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, ApiError> {
        // the client has no say over status at creation time
        crd.status = internal::CustomResourceDefinitionStatus::default();
        if let Some(storage) = crd.storage_version() {
            crd.status.stored_versions = vec![storage.to_string()];
        }
        if !crd.metadata.has_finalizer(CUSTOM_RESOURCE_CLEANUP_FINALIZER) {
            crd.metadata
                .finalizers
                .push(CUSTOM_RESOURCE_CLEANUP_FINALIZER.to_string());
        }
        crd.metadata.generation = Some(1);

        let errs = crd_validation::validate_custom_resource_definition(&crd);
        self.fail_invalid(&crd, errs)?;

        let created = self
            .store
            .create(None, encode_crd(&crd)?)
            .await
            .map_err(storage_error_for(&crd))?;
        let crd = decode_crd_strict(&created)?;
        self.insert_cached(Arc::new(crd.clone()), true);
        Ok(crd)
    }

    /// Replaces a CRD spec; status travels unchanged from the stored object
    /// and generation advances when the spec changed.
    pub async fn update(
        &self,
        mut crd: CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, ApiError> {
        let name = crd.metadata.name().to_string();
        let existing = self.read_stored(&name).await?;

        crd.status = existing.status.clone();
        // storedVersions only grows here; shrinking is an administrative act
        // through the status subresource after migration
        if let Some(storage) = crd.storage_version() {
            if !crd.status.stored_versions.iter().any(|v| v == storage) {
                crd.status.stored_versions.push(storage.to_string());
            }
        }
        crd.metadata.finalizers = merge_finalizers(&existing, &crd);
        if crd.spec != existing.spec {
            crd.metadata.generation = Some(existing.metadata.generation() + 1);
        } else {
            crd.metadata.generation = existing.metadata.generation;
        }

        let errs = crd_validation::validate_custom_resource_definition_update(&crd, &existing);
        self.fail_invalid(&crd, errs)?;

        let expected_rv = non_empty(crd.metadata.resource_version())
            .or_else(|| non_empty(existing.metadata.resource_version()))
            .map(str::to_string);
        let (stored, _) = self
            .store
            .update(None, &name, encode_crd(&crd)?, expected_rv.as_deref())
            .await
            .map_err(storage_error_for(&crd))?;
        let crd = decode_crd_strict(&stored)?;
        self.insert_cached(Arc::new(crd.clone()), true);
        Ok(crd)
    }

    /// Replaces only the status of a CRD (the status subresource).
    pub async fn update_status(
        &self,
        crd: CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, ApiError> {
        let name = crd.metadata.name().to_string();
        let existing = self.read_stored(&name).await?;

        let mut merged = existing.clone();
        merged.status = crd.status;
        merged.metadata.resource_version = crd.metadata.resource_version.clone();

        let errs =
            crd_validation::validate_custom_resource_definition_status_update(&merged, &existing);
        self.fail_invalid(&merged, errs)?;

        let expected_rv = non_empty(merged.metadata.resource_version())
            .or_else(|| non_empty(existing.metadata.resource_version()))
            .map(str::to_string);
        let (stored, deleted) = self
            .store
            .update(None, &name, encode_crd(&merged)?, expected_rv.as_deref())
            .await
            .map_err(storage_error_for(&merged))?;
        let crd = decode_crd_strict(&stored)?;
        if deleted {
            self.remove_cached(&Arc::new(crd.clone()));
        } else {
            self.insert_cached(Arc::new(crd.clone()), true);
        }
        Ok(crd)
    }

    /// Reads latest state, applies `mutate`, writes status back with a CAS
    /// retry loop. `mutate` returns false when the target state is already
    /// achieved; the write is skipped entirely (idempotent reconciles).
    pub async fn update_status_with_retry(
        &self,
        name: &str,
        mutate: impl Fn(&mut CustomResourceDefinition) -> bool,
    ) -> Result<Option<CustomResourceDefinition>, ApiError> {
        for _ in 0..5 {
            let mut current = match self.read_stored(name).await {
                Ok(crd) => crd,
                Err(err) if err.kind == crate::server::error::ErrorKind::NotFound => {
                    return Ok(None);
                }
                Err(err) => return Err(err),
            };
            if !mutate(&mut current) {
                return Ok(None);
            }
            match self.update_status(current).await {
                Ok(updated) => return Ok(Some(updated)),
                Err(err) if err.kind == crate::server::error::ErrorKind::Conflict => continue,
                Err(err) => return Err(err),
            }
        }
        Err(ApiError::conflict(
            &crate::common::GroupResource::new("apiextensions.k8s.io", "customresourcedefinitions"),
            name,
            "too many conflicting status writes",
        ))
    }

    /// Removes the cleanup finalizer; when the CRD is already marked for
    /// deletion this completes its removal.
    pub async fn remove_cleanup_finalizer(&self, name: &str) -> Result<(), ApiError> {
        for _ in 0..5 {
            let mut current = match self.read_stored(name).await {
                Ok(crd) => crd,
                Err(err) if err.kind == crate::server::error::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(err),
            };
            if !current
                .metadata
                .has_finalizer(CUSTOM_RESOURCE_CLEANUP_FINALIZER)
            {
                return Ok(());
            }
            current
                .metadata
                .finalizers
                .retain(|f| f != CUSTOM_RESOURCE_CLEANUP_FINALIZER);
            let rv = current.metadata.resource_version().to_string();
            match self
                .store
                .update(
                    None,
                    name,
                    encode_crd(&current)?,
                    non_empty(&rv),
                )
                .await
            {
                Ok((stored, deleted)) => {
                    let crd = Arc::new(decode_crd_strict(&stored)?);
                    if deleted {
                        self.remove_cached(&crd);
                    } else {
                        self.insert_cached(crd, true);
                    }
                    return Ok(());
                }
                Err(StorageError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Deletes a CRD; with the cleanup finalizer present this only marks it
    /// for deletion.
    pub async fn delete(
        &self,
        name: &str,
        preconditions: &Preconditions,
    ) -> Result<(CustomResourceDefinition, bool), ApiError> {
        let (value, gone) = self.store.delete(None, name, preconditions).await.map_err(
            |err| -> ApiError { err.into() },
        )?;
        let crd = decode_crd_strict(&value)?;
        let arc = Arc::new(crd.clone());
        if gone {
            self.remove_cached(&arc);
        } else {
            self.insert_cached(arc, true);
        }
        Ok((crd, gone))
    }

    async fn read_stored(&self, name: &str) -> Result<CustomResourceDefinition, ApiError> {
        let value = self
            .store
            .get(None, name)
            .await
            .map_err(|err| -> ApiError { err.into() })?;
        decode_crd_strict(&value)
    }

    fn fail_invalid(
        &self,
        crd: &CustomResourceDefinition,
        errs: ErrorList,
    ) -> Result<(), ApiError> {
        if errs.is_empty() {
            Ok(())
        } else {
            Err(ApiError::invalid(
                "CustomResourceDefinition",
                crd.metadata.name(),
                errs,
            ))
        }
    }
}

fn storage_error_for(
    crd: &CustomResourceDefinition,
) -> impl FnOnce(StorageError) -> ApiError + '_ {
    move |err| {
        let gr = crate::common::GroupResource::new(
            "apiextensions.k8s.io",
            "customresourcedefinitions",
        );
        match err {
            StorageError::NotFound(_) => ApiError::not_found(&gr, crd.metadata.name()),
            StorageError::AlreadyExists(_) => ApiError::already_exists(&gr, crd.metadata.name()),
            StorageError::Conflict(message) => {
                ApiError::conflict(&gr, crd.metadata.name(), message)
            }
            other => other.into(),
        }
    }
}

fn merge_finalizers(
    existing: &CustomResourceDefinition,
    incoming: &CustomResourceDefinition,
) -> Vec<String> {
    // the cleanup finalizer cannot be stripped through the main resource
    let mut finalizers = incoming.metadata.finalizers.clone();
    if existing
        .metadata
        .has_finalizer(CUSTOM_RESOURCE_CLEANUP_FINALIZER)
        && !finalizers.iter().any(|f| f == CUSTOM_RESOURCE_CLEANUP_FINALIZER)
    {
        finalizers.push(CUSTOM_RESOURCE_CLEANUP_FINALIZER.to_string());
    }
    finalizers
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

fn encode_crd(crd: &CustomResourceDefinition) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(crd)
        .map_err(|err| ApiError::internal(format!("encoding CustomResourceDefinition: {}", err)))?;
    unstructured::set_api_version(&mut value, crate::apiextensions::v1::API_VERSION);
    unstructured::set_kind(&mut value, "CustomResourceDefinition");
    Ok(value)
}

fn decode_crd(value: &Value) -> Option<CustomResourceDefinition> {
    serde_json::from_value(value.clone()).ok()
}

fn decode_crd_strict(value: &Value) -> Result<CustomResourceDefinition, ApiError> {
    serde_json::from_value(value.clone())
        .map_err(|err| ApiError::internal(format!("decoding CustomResourceDefinition: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiextensions::internal::{
        CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
        CustomResourceDefinitionVersion,
    };
    use crate::common::ObjectMeta;
    use crate::storage::MemoryBackend;

    fn widget_crd() -> CustomResourceDefinition {
        CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some("widgets.example.com".to_string()),
                ..Default::default()
            },
            spec: CustomResourceDefinitionSpec {
                group: "example.com".to_string(),
                names: CustomResourceDefinitionNames {
                    plural: "widgets".to_string(),
                    singular: "widget".to_string(),
                    kind: "Widget".to_string(),
                    list_kind: "WidgetList".to_string(),
                    ..Default::default()
                },
                scope: internal::ResourceScope::Namespaced,
                versions: vec![CustomResourceDefinitionVersion {
                    name: "v1".to_string(),
                    served: true,
                    storage: true,
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn registry() -> Arc<CrdRegistry> {
        CrdRegistry::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_create_applies_registry_semantics() {
        let registry = registry();
        let mut crd = widget_crd();
        // whatever the client sends in status is discarded
        crd.status.stored_versions = vec!["bogus".to_string()];
        let created = registry.create(crd).await.unwrap();

        assert_eq!(created.status.stored_versions, vec!["v1"]);
        assert!(created.metadata.has_finalizer(CUSTOM_RESOURCE_CLEANUP_FINALIZER));
        assert!(created.status.conditions.is_empty());
        assert_eq!(created.metadata.generation(), 1);
        assert!(!created.metadata.resource_version().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid() {
        let registry = registry();
        let mut crd = widget_crd();
        crd.metadata.name = Some("wrong-name".to_string());
        let err = registry.create(crd).await.unwrap_err();
        assert_eq!(err.code(), 422);
    }

    #[tokio::test]
    async fn test_find_by_resource_uses_accepted_names() {
        let registry = registry();
        registry.create(widget_crd()).await.unwrap();
        let found = registry.find_by_resource("example.com", "widgets").unwrap();
        assert_eq!(found.metadata.name(), "widgets.example.com");
        assert!(registry.find_by_resource("example.com", "gadgets").is_none());
    }

    #[tokio::test]
    async fn test_main_update_preserves_status_and_bumps_generation() {
        let registry = registry();
        let created = registry.create(widget_crd()).await.unwrap();

        let mut updated = created.clone();
        updated.status.stored_versions = vec!["hacked".to_string()];
        updated.spec.names.short_names = vec!["wg".to_string()];
        let stored = registry.update(updated).await.unwrap();

        assert_eq!(stored.status.stored_versions, vec!["v1"]);
        assert_eq!(stored.metadata.generation(), 2);

        // a no-op spec write keeps the generation
        let stored_again = registry.update(stored.clone()).await.unwrap();
        assert_eq!(stored_again.metadata.generation(), 2);
    }

    #[tokio::test]
    async fn test_status_update_with_retry_is_idempotent() {
        let registry = registry();
        registry.create(widget_crd()).await.unwrap();

        let updated = registry
            .update_status_with_retry("widgets.example.com", |crd| {
                if crd.status.accepted_names.plural == "widgets" {
                    return false;
                }
                crd.status.accepted_names = crd.spec.names.clone();
                true
            })
            .await
            .unwrap();
        assert!(updated.is_some());

        // second run finds the target state and writes nothing
        let updated = registry
            .update_status_with_retry("widgets.example.com", |crd| {
                if crd.status.accepted_names.plural == "widgets" {
                    return false;
                }
                crd.status.accepted_names = crd.spec.names.clone();
                true
            })
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_two_phase_with_finalizer() {
        let registry = registry();
        registry.create(widget_crd()).await.unwrap();

        let (marked, gone) = registry
            .delete("widgets.example.com", &Preconditions::default())
            .await
            .unwrap();
        assert!(!gone);
        assert!(marked.metadata.deletion_timestamp.is_some());
        assert!(registry.get("widgets.example.com").is_some());

        registry
            .remove_cleanup_finalizer("widgets.example.com")
            .await
            .unwrap();
        assert!(registry.get("widgets.example.com").is_none());
    }

    #[tokio::test]
    async fn test_events_broadcast_on_writes() {
        let registry = registry();
        let mut events = registry.subscribe();
        registry.create(widget_crd()).await.unwrap();
        match events.recv().await.unwrap() {
            CrdEvent::Added(crd) => assert_eq!(crd.metadata.name(), "widgets.example.com"),
            other => panic!("expected Added, got {:?}", other),
        }
    }
}
