//! The finalizer controller.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/controller/finalizer
//!
//! Runs only for CRDs carrying a deletionTimestamp: marks Terminating,
//! deletes every instance across all namespaces, waits until none remain,
//! then removes the cleanup finalizer so the CRD itself can go away.
//! Instances with their own finalizers are marked for deletion and awaited
//! on later reconciles.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apiextensions::internal::{
    ConditionStatus, CustomResourceDefinition, CustomResourceDefinitionCondition,
    CustomResourceDefinitionConditionType, ResourceScope,
};
use crate::registry::CrdRegistry;
use crate::storage::{Backend, ListOptions, Preconditions, ResourceStore, StorageError};
use crate::unstructured;

/// Purges instances of deleted CRDs and releases the cleanup finalizer.
pub struct FinalizerController {
    registry: Arc<CrdRegistry>,
    backend: Arc<dyn Backend>,
}

impl FinalizerController {
    /// Builds the controller.
    pub fn new(registry: Arc<CrdRegistry>, backend: Arc<dyn Backend>) -> Arc<FinalizerController> {
        Arc::new(FinalizerController { registry, backend })
    }

    /// Spawns the worker pool.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.clone();
        super::spawn_controller(
            "finalizer",
            self.registry.clone(),
            super::WORKERS,
            cancel,
            move |name| {
                let controller = controller.clone();
                async move { controller.reconcile(&name).await }
            },
        )
    }

    /// One reconcile pass for a CRD.
    pub async fn reconcile(&self, name: &str) -> Result<(), String> {
        let Some(crd) = self.registry.get(name) else {
            return Ok(());
        };
        if crd.metadata.deletion_timestamp.is_none() {
            return Ok(());
        }

        self.registry
            .update_status_with_retry(name, |current| {
                if current.is_condition_true(CustomResourceDefinitionConditionType::Terminating) {
                    return false;
                }
                current.set_condition(CustomResourceDefinitionCondition {
                    type_: CustomResourceDefinitionConditionType::Terminating,
                    status: ConditionStatus::True,
                    reason: "InstanceDeletionInProgress".to_string(),
                    message: "CustomResource deletion is in progress".to_string(),
                    ..Default::default()
                });
                true
            })
            .await
            .map_err(|err| err.to_string())?;

        let remaining = self.delete_instances(&crd).await?;
        if remaining > 0 {
            // instances with their own finalizers linger; come back later
            return Err(format!(
                "{} instance(s) of {} still present",
                remaining, name
            ));
        }

        self.registry
            .remove_cleanup_finalizer(name)
            .await
            .map_err(|err| err.to_string())?;
        tracing::info!(crd = name, "instance cleanup finished, finalizer removed");
        Ok(())
    }

    /// Deletes every instance; returns how many are still present afterwards.
    async fn delete_instances(&self, crd: &CustomResourceDefinition) -> Result<usize, String> {
        let store = ResourceStore::new(
            self.backend.clone(),
            &crd.spec.group,
            &crd.spec.names.plural,
            crd.spec.scope == ResourceScope::Cluster,
        );

        let listed = store
            .list(None, &ListOptions::default())
            .await
            .map_err(|err| err.to_string())?;
        for item in &listed.items {
            let name = unstructured::name(item);
            let namespace = match unstructured::namespace(item) {
                "" => None,
                ns => Some(ns),
            };
            match store.delete(namespace, name, &Preconditions::default()).await {
                Ok(_) | Err(StorageError::NotFound(_)) => {}
                Err(err) => return Err(err.to_string()),
            }
        }

        let after = store
            .list(None, &ListOptions::default())
            .await
            .map_err(|err| err.to_string())?;
        Ok(after.items.len())
    }
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
    use serde_json::json;

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
                scope: ResourceScope::Namespaced,
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

    fn widget(name: &str) -> serde_json::Value {
        json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": name, "namespace": "default"},
            "spec": {}
        })
    }

    #[tokio::test]
    async fn test_instances_purged_then_crd_removed() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let registry = CrdRegistry::new(backend.clone());
        registry.create(widget_crd()).await.unwrap();

        let store = ResourceStore::new(backend.clone(), "example.com", "widgets", false);
        for name in ["a", "b", "c"] {
            store.create(Some("default"), widget(name)).await.unwrap();
        }

        // operator deletes the CRD; the finalizer keeps it pinned
        registry
            .delete("widgets.example.com", &Preconditions::default())
            .await
            .unwrap();
        assert!(registry.get("widgets.example.com").is_some());

        let controller = FinalizerController::new(registry.clone(), backend.clone());
        controller.reconcile("widgets.example.com").await.unwrap();

        // every instance is gone, then the CRD itself
        let remaining = store.list(None, &ListOptions::default()).await.unwrap();
        assert!(remaining.items.is_empty());
        assert!(registry.get("widgets.example.com").is_none());
    }

    #[tokio::test]
    async fn test_instance_finalizers_delay_cleanup() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let registry = CrdRegistry::new(backend.clone());
        registry.create(widget_crd()).await.unwrap();

        let store = ResourceStore::new(backend.clone(), "example.com", "widgets", false);
        let mut protected = widget("a");
        protected["metadata"]["finalizers"] = json!(["example.com/hold"]);
        store.create(Some("default"), protected).await.unwrap();

        registry
            .delete("widgets.example.com", &Preconditions::default())
            .await
            .unwrap();

        let controller = FinalizerController::new(registry.clone(), backend.clone());
        // the held instance keeps the CRD terminating
        assert!(controller.reconcile("widgets.example.com").await.is_err());
        let crd = registry.get("widgets.example.com").unwrap();
        assert!(crd.is_condition_true(CustomResourceDefinitionConditionType::Terminating));

        // clearing the instance finalizer lets the next reconcile finish
        let held = store.get(Some("default"), "a").await.unwrap();
        let mut released = held.clone();
        released["metadata"]["finalizers"] = json!([]);
        let rv = unstructured::resource_version(&held).to_string();
        store
            .update(Some("default"), "a", released, Some(&rv))
            .await
            .unwrap();

        controller.reconcile("widgets.example.com").await.unwrap();
        assert!(registry.get("widgets.example.com").is_none());
    }
}
