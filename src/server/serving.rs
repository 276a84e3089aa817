//! Serving info: the immutable per-CRD bundle of compiled validators,
//! expression rule caches, storage handles and conversion, plus the
//! atomically swapped snapshot the dispatcher reads.
//!
//! Entries are built whole and never mutated after publication; the
//! in-flight gauge delays release of replaced entries until their last
//! request drains.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

use crate::apiextensions::internal::{
    self, CustomResourceDefinition, CustomResourceDefinitionVersion,
};
use crate::cel;
use crate::common::GroupResource;
use crate::conversion::{ConverterFactory, SafeConverter};
use crate::schema::{Structural, overlay_envelope};
use crate::server::config::ServerConfig;
use crate::server::error::ApiError;
use crate::storage::{Backend, ResourceStore};

/// Everything needed to serve one version of one CRD.
pub struct ServingVersion {
    /// Whether the version appears in request paths.
    pub served: bool,
    /// Deprecation marker.
    pub deprecated: bool,
    /// Deprecation warning override.
    pub deprecation_warning: Option<String>,
    /// The structural schema with the envelope overlay; absent for
    /// non-structural versions, which serve schemaless.
    pub structural: Option<Arc<Structural>>,
    /// Violations found during structural construction, for the
    /// NonStructuralSchema condition.
    pub structural_violations: Vec<String>,
    /// Compiled expression rules; empty for non-structural versions.
    pub rules: Arc<cel::RuleSet>,
    /// Subresource declarations.
    pub subresources: Option<internal::CustomResourceSubresources>,
    /// Server-side printing columns.
    pub columns: Vec<internal::CustomResourceColumnDefinition>,
    /// Field selector paths this version declares, without the leading dot.
    pub selectable_fields: Vec<String>,
}

/// The immutable per-CRD serving bundle.
pub struct ServingInfo {
    /// The authoritative CRD snapshot this info was built from.
    pub crd: Arc<CustomResourceDefinition>,
    /// CRD uid, the snapshot key.
    pub uid: String,
    /// The resource identity.
    pub group_resource: GroupResource,
    /// Object kind.
    pub kind: String,
    /// List kind.
    pub list_kind: String,
    /// Whether instances live in namespaces.
    pub namespaced: bool,
    /// The single version instances persist in.
    pub storage_version: String,
    /// Per-version serving state.
    pub versions: HashMap<String, ServingVersion>,
    /// The one storage handle all versions share.
    pub store: Arc<ResourceStore>,
    /// The converter between served versions and the storage version.
    pub converter: Arc<SafeConverter>,
    /// Requests currently using this entry.
    pub inflight: InflightGauge,
}

impl ServingInfo {
    /// The `group/version` apiVersion string.
    pub fn api_version(&self, version: &str) -> String {
        format!("{}/{}", self.group_resource.group, version)
    }

    /// The serving state of a version, when declared.
    pub fn version(&self, name: &str) -> Option<&ServingVersion> {
        self.versions.get(name)
    }
}

/// Counts requests holding a serving-info entry.
#[derive(Clone, Default)]
pub struct InflightGauge {
    inner: Arc<InflightInner>,
}

#[derive(Default)]
struct InflightInner {
    count: AtomicU64,
    drained: Notify,
}

impl InflightGauge {
    /// Registers a request; the guard releases on drop.
    pub fn enter(&self) -> InflightGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        InflightGuard {
            inner: self.inner.clone(),
        }
    }

    /// The current in-flight count.
    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Resolves once the count reaches zero.
    pub async fn drained(&self) {
        loop {
            if self.count() == 0 {
                return;
            }
            let notified = self.inner.drained.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases one in-flight request on drop.
pub struct InflightGuard {
    inner: Arc<InflightInner>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

/// The published mapping from CRD uid to serving info.
#[derive(Default)]
pub struct ServingSnapshot {
    /// Entries by CRD uid.
    pub by_uid: HashMap<String, Arc<ServingInfo>>,
}

/// The single writer / many reader holder of the snapshot.
pub struct SnapshotHolder {
    snapshot: ArcSwap<ServingSnapshot>,
}

impl Default for SnapshotHolder {
    fn default() -> Self {
        SnapshotHolder {
            snapshot: ArcSwap::from_pointee(ServingSnapshot::default()),
        }
    }
}

impl SnapshotHolder {
    /// One atomic load; the returned snapshot is immutable.
    pub fn load(&self) -> Arc<ServingSnapshot> {
        self.snapshot.load_full()
    }

    /// Publishes a new snapshot with one atomic store.
    pub fn store(&self, snapshot: ServingSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }
}

/// Builds serving info for a CRD. `reuse_store` carries over the storage
/// handle when the underlying (group, resource) is unchanged.
pub fn build_serving_info(
    crd: &Arc<CustomResourceDefinition>,
    backend: &Arc<dyn Backend>,
    converter_factory: &Arc<dyn ConverterFactory>,
    config: &ServerConfig,
    reuse_store: Option<Arc<ResourceStore>>,
) -> Result<ServingInfo, ApiError> {
    let group_resource = GroupResource::new(&crd.spec.group, &crd.spec.names.plural);
    let namespaced = crd.spec.scope == internal::ResourceScope::Namespaced;
    let storage_version = crd
        .storage_version()
        .ok_or_else(|| {
            ApiError::internal(format!(
                "CRD {} has no storage version",
                crd.metadata.name()
            ))
        })?
        .to_string();

    let store = reuse_store.unwrap_or_else(|| {
        Arc::new(ResourceStore::new(
            backend.clone(),
            &group_resource.group,
            &group_resource.resource,
            !namespaced,
        ))
    });

    let converter = Arc::new(converter_factory.converter_for(crd)?);

    let mut versions = HashMap::new();
    for version in &crd.spec.versions {
        versions.insert(
            version.name.clone(),
            build_serving_version(version, config),
        );
    }

    Ok(ServingInfo {
        crd: crd.clone(),
        uid: crd.metadata.uid().to_string(),
        group_resource,
        kind: crd.spec.names.kind.clone(),
        list_kind: if crd.spec.names.list_kind.is_empty() {
            format!("{}List", crd.spec.names.kind)
        } else {
            crd.spec.names.list_kind.clone()
        },
        namespaced,
        storage_version,
        versions,
        store,
        converter,
        inflight: InflightGauge::default(),
    })
}

fn build_serving_version(
    version: &CustomResourceDefinitionVersion,
    config: &ServerConfig,
) -> ServingVersion {
    let mut structural = None;
    let mut structural_violations = Vec::new();
    let mut rules = cel::RuleSet::empty();

    if let Some(props) = version
        .schema
        .as_ref()
        .and_then(|s| s.open_api_v3_schema.as_ref())
    {
        let (mut built, violations) = Structural::from_props(props);
        if violations.is_empty() {
            overlay_envelope(&mut built);
            rules = cel::compile_rules(&built, config.max_request_body_bytes as u64);
            structural = Some(Arc::new(built));
        } else {
            // non-structural versions still serve, but without defaulting,
            // pruning or expression rules
            structural_violations = violations
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
        }
    }

    ServingVersion {
        served: version.served,
        deprecated: version.deprecated,
        deprecation_warning: version.deprecation_warning.clone(),
        structural,
        structural_violations,
        rules: Arc::new(rules),
        subresources: version.subresources.clone(),
        columns: version.additional_printer_columns.clone(),
        selectable_fields: version
            .selectable_fields
            .iter()
            .map(|f| f.json_path.trim_start_matches('.').to_string())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiextensions::internal::{
        CustomResourceDefinitionNames, CustomResourceDefinitionSpec, CustomResourceValidation,
    };
    use crate::common::ObjectMeta;
    use crate::conversion::StandardConverterFactory;
    use crate::storage::MemoryBackend;
    use serde_json::json;

    fn crd(schema: serde_json::Value) -> Arc<CustomResourceDefinition> {
        Arc::new(CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some("widgets.example.com".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            spec: CustomResourceDefinitionSpec {
                group: "example.com".to_string(),
                names: CustomResourceDefinitionNames {
                    plural: "widgets".to_string(),
                    kind: "Widget".to_string(),
                    ..Default::default()
                },
                scope: internal::ResourceScope::Namespaced,
                versions: vec![CustomResourceDefinitionVersion {
                    name: "v1".to_string(),
                    served: true,
                    storage: true,
                    schema: Some(CustomResourceValidation {
                        open_api_v3_schema: Some(serde_json::from_value(schema).unwrap()),
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn build(crd: &Arc<CustomResourceDefinition>) -> ServingInfo {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let factory: Arc<dyn ConverterFactory> = Arc::new(StandardConverterFactory::default());
        build_serving_info(crd, &backend, &factory, &ServerConfig::default(), None).unwrap()
    }

    #[test]
    fn test_structural_version_gets_overlay_and_rules() {
        let info = build(&crd(json!({
            "type": "object",
            "properties": {
                "spec": {"type": "object", "x-kubernetes-validations": [
                    {"rule": "true"}
                ]}
            }
        })));
        let version = info.version("v1").unwrap();
        let structural = version.structural.as_ref().unwrap();
        // envelope overlay applied
        assert!(structural.property("metadata").is_some());
        assert!(version.rules.has_rules());
        assert_eq!(info.list_kind, "WidgetList");
        assert_eq!(info.storage_version, "v1");
    }

    #[test]
    fn test_non_structural_version_serves_schemaless() {
        let info = build(&crd(json!({
            "type": "object",
            "properties": {"spec": {}}
        })));
        let version = info.version("v1").unwrap();
        assert!(version.structural.is_none());
        assert!(!version.structural_violations.is_empty());
        assert!(!version.rules.has_rules());
    }

    #[tokio::test]
    async fn test_inflight_gauge_drains() {
        let gauge = InflightGauge::default();
        let guard1 = gauge.enter();
        let guard2 = gauge.enter();
        assert_eq!(gauge.count(), 2);

        let waiter = {
            let gauge = gauge.clone();
            tokio::spawn(async move { gauge.drained().await })
        };
        drop(guard1);
        drop(guard2);
        waiter.await.unwrap();
        assert_eq!(gauge.count(), 0);
    }

    #[test]
    fn test_snapshot_holder_swaps_whole_values() {
        let holder = SnapshotHolder::default();
        assert!(holder.load().by_uid.is_empty());

        let info = build(&crd(json!({"type": "object"})));
        let mut snapshot = ServingSnapshot::default();
        snapshot.by_uid.insert("uid-1".to_string(), Arc::new(info));
        holder.store(snapshot);
        assert!(holder.load().by_uid.contains_key("uid-1"));
    }
}
