//! Discovery documents: the group/version/resource catalogs served at
//! `/apis`, `/apis/{group}` and `/apis/{group}/{version}`, plus the
//! aggregated form.
//!
//! Document shapes follow the Kubernetes discovery API (the same types the
//! teacher carries in its apidiscovery group). The publisher owns one
//! atomically swapped state value; request handlers only load it.

pub mod version;

use arc_swap::ArcSwap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::apiextensions::internal::{
    self, CustomResourceDefinition, CustomResourceDefinitionConditionType,
};
use crate::common::TypeMeta;

pub use version::{compare_version_priority, sort_by_priority};

/// The media type parameter selecting aggregated discovery.
pub const AGGREGATED_DISCOVERY_PARAM: &str = "g=apidiscovery.k8s.io";

/// GroupVersion entry for discovery.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionForDiscovery {
    /// The `group/version` string.
    pub group_version: String,
    /// The version name alone.
    pub version: String,
}

/// APIGroup describes one served group.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct APIGroup {
    /// Standard type metadata.
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    /// Group name.
    pub name: String,
    /// Served versions, preferred first.
    pub versions: Vec<GroupVersionForDiscovery>,
    /// The version clients should use by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_version: Option<GroupVersionForDiscovery>,
}

/// APIGroupList is the `/apis` document.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct APIGroupList {
    /// Standard type metadata.
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    /// Served groups.
    pub groups: Vec<APIGroup>,
}

/// APIResource describes one resource in a group/version.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct APIResource {
    /// Plural name.
    pub name: String,
    /// Singular name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub singular_name: String,
    /// Whether instances live in namespaces.
    pub namespaced: bool,
    /// Object kind.
    pub kind: String,
    /// Supported verbs.
    pub verbs: Vec<String>,
    /// Short names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_names: Vec<String>,
    /// Grouping categories such as "all".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    /// Stable identifier of the storage version's schema.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_version_hash: String,
}

/// APIResourceList is the `/apis/{group}/{version}` document.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct APIResourceList {
    /// Standard type metadata.
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    /// The `group/version` the resources belong to.
    pub group_version: String,
    /// The resources.
    pub resources: Vec<APIResource>,
}

const RESOURCE_VERBS: &[&str] = &[
    "delete",
    "deletecollection",
    "get",
    "list",
    "patch",
    "create",
    "update",
    "watch",
];
const SUBRESOURCE_VERBS: &[&str] = &["get", "patch", "update"];

#[derive(Default)]
struct DiscoveryState {
    groups: APIGroupList,
    by_group: BTreeMap<String, APIGroup>,
    resources: BTreeMap<(String, String), APIResourceList>,
}

/// Owns the discovery documents; rebuilt by the discovery controller,
/// loaded lock-free by request handlers.
pub struct DiscoveryPublisher {
    state: ArcSwap<DiscoveryState>,
}

impl Default for DiscoveryPublisher {
    fn default() -> Self {
        DiscoveryPublisher {
            state: ArcSwap::from_pointee(DiscoveryState::default()),
        }
    }
}

impl DiscoveryPublisher {
    /// An empty publisher.
    pub fn new() -> Arc<DiscoveryPublisher> {
        Arc::new(DiscoveryPublisher::default())
    }

    /// Rebuilds all documents from the established CRDs and publishes the
    /// result with one atomic store.
    pub fn rebuild(&self, crds: &[Arc<CustomResourceDefinition>]) {
        let mut state = DiscoveryState::default();
        state.groups.type_meta = TypeMeta::new("v1", "APIGroupList");

        let mut by_group: BTreeMap<String, Vec<&Arc<CustomResourceDefinition>>> = BTreeMap::new();
        for crd in crds {
            if !crd.is_condition_true(CustomResourceDefinitionConditionType::Established) {
                continue;
            }
            by_group.entry(crd.spec.group.clone()).or_default().push(crd);
        }

        for (group, group_crds) in by_group {
            let mut versions: Vec<String> = Vec::new();
            for crd in &group_crds {
                for version in crd.served_versions() {
                    if !versions.iter().any(|v| v == version) {
                        versions.push(version.to_string());
                    }
                }
            }
            sort_by_priority(&mut versions);
            if versions.is_empty() {
                continue;
            }

            // the preferred version is the storage version of some CRD in
            // the group when served, else the highest-priority served one
            let preferred = group_crds
                .iter()
                .filter_map(|crd| crd.storage_version())
                .find(|storage| {
                    group_crds.iter().any(|crd| crd.has_served_version(storage))
                })
                .map(str::to_string)
                .unwrap_or_else(|| versions[0].clone());

            let api_group = APIGroup {
                type_meta: TypeMeta::new("v1", "APIGroup"),
                name: group.clone(),
                versions: versions
                    .iter()
                    .map(|v| GroupVersionForDiscovery {
                        group_version: format!("{}/{}", group, v),
                        version: v.clone(),
                    })
                    .collect(),
                preferred_version: Some(GroupVersionForDiscovery {
                    group_version: format!("{}/{}", group, preferred),
                    version: preferred,
                }),
            };

            for version in &versions {
                let mut resources = Vec::new();
                for crd in &group_crds {
                    if !crd.has_served_version(version) {
                        continue;
                    }
                    resources.extend(resources_for(crd, version));
                }
                resources.sort_by(|a, b| a.name.cmp(&b.name));
                state.resources.insert(
                    (group.clone(), version.clone()),
                    APIResourceList {
                        type_meta: TypeMeta::new("v1", "APIResourceList"),
                        group_version: format!("{}/{}", group, version),
                        resources,
                    },
                );
            }

            state.groups.groups.push(api_group.clone());
            state.by_group.insert(group, api_group);
        }

        self.state.store(Arc::new(state));
        tracing::debug!("discovery documents republished");
    }

    /// The `/apis` document.
    pub fn groups(&self) -> APIGroupList {
        self.state.load().groups.clone()
    }

    /// The `/apis/{group}` document.
    pub fn group(&self, name: &str) -> Option<APIGroup> {
        self.state.load().by_group.get(name).cloned()
    }

    /// The `/apis/{group}/{version}` document.
    pub fn resources(&self, group: &str, version: &str) -> Option<APIResourceList> {
        self.state
            .load()
            .resources
            .get(&(group.to_string(), version.to_string()))
            .cloned()
    }

    /// The aggregated document: every group with its versions and resources
    /// in one response.
    pub fn aggregated(&self) -> Value {
        let state = self.state.load();
        let items: Vec<Value> = state
            .groups
            .groups
            .iter()
            .map(|group| {
                let versions: Vec<Value> = group
                    .versions
                    .iter()
                    .map(|gv| {
                        let resources = state
                            .resources
                            .get(&(group.name.clone(), gv.version.clone()))
                            .map(|list| list.resources.clone())
                            .unwrap_or_default();
                        serde_json::json!({
                            "version": gv.version,
                            "freshness": "Current",
                            "resources": resources.iter().map(|r| serde_json::json!({
                                "resource": r.name,
                                "responseKind": {"group": group.name, "version": gv.version, "kind": r.kind},
                                "scope": if r.namespaced {"Namespaced"} else {"Cluster"},
                                "singularResource": r.singular_name,
                                "shortNames": r.short_names,
                                "categories": r.categories,
                                "verbs": r.verbs,
                            })).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                serde_json::json!({
                    "metadata": {"name": group.name},
                    "versions": versions,
                })
            })
            .collect();
        serde_json::json!({
            "apiVersion": "apidiscovery.k8s.io/v2",
            "kind": "APIGroupDiscoveryList",
            "metadata": {},
            "items": items,
        })
    }
}

fn resources_for(crd: &CustomResourceDefinition, version: &str) -> Vec<APIResource> {
    let names = if crd.status.accepted_names.plural.is_empty() {
        &crd.spec.names
    } else {
        &crd.status.accepted_names
    };
    let namespaced = crd.spec.scope == internal::ResourceScope::Namespaced;
    let hash = crd
        .storage_version()
        .map(|storage| storage_version_hash(crd, storage))
        .unwrap_or_default();

    let mut resources = vec![APIResource {
        name: names.plural.clone(),
        singular_name: names.singular.clone(),
        namespaced,
        kind: names.kind.clone(),
        verbs: RESOURCE_VERBS.iter().map(|s| s.to_string()).collect(),
        short_names: names.short_names.clone(),
        categories: names.categories.clone(),
        storage_version_hash: hash,
    }];

    if let Some(subresources) = crd.version(version).and_then(|v| v.subresources.as_ref()) {
        if subresources.status.is_some() {
            resources.push(APIResource {
                name: format!("{}/status", names.plural),
                namespaced,
                kind: names.kind.clone(),
                verbs: SUBRESOURCE_VERBS.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            });
        }
        if subresources.scale.is_some() {
            resources.push(APIResource {
                name: format!("{}/scale", names.plural),
                namespaced,
                kind: "Scale".to_string(),
                verbs: SUBRESOURCE_VERBS.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            });
        }
    }

    resources
}

/// A stable identifier for the storage version: group, version, kind and
/// the storage schema hashed together, truncated and base64 encoded.
pub fn storage_version_hash(crd: &CustomResourceDefinition, storage_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(crd.spec.group.as_bytes());
    hasher.update(b"/");
    hasher.update(storage_version.as_bytes());
    hasher.update(b"/");
    hasher.update(crd.spec.names.kind.as_bytes());
    if let Some(schema) = crd
        .version(storage_version)
        .and_then(|v| v.schema.as_ref())
        .and_then(|s| s.open_api_v3_schema.as_ref())
    {
        hasher.update(serde_json::to_vec(schema).unwrap_or_default());
    }
    let digest = hasher.finalize();
    STANDARD.encode(&digest[..8])
}
