//! OpenAPI publication.
//!
//! The structural schema of every served version of every established CRD is
//! translated into an OpenAPI definitions map plus the standard path
//! templates for the verbs and subresources. One global v2 document and one
//! v3 document per group are regenerated on any change and swapped
//! atomically; `x-kubernetes-*` extensions survive translation verbatim.

use arc_swap::ArcSwap;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::apiextensions::JSONSchemaProps;
use crate::apiextensions::internal::{
    CustomResourceDefinition, CustomResourceDefinitionConditionType, ResourceScope,
};

/// Owns the published OpenAPI documents.
pub struct OpenApiPublisher {
    v2: ArcSwap<Value>,
    v3: ArcSwap<BTreeMap<String, Value>>,
}

impl Default for OpenApiPublisher {
    fn default() -> Self {
        OpenApiPublisher {
            v2: ArcSwap::from_pointee(empty_v2()),
            v3: ArcSwap::from_pointee(BTreeMap::new()),
        }
    }
}

fn empty_v2() -> Value {
    json!({
        "swagger": "2.0",
        "info": {"title": "Kubernetes CRD API", "version": "v1"},
        "paths": {},
        "definitions": {},
    })
}

impl OpenApiPublisher {
    /// An empty publisher.
    pub fn new() -> Arc<OpenApiPublisher> {
        Arc::new(OpenApiPublisher::default())
    }

    /// Rebuilds both documents from the established CRDs and swaps them in.
    pub fn rebuild(&self, crds: &[Arc<CustomResourceDefinition>]) {
        let established: Vec<&Arc<CustomResourceDefinition>> = crds
            .iter()
            .filter(|crd| {
                crd.is_condition_true(CustomResourceDefinitionConditionType::Established)
            })
            .collect();

        let mut paths = Map::new();
        let mut definitions = Map::new();
        let mut by_group: BTreeMap<String, (Map<String, Value>, Map<String, Value>)> =
            BTreeMap::new();

        for crd in &established {
            for version in &crd.spec.versions {
                if !version.served {
                    continue;
                }
                let def_name = definition_name(&crd.spec.group, &version.name, &crd.spec.names.kind);
                let schema = version
                    .schema
                    .as_ref()
                    .and_then(|s| s.open_api_v3_schema.as_ref())
                    .map(schema_to_openapi)
                    .unwrap_or_else(|| {
                        json!({"type": "object", "x-kubernetes-preserve-unknown-fields": true})
                    });

                definitions.insert(def_name.clone(), schema.clone());
                let (group_paths, group_schemas) =
                    by_group.entry(crd.spec.group.clone()).or_default();
                group_schemas.insert(def_name.clone(), schema);

                for (path, operations) in crd_paths(crd, &version.name, &def_name) {
                    paths.insert(path.clone(), operations.clone());
                    group_paths.insert(path, operations);
                }
            }
        }

        let mut v2 = empty_v2();
        v2["paths"] = Value::Object(paths);
        v2["definitions"] = Value::Object(definitions);
        self.v2.store(Arc::new(v2));

        let v3: BTreeMap<String, Value> = by_group
            .into_iter()
            .map(|(group, (group_paths, group_schemas))| {
                (
                    group.clone(),
                    json!({
                        "openapi": "3.0.0",
                        "info": {"title": format!("CRD APIs for {}", group), "version": "v1"},
                        "paths": Value::Object(group_paths),
                        "components": {"schemas": Value::Object(group_schemas)},
                    }),
                )
            })
            .collect();
        self.v3.store(Arc::new(v3));
        tracing::debug!("openapi documents republished");
    }

    /// The global v2 document.
    pub fn v2_document(&self) -> Value {
        (**self.v2.load()).clone()
    }

    /// The v3 document for one group.
    pub fn v3_group(&self, group: &str) -> Option<Value> {
        self.v3.load().get(group).cloned()
    }

    /// The v3 discovery index: the groups that have documents.
    pub fn v3_index(&self) -> Value {
        let paths: Map<String, Value> = self
            .v3
            .load()
            .keys()
            .map(|group| {
                (
                    format!("apis/{}", group),
                    json!({"serverRelativeURL": format!("/openapi/v3/apis/{}", group)}),
                )
            })
            .collect();
        json!({"paths": Value::Object(paths)})
    }
}

/// The reversed-domain definition name, e.g. `com.example.v1.Widget`.
fn definition_name(group: &str, version: &str, kind: &str) -> String {
    let mut segments: Vec<&str> = group.split('.').collect();
    segments.reverse();
    format!("{}.{}.{}", segments.join("."), version, kind)
}

/// Translates a schema document into its OpenAPI form. The document already
/// is OpenAPI-shaped JSON; serialization keeps `x-kubernetes-*` extensions
/// verbatim, so the translation is the serde round-trip.
pub fn schema_to_openapi(props: &JSONSchemaProps) -> Value {
    serde_json::to_value(props).unwrap_or_else(|_| json!({"type": "object"}))
}

fn crd_paths(
    crd: &CustomResourceDefinition,
    version: &str,
    def_name: &str,
) -> Vec<(String, Value)> {
    let group = &crd.spec.group;
    let plural = &crd.spec.names.plural;
    let base = match crd.spec.scope {
        ResourceScope::Namespaced => format!(
            "/apis/{}/{}/namespaces/{{namespace}}/{}",
            group, version, plural
        ),
        ResourceScope::Cluster => format!("/apis/{}/{}/{}", group, version, plural),
    };
    let named = format!("{}/{{name}}", base);
    let reference = json!({"$ref": format!("#/definitions/{}", def_name)});

    let op = |verb: &str, action: &str| -> Value {
        json!({
            "operationId": format!("{}{}{}", verb, crd.spec.names.kind, action),
            "x-kubernetes-group-version-kind": {
                "group": group, "version": version, "kind": crd.spec.names.kind
            },
            "responses": {"200": {"description": "OK", "schema": reference.clone()}}
        })
    };

    let mut paths = vec![
        (
            base,
            json!({
                "get": op("list", "List"),
                "post": op("create", ""),
                "delete": op("deletecollection", "Collection"),
            }),
        ),
        (
            named.clone(),
            json!({
                "get": op("read", ""),
                "put": op("replace", ""),
                "patch": op("patch", ""),
                "delete": op("delete", ""),
            }),
        ),
    ];

    if let Some(subresources) = crd.version(version).and_then(|v| v.subresources.as_ref()) {
        let sub_ops = json!({
            "get": op("read", "Status"),
            "put": op("replace", "Status"),
            "patch": op("patch", "Status"),
        });
        if subresources.status.is_some() {
            paths.push((format!("{}/status", named), sub_ops.clone()));
        }
        if subresources.scale.is_some() {
            paths.push((
                format!("{}/scale", named),
                json!({
                    "get": op("read", "Scale"),
                    "put": op("replace", "Scale"),
                    "patch": op("patch", "Scale"),
                }),
            ));
        }
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiextensions::internal::{
        ConditionStatus, CustomResourceDefinitionCondition, CustomResourceDefinitionNames,
        CustomResourceDefinitionSpec, CustomResourceDefinitionVersion, CustomResourceValidation,
    };
    use crate::common::ObjectMeta;

    fn crd_with_schema() -> Arc<CustomResourceDefinition> {
        let schema: JSONSchemaProps = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "properties": {
                        "ports": {
                            "type": "array",
                            "x-kubernetes-list-type": "map",
                            "x-kubernetes-list-map-keys": ["name"],
                            "items": {"type": "object", "properties": {"name": {"type": "string"}}}
                        }
                    }
                }
            }
        }))
        .unwrap();
        let mut crd = CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some("widgets.example.com".to_string()),
                ..Default::default()
            },
            spec: CustomResourceDefinitionSpec {
                group: "example.com".to_string(),
                names: CustomResourceDefinitionNames {
                    plural: "widgets".to_string(),
                    kind: "Widget".to_string(),
                    ..Default::default()
                },
                scope: crate::apiextensions::internal::ResourceScope::Namespaced,
                versions: vec![CustomResourceDefinitionVersion {
                    name: "v1".to_string(),
                    served: true,
                    storage: true,
                    schema: Some(CustomResourceValidation {
                        open_api_v3_schema: Some(schema),
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        crd.set_condition(CustomResourceDefinitionCondition {
            type_: CustomResourceDefinitionConditionType::Established,
            status: ConditionStatus::True,
            ..Default::default()
        });
        Arc::new(crd)
    }

    #[test]
    fn test_definition_name_reverses_group() {
        assert_eq!(
            definition_name("example.com", "v1", "Widget"),
            "com.example.v1.Widget"
        );
    }

    #[test]
    fn test_v2_document_has_paths_and_definitions() {
        let publisher = OpenApiPublisher::new();
        publisher.rebuild(&[crd_with_schema()]);
        let doc = publisher.v2_document();
        assert!(doc["definitions"]["com.example.v1.Widget"].is_object());
        let path = "/apis/example.com/v1/namespaces/{namespace}/widgets";
        assert!(doc["paths"][path]["post"].is_object());
        assert!(doc["paths"][&format!("{}/{{name}}", path)]["patch"].is_object());
    }

    #[test]
    fn test_extensions_preserved_verbatim() {
        let publisher = OpenApiPublisher::new();
        publisher.rebuild(&[crd_with_schema()]);
        let doc = publisher.v2_document();
        let ports = &doc["definitions"]["com.example.v1.Widget"]["properties"]["spec"]
            ["properties"]["ports"];
        assert_eq!(ports["x-kubernetes-list-type"], "map");
        assert_eq!(ports["x-kubernetes-list-map-keys"][0], "name");
    }

    #[test]
    fn test_v3_per_group_documents() {
        let publisher = OpenApiPublisher::new();
        publisher.rebuild(&[crd_with_schema()]);
        let group_doc = publisher.v3_group("example.com").unwrap();
        assert!(group_doc["components"]["schemas"]["com.example.v1.Widget"].is_object());
        assert!(publisher.v3_group("other.com").is_none());
        let index = publisher.v3_index();
        assert!(index["paths"]["apis/example.com"]["serverRelativeURL"].is_string());
    }

    #[test]
    fn test_rebuild_replaces_document_atomically() {
        let publisher = OpenApiPublisher::new();
        publisher.rebuild(&[crd_with_schema()]);
        assert!(!publisher.v2_document()["definitions"].as_object().unwrap().is_empty());
        publisher.rebuild(&[]);
        assert!(publisher.v2_document()["definitions"].as_object().unwrap().is_empty());
    }
}
