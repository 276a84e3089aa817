//! Scale subresource projection.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/registry/customresource (scale strategy)
//!
//! The scale subresource is a view: the configured JSON paths project
//! replica counts and the selector out of the stored object for reads, and
//! write only the spec-replicas path back. The stored document remains the
//! source of truth.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::apiextensions::internal::CustomResourceSubresourceScale;
use crate::common::{ObjectMeta, TypeMeta};
use crate::unstructured;

/// Scale represents a scaling request for a resource (autoscaling/v1 shape).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Scale {
    /// Standard type metadata.
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    /// Standard object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Desired scale.
    #[serde(default)]
    pub spec: ScaleSpec,

    /// Observed scale.
    #[serde(default)]
    pub status: ScaleStatus,
}

/// ScaleSpec describes the attributes of a scale subresource.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSpec {
    /// Desired number of instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i64>,
}

/// ScaleStatus represents the current status of a scale subresource.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScaleStatus {
    /// Actual number of observed instances.
    #[serde(default)]
    pub replicas: i64,

    /// Label query over the instances, serialized string form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// Projects a Scale out of a stored custom resource.
pub fn scale_from_object(
    object: &Value,
    definition: &CustomResourceSubresourceScale,
) -> Result<Scale, String> {
    let metadata: ObjectMeta = unstructured::object_meta(object)
        .map_err(|err| format!("reading metadata: {}", err))?;

    let spec_replicas = unstructured::nested_by_json_path(object, &definition.spec_replicas_path)
        .and_then(Value::as_i64);
    let status_replicas = unstructured::nested_by_json_path(object, &definition.status_replicas_path)
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let selector = definition
        .label_selector_path
        .as_deref()
        .and_then(|path| unstructured::nested_by_json_path(object, path))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Scale {
        type_meta: TypeMeta::new("autoscaling/v1", "Scale"),
        metadata,
        spec: ScaleSpec {
            replicas: spec_replicas,
        },
        status: ScaleStatus {
            replicas: status_replicas,
            selector,
        },
    })
}

/// Applies a Scale write back into the stored object: only the
/// spec-replicas path changes.
pub fn apply_scale_to_object(
    object: &mut Value,
    scale: &Scale,
    definition: &CustomResourceSubresourceScale,
) -> Result<(), String> {
    let replicas = scale
        .spec
        .replicas
        .ok_or_else(|| "spec.replicas is required".to_string())?;
    if replicas < 0 {
        return Err("spec.replicas must be non-negative".to_string());
    }
    if !unstructured::set_nested_by_json_path(
        object,
        &definition.spec_replicas_path,
        json!(replicas),
    ) {
        return Err(format!(
            "cannot write {} into the object",
            definition.spec_replicas_path
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> CustomResourceSubresourceScale {
        CustomResourceSubresourceScale {
            spec_replicas_path: ".spec.replicas".to_string(),
            status_replicas_path: ".status.replicas".to_string(),
            label_selector_path: Some(".status.selector".to_string()),
        }
    }

    fn widget() -> Value {
        serde_json::json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "a", "namespace": "default", "resourceVersion": "7"},
            "spec": {"replicas": 3},
            "status": {"replicas": 2, "selector": "app=widget"}
        })
    }

    #[test]
    fn test_projection_reads_paths() {
        let scale = scale_from_object(&widget(), &definition()).unwrap();
        assert_eq!(scale.spec.replicas, Some(3));
        assert_eq!(scale.status.replicas, 2);
        assert_eq!(scale.status.selector.as_deref(), Some("app=widget"));
        assert_eq!(scale.metadata.name(), "a");
        assert_eq!(scale.metadata.resource_version(), "7");
        assert_eq!(scale.type_meta.kind, "Scale");
    }

    #[test]
    fn test_missing_status_defaults_to_zero() {
        let mut object = widget();
        object.as_object_mut().unwrap().remove("status");
        let scale = scale_from_object(&object, &definition()).unwrap();
        assert_eq!(scale.status.replicas, 0);
        assert!(scale.status.selector.is_none());
    }

    #[test]
    fn test_apply_writes_only_spec_path() {
        let mut object = widget();
        let mut scale = scale_from_object(&object, &definition()).unwrap();
        scale.spec.replicas = Some(10);
        scale.status.replicas = 99;
        apply_scale_to_object(&mut object, &scale, &definition()).unwrap();
        assert_eq!(object["spec"]["replicas"], 10);
        // status is a projection, the write must not touch it
        assert_eq!(object["status"]["replicas"], 2);
    }

    #[test]
    fn test_apply_rejects_negative() {
        let mut object = widget();
        let mut scale = scale_from_object(&object, &definition()).unwrap();
        scale.spec.replicas = Some(-1);
        assert!(apply_scale_to_object(&mut object, &scale, &definition()).is_err());
    }
}
