//! Kubernetes common metadata types.
//!
//! Ported from k8s.io/apimachinery/pkg/apis/meta/v1/types.go, reduced to the
//! fields the extension server reads or writes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::time::Timestamp;

/// TypeMeta describes an individual object in an API response or request
/// with Kind and APIVersion fields.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Hash, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    /// Kind is a string value representing the REST resource this object represents.
    /// Servers may infer this from the endpoint the client submits requests to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// APIVersion defines the versioned schema of this representation of an object.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
}

impl TypeMeta {
    /// Builds a TypeMeta from an apiVersion and a kind.
    pub fn new(api_version: &str, kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            api_version: api_version.to_string(),
        }
    }
}

/// ListMeta describes metadata that synthetic resources must have, including
/// lists and status objects.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    /// continue may be set if the user set a limit on the number of items
    /// returned, and indicates that the server has more data available.
    #[serde(rename = "continue", default, skip_serializing_if = "Option::is_none")]
    pub continue_: Option<String>,

    /// remainingItemCount is the number of subsequent items in the list which
    /// are not included in this list response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_item_count: Option<i64>,

    /// resourceVersion identifies the server state this list was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ListMeta {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.continue_.is_none()
            && self.remaining_item_count.is_none()
            && self.resource_version.is_none()
    }
}

/// ObjectMeta is metadata that all persisted resources must have.
#[derive(Serialize, Deserialize, Clone, Debug, Hash, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Name must be unique within a namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// GenerateName is an optional prefix, used by the server, to generate a
    /// unique name ONLY IF the Name field has not been provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,

    /// Namespace defines the space within which each name must be unique.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// UID is the unique in time and space value for this object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// An opaque value that represents the internal version of this object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// A sequence number representing a specific generation of the desired state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,

    /// Map of string keys and values that can be used to organize and
    /// categorize objects.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations is an unstructured key value map stored with a resource.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// List of objects depended by this object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    /// Must be empty before the object is deleted from the registry. If the
    /// deletionTimestamp of the object is non-nil, entries in this list can
    /// only be removed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    /// ManagedFields maps workflow-id and version to the set of fields that
    /// are managed by that workflow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_fields: Vec<ManagedFieldsEntry>,

    /// CreationTimestamp is a timestamp representing the server time when
    /// this object was created. RFC3339, UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<Timestamp>,

    /// DeletionTimestamp is set by the server when a graceful deletion is
    /// initiated. RFC3339, UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<Timestamp>,
}

impl ObjectMeta {
    /// Get name, returns empty string if not set (Go-style zero value).
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Get namespace, returns empty string if not set (Go-style zero value).
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }

    /// Get uid, returns empty string if not set (Go-style zero value).
    pub fn uid(&self) -> &str {
        self.uid.as_deref().unwrap_or("")
    }

    /// Get resource_version, returns empty string if not set (Go-style zero value).
    pub fn resource_version(&self) -> &str {
        self.resource_version.as_deref().unwrap_or("")
    }

    /// Get generation, returns 0 if not set (Go-style zero value).
    pub fn generation(&self) -> i64 {
        self.generation.unwrap_or(0)
    }

    /// True when a finalizer with the given name is present.
    pub fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers.iter().any(|f| f == name)
    }
}

/// ManagedFieldsEntry is a workflow-id, a FieldSet and the group version of
/// the resource that the fieldset applies to.
#[derive(Serialize, Deserialize, Clone, Debug, Hash, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManagedFieldsEntry {
    /// Manager is an identifier of the workflow managing these fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,

    /// Operation is the type of operation which lead to this entry being merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    /// APIVersion defines the version of this resource that this field set applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Time is the timestamp of when this entry was added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,

    /// FieldsType is the discriminator for the different fields format and version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_type: Option<String>,

    /// FieldsV1 holds the first JSON version of the fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_v1: Option<serde_json::Value>,

    /// Subresource is the name of the subresource used to update that object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subresource: Option<String>,
}

/// OwnerReference contains enough information to let you identify an owning
/// object. An owning object must be in the same namespace as the dependent,
/// or be cluster-scoped, so there is no namespace field.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// API version of the referent.
    pub api_version: String,

    /// Kind of the referent.
    pub kind: String,

    /// Name of the referent.
    pub name: String,

    /// UID of the referent.
    pub uid: String,

    /// If true, this reference points to the managing controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,

    /// If true, the owner cannot be deleted from the key-value store until
    /// this reference is removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

/// GroupVersionKind unambiguously identifies a kind.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionKind {
    /// Group is the API group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Version is the API version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Kind is the resource kind.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl GroupVersionKind {
    /// Builds a GroupVersionKind from its parts.
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// The `group/version` string used in the `apiVersion` field, `version`
    /// alone for the legacy core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// GroupVersionResource unambiguously identifies a resource.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionResource {
    /// Group is the API group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Version is the API version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Resource is the lowercase plural resource name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
}

impl GroupVersionResource {
    /// Builds a GroupVersionResource from its parts.
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Drops the version.
    pub fn group_resource(&self) -> GroupResource {
        GroupResource {
            group: self.group.clone(),
            resource: self.resource.clone(),
        }
    }
}

/// GroupResource identifies a resource by group and resource name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct GroupResource {
    /// Group is the API group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Resource is the lowercase plural resource name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
}

impl GroupResource {
    /// Builds a GroupResource from its parts.
    pub fn new(group: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            resource: resource.to_string(),
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// StatusCause is a brief explanation of the reason for a failure.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusCause {
    /// A machine-readable description of the cause of the error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// A human-readable description of the cause of the error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// The field of the resource that has caused this error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field: String,
}

/// StatusDetails is a set of additional properties that MAY be set by the
/// server to provide additional information about a response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetails {
    /// The name attribute of the resource associated with this status.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// The group attribute of the resource associated with this status.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// The kind attribute of the resource associated with this status.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// The UID attribute of the resource associated with this status.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// The Causes array includes more details associated with the failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<StatusCause>,
    /// If specified, the time in seconds before the operation should be retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i32>,
}

/// Status is a return value for calls that don't return other objects.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Standard type metadata.
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    /// Standard list metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ListMeta>,
    /// Status of the operation (one of "Success" or "Failure").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// A human-readable description of the status of this operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// A machine-readable description of why this operation is in the
    /// "Failure" status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Extended data associated with the reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
    /// Suggested HTTP return code for this status, 0 if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl Status {
    /// A minimal Success status.
    pub fn success() -> Self {
        Status {
            type_meta: TypeMeta::new("v1", "Status"),
            status: Some(status::SUCCESS.to_string()),
            ..Default::default()
        }
    }

    /// A Failure status with a message and a machine-readable reason.
    pub fn failure(message: &str, reason: &str) -> Self {
        Status {
            type_meta: TypeMeta::new("v1", "Status"),
            status: Some(status::FAILURE.to_string()),
            message: Some(message.to_string()),
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    /// True if `status` is Success.
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some(status::SUCCESS)
    }
}

/// Status constants
pub mod status {
    /// StatusSuccess indicates that the operation succeeded.
    pub const SUCCESS: &str = "Success";
    /// StatusFailure indicates that the operation failed.
    pub const FAILURE: &str = "Failure";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_resource_display() {
        let gr = GroupResource::new("example.com", "widgets");
        assert_eq!(gr.to_string(), "widgets.example.com");
        let core = GroupResource::new("", "pods");
        assert_eq!(core.to_string(), "pods");
    }

    #[test]
    fn test_status_roundtrip() {
        let s = Status::failure("boom", "InternalError");
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["status"], "Failure");
        assert_eq!(json["kind"], "Status");
        let back: Status = serde_json::from_value(json).unwrap();
        assert!(!back.is_success());
    }

    #[test]
    fn test_object_meta_zero_values() {
        let meta = ObjectMeta::default();
        assert_eq!(meta.name(), "");
        assert_eq!(meta.generation(), 0);
        assert!(!meta.has_finalizer("anything"));
    }
}
