//! The admission seam.
//!
//! Admission plugins and webhooks are external collaborators; the dispatcher
//! invokes a mutating chain and then a validating chain around validation.
//! The wire types document the AdmissionReview protocol those external
//! chains speak (source: k8s.io/api/admission/v1/types.go); the default
//! chain admits everything.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::error::ApiError;
use crate::common::{GroupVersionKind, GroupVersionResource, Status, TypeMeta};

/// The operation being admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Object creation.
    Create,
    /// Object replacement or patch.
    Update,
    /// Object deletion.
    Delete,
}

impl Operation {
    /// The wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

/// Attributes of the request being admitted. The mutating chain may rewrite
/// `object`.
#[derive(Clone, Debug)]
pub struct AdmissionAttributes {
    /// The operation.
    pub operation: Operation,
    /// Kind of the object.
    pub gvk: GroupVersionKind,
    /// Resource being requested.
    pub gvr: GroupVersionResource,
    /// Namespace, for namespaced requests.
    pub namespace: Option<String>,
    /// Object name (may be empty on create with generateName).
    pub name: String,
    /// Subresource, when addressed.
    pub subresource: Option<String>,
    /// The incoming object, absent for delete.
    pub object: Option<Value>,
    /// The existing object, absent for create.
    pub old_object: Option<Value>,
}

/// The configured mutating and validating admission plugins.
#[async_trait]
pub trait AdmissionChain: Send + Sync {
    /// Runs the mutating chain; may rewrite `attributes.object`.
    async fn mutate(&self, attributes: &mut AdmissionAttributes) -> Result<(), ApiError>;

    /// Runs the validating chain.
    async fn validate(&self, attributes: &AdmissionAttributes) -> Result<(), ApiError>;
}

/// Admits everything unchanged.
pub struct NoopAdmission;

#[async_trait]
impl AdmissionChain for NoopAdmission {
    async fn mutate(&self, _attributes: &mut AdmissionAttributes) -> Result<(), ApiError> {
        Ok(())
    }

    async fn validate(&self, _attributes: &AdmissionAttributes) -> Result<(), ApiError> {
        Ok(())
    }
}

// ============================================================================
// AdmissionReview wire types
// ============================================================================

/// UserInfo holds information about the user who made the request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// The name that uniquely identifies this user.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// A unique value that identifies this user across time.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// The names of groups this user is a part of.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// Any additional information provided by the authenticator.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
}

/// AdmissionReview describes an admission request/response pair.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    /// Standard type metadata.
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    /// Request describes the attributes for the admission request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,

    /// Response describes the attributes for the admission response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

/// AdmissionRequest describes the admission.Attributes for the request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// UID is an identifier for the individual request/response.
    pub uid: String,

    /// Kind is the fully-qualified type of object being submitted.
    pub kind: GroupVersionKind,

    /// Resource is the fully-qualified resource being requested.
    pub resource: GroupVersionResource,

    /// SubResource is the subresource being requested, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_resource: String,

    /// Name is the name of the object as presented in the request.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Namespace is the namespace associated with the request.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Operation is the operation being performed.
    pub operation: String,

    /// UserInfo is information about the requesting user.
    #[serde(default)]
    pub user_info: UserInfo,

    /// Object is the object from the incoming request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,

    /// OldObject is the existing object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
}

/// AdmissionResponse describes an admission response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// UID is a copy of the request uid.
    pub uid: String,

    /// Allowed indicates whether the admission request was permitted.
    pub allowed: bool,

    /// Result contains extra details into why an admission request was
    /// denied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    /// The patch body, a base64 encoded JSONPatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,

    /// The type of Patch; currently only JSONPatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,

    /// Warnings returned to the requesting client.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AdmissionRequest {
    /// Builds the wire request for a set of attributes.
    pub fn from_attributes(uid: &str, attributes: &AdmissionAttributes) -> AdmissionRequest {
        AdmissionRequest {
            uid: uid.to_string(),
            kind: attributes.gvk.clone(),
            resource: attributes.gvr.clone(),
            sub_resource: attributes.subresource.clone().unwrap_or_default(),
            name: attributes.name.clone(),
            namespace: attributes.namespace.clone().unwrap_or_default(),
            operation: attributes.operation.as_str().to_string(),
            user_info: UserInfo::default(),
            object: attributes.object.clone(),
            old_object: attributes.old_object.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_admission_request_wire_shape() {
        let attrs = AdmissionAttributes {
            operation: Operation::Create,
            gvk: GroupVersionKind::new("example.com", "v1", "Widget"),
            gvr: GroupVersionResource::new("example.com", "v1", "widgets"),
            namespace: Some("default".to_string()),
            name: "a".to_string(),
            subresource: None,
            object: Some(json!({"spec": {}})),
            old_object: None,
        };
        let request = AdmissionRequest::from_attributes("uid-1", &attrs);
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["operation"], "CREATE");
        assert_eq!(wire["kind"]["kind"], "Widget");
        assert_eq!(wire["resource"]["resource"], "widgets");
        assert_eq!(wire["namespace"], "default");
        assert!(wire.get("oldObject").is_none());
    }

    #[tokio::test]
    async fn test_noop_admission_admits() {
        let mut attrs = AdmissionAttributes {
            operation: Operation::Delete,
            gvk: GroupVersionKind::default(),
            gvr: GroupVersionResource::default(),
            namespace: None,
            name: "a".to_string(),
            subresource: None,
            object: None,
            old_object: None,
        };
        NoopAdmission.mutate(&mut attrs).await.unwrap();
        NoopAdmission.validate(&attrs).await.unwrap();
    }
}
