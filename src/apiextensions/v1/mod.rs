//! Apiextensions v1 API types.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apis/apiextensions/v1/types.go
//!
//! These are the wire types of the admin surface. Business logic runs on
//! [`crate::apiextensions::internal`]; this module carries only shape
//! differences (TypeMeta envelope, optional metadata, the nested webhook
//! conversion block) plus the ConversionReview payloads.

pub mod conversion;
pub mod defaults;

use crate::apiextensions::JSONSchemaProps;
use crate::common::{ByteString, ListMeta, ObjectMeta, Status, Timestamp, TypeMeta};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The API group of these types.
pub const GROUP: &str = "apiextensions.k8s.io";
/// The version of these types.
pub const VERSION: &str = "v1";
/// The `apiVersion` string of these types.
pub const API_VERSION: &str = "apiextensions.k8s.io/v1";

// ============================================================================
// Enums
// ============================================================================

/// ConversionStrategyType describes different conversion types.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConversionStrategyType {
    /// NoneConverter sets only apiVersion.
    #[default]
    None,
    /// WebhookConverter calls an external webhook for conversion.
    Webhook,
}

/// ResourceScope defines the different scopes available to a custom resource.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ResourceScope {
    /// Cluster scoped resource.
    Cluster,
    /// Namespace scoped resource.
    #[default]
    Namespaced,
}

/// ConditionStatus is the status of a condition.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    /// Condition is true.
    True,
    /// Condition is false.
    False,
    /// Condition status is unknown.
    #[default]
    Unknown,
}

/// CustomResourceDefinitionConditionType is a valid value for
/// CustomResourceDefinitionCondition.type.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum CustomResourceDefinitionConditionType {
    /// The type is served and queryable.
    #[default]
    Established,
    /// The names in spec were accepted into status.
    NamesAccepted,
    /// At least one version schema violates the structural rules.
    NonStructuralSchema,
    /// The CustomResourceDefinition is being deleted.
    Terminating,
    /// The group follows the protected-group approval policy.
    KubernetesAPIApprovalPolicyConformant,
}

// ============================================================================
// Core Types
// ============================================================================

/// CustomResourceDefinitionSpec describes how a user wants their resource to
/// appear.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinitionSpec {
    /// Group is the API group this resource belongs in.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    /// Names are the names used to describe this custom resource.
    #[serde(default)]
    pub names: CustomResourceDefinitionNames,

    /// Scope indicates whether this resource is cluster or namespace scoped.
    #[serde(default)]
    pub scope: ResourceScope,

    /// Versions is the list of all supported versions for this resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<CustomResourceDefinitionVersion>,

    /// Conversion defines conversion settings for the CRD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion: Option<CustomResourceConversion>,

    /// PreserveUnknownFields disables pruning everywhere; in v1 it may only
    /// be set to false and exists for v1beta1 round-tripping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_unknown_fields: Option<bool>,
}

/// CustomResourceConversion describes how to convert different versions of a CR.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceConversion {
    /// Strategy specifies the conversion strategy.
    #[serde(default)]
    pub strategy: ConversionStrategyType,

    /// Webhook describes how to call the conversion webhook; required when
    /// `strategy` is `Webhook`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConversion>,
}

/// WebhookConversion describes how to call a conversion webhook.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConversion {
    /// ClientConfig is the instructions for how to call the webhook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_config: Option<WebhookClientConfig>,

    /// ConversionReviewVersions the webhook accepts, in preference order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversion_review_versions: Vec<String>,
}

/// WebhookClientConfig contains the information to make a TLS connection with
/// the webhook.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebhookClientConfig {
    /// URL gives the location of the webhook in standard URL form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Service is a reference to the service for this webhook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceReference>,

    /// CABundle is a PEM encoded CA bundle which validates the server
    /// certificate.
    #[serde(default, skip_serializing_if = "ByteString::is_empty")]
    pub ca_bundle: ByteString,
}

/// ServiceReference holds a reference to a Service by namespace and name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReference {
    /// Namespace is the namespace of the service.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Name is the name of the service.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Path is an optional URL path at which the webhook will be contacted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Port is an optional service port at which the webhook will be
    /// contacted; defaults to 443.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// CustomResourceDefinitionVersion describes one version of a CRD.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinitionVersion {
    /// Name is the version name, e.g. "v1".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Served enables this version in request paths and responses.
    #[serde(default)]
    pub served: bool,

    /// Storage indicates this is the version objects are persisted in.
    #[serde(default)]
    pub storage: bool,

    /// Deprecated marks this version as deprecated.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,

    /// DeprecationWarning overrides the default deprecation warning text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_warning: Option<String>,

    /// Schema describes the schema used for validation, pruning and
    /// defaulting of this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<CustomResourceValidation>,

    /// Subresources describes the subresources for this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subresources: Option<CustomResourceSubresources>,

    /// AdditionalPrinterColumns are additional columns shown in table output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_printer_columns: Vec<CustomResourceColumnDefinition>,

    /// SelectableFields specifies paths to fields usable as field selectors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectable_fields: Vec<SelectableField>,
}

/// SelectableField specifies the JSON path of a field that may be used with
/// field selectors.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SelectableField {
    /// jsonPath is a simple JSON path to a scalar field, e.g. ".spec.color".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub json_path: String,
}

/// CustomResourceColumnDefinition specifies a column for server side printing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceColumnDefinition {
    /// Name is a human readable name for the column.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Type is an OpenAPI type definition for this column.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub type_: String,

    /// Format is an optional OpenAPI format modifier for this column.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    /// Description is a human readable description of this column.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Priority defines the relative importance of this column.
    #[serde(default)]
    pub priority: i32,

    /// JSONPath is a simple JSON path evaluated against each item.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub json_path: String,
}

/// CustomResourceDefinitionNames indicates the names to serve this
/// CustomResourceDefinition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinitionNames {
    /// Plural is the plural name of the resource to serve.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plural: String,

    /// Singular is the singular name of the resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub singular: String,

    /// ShortNames are short names for the resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_names: Vec<String>,

    /// Kind is the serialized kind of the resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// ListKind is the serialized kind of the list for this resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub list_kind: String,

    /// Categories is a list of grouped resources this custom resource belongs
    /// to, e.g. "all".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

/// CustomResourceDefinitionCondition contains details for the current
/// condition of this CRD.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinitionCondition {
    /// Type is the type of the condition.
    #[serde(rename = "type", default)]
    pub type_: CustomResourceDefinitionConditionType,

    /// Status is the status of the condition.
    #[serde(default)]
    pub status: ConditionStatus,

    /// LastTransitionTime is the last time the condition changed status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Timestamp>,

    /// Reason is a one-word CamelCase reason for the last transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Message is a human-readable message about the last transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// CustomResourceDefinitionStatus indicates the state of the
/// CustomResourceDefinition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinitionStatus {
    /// Conditions indicate state for particular aspects of a CRD.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CustomResourceDefinitionCondition>,

    /// AcceptedNames are the names actually being used to serve discovery.
    #[serde(default)]
    pub accepted_names: CustomResourceDefinitionNames,

    /// StoredVersions lists all versions instances were ever persisted in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stored_versions: Vec<String>,
}

/// CustomResourceDefinition represents a resource that should be exposed on
/// the API server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinition {
    /// Standard type metadata.
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    /// Standard object's metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,

    /// Spec describes how the user wants the resource to appear.
    #[serde(default)]
    pub spec: CustomResourceDefinitionSpec,

    /// Status indicates the actual state of the CustomResourceDefinition.
    #[serde(default)]
    pub status: CustomResourceDefinitionStatus,
}

/// CustomResourceDefinitionList is a list of CustomResourceDefinition objects.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinitionList {
    /// Standard type metadata.
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    /// Standard list metadata.
    #[serde(default)]
    pub metadata: ListMeta,

    /// Items list individual CustomResourceDefinition objects.
    #[serde(default)]
    pub items: Vec<CustomResourceDefinition>,
}

/// CustomResourceValidation is a list of validation methods for
/// CustomResources.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceValidation {
    /// OpenAPIV3Schema is the OpenAPI v3 schema to be validated against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_api_v3_schema: Option<JSONSchemaProps>,
}

/// CustomResourceSubresources defines the status and scale subresources for
/// CustomResources.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceSubresources {
    /// Status denotes the status subresource for CustomResources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CustomResourceSubresourceStatus>,

    /// Scale denotes the scale subresource for CustomResources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<CustomResourceSubresourceScale>,
}

/// CustomResourceSubresourceStatus defines how to serve the status
/// subresource for CustomResources.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceSubresourceStatus {}

/// CustomResourceSubresourceScale defines how to serve the scale subresource
/// for CustomResources.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceSubresourceScale {
    /// SpecReplicasPath defines the JSON path for Scale.spec.replicas.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub spec_replicas_path: String,

    /// StatusReplicasPath defines the JSON path for Scale.status.replicas.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_replicas_path: String,

    /// LabelSelectorPath defines the JSON path for Scale.status.selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector_path: Option<String>,
}

// ============================================================================
// ConversionReview
// ============================================================================

/// The `kind` of ConversionReview envelopes.
pub const CONVERSION_REVIEW_KIND: &str = "ConversionReview";

/// ConversionReview describes a conversion request/response pair.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReview {
    /// Standard type metadata.
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    /// Request describes the attributes for the conversion request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ConversionRequest>,

    /// Response describes the attributes for the conversion response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ConversionResponse>,
}

/// ConversionRequest describes the conversion request parameters.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    /// UID is an identifier for the individual request/response; it is
    /// echoed back verbatim in the response.
    pub uid: String,

    /// The API group and version the objects should be converted to.
    #[serde(rename = "desiredAPIVersion")]
    pub desired_api_version: String,

    /// The list of objects to convert; they may be in one or more versions.
    #[serde(default)]
    pub objects: Vec<Value>,
}

/// ConversionResponse describes a conversion response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResponse {
    /// UID is a copy of `request.uid`.
    pub uid: String,

    /// Result contains the outcome of the conversion; `status` Success means
    /// all objects were converted.
    pub result: Status,

    /// Converted objects, in the same order as the request, empty on failure.
    #[serde(default)]
    pub converted_objects: Vec<Value>,
}

impl ConversionReview {
    /// Builds a request envelope for the given objects.
    pub fn new_request(uid: &str, desired_api_version: &str, objects: Vec<Value>) -> Self {
        ConversionReview {
            type_meta: TypeMeta::new(API_VERSION, CONVERSION_REVIEW_KIND),
            request: Some(ConversionRequest {
                uid: uid.to_string(),
                desired_api_version: desired_api_version.to_string(),
                objects,
            }),
            response: None,
        }
    }

    /// Builds a successful response envelope matching the given request uid.
    pub fn new_success_response(uid: &str, converted_objects: Vec<Value>) -> Self {
        ConversionReview {
            type_meta: TypeMeta::new(API_VERSION, CONVERSION_REVIEW_KIND),
            request: None,
            response: Some(ConversionResponse {
                uid: uid.to_string(),
                result: Status::success(),
                converted_objects,
            }),
        }
    }
}
