//! Apiextensions internal types.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apis/apiextensions/types.go
//!
//! The internal version is what the dispatcher, registry and controllers
//! operate on; the versioned representation in [`crate::apiextensions::v1`]
//! exists only at the wire boundary.

use crate::apiextensions::JSONSchemaProps;
use crate::common::{ByteString, ListMeta, ObjectMeta, Timestamp};
use serde::{Deserialize, Serialize};

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
// Constants
// ============================================================================

/// Name of the finalizer that delays CRD deletion until all instances are
/// removed.
pub const CUSTOM_RESOURCE_CLEANUP_FINALIZER: &str = "customresourcecleanup.apiextensions.k8s.io";

/// Annotation that records approval for protected API groups.
pub const API_APPROVED_ANNOTATION: &str = "api-approved.kubernetes.io";

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

    /// PreserveUnknownFields disables pruning of unschema'd fields everywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_unknown_fields: Option<bool>,
}

/// CustomResourceConversion describes how to convert different versions of a CR.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceConversion {
    /// Strategy specifies the conversion strategy.
    #[serde(default)]
    pub strategy: ConversionStrategyType,

    /// WebhookClientConfig is the instructions for how to call the webhook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_client_config: Option<WebhookClientConfig>,

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

    /// Port is an optional service port at which the webhook will be contacted.
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
    /// Tracking these versions allows a migration path for stored objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stored_versions: Vec<String>,
}

/// CustomResourceDefinition represents a resource that should be exposed on
/// the API server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinition {
    /// Standard object's metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,

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
    /// Standard list metadata.
    #[serde(default)]
    pub metadata: ListMeta,

    /// Items list individual CustomResourceDefinition objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
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
// Helpers
// ============================================================================
//
// Ported from k8s.io/apiextensions-apiserver/pkg/apis/apiextensions/helpers.go

impl CustomResourceDefinition {
    /// Finds the condition of the given type, if present.
    pub fn find_condition(
        &self,
        type_: CustomResourceDefinitionConditionType,
    ) -> Option<&CustomResourceDefinitionCondition> {
        self.status.conditions.iter().find(|c| c.type_ == type_)
    }

    /// True when the condition of the given type exists with status True.
    pub fn is_condition_true(&self, type_: CustomResourceDefinitionConditionType) -> bool {
        self.find_condition(type_)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// Sets a condition, replacing any existing condition of the same type.
    /// The transition time is refreshed only when the status actually flips.
    pub fn set_condition(&mut self, mut condition: CustomResourceDefinitionCondition) {
        if let Some(existing) = self
            .status
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            } else if condition.last_transition_time.is_none() {
                condition.last_transition_time = Some(Timestamp::now());
            }
            *existing = condition;
        } else {
            if condition.last_transition_time.is_none() {
                condition.last_transition_time = Some(Timestamp::now());
            }
            self.status.conditions.push(condition);
        }
    }

    /// Removes the condition of the given type, if present.
    pub fn remove_condition(&mut self, type_: CustomResourceDefinitionConditionType) {
        self.status.conditions.retain(|c| c.type_ != type_);
    }

    /// The version marked `storage: true`, when the spec is well formed.
    pub fn storage_version(&self) -> Option<&str> {
        self.spec
            .versions
            .iter()
            .find(|v| v.storage)
            .map(|v| v.name.as_str())
    }

    /// The declared version entry with the given name.
    pub fn version(&self, name: &str) -> Option<&CustomResourceDefinitionVersion> {
        self.spec.versions.iter().find(|v| v.name == name)
    }

    /// True when the named version exists and is served.
    pub fn has_served_version(&self, name: &str) -> bool {
        self.version(name).map(|v| v.served).unwrap_or(false)
    }

    /// All served version names, spec order.
    pub fn served_versions(&self) -> Vec<&str> {
        self.spec
            .versions
            .iter()
            .filter(|v| v.served)
            .map(|v| v.name.as_str())
            .collect()
    }

}
