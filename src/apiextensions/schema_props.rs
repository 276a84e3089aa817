//! The JSON Schema document carried by a CustomResourceDefinition version.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apis/apiextensions/types_jsonschema.go
//!
//! A single typed document is shared between the internal and v1
//! representations; the two Go variants are field-identical and the server
//! never needs them to diverge.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// JSONSchemaProps is a JSON Schema document following Specification Draft 4,
/// restricted and extended the way the apiextensions group defines it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct JSONSchemaProps {
    /// $ref is rejected by structural-schema construction but must survive
    /// decoding so the violation can be reported.
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Description of this node.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// One of: object, array, string, integer, number, boolean, null.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub type_: String,

    /// Format validator name, e.g. "date-time".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    /// Title of this node.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    /// Default value injected by the defaulter when the field is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Inclusive or exclusive upper bound, see `exclusive_maximum`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// When true, `maximum` is an exclusive bound.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive_maximum: bool,

    /// Inclusive or exclusive lower bound, see `exclusive_minimum`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// When true, `minimum` is an exclusive bound.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive_minimum: bool,

    /// Maximum string length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,

    /// Minimum string length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<i64>,

    /// ECMA 262 regular expression the string must match.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,

    /// Maximum number of array items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<i64>,

    /// Minimum number of array items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<i64>,

    /// When true, array items must be unique.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique_items: bool,

    /// The value must be a multiple of this number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<f64>,

    /// Closed set of allowed values.
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_: Vec<Value>,

    /// Maximum number of object properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_properties: Option<i64>,

    /// Minimum number of object properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_properties: Option<i64>,

    /// Property names that must be present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// Item schema for arrays; structural schemas require a single schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<JSONSchemaProps>>,

    /// Value-validation-only conjunction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<JSONSchemaProps>,

    /// Value-validation-only exclusive disjunction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<JSONSchemaProps>,

    /// Value-validation-only disjunction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<JSONSchemaProps>,

    /// Value-validation-only negation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<JSONSchemaProps>>,

    /// Declared object properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, JSONSchemaProps>,

    /// Schema (or boolean) applied to undeclared properties; mutually
    /// exclusive with `properties` in structural schemas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Box<JSONSchemaPropsOrBool>>,

    /// When true, null is an accepted value at this node.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,

    /// Prevents the pruner from removing undeclared fields under this node.
    #[serde(
        rename = "x-kubernetes-preserve-unknown-fields",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub x_kubernetes_preserve_unknown_fields: Option<bool>,

    /// Marks the node as a complete Kubernetes object with TypeMeta and
    /// ObjectMeta validated by the fixed metadata schema.
    #[serde(
        rename = "x-kubernetes-embedded-resource",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub x_kubernetes_embedded_resource: bool,

    /// Accepts either an integer or a string at this node.
    #[serde(
        rename = "x-kubernetes-int-or-string",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub x_kubernetes_int_or_string: bool,

    /// Key properties identifying items of a `map` list.
    #[serde(
        rename = "x-kubernetes-list-map-keys",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub x_kubernetes_list_map_keys: Vec<String>,

    /// List semantics tag: atomic, set or map.
    #[serde(
        rename = "x-kubernetes-list-type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub x_kubernetes_list_type: Option<String>,

    /// Map semantics tag: granular or atomic.
    #[serde(
        rename = "x-kubernetes-map-type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub x_kubernetes_map_type: Option<String>,

    /// Expression-language rules evaluated against instances of this node.
    #[serde(
        rename = "x-kubernetes-validations",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub x_kubernetes_validations: Vec<ValidationRule>,
}

/// JSONSchemaPropsOrBool represents JSONSchemaProps or a boolean value.
/// Defaults to true for the boolean property.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum JSONSchemaPropsOrBool {
    /// Allows (true) or forbids (false) undeclared properties.
    Allows(bool),
    /// A schema applied to every undeclared property.
    Schema(Box<JSONSchemaProps>),
}

impl Default for JSONSchemaPropsOrBool {
    fn default() -> Self {
        JSONSchemaPropsOrBool::Allows(true)
    }
}

impl JSONSchemaPropsOrBool {
    /// The schema form, when present.
    pub fn schema(&self) -> Option<&JSONSchemaProps> {
        match self {
            JSONSchemaPropsOrBool::Schema(s) => Some(s),
            JSONSchemaPropsOrBool::Allows(_) => None,
        }
    }

    /// Whether undeclared properties are allowed at all.
    pub fn allows(&self) -> bool {
        match self {
            JSONSchemaPropsOrBool::Allows(b) => *b,
            JSONSchemaPropsOrBool::Schema(_) => true,
        }
    }
}

/// ValidationRule describes a validation rule written in the CEL expression
/// language.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    /// Rule represents the expression which will be evaluated. The `self`
    /// variable is bound to the value being validated; `oldSelf` to the
    /// pre-image on update.
    pub rule: String,

    /// Message displayed when validation fails.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// MessageExpression declares a CEL expression that evaluates to the
    /// failure message; it takes precedence over `message` when it evaluates
    /// successfully.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_expression: String,

    /// Machine-readable reason attached to failures of this rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// FieldPath anchors failures below the schema node carrying the rule,
    /// e.g. `.spec.replicas`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field_path: String,

    /// When true the rule is evaluated on create as well, with `oldSelf`
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_old_self: Option<bool>,
}

impl JSONSchemaProps {
    /// Convenience constructor for a typed node.
    pub fn typed(type_: &str) -> Self {
        JSONSchemaProps {
            type_: type_.to_string(),
            ..Default::default()
        }
    }
}
