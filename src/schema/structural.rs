//! The structural schema model.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apiserver/schema/structural.go
//!
//! A structural schema is a restricted JSON Schema where every node carries
//! an explicit type, composites are unambiguous, and the logical junctors
//! (`allOf`, `anyOf`, `oneOf`, `not`) hold value validations only. All type
//! information is recoverable locally at any position without following
//! references, which is what makes pruning, defaulting and expression typing
//! possible.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::apiextensions::{JSONSchemaProps, JSONSchemaPropsOrBool, ValidationRule};
use crate::common::validation::{BadValue, ErrorList, Path, forbidden, invalid, required};

/// List semantics tag for arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ListType {
    /// The whole list is replaced on update.
    #[default]
    Atomic,
    /// Items form a set of scalars; duplicates are invalid.
    Set,
    /// Items are objects keyed by `x-kubernetes-list-map-keys`.
    Map,
}

impl ListType {
    fn parse(s: &str) -> Option<ListType> {
        match s {
            "atomic" => Some(ListType::Atomic),
            "set" => Some(ListType::Set),
            "map" => Some(ListType::Map),
            _ => None,
        }
    }
}

/// Generic holds the fields every schema node may carry.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Generic {
    /// Description of the node.
    pub description: String,
    /// One of object, array, string, integer, number, boolean. Empty only
    /// for int-or-string and fully preserved nodes.
    pub type_: String,
    /// Title of the node.
    pub title: String,
    /// Default value injected by the defaulter.
    pub default: Option<Value>,
    /// Whether null is accepted at this node.
    pub nullable: bool,
}

/// Extensions holds the `x-kubernetes-*` vendor extensions.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Extensions {
    /// Undeclared fields below this node survive pruning.
    pub x_preserve_unknown_fields: bool,
    /// This node is a complete Kubernetes object.
    pub x_embedded_resource: bool,
    /// This node accepts integers and strings.
    pub x_int_or_string: bool,
    /// Key properties identifying items of a `map` list.
    pub x_list_map_keys: Vec<String>,
    /// List semantics tag.
    pub x_list_type: Option<ListType>,
    /// Map semantics tag, "granular" or "atomic".
    pub x_map_type: Option<String>,
}

/// ValueValidation carries the value constraints of a node.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ValueValidation {
    pub format: String,
    pub maximum: Option<f64>,
    pub exclusive_maximum: bool,
    pub minimum: Option<f64>,
    pub exclusive_minimum: bool,
    pub max_length: Option<i64>,
    pub min_length: Option<i64>,
    pub pattern: String,
    pub max_items: Option<i64>,
    pub min_items: Option<i64>,
    pub unique_items: bool,
    pub multiple_of: Option<f64>,
    pub enum_: Vec<Value>,
    pub max_properties: Option<i64>,
    pub min_properties: Option<i64>,
    pub required: Vec<String>,
    pub all_of: Vec<NestedValueValidation>,
    pub any_of: Vec<NestedValueValidation>,
    pub one_of: Vec<NestedValueValidation>,
    pub not: Option<Box<NestedValueValidation>>,
}

impl ValueValidation {
    fn is_empty(&self) -> bool {
        *self == ValueValidation::default()
    }
}

/// NestedValueValidation is a value validation subtree found inside a logical
/// junctor; it may mirror the structure of the node but must not carry
/// structural fields.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct NestedValueValidation {
    /// Value constraints of this nested node.
    pub value_validation: ValueValidation,
    /// Nested item constraints for arrays.
    pub items: Option<Box<NestedValueValidation>>,
    /// Nested property constraints for objects.
    pub properties: BTreeMap<String, NestedValueValidation>,
}

/// Schema (or allow-all boolean) applied to undeclared object properties.
#[derive(Clone, Debug, PartialEq)]
pub enum StructuralOrBool {
    /// Allows (true) or forbids (false) undeclared properties.
    Bool(bool),
    /// A schema applied to every undeclared property.
    Structural(Box<Structural>),
}

/// Structural is the canonical representation of a CRD version schema.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Structural {
    /// Fields every node carries.
    pub generic: Generic,
    /// Kubernetes vendor extensions.
    pub extensions: Extensions,
    /// Value constraints, absent when the node has none.
    pub value_validation: Option<Box<ValueValidation>>,
    /// Expression rules attached to this node.
    pub validation_rules: Vec<ValidationRule>,
    /// Item schema for arrays.
    pub items: Option<Box<Structural>>,
    /// Declared object properties.
    pub properties: BTreeMap<String, Structural>,
    /// Schema applied to undeclared object properties.
    pub additional_properties: Option<Box<StructuralOrBool>>,
}

impl Structural {
    /// Builds a structural schema from a schema document, accumulating every
    /// violation of the structural rules. The returned schema is usable even
    /// when violations exist; callers decide whether to reject.
    pub fn from_props(props: &JSONSchemaProps) -> (Structural, ErrorList) {
        let mut violations = ErrorList::new();
        let s = build_node(props, &Path::new(""), true, &mut violations);
        (s, violations)
    }

    /// The effective list type for an array node.
    pub fn list_type(&self) -> ListType {
        self.extensions.x_list_type.unwrap_or_default()
    }

    /// True when this node declares a default value.
    pub fn has_default(&self) -> bool {
        self.generic.default.is_some()
    }

    /// The schema of a declared property.
    pub fn property(&self, name: &str) -> Option<&Structural> {
        self.properties.get(name)
    }

    /// The schema applied to undeclared properties, when it is a schema.
    pub fn additional_property_schema(&self) -> Option<&Structural> {
        match self.additional_properties.as_deref() {
            Some(StructuralOrBool::Structural(s)) => Some(s),
            _ => None,
        }
    }

}

const ALLOWED_TYPES: &[&str] = &["object", "array", "string", "integer", "number", "boolean"];

fn build_node(
    props: &JSONSchemaProps,
    path: &Path,
    is_root: bool,
    violations: &mut ErrorList,
) -> Structural {
    if props.reference.is_some() {
        violations.push(forbidden(&path.child("$ref"), "$ref is not supported"));
    }

    let mut extensions = Extensions {
        x_preserve_unknown_fields: props.x_kubernetes_preserve_unknown_fields.unwrap_or(false),
        x_embedded_resource: props.x_kubernetes_embedded_resource,
        x_int_or_string: props.x_kubernetes_int_or_string,
        x_list_map_keys: props.x_kubernetes_list_map_keys.clone(),
        x_list_type: None,
        x_map_type: props.x_kubernetes_map_type.clone(),
    };
    if let Some(lt) = props.x_kubernetes_list_type.as_deref() {
        match ListType::parse(lt) {
            Some(parsed) => extensions.x_list_type = Some(parsed),
            None => violations.push(invalid(
                &path.child("x-kubernetes-list-type"),
                BadValue::String(lt.to_string()),
                "must be atomic, set or map",
            )),
        }
    }

    // type discipline
    if props.x_kubernetes_int_or_string {
        if !props.type_.is_empty() {
            violations.push(forbidden(
                &path.child("type"),
                "must be empty to be structural when x-kubernetes-int-or-string is true",
            ));
        }
    } else if props.type_.is_empty() {
        if is_root {
            violations.push(required(
                &path.child("type"),
                "must not be empty at the root",
            ));
        } else if !extensions.x_preserve_unknown_fields {
            violations.push(required(
                &path.child("type"),
                "must not be empty for specified object fields",
            ));
        }
    } else if !ALLOWED_TYPES.contains(&props.type_.as_str()) {
        violations.push(invalid(
            &path.child("type"),
            BadValue::String(props.type_.clone()),
            "must be object, array, string, integer, number or boolean",
        ));
    }
    if is_root && !props.type_.is_empty() && props.type_ != "object" {
        violations.push(invalid(
            &path.child("type"),
            BadValue::String(props.type_.clone()),
            "must be object at the root",
        ));
    }

    // composite discipline
    if props.items.is_some() && props.type_ != "array" {
        violations.push(forbidden(
            &path.child("items"),
            "must only be used for array types",
        ));
    }
    if props.type_ == "array" && props.items.is_none() {
        violations.push(required(
            &path.child("items"),
            "must be specified for array types",
        ));
    }
    if !props.properties.is_empty() && props.additional_properties.is_some() {
        violations.push(forbidden(
            &path.child("additionalProperties"),
            "additionalProperties and properties are mutually exclusive",
        ));
    }
    if props.additional_properties.is_some() && !props.type_.is_empty() && props.type_ != "object"
    {
        violations.push(forbidden(
            &path.child("additionalProperties"),
            "must only be used for object types",
        ));
    }

    // embedded resources must be objects that keep their envelope fields
    if extensions.x_embedded_resource {
        if props.type_ != "object" {
            violations.push(invalid(
                &path.child("type"),
                BadValue::String(props.type_.clone()),
                "must be object when x-kubernetes-embedded-resource is true",
            ));
        }
        if !extensions.x_preserve_unknown_fields && props.properties.is_empty() {
            violations.push(required(
                &path.child("properties"),
                "must not be empty when x-kubernetes-embedded-resource is true without x-kubernetes-preserve-unknown-fields",
            ));
        }
    }

    // map lists need keys that actually exist on items
    if extensions.x_list_type == Some(ListType::Map) {
        if extensions.x_list_map_keys.is_empty() {
            violations.push(required(
                &path.child("x-kubernetes-list-map-keys"),
                "must not be empty when x-kubernetes-list-type is map",
            ));
        }
        if let Some(items) = props.items.as_deref() {
            for key in &extensions.x_list_map_keys {
                if !items.properties.contains_key(key) {
                    violations.push(invalid(
                        &path.child("x-kubernetes-list-map-keys"),
                        BadValue::String(key.clone()),
                        "entries must all be names of item properties",
                    ));
                }
            }
        }
    } else if !extensions.x_list_map_keys.is_empty() {
        violations.push(forbidden(
            &path.child("x-kubernetes-list-map-keys"),
            "must only be used when x-kubernetes-list-type is map",
        ));
    }

    // root metadata schemas may only constrain name and generateName; the
    // rest of the metadata schema is fixed
    if is_root {
        if let Some(meta_props) = props.properties.get("metadata") {
            for key in meta_props.properties.keys() {
                if key != "name" && key != "generateName" {
                    violations.push(forbidden(
                        &path.child("properties").key("metadata").child("properties").key(key),
                        "must not be specified; metadata fields other than name and generateName have a fixed schema",
                    ));
                }
            }
        }
    }

    let value_validation = build_value_validation(props, path, violations);

    let items = props.items.as_deref().map(|item| {
        Box::new(build_node(
            item,
            &path.child("items"),
            false,
            violations,
        ))
    });

    let mut properties = BTreeMap::new();
    for (name, prop) in &props.properties {
        properties.insert(
            name.clone(),
            build_node(
                prop,
                &path.child("properties").key(name),
                false,
                violations,
            ),
        );
    }

    let additional_properties = props.additional_properties.as_deref().map(|ap| {
        Box::new(match ap {
            JSONSchemaPropsOrBool::Allows(b) => StructuralOrBool::Bool(*b),
            JSONSchemaPropsOrBool::Schema(s) => StructuralOrBool::Structural(Box::new(build_node(
                s,
                &path.child("additionalProperties"),
                false,
                violations,
            ))),
        })
    });

    Structural {
        generic: Generic {
            description: props.description.clone(),
            type_: props.type_.clone(),
            title: props.title.clone(),
            default: props.default.clone(),
            nullable: props.nullable,
        },
        extensions,
        value_validation: if value_validation.is_empty() {
            None
        } else {
            Some(Box::new(value_validation))
        },
        validation_rules: props.x_kubernetes_validations.clone(),
        items,
        properties,
        additional_properties,
    }
}

fn build_value_validation(
    props: &JSONSchemaProps,
    path: &Path,
    violations: &mut ErrorList,
) -> ValueValidation {
    ValueValidation {
        format: props.format.clone(),
        maximum: props.maximum,
        exclusive_maximum: props.exclusive_maximum,
        minimum: props.minimum,
        exclusive_minimum: props.exclusive_minimum,
        max_length: props.max_length,
        min_length: props.min_length,
        pattern: props.pattern.clone(),
        max_items: props.max_items,
        min_items: props.min_items,
        unique_items: props.unique_items,
        multiple_of: props.multiple_of,
        enum_: props.enum_.clone(),
        max_properties: props.max_properties,
        min_properties: props.min_properties,
        required: props.required.clone(),
        all_of: props
            .all_of
            .iter()
            .enumerate()
            .map(|(i, p)| build_nested(p, &path.child("allOf").index(i), violations))
            .collect(),
        any_of: props
            .any_of
            .iter()
            .enumerate()
            .map(|(i, p)| build_nested(p, &path.child("anyOf").index(i), violations))
            .collect(),
        one_of: props
            .one_of
            .iter()
            .enumerate()
            .map(|(i, p)| build_nested(p, &path.child("oneOf").index(i), violations))
            .collect(),
        not: props
            .not
            .as_deref()
            .map(|p| Box::new(build_nested(p, &path.child("not"), violations))),
    }
}

fn build_nested(
    props: &JSONSchemaProps,
    path: &Path,
    violations: &mut ErrorList,
) -> NestedValueValidation {
    // inside logical junctors only value validations may appear; structural
    // fields would make the type of a position depend on which branch matches
    if !props.type_.is_empty() {
        violations.push(forbidden(
            &path.child("type"),
            "must be empty to be structural",
        ));
    }
    if props.default.is_some() {
        violations.push(forbidden(
            &path.child("default"),
            "must be undefined to be structural",
        ));
    }
    if props.additional_properties.is_some() {
        violations.push(forbidden(
            &path.child("additionalProperties"),
            "must be undefined to be structural",
        ));
    }
    if props.nullable {
        violations.push(forbidden(
            &path.child("nullable"),
            "must be undefined to be structural",
        ));
    }
    if props.x_kubernetes_preserve_unknown_fields.is_some()
        || props.x_kubernetes_embedded_resource
        || props.x_kubernetes_int_or_string
        || props.x_kubernetes_list_type.is_some()
        || !props.x_kubernetes_list_map_keys.is_empty()
    {
        violations.push(forbidden(path, "x-kubernetes extensions must be undefined to be structural"));
    }

    NestedValueValidation {
        value_validation: build_value_validation(props, path, violations),
        items: props
            .items
            .as_deref()
            .map(|p| Box::new(build_nested(p, &path.child("items"), violations))),
        properties: props
            .properties
            .iter()
            .map(|(name, p)| {
                (
                    name.clone(),
                    build_nested(p, &path.child("properties").key(name), violations),
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(doc: serde_json::Value) -> JSONSchemaProps {
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn test_simple_object_is_structural() {
        let (s, violations) = Structural::from_props(&props(json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "properties": {
                        "replicas": {"type": "integer", "minimum": 0, "default": 1}
                    }
                }
            }
        })));
        assert!(violations.is_empty(), "{}", violations);
        let replicas = s.property("spec").unwrap().property("replicas").unwrap();
        assert_eq!(replicas.generic.type_, "integer");
        assert!(replicas.has_default());
        assert_eq!(
            replicas.value_validation.as_ref().unwrap().minimum,
            Some(0.0)
        );
    }

    #[test]
    fn test_missing_type_is_reported_everywhere() {
        let (_, violations) = Structural::from_props(&props(json!({
            "type": "object",
            "properties": {
                "a": {},
                "b": {"type": "array", "items": {}}
            }
        })));
        let fields: Vec<&str> = violations.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"properties[a].type"), "{:?}", fields);
        assert!(fields.contains(&"properties[b].items.type"), "{:?}", fields);
    }

    #[test]
    fn test_root_must_be_object() {
        let (_, violations) = Structural::from_props(&props(json!({"type": "string"})));
        assert!(!violations.is_empty());
    }

    #[test]
    fn test_int_or_string_requires_empty_type() {
        let (s, violations) = Structural::from_props(&props(json!({
            "type": "object",
            "properties": {
                "port": {"x-kubernetes-int-or-string": true}
            }
        })));
        assert!(violations.is_empty(), "{}", violations);
        assert!(s.property("port").unwrap().extensions.x_int_or_string);

        let (_, violations) = Structural::from_props(&props(json!({
            "type": "object",
            "properties": {
                "port": {"type": "string", "x-kubernetes-int-or-string": true}
            }
        })));
        assert!(!violations.is_empty());
    }

    #[test]
    fn test_ref_is_forbidden() {
        let (_, violations) = Structural::from_props(&props(json!({
            "type": "object",
            "properties": {"a": {"$ref": "#/definitions/a"}}
        })));
        assert!(violations.errors.iter().any(|e| e.field.contains("$ref")));
    }

    #[test]
    fn test_logical_junctors_must_hold_value_validations_only() {
        let (_, violations) = Structural::from_props(&props(json!({
            "type": "object",
            "properties": {
                "a": {
                    "type": "string",
                    "anyOf": [
                        {"pattern": "^a"},
                        {"type": "string"}
                    ]
                }
            }
        })));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations.errors[0].field, "properties[a].anyOf[1].type");
    }

    #[test]
    fn test_map_list_requires_keys_on_items() {
        let (_, violations) = Structural::from_props(&props(json!({
            "type": "object",
            "properties": {
                "ports": {
                    "type": "array",
                    "x-kubernetes-list-type": "map",
                    "x-kubernetes-list-map-keys": ["name", "missing"],
                    "items": {
                        "type": "object",
                        "properties": {"name": {"type": "string"}}
                    }
                }
            }
        })));
        assert_eq!(violations.len(), 1);
        assert!(violations.errors[0].detail.contains("item properties"));
    }

    #[test]
    fn test_array_requires_items() {
        let (_, violations) = Structural::from_props(&props(json!({
            "type": "object",
            "properties": {"list": {"type": "array"}}
        })));
        assert!(violations.errors.iter().any(|e| e.field.contains("items")));
    }

    #[test]
    fn test_root_metadata_schema_restricted() {
        let (_, violations) = Structural::from_props(&props(json!({
            "type": "object",
            "properties": {
                "metadata": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "labels": {"type": "object"}
                    }
                }
            }
        })));
        assert_eq!(violations.len(), 1);
        assert!(violations.errors[0].field.contains("labels"));
    }

    #[test]
    fn test_preserve_unknown_allows_untyped_node() {
        let (s, violations) = Structural::from_props(&props(json!({
            "type": "object",
            "properties": {
                "raw": {"x-kubernetes-preserve-unknown-fields": true}
            }
        })));
        assert!(violations.is_empty(), "{}", violations);
        assert!(s.property("raw").unwrap().extensions.x_preserve_unknown_fields);
    }

    #[test]
    fn test_violation_set_is_deterministic() {
        let doc = json!({
            "type": "object",
            "properties": {
                "z": {},
                "a": {},
                "m": {"type": "array"}
            }
        });
        let (_, first) = Structural::from_props(&props(doc.clone()));
        let (_, second) = Structural::from_props(&props(doc));
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }
}
