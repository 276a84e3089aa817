//! Pruning of unknown fields.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apiserver/schema/pruning
//!
//! Post-order walk removing object properties not declared in the schema,
//! except below nodes flagged `x-kubernetes-preserve-unknown-fields` and the
//! envelope fields (apiVersion, kind, metadata) of the root and of embedded
//! resources. The metadata subtree itself is never pruned; it is validated
//! strictly against the typed ObjectMeta instead.

use serde_json::Value;

use super::structural::{Structural, StructuralOrBool};

/// Prunes undeclared fields from the instance in place, treating the top
/// level as a complete object with envelope fields.
pub fn prune(instance: &mut Value, schema: &Structural) {
    prune_node(instance, Some(schema), true);
}

fn prune_node(value: &mut Value, schema: Option<&Structural>, at_envelope: bool) {
    match value {
        Value::Object(map) => {
            let preserve = schema
                .map(|s| s.extensions.x_preserve_unknown_fields)
                .unwrap_or(false);
            let mut remove = Vec::new();
            for (name, child) in map.iter_mut() {
                if at_envelope && (name == "apiVersion" || name == "kind" || name == "metadata") {
                    // the envelope survives independent of the schema; metadata
                    // has its own fixed validation
                    continue;
                }
                let child_schema = schema.and_then(|s| child_schema_for(s, name));
                match child_schema {
                    Some(cs) => {
                        prune_node(child, Some(cs), cs.extensions.x_embedded_resource)
                    }
                    None => {
                        if preserve {
                            // unknown subtree kept verbatim; nothing below it
                            // can be pruned without a schema
                        } else {
                            remove.push(name.clone());
                        }
                    }
                }
            }
            for name in remove {
                map.remove(&name);
            }
        }
        Value::Array(items) => {
            let item_schema = schema.and_then(|s| s.items.as_deref());
            for item in items.iter_mut() {
                match item_schema {
                    Some(is) => prune_node(item, Some(is), is.extensions.x_embedded_resource),
                    None => {}
                }
            }
        }
        _ => {}
    }
}

fn child_schema_for<'a>(schema: &'a Structural, name: &str) -> Option<&'a Structural> {
    if let Some(prop) = schema.properties.get(name) {
        return Some(prop);
    }
    match schema.additional_properties.as_deref() {
        Some(StructuralOrBool::Structural(s)) => Some(s),
        // additionalProperties: true keeps the subtree without a schema; the
        // preserve flag on this node decides at the caller
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiextensions::JSONSchemaProps;
    use serde_json::json;

    fn schema(doc: serde_json::Value) -> Structural {
        let props: JSONSchemaProps = serde_json::from_value(doc).unwrap();
        let (s, violations) = Structural::from_props(&props);
        assert!(violations.is_empty(), "{}", violations);
        s
    }

    fn widget_schema() -> Structural {
        schema(json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "properties": {
                        "replicas": {"type": "integer"},
                        "raw": {"x-kubernetes-preserve-unknown-fields": true},
                        "items": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {"name": {"type": "string"}}
                            }
                        }
                    }
                }
            }
        }))
    }

    #[test]
    fn test_unknown_fields_removed() {
        let mut instance = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "a", "whatever": 1},
            "spec": {"replicas": 1, "unknown": true},
            "junk": "x"
        });
        prune(&mut instance, &widget_schema());
        assert_eq!(
            instance,
            json!({
                "apiVersion": "example.com/v1",
                "kind": "Widget",
                "metadata": {"name": "a", "whatever": 1},
                "spec": {"replicas": 1}
            })
        );
    }

    #[test]
    fn test_preserved_subtree_survives() {
        let mut instance = json!({
            "spec": {"raw": {"anything": {"nested": true}}}
        });
        prune(&mut instance, &widget_schema());
        assert_eq!(instance["spec"]["raw"]["anything"]["nested"], true);
    }

    #[test]
    fn test_array_items_pruned() {
        let mut instance = json!({
            "spec": {"items": [{"name": "a", "extra": 1}, {"other": 2}]}
        });
        prune(&mut instance, &widget_schema());
        assert_eq!(
            instance["spec"]["items"],
            json!([{"name": "a"}, {}])
        );
    }

    #[test]
    fn test_embedded_resource_envelope_kept() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "template": {
                    "type": "object",
                    "x-kubernetes-embedded-resource": true,
                    "properties": {
                        "spec": {
                            "type": "object",
                            "properties": {"image": {"type": "string"}}
                        }
                    }
                }
            }
        }));
        let mut instance = json!({
            "template": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "inner"},
                "spec": {"image": "nginx", "unknown": 1},
                "junk": true
            }
        });
        prune(&mut instance, &s);
        assert_eq!(
            instance["template"],
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "inner"},
                "spec": {"image": "nginx"}
            })
        );
    }

    #[test]
    fn test_pruning_is_idempotent() {
        let s = widget_schema();
        let mut once = json!({
            "spec": {"replicas": 1, "unknown": true, "items": [{"name": "a", "x": 1}]}
        });
        prune(&mut once, &s);
        let mut twice = once.clone();
        prune(&mut twice, &s);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_additional_properties_schema_applies() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "env": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "object",
                        "properties": {"value": {"type": "string"}}
                    }
                }
            }
        }));
        let mut instance = json!({
            "env": {"A": {"value": "1", "junk": 2}}
        });
        prune(&mut instance, &s);
        assert_eq!(instance["env"]["A"], json!({"value": "1"}));
    }
}
