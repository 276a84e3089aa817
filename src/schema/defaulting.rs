//! Schema-driven defaulting of instances.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apiserver/schema/defaulting
//!
//! Pre-order walk: for every declared object property that is absent (or
//! explicit null on a non-nullable node) and whose schema declares a default,
//! the default is inserted deep-cloned. User-supplied values are never
//! overwritten, explicit zero and empty values included.

use serde_json::Value;

use super::structural::{Structural, StructuralOrBool};

/// Applies defaults from the schema to the instance in place.
pub fn apply_defaults(instance: &mut Value, schema: &Structural) {
    match instance {
        Value::Object(map) => {
            for (name, prop_schema) in &schema.properties {
                let absent = match map.get(name) {
                    None => true,
                    Some(Value::Null) => !prop_schema.generic.nullable,
                    Some(_) => false,
                };
                if absent {
                    if let Some(default) = prop_schema.generic.default.as_ref() {
                        map.insert(name.clone(), default.clone());
                    }
                }
            }
            for (name, value) in map.iter_mut() {
                if let Some(prop_schema) = schema.properties.get(name) {
                    apply_defaults(value, prop_schema);
                } else if let Some(StructuralOrBool::Structural(additional)) =
                    schema.additional_properties.as_deref()
                {
                    apply_defaults(value, additional);
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.items.as_deref() {
                for item in items.iter_mut() {
                    if item.is_null() && !item_schema.generic.nullable {
                        if let Some(default) = item_schema.generic.default.as_ref() {
                            *item = default.clone();
                        }
                    }
                    apply_defaults(item, item_schema);
                }
            }
        }
        _ => {}
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
                    "default": {},
                    "properties": {
                        "replicas": {"type": "integer", "default": 1},
                        "mode": {"type": "string", "default": "auto"},
                        "items": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "weight": {"type": "integer", "default": 10}
                                }
                            }
                        }
                    }
                }
            }
        }))
    }

    #[test]
    fn test_defaults_fill_absent_fields() {
        let mut instance = json!({});
        apply_defaults(&mut instance, &widget_schema());
        assert_eq!(instance, json!({"spec": {"replicas": 1, "mode": "auto"}}));
    }

    #[test]
    fn test_defaults_do_not_overwrite_present_values() {
        let mut instance = json!({"spec": {"replicas": 0, "mode": ""}});
        apply_defaults(&mut instance, &widget_schema());
        assert_eq!(instance["spec"]["replicas"], 0);
        assert_eq!(instance["spec"]["mode"], "");
    }

    #[test]
    fn test_defaults_recurse_into_array_items() {
        let mut instance = json!({"spec": {"items": [{}, {"weight": 3}]}});
        apply_defaults(&mut instance, &widget_schema());
        assert_eq!(instance["spec"]["items"][0]["weight"], 10);
        assert_eq!(instance["spec"]["items"][1]["weight"], 3);
    }

    #[test]
    fn test_null_defaulted_unless_nullable() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "a": {"type": "string", "default": "x"},
                "b": {"type": "string", "default": "y", "nullable": true}
            }
        }));
        let mut instance = json!({"a": null, "b": null});
        apply_defaults(&mut instance, &s);
        assert_eq!(instance["a"], "x");
        assert_eq!(instance["b"], Value::Null);
    }

    #[test]
    fn test_defaulting_is_idempotent() {
        let s = widget_schema();
        let mut once = json!({"spec": {"items": [{}]}});
        apply_defaults(&mut once, &s);
        let mut twice = once.clone();
        apply_defaults(&mut twice, &s);
        assert_eq!(once, twice);
    }
}
