//! Helpers for semi-structured custom resource instances.
//!
//! Custom resources have no compile-time type; an instance is a
//! `serde_json::Value` tree. Every access goes through the explicit helpers
//! here, which take field paths and return options instead of panicking on
//! shape mismatches. Mutating helpers create intermediate objects as needed.

use serde_json::{Map, Value, json};

use crate::common::ObjectMeta;

/// The `apiVersion` field, empty when absent.
pub fn api_version(value: &Value) -> &str {
    value
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// The `kind` field, empty when absent.
pub fn kind(value: &Value) -> &str {
    value.get("kind").and_then(Value::as_str).unwrap_or("")
}

/// Sets the `apiVersion` field.
pub fn set_api_version(value: &mut Value, api_version: &str) {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("apiVersion".to_string(), json!(api_version));
    }
}

/// Sets the `kind` field.
pub fn set_kind(value: &mut Value, kind: &str) {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("kind".to_string(), json!(kind));
    }
}

/// Borrow the `metadata` object map.
pub fn metadata(value: &Value) -> Option<&Map<String, Value>> {
    value.get("metadata").and_then(Value::as_object)
}

/// Mutably borrow the `metadata` object map, inserting an empty one if absent.
pub fn metadata_mut(value: &mut Value) -> Option<&mut Map<String, Value>> {
    let obj = value.as_object_mut()?;
    obj.entry("metadata".to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}

fn metadata_str<'a>(value: &'a Value, field: &str) -> &'a str {
    metadata(value)
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn set_metadata_field(value: &mut Value, field: &str, v: Value) {
    if let Some(meta) = metadata_mut(value) {
        meta.insert(field.to_string(), v);
    }
}

/// The `metadata.name` field, empty when absent.
pub fn name(value: &Value) -> &str {
    metadata_str(value, "name")
}

/// The `metadata.generateName` field, empty when absent.
pub fn generate_name(value: &Value) -> &str {
    metadata_str(value, "generateName")
}

/// The `metadata.namespace` field, empty when absent.
pub fn namespace(value: &Value) -> &str {
    metadata_str(value, "namespace")
}

/// The `metadata.uid` field, empty when absent.
pub fn uid(value: &Value) -> &str {
    metadata_str(value, "uid")
}

/// The `metadata.resourceVersion` field, empty when absent.
pub fn resource_version(value: &Value) -> &str {
    metadata_str(value, "resourceVersion")
}

/// The `metadata.generation` field, 0 when absent.
pub fn generation(value: &Value) -> i64 {
    metadata(value)
        .and_then(|m| m.get("generation"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// The `metadata.deletionTimestamp` field when present.
pub fn deletion_timestamp(value: &Value) -> Option<&str> {
    metadata(value)
        .and_then(|m| m.get("deletionTimestamp"))
        .and_then(Value::as_str)
}

/// The `metadata.finalizers` list, empty when absent.
pub fn finalizers(value: &Value) -> Vec<String> {
    metadata(value)
        .and_then(|m| m.get("finalizers"))
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Sets `metadata.name`.
pub fn set_name(value: &mut Value, name: &str) {
    set_metadata_field(value, "name", json!(name));
}

/// Sets `metadata.namespace`.
pub fn set_namespace(value: &mut Value, namespace: &str) {
    set_metadata_field(value, "namespace", json!(namespace));
}

/// Sets `metadata.uid`.
pub fn set_uid(value: &mut Value, uid: &str) {
    set_metadata_field(value, "uid", json!(uid));
}

/// Sets `metadata.resourceVersion`.
pub fn set_resource_version(value: &mut Value, rv: &str) {
    set_metadata_field(value, "resourceVersion", json!(rv));
}

/// Removes `metadata.resourceVersion`; storage never persists it.
pub fn clear_resource_version(value: &mut Value) {
    if let Some(meta) = metadata_mut(value) {
        meta.remove("resourceVersion");
    }
}

/// Sets `metadata.generation`.
pub fn set_generation(value: &mut Value, generation: i64) {
    set_metadata_field(value, "generation", json!(generation));
}

/// Sets `metadata.creationTimestamp`.
pub fn set_creation_timestamp(value: &mut Value, ts: &str) {
    set_metadata_field(value, "creationTimestamp", json!(ts));
}

/// Sets `metadata.deletionTimestamp`.
pub fn set_deletion_timestamp(value: &mut Value, ts: &str) {
    set_metadata_field(value, "deletionTimestamp", json!(ts));
}

/// The `metadata.labels` map as string pairs.
pub fn labels(value: &Value) -> std::collections::BTreeMap<String, String> {
    metadata(value)
        .and_then(|m| m.get("labels"))
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Decodes the `metadata` subtree into a typed ObjectMeta.
pub fn object_meta(value: &Value) -> Result<ObjectMeta, serde_json::Error> {
    match value.get("metadata") {
        Some(meta) => serde_json::from_value(meta.clone()),
        None => Ok(ObjectMeta::default()),
    }
}

/// Looks up a nested field by path segments.
pub fn nested<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

/// Looks up a nested field by a dotted path string such as `.spec.replicas`.
pub fn nested_by_json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments: Vec<&str> = split_json_path(path);
    if segments.is_empty() {
        return None;
    }
    nested(value, &segments)
}

/// Sets a nested field by path segments, creating intermediate objects.
pub fn set_nested(value: &mut Value, path: &[&str], new_value: Value) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    let mut current = value;
    for segment in parents {
        let Some(obj) = current.as_object_mut() else {
            return false;
        };
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    match current.as_object_mut() {
        Some(obj) => {
            obj.insert(last.to_string(), new_value);
            true
        }
        None => false,
    }
}

/// Sets a nested field by a dotted path string, creating intermediate objects.
pub fn set_nested_by_json_path(value: &mut Value, path: &str, new_value: Value) -> bool {
    let segments = split_json_path(path);
    if segments.is_empty() {
        return false;
    }
    set_nested(value, &segments, new_value)
}

/// Removes a nested field by path segments.
pub fn remove_nested(value: &mut Value, path: &[&str]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = value;
    for segment in parents {
        match current.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(obj) = current.as_object_mut() {
        obj.remove(*last);
    }
}

fn split_json_path(path: &str) -> Vec<&str> {
    path.trim_start_matches('.')
        .split('.')
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> Value {
        json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "a", "namespace": "default", "labels": {"app": "x"}},
            "spec": {"replicas": 3}
        })
    }

    #[test]
    fn test_metadata_accessors() {
        let w = widget();
        assert_eq!(api_version(&w), "example.com/v1");
        assert_eq!(kind(&w), "Widget");
        assert_eq!(name(&w), "a");
        assert_eq!(namespace(&w), "default");
        assert_eq!(uid(&w), "");
        assert_eq!(labels(&w).get("app").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_set_creates_metadata() {
        let mut v = json!({"spec": {}});
        set_name(&mut v, "b");
        assert_eq!(name(&v), "b");
    }

    #[test]
    fn test_nested_paths() {
        let w = widget();
        assert_eq!(
            nested_by_json_path(&w, ".spec.replicas").and_then(Value::as_i64),
            Some(3)
        );
        assert!(nested_by_json_path(&w, ".spec.missing").is_none());

        let mut w = widget();
        assert!(set_nested_by_json_path(&mut w, ".status.replicas", json!(1)));
        assert_eq!(
            nested(&w, &["status", "replicas"]).and_then(Value::as_i64),
            Some(1)
        );

        remove_nested(&mut w, &["status", "replicas"]);
        assert!(nested(&w, &["status", "replicas"]).is_none());
    }

    #[test]
    fn test_object_meta_decode() {
        let meta = object_meta(&widget()).unwrap();
        assert_eq!(meta.name(), "a");
        assert_eq!(meta.namespace(), "default");
    }
}
