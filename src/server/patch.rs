//! Patch application: JSON Patch, merge patch with list-type hints, and
//! server-side apply.
//!
//! Custom resources accept `application/json-patch+json`,
//! `application/merge-patch+json`, `application/strategic-merge-patch+json`
//! (honored as a hinted merge driven by the structural schema's list types)
//! and `application/apply-patch+yaml`. Apply computes field ownership per
//! manager from `metadata.managedFields` and reports conflicts unless
//! forced.

use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

use super::error::ApiError;
use crate::common::Timestamp;
use crate::schema::{ListType, Structural};
use crate::unstructured;

/// The patch flavor, resolved from the request content type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchType {
    /// RFC 6902 JSON Patch.
    Json,
    /// RFC 7386 merge patch.
    Merge,
    /// Merge patch honoring list-type hints.
    StrategicMerge,
    /// Server-side apply.
    Apply,
}

/// Resolves the patch type from the Content-Type header.
pub fn patch_type_from_content_type(content_type: Option<&str>) -> Result<PatchType, ApiError> {
    let media = content_type
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match media.as_str() {
        "application/json-patch+json" => Ok(PatchType::Json),
        "application/merge-patch+json" => Ok(PatchType::Merge),
        "application/strategic-merge-patch+json" => Ok(PatchType::StrategicMerge),
        "application/apply-patch+yaml" => Ok(PatchType::Apply),
        other => Err(ApiError::unsupported_media_type(format!(
            "unsupported patch content type {:?}",
            other
        ))),
    }
}

/// Applies a JSON Patch or (strategic) merge patch to the current object.
pub fn apply_patch(
    current: &Value,
    patch_bytes: &[u8],
    patch_type: PatchType,
    schema: Option<&Structural>,
) -> Result<Value, ApiError> {
    match patch_type {
        PatchType::Json => {
            let patch: json_patch::Patch = serde_json::from_slice(patch_bytes)
                .map_err(|err| ApiError::bad_request(format!("decoding JSON patch: {}", err)))?;
            let mut patched = current.clone();
            json_patch::patch(&mut patched, &patch)
                .map_err(|err| ApiError::bad_request(format!("applying JSON patch: {}", err)))?;
            Ok(patched)
        }
        PatchType::Merge | PatchType::StrategicMerge => {
            let patch: Value = serde_json::from_slice(patch_bytes)
                .map_err(|err| ApiError::bad_request(format!("decoding merge patch: {}", err)))?;
            // the plain merge patch ignores list hints; the strategic
            // flavor merges map-lists by their declared keys
            let hints = if patch_type == PatchType::StrategicMerge {
                schema
            } else {
                None
            };
            Ok(merge_value(current, &patch, hints))
        }
        PatchType::Apply => Err(ApiError::bad_request(
            "apply patches require a field manager; use apply_ssa",
        )),
    }
}

fn merge_value(current: &Value, patch: &Value, schema: Option<&Structural>) -> Value {
    match (current, patch) {
        (Value::Object(current_map), Value::Object(patch_map)) => {
            let mut merged = current_map.clone();
            for (key, patch_child) in patch_map {
                if patch_child.is_null() {
                    merged.remove(key);
                    continue;
                }
                let child_schema = schema.and_then(|s| s.property(key));
                let merged_child = match merged.get(key) {
                    Some(current_child) => merge_value(current_child, patch_child, child_schema),
                    None => patch_child.clone(),
                };
                merged.insert(key.clone(), merged_child);
            }
            Value::Object(merged)
        }
        (Value::Array(current_items), Value::Array(patch_items)) => {
            match schema.map(|s| (s.list_type(), s)) {
                Some((ListType::Map, s)) => {
                    merge_map_list(current_items, patch_items, s)
                }
                // atomic and set lists are replaced wholesale
                _ => patch.clone(),
            }
        }
        _ => patch.clone(),
    }
}

fn merge_map_list(current: &[Value], patch: &[Value], schema: &Structural) -> Value {
    let keys = &schema.extensions.x_list_map_keys;
    let item_schema = schema.items.as_deref();
    let mut merged = current.to_vec();
    for patch_item in patch {
        let patch_key = map_list_key(keys, patch_item);
        let existing = merged
            .iter()
            .position(|item| map_list_key(keys, item) == patch_key && patch_key.is_some());
        match existing {
            Some(index) => {
                merged[index] = merge_value(&merged[index], patch_item, item_schema);
            }
            None => merged.push(patch_item.clone()),
        }
    }
    Value::Array(merged)
}

fn map_list_key(keys: &[String], item: &Value) -> Option<String> {
    if keys.is_empty() {
        return None;
    }
    let parts: Vec<String> = keys
        .iter()
        .map(|k| item.get(k).map(|v| v.to_string()).unwrap_or_else(|| "null".to_string()))
        .collect();
    Some(parts.join("/"))
}

// ============================================================================
// Server-side apply
// ============================================================================

/// Applies an apply-patch for a field manager: merges the applied intent
/// over the live object, computes the fields the manager now owns, and
/// reports ownership conflicts unless `force` is set.
pub fn apply_ssa(
    current: &Value,
    applied: &Value,
    schema: Option<&Structural>,
    field_manager: &str,
    force: bool,
) -> Result<Value, ApiError> {
    if field_manager.is_empty() {
        return Err(ApiError::bad_request(
            "fieldManager is required for apply requests",
        ));
    }

    let applied_paths = leaf_paths(applied);
    let mut changed = BTreeSet::new();
    for path in &applied_paths {
        let segments: Vec<&str> = path.split('.').collect();
        let new_value = unstructured::nested(applied, &segments);
        let old_value = unstructured::nested(current, &segments);
        if new_value != old_value {
            changed.insert(path.clone());
        }
    }

    // ownership conflict: another manager owns a field this apply changes
    let ownership = read_managed_fields(current);
    let mut conflicts = Vec::new();
    for (manager, fields) in &ownership {
        if manager == field_manager {
            continue;
        }
        for field in fields {
            if changed.contains(field) {
                conflicts.push(format!("{} (owned by {})", field, manager));
            }
        }
    }
    if !conflicts.is_empty() && !force {
        return Err(ApiError {
            kind: super::error::ErrorKind::Conflict,
            message: format!(
                "Apply failed with {} conflict(s): {}",
                conflicts.len(),
                conflicts.join(", ")
            ),
            details: None,
        });
    }

    let mut merged = merge_value(current, applied, schema);

    // move ownership of the applied fields to this manager
    let mut ownership = ownership;
    for (_, fields) in ownership.iter_mut() {
        fields.retain(|f| !applied_paths.contains(f));
    }
    ownership.retain(|(manager, fields)| manager == field_manager || !fields.is_empty());
    match ownership.iter_mut().find(|(m, _)| m == field_manager) {
        Some((_, fields)) => {
            fields.extend(applied_paths.iter().cloned());
            fields.sort();
            fields.dedup();
        }
        None => {
            let mut fields: Vec<String> = applied_paths.into_iter().collect();
            fields.sort();
            ownership.push((field_manager.to_string(), fields));
        }
    }
    write_managed_fields(&mut merged, &ownership);
    Ok(merged)
}

/// Collects the dotted leaf paths of a document, skipping the envelope.
fn leaf_paths(value: &Value) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    if let Value::Object(map) = value {
        for (key, child) in map {
            if key == "apiVersion" || key == "kind" || key == "metadata" {
                continue;
            }
            collect_leaves(child, key, &mut paths);
        }
    }
    paths
}

fn collect_leaves(value: &Value, prefix: &str, paths: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(child, &format!("{}.{}", prefix, key), paths);
            }
        }
        _ => {
            paths.insert(prefix.to_string());
        }
    }
}

fn read_managed_fields(object: &Value) -> Vec<(String, Vec<String>)> {
    let mut ownership = Vec::new();
    let entries = unstructured::metadata(object)
        .and_then(|m| m.get("managedFields"))
        .and_then(Value::as_array);
    let Some(entries) = entries else {
        return ownership;
    };
    for entry in entries {
        let manager = entry
            .get("manager")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let mut fields = Vec::new();
        if let Some(fields_v1) = entry.get("fieldsV1").and_then(Value::as_object) {
            for (key, child) in fields_v1 {
                if let Some(stripped) = key.strip_prefix("f:") {
                    collect_fields_v1(child, stripped, &mut fields);
                }
            }
        }
        if !manager.is_empty() {
            ownership.push((manager, fields));
        }
    }
    ownership
}

fn collect_fields_v1(value: &Value, prefix: &str, fields: &mut Vec<String>) {
    match value.as_object() {
        Some(map) if !map.is_empty() => {
            for (key, child) in map {
                if let Some(stripped) = key.strip_prefix("f:") {
                    collect_fields_v1(child, &format!("{}.{}", prefix, stripped), fields);
                }
            }
        }
        _ => fields.push(prefix.to_string()),
    }
}

fn insert_fields_v1_path(map: &mut Map<String, Value>, segments: &[&str]) {
    if segments.is_empty() {
        return;
    }
    let key = format!("f:{}", segments[0]);
    let entry = map.entry(key).or_insert_with(|| Value::Object(Map::new()));
    if segments.len() > 1 {
        let child = entry.as_object_mut().expect("fields_v1 nodes are objects");
        insert_fields_v1_path(child, &segments[1..]);
    }
}

fn write_managed_fields(object: &mut Value, ownership: &[(String, Vec<String>)]) {
    let entries: Vec<Value> = ownership
        .iter()
        .map(|(manager, fields)| {
            let mut fields_v1 = Map::new();
            for field in fields {
                let segments: Vec<&str> = field.split('.').collect();
                insert_fields_v1_path(&mut fields_v1, &segments);
            }
            json!({
                "manager": manager,
                "operation": "Apply",
                "apiVersion": unstructured::api_version(object),
                "time": Timestamp::now().to_rfc3339(),
                "fieldsType": "FieldsV1",
                "fieldsV1": Value::Object(fields_v1),
            })
        })
        .collect();
    if let Some(meta) = unstructured::metadata_mut(object) {
        meta.insert("managedFields".to_string(), Value::Array(entries));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiextensions::JSONSchemaProps;

    fn widget() -> Value {
        json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "a"},
            "spec": {"replicas": 1, "mode": "auto",
                     "ports": [{"name": "http", "port": 80}]}
        })
    }

    fn ports_schema() -> Structural {
        let props: JSONSchemaProps = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "properties": {
                        "replicas": {"type": "integer"},
                        "mode": {"type": "string"},
                        "ports": {
                            "type": "array",
                            "x-kubernetes-list-type": "map",
                            "x-kubernetes-list-map-keys": ["name"],
                            "items": {"type": "object", "properties": {
                                "name": {"type": "string"},
                                "port": {"type": "integer"},
                                "protocol": {"type": "string"}
                            }}
                        }
                    }
                }
            }
        }))
        .unwrap();
        Structural::from_props(&props).0
    }

    #[test]
    fn test_json_patch() {
        let patch = br#"[{"op": "replace", "path": "/spec/replicas", "value": 5}]"#;
        let patched = apply_patch(&widget(), patch, PatchType::Json, None).unwrap();
        assert_eq!(patched["spec"]["replicas"], 5);
        assert_eq!(patched["spec"]["mode"], "auto");
    }

    #[test]
    fn test_merge_patch_removes_on_null() {
        let patch = br#"{"spec": {"mode": null, "replicas": 2}}"#;
        let patched = apply_patch(&widget(), patch, PatchType::Merge, None).unwrap();
        assert_eq!(patched["spec"]["replicas"], 2);
        assert!(patched["spec"].get("mode").is_none());
    }

    #[test]
    fn test_plain_merge_replaces_lists() {
        let patch = br#"{"spec": {"ports": [{"name": "https", "port": 443}]}}"#;
        let patched =
            apply_patch(&widget(), patch, PatchType::Merge, Some(&ports_schema())).unwrap();
        assert_eq!(patched["spec"]["ports"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_strategic_merge_uses_map_keys() {
        let patch = br#"{"spec": {"ports": [{"name": "http", "protocol": "TCP"},
                                             {"name": "https", "port": 443}]}}"#;
        let patched = apply_patch(
            &widget(),
            patch,
            PatchType::StrategicMerge,
            Some(&ports_schema()),
        )
        .unwrap();
        let ports = patched["spec"]["ports"].as_array().unwrap();
        assert_eq!(ports.len(), 2);
        // the existing item merged rather than being replaced
        assert_eq!(ports[0]["port"], 80);
        assert_eq!(ports[0]["protocol"], "TCP");
        assert_eq!(ports[1]["name"], "https");
    }

    #[test]
    fn test_apply_records_ownership_and_detects_conflicts() {
        let applied_by_alice = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "a"},
            "spec": {"replicas": 3}
        });
        let after_alice = apply_ssa(&widget(), &applied_by_alice, Some(&ports_schema()), "alice", false)
            .unwrap();
        assert_eq!(after_alice["spec"]["replicas"], 3);
        let managed = after_alice["metadata"]["managedFields"].as_array().unwrap();
        assert_eq!(managed[0]["manager"], "alice");
        assert!(managed[0]["fieldsV1"]["f:spec"]["f:replicas"].is_object());

        // bob changing alice's field conflicts
        let applied_by_bob = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "a"},
            "spec": {"replicas": 7}
        });
        let err = apply_ssa(&after_alice, &applied_by_bob, Some(&ports_schema()), "bob", false)
            .unwrap_err();
        assert_eq!(err.code(), 409);
        assert!(err.message.contains("spec.replicas"));

        // force takes ownership
        let after_bob =
            apply_ssa(&after_alice, &applied_by_bob, Some(&ports_schema()), "bob", true).unwrap();
        assert_eq!(after_bob["spec"]["replicas"], 7);
        let managers: Vec<&str> = after_bob["metadata"]["managedFields"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["manager"].as_str())
            .collect();
        assert!(managers.contains(&"bob"));
    }

    #[test]
    fn test_apply_same_value_is_not_a_conflict() {
        let applied_by_alice = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "a"},
            "spec": {"replicas": 3}
        });
        let after_alice =
            apply_ssa(&widget(), &applied_by_alice, None, "alice", false).unwrap();
        // bob applies the identical value; nothing changes, no conflict
        let result = apply_ssa(&after_alice, &applied_by_alice, None, "bob", false);
        assert!(result.is_ok());
    }

    #[test]
    fn test_patch_content_type_resolution() {
        assert_eq!(
            patch_type_from_content_type(Some("application/json-patch+json")).unwrap(),
            PatchType::Json
        );
        assert_eq!(
            patch_type_from_content_type(Some("application/apply-patch+yaml")).unwrap(),
            PatchType::Apply
        );
        assert_eq!(
            patch_type_from_content_type(Some("text/plain")).unwrap_err().code(),
            415
        );
    }
}
