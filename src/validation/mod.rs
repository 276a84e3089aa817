//! Instance validation against a structural schema.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apiserver/validation
//!
//! The walker accumulates every failure; it never stops early, and the
//! reported set is a pure function of (schema, instance) independent of
//! object key ordering. Checks at each node run in a fixed order: type,
//! format, constraints, recursion; object metadata is validated strictly at
//! the root and at embedded-resource positions.

pub mod formats;

use serde_json::Value;

use crate::common::validation::{
    BadValue, ErrorList, Path, duplicate, forbidden, invalid, not_supported, required, too_few,
    too_long, too_many, too_short, type_invalid,
};
use crate::schema::{
    ListType, NestedValueValidation, Structural, StructuralOrBool, ValueValidation,
    validate_embedded_resource, validate_instance_object_meta,
};

pub use formats::validate_format;

/// Validates a complete instance: strict object metadata plus the schema
/// walk over the whole document.
pub fn validate_instance(
    instance: &Value,
    schema: &Structural,
    requires_namespace: bool,
) -> ErrorList {
    let mut all_errs = validate_instance_object_meta(
        instance,
        requires_namespace,
        crate::common::validation::name_is_dns_subdomain,
        &Path::new("metadata"),
    );
    all_errs.extend(validate_custom_resource(&Path::new(""), instance, schema));
    all_errs
}

/// Validates a value subtree against a structural schema node.
pub fn validate_custom_resource(
    fld_path: &Path,
    value: &Value,
    schema: &Structural,
) -> ErrorList {
    let mut all_errs = ErrorList::new();
    validate_node(fld_path, value, schema, true, &mut all_errs);
    all_errs
}

fn validate_node(
    path: &Path,
    value: &Value,
    schema: &Structural,
    at_envelope: bool,
    errs: &mut ErrorList,
) {
    // null is a type question, everything else assumes a concrete value
    if value.is_null() {
        if !schema.generic.nullable && !schema.generic.type_.is_empty() {
            errs.push(type_invalid(
                path,
                BadValue::String("null".to_string()),
                &format!("must be of type {}", schema.generic.type_),
            ));
        }
        return;
    }

    // 1. type
    if schema.extensions.x_int_or_string {
        let is_int = value.as_i64().is_some() || value.as_u64().is_some();
        if !is_int && !value.is_string() {
            errs.push(type_invalid(
                path,
                BadValue::from_json(value),
                "must be of type integer or string",
            ));
            return;
        }
    } else if !schema.generic.type_.is_empty() && !type_matches(value, &schema.generic.type_) {
        errs.push(type_invalid(
            path,
            BadValue::from_json(value),
            &format!("must be of type {}", schema.generic.type_),
        ));
        return;
    }

    // 2.+3. format and constraints
    if let Some(vv) = schema.value_validation.as_deref() {
        validate_value_constraints(path, value, vv, errs);
    }

    // list-type uniqueness is independent of explicit uniqueItems
    if let Value::Array(items) = value {
        match schema.list_type() {
            ListType::Set => check_unique_items(path, items, errs),
            ListType::Map => {
                check_map_keys_unique(path, items, &schema.extensions.x_list_map_keys, errs)
            }
            ListType::Atomic => {}
        }
    }

    // 4. recursion
    match value {
        Value::Object(map) => {
            if schema.extensions.x_embedded_resource {
                errs.extend(validate_embedded_resource(value, path));
            }
            for (name, child) in map {
                if at_envelope && (name == "apiVersion" || name == "kind" || name == "metadata") {
                    // envelope fields have fixed validation outside the walk
                    continue;
                }
                if let Some(prop_schema) = schema.properties.get(name) {
                    validate_node(
                        &path.child(name),
                        child,
                        prop_schema,
                        prop_schema.extensions.x_embedded_resource,
                        errs,
                    );
                } else {
                    match schema.additional_properties.as_deref() {
                        Some(StructuralOrBool::Structural(s)) => {
                            validate_node(
                                &path.key(name),
                                child,
                                s,
                                s.extensions.x_embedded_resource,
                                errs,
                            );
                        }
                        Some(StructuralOrBool::Bool(false)) => {
                            errs.push(forbidden(&path.key(name), "unknown field"));
                        }
                        // undeclared fields are the pruner's concern
                        _ => {}
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.items.as_deref() {
                for (i, item) in items.iter().enumerate() {
                    validate_node(
                        &path.index(i),
                        item,
                        item_schema,
                        item_schema.extensions.x_embedded_resource,
                        errs,
                    );
                }
            }
        }
        _ => {}
    }
}

fn type_matches(value: &Value, type_: &str) -> bool {
    match type_ {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => {
            value.as_i64().is_some()
                || value.as_u64().is_some()
                || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
        }
        "number" => value.is_number(),
        _ => true,
    }
}

fn validate_value_constraints(
    path: &Path,
    value: &Value,
    vv: &ValueValidation,
    errs: &mut ErrorList,
) {
    if let Value::String(s) = value {
        if !vv.format.is_empty() {
            for msg in formats::validate_format(s, &vv.format) {
                errs.push(invalid(path, BadValue::String(s.clone()), &msg));
            }
        }
        let length = s.chars().count();
        if let Some(max) = vv.max_length {
            if length as i64 > max {
                errs.push(too_long(path, max.max(0) as usize));
            }
        }
        if let Some(min) = vv.min_length {
            if (length as i64) < min {
                errs.push(too_short(path, min.max(0) as usize));
            }
        }
        if !vv.pattern.is_empty() {
            if let Ok(re) = regex::Regex::new(&vv.pattern) {
                if !re.is_match(s) {
                    errs.push(invalid(
                        path,
                        BadValue::String(s.clone()),
                        &format!("must match the pattern '{}'", vv.pattern),
                    ));
                }
            }
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(max) = vv.maximum {
            let bad = if vv.exclusive_maximum { n >= max } else { n > max };
            if bad {
                let op = if vv.exclusive_maximum { "less than" } else { "less than or equal to" };
                errs.push(invalid(
                    path,
                    BadValue::from_json(value),
                    &format!("must be {} {}", op, max),
                ));
            }
        }
        if let Some(min) = vv.minimum {
            let bad = if vv.exclusive_minimum { n <= min } else { n < min };
            if bad {
                let op = if vv.exclusive_minimum {
                    "greater than"
                } else {
                    "greater than or equal to"
                };
                errs.push(invalid(
                    path,
                    BadValue::from_json(value),
                    &format!("must be {} {}", op, min),
                ));
            }
        }
        if let Some(multiple) = vv.multiple_of {
            if multiple != 0.0 {
                let q = n / multiple;
                if (q - q.round()).abs() > 1e-9 {
                    errs.push(invalid(
                        path,
                        BadValue::from_json(value),
                        &format!("must be a multiple of {}", multiple),
                    ));
                }
            }
        }
    }

    if !vv.enum_.is_empty() && !vv.enum_.contains(value) {
        let allowed: Vec<String> = vv.enum_.iter().map(|v| v.to_string()).collect();
        let allowed_refs: Vec<&str> = allowed.iter().map(String::as_str).collect();
        errs.push(not_supported(path, BadValue::from_json(value), &allowed_refs));
    }

    if let Value::Object(map) = value {
        for req in &vv.required {
            if !map.contains_key(req) {
                errs.push(required(&path.child(req), ""));
            }
        }
        if let Some(max) = vv.max_properties {
            if map.len() as i64 > max {
                errs.push(too_many(path, Some(map.len()), max.max(0) as usize));
            }
        }
        if let Some(min) = vv.min_properties {
            if (map.len() as i64) < min {
                errs.push(too_few(path, Some(map.len()), min.max(0) as usize));
            }
        }
    }

    if let Value::Array(items) = value {
        if let Some(max) = vv.max_items {
            if items.len() as i64 > max {
                errs.push(too_many(path, Some(items.len()), max.max(0) as usize));
            }
        }
        if let Some(min) = vv.min_items {
            if (items.len() as i64) < min {
                errs.push(too_few(path, Some(items.len()), min.max(0) as usize));
            }
        }
        if vv.unique_items {
            check_unique_items(path, items, errs);
        }
    }

    // logical junctors hold value validations only
    for branch in &vv.all_of {
        let mut branch_errs = ErrorList::new();
        validate_nested(path, value, branch, &mut branch_errs);
        errs.extend(branch_errs);
    }
    if !vv.any_of.is_empty() {
        let passed = vv.any_of.iter().any(|branch| {
            let mut branch_errs = ErrorList::new();
            validate_nested(path, value, branch, &mut branch_errs);
            branch_errs.is_empty()
        });
        if !passed {
            errs.push(invalid(
                path,
                BadValue::from_json(value),
                "must validate at least one schema (anyOf)",
            ));
        }
    }
    if !vv.one_of.is_empty() {
        let passing = vv
            .one_of
            .iter()
            .filter(|branch| {
                let mut branch_errs = ErrorList::new();
                validate_nested(path, value, branch, &mut branch_errs);
                branch_errs.is_empty()
            })
            .count();
        if passing != 1 {
            errs.push(invalid(
                path,
                BadValue::from_json(value),
                "must validate exactly one schema (oneOf)",
            ));
        }
    }
    if let Some(not) = vv.not.as_deref() {
        let mut branch_errs = ErrorList::new();
        validate_nested(path, value, not, &mut branch_errs);
        if branch_errs.is_empty() {
            errs.push(forbidden(path, "must not validate the schema (not)"));
        }
    }
}

fn validate_nested(
    path: &Path,
    value: &Value,
    nested: &NestedValueValidation,
    errs: &mut ErrorList,
) {
    validate_value_constraints(path, value, &nested.value_validation, errs);
    match value {
        Value::Object(map) => {
            for (name, child_nested) in &nested.properties {
                if let Some(child) = map.get(name) {
                    validate_nested(&path.child(name), child, child_nested, errs);
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_nested) = nested.items.as_deref() {
                for (i, item) in items.iter().enumerate() {
                    validate_nested(&path.index(i), item, item_nested, errs);
                }
            }
        }
        _ => {}
    }
}

fn check_unique_items(path: &Path, items: &[Value], errs: &mut ErrorList) {
    let mut seen = std::collections::BTreeSet::new();
    for (i, item) in items.iter().enumerate() {
        let key = item.to_string();
        if !seen.insert(key) {
            errs.push(duplicate(&path.index(i), BadValue::from_json(item)));
        }
    }
}

fn check_map_keys_unique(path: &Path, items: &[Value], keys: &[String], errs: &mut ErrorList) {
    if keys.is_empty() {
        return;
    }
    let mut seen = std::collections::BTreeSet::new();
    for (i, item) in items.iter().enumerate() {
        let key: Vec<String> = keys
            .iter()
            .map(|k| {
                item.get(k)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "null".to_string())
            })
            .collect();
        if !seen.insert(key.join("/")) {
            errs.push(duplicate(&path.index(i), BadValue::from_json(item)));
        }
    }
}
