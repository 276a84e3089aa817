//! Worst-case cost estimation for expression rules.
//!
//! The engine itself has no static type or cost model, so the budget is
//! enforced from schema-declared bounds: string lengths from `maxLength`,
//! list lengths from `maxItems`, map entries from `maxProperties`, each
//! falling back to a cardinality derived from the request-size ceiling
//! divided by the minimum serialized size of the element.

use crate::schema::{Structural, StructuralOrBool};

/// Abstract cost units one rule may spend on a single request.
pub const PER_RULE_BUDGET: u64 = 1_000_000;

/// Worst-case abstract size of a value conforming to the schema node, in
/// cost units. Scalars weigh one unit; strings weigh by bounded length;
/// composites multiply cardinality by element weight.
pub fn worst_case_weight(schema: &Structural, size_ceiling: u64) -> u64 {
    let vv = schema.value_validation.as_deref();
    match schema.generic.type_.as_str() {
        "integer" | "number" | "boolean" => 1,
        "string" => {
            let max_len = vv
                .and_then(|v| v.max_length)
                .map(|l| l.max(0) as u64)
                .unwrap_or(size_ceiling);
            1 + max_len / 8
        }
        "array" => {
            let item = match schema.items.as_deref() {
                Some(item) => item,
                None => return size_ceiling / 8,
            };
            let count = vv
                .and_then(|v| v.max_items)
                .map(|l| l.max(0) as u64)
                .unwrap_or_else(|| size_ceiling / min_serialized_size(item));
            count.saturating_mul(worst_case_weight(item, size_ceiling)).saturating_add(1)
        }
        "object" => {
            let mut weight: u64 = 1;
            for prop in schema.properties.values() {
                weight = weight.saturating_add(worst_case_weight(prop, size_ceiling));
            }
            if let Some(StructuralOrBool::Structural(additional)) =
                schema.additional_properties.as_deref()
            {
                let count = vv
                    .and_then(|v| v.max_properties)
                    .map(|l| l.max(0) as u64)
                    .unwrap_or_else(|| size_ceiling / min_serialized_size(additional));
                weight = weight
                    .saturating_add(count.saturating_mul(worst_case_weight(additional, size_ceiling)));
            }
            weight
        }
        // int-or-string and preserved nodes are bounded by the request size
        _ if schema.extensions.x_int_or_string => {
            let max_len = vv
                .and_then(|v| v.max_length)
                .map(|l| l.max(0) as u64)
                .unwrap_or(64);
            1 + max_len / 8
        }
        _ => size_ceiling / 8,
    }
}

/// The smallest number of bytes a conforming value can serialize to; used as
/// the denominator when deriving cardinality from the request-size ceiling.
pub fn min_serialized_size(schema: &Structural) -> u64 {
    match schema.generic.type_.as_str() {
        "integer" | "number" | "boolean" => 1,
        "string" => 2,
        "array" => 2,
        "object" => {
            let required: u64 = schema
                .value_validation
                .as_deref()
                .map(|v| v.required.len() as u64)
                .unwrap_or(0);
            // "{}" plus a conservative floor for each required field
            2 + required.saturating_mul(4)
        }
        _ => 1,
    }
    .max(1)
}

/// Worst-case cost of one rule: the per-evaluation weight of the bound value
/// scaled by expression complexity and by the number of evaluations implied
/// by enclosing lists and maps.
pub fn estimated_rule_cost(
    schema: &Structural,
    rule_len: usize,
    enclosing_cardinality: u64,
    size_ceiling: u64,
) -> u64 {
    let per_eval = worst_case_weight(schema, size_ceiling).saturating_mul(rule_len.max(1) as u64);
    per_eval.saturating_mul(enclosing_cardinality.max(1))
}

/// The runtime weight of an actual value, in the same units the estimator
/// uses. Charged against the per-rule budget on every evaluation.
pub fn runtime_weight(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Null
        | serde_json::Value::Bool(_)
        | serde_json::Value::Number(_) => 1,
        serde_json::Value::String(s) => 1 + (s.len() as u64) / 8,
        serde_json::Value::Array(items) => {
            items.iter().fold(1u64, |acc, v| acc.saturating_add(runtime_weight(v)))
        }
        serde_json::Value::Object(map) => map.iter().fold(1u64, |acc, (k, v)| {
            acc.saturating_add(1 + (k.len() as u64) / 8)
                .saturating_add(runtime_weight(v))
        }),
    }
}
