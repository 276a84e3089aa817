//! Expression rule compilation and evaluation.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apiserver/schema/cel
//!
//! The expression language itself is the external `cel-interpreter` engine;
//! this module owns everything around it: walking the structural schema to
//! compile the rules attached to each node, rejecting rules whose estimated
//! worst-case cost exceeds the per-rule budget, correlating `oldSelf` values
//! on update, metering runtime cost, and anchoring failures at field paths.

pub mod estimator;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cel_interpreter::{Context, Program, Value as CelValue};
use serde_json::Value;

use crate::apiextensions::ValidationRule;
use crate::common::validation::{BadValue, ErrorList, Path, invalid};
use crate::schema::{ListType, Structural, StructuralOrBool};

pub use estimator::PER_RULE_BUDGET;

/// Reason attached to failures caused by the runtime budget.
pub const RULE_COST_EXCEEDED_REASON: &str = "RuleCostExceeded";

/// A single rule compiled against its schema node.
pub struct CompiledRule {
    /// The declared rule.
    pub rule: ValidationRule,
    /// Identifier used for runtime cost accounting.
    id: usize,
    /// True when the expression references `oldSelf`.
    pub transition: bool,
    /// Worst-case cost estimate computed at compile time.
    pub estimated_cost: u64,
    program: Arc<Program>,
    message_program: Option<Arc<Program>>,
}

/// Compiled rules of one schema node plus the mirrored children.
#[derive(Default)]
struct CompiledNode {
    rules: Vec<CompiledRule>,
    properties: BTreeMap<String, CompiledNode>,
    items: Option<Box<CompiledNode>>,
    additional: Option<Box<CompiledNode>>,
}

impl CompiledNode {
    fn is_empty(&self) -> bool {
        self.rules.is_empty()
            && self.properties.is_empty()
            && self.items.is_none()
            && self.additional.is_none()
    }
}

/// The compiled rule cache of one CRD version, built once on establish.
#[derive(Default)]
pub struct RuleSet {
    root: Option<CompiledNode>,
    rule_count: usize,
    /// Human-readable compilation problems, surfaced through the
    /// NonStructuralSchema condition message; they never tear down serving.
    pub compile_errors: Vec<String>,
}

impl RuleSet {
    /// A cache with no rules at all.
    pub fn empty() -> Self {
        RuleSet::default()
    }

    /// True when at least one rule compiled successfully.
    pub fn has_rules(&self) -> bool {
        self.root.is_some()
    }
}

/// Compiles every rule in the schema tree. Rules that fail to parse or whose
/// estimated cost exceeds the per-rule budget are recorded in
/// `compile_errors` and skipped.
pub fn compile_rules(schema: &Structural, size_ceiling: u64) -> RuleSet {
    let mut set = RuleSet::default();
    let mut next_id = 0usize;
    let root = compile_node(schema, &Path::new(""), 1, size_ceiling, &mut set, &mut next_id);
    set.rule_count = next_id;
    if !root.is_empty() {
        set.root = Some(root);
    }
    set
}

fn references_old_self(rule: &str) -> bool {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\boldSelf\b").unwrap())
        .is_match(rule)
}

fn compile_node(
    schema: &Structural,
    path: &Path,
    enclosing_cardinality: u64,
    size_ceiling: u64,
    set: &mut RuleSet,
    next_id: &mut usize,
) -> CompiledNode {
    let mut node = CompiledNode::default();

    for rule in &schema.validation_rules {
        let estimated = estimator::estimated_rule_cost(
            schema,
            rule.rule.len(),
            enclosing_cardinality,
            size_ceiling,
        );
        if estimated > PER_RULE_BUDGET {
            set.compile_errors.push(format!(
                "rule at {} exceeds the per-rule cost budget (estimated {} units): {}",
                display_path(path),
                estimated,
                rule.rule
            ));
            continue;
        }

        let program = match Program::compile(&rule.rule) {
            Ok(p) => Arc::new(p),
            Err(err) => {
                set.compile_errors.push(format!(
                    "rule at {} failed to compile: {}",
                    display_path(path),
                    err
                ));
                continue;
            }
        };
        let message_program = if rule.message_expression.is_empty() {
            None
        } else {
            match Program::compile(&rule.message_expression) {
                Ok(p) => Some(Arc::new(p)),
                Err(err) => {
                    set.compile_errors.push(format!(
                        "messageExpression at {} failed to compile: {}",
                        display_path(path),
                        err
                    ));
                    None
                }
            }
        };

        node.rules.push(CompiledRule {
            rule: rule.clone(),
            id: *next_id,
            transition: references_old_self(&rule.rule),
            estimated_cost: estimated,
            program,
            message_program,
        });
        *next_id += 1;
    }

    for (name, prop) in &schema.properties {
        let child = compile_node(
            prop,
            &path.child(name),
            enclosing_cardinality,
            size_ceiling,
            set,
            next_id,
        );
        if !child.is_empty() {
            node.properties.insert(name.clone(), child);
        }
    }

    if let Some(items) = schema.items.as_deref() {
        let item_count = schema
            .value_validation
            .as_deref()
            .and_then(|v| v.max_items)
            .map(|l| l.max(0) as u64)
            .unwrap_or_else(|| size_ceiling / estimator::min_serialized_size(items));
        let child = compile_node(
            items,
            &path.child("items"),
            enclosing_cardinality.saturating_mul(item_count.max(1)),
            size_ceiling,
            set,
            next_id,
        );
        if !child.is_empty() {
            node.items = Some(Box::new(child));
        }
    }

    if let Some(StructuralOrBool::Structural(additional)) = schema.additional_properties.as_deref()
    {
        let entry_count = schema
            .value_validation
            .as_deref()
            .and_then(|v| v.max_properties)
            .map(|l| l.max(0) as u64)
            .unwrap_or_else(|| size_ceiling / estimator::min_serialized_size(additional));
        let child = compile_node(
            additional,
            &path.child("additionalProperties"),
            enclosing_cardinality.saturating_mul(entry_count.max(1)),
            size_ceiling,
            set,
            next_id,
        );
        if !child.is_empty() {
            node.additional = Some(Box::new(child));
        }
    }

    node
}

fn display_path(path: &Path) -> String {
    let s = path.to_string();
    if s.is_empty() { "<root>".to_string() } else { s }
}

/// Evaluates all compiled rules against the instance. `old` is the pre-image
/// on update; transition rules are skipped on create unless they declare
/// `optionalOldSelf`.
pub fn validate_expressions(
    value: &Value,
    old: Option<&Value>,
    schema: &Structural,
    rules: &RuleSet,
) -> ErrorList {
    let mut errs = ErrorList::new();
    let Some(root) = rules.root.as_ref() else {
        return errs;
    };
    let mut meter = CostMeter {
        spent: vec![0; rules.rule_count],
        exceeded: vec![false; rules.rule_count],
    };
    eval_node(root, schema, &Path::new(""), value, old, &mut meter, &mut errs);
    errs
}

struct CostMeter {
    spent: Vec<u64>,
    exceeded: Vec<bool>,
}

fn eval_node(
    node: &CompiledNode,
    schema: &Structural,
    path: &Path,
    value: &Value,
    old: Option<&Value>,
    meter: &mut CostMeter,
    errs: &mut ErrorList,
) {
    for rule in &node.rules {
        eval_rule(rule, path, value, old, meter, errs);
    }

    match value {
        Value::Object(map) => {
            for (name, child_node) in &node.properties {
                if let Some(child) = map.get(name) {
                    let child_schema = schema.properties.get(name);
                    let child_old = old.and_then(|o| o.get(name));
                    if let Some(cs) = child_schema {
                        eval_node(child_node, cs, &path.child(name), child, child_old, meter, errs);
                    }
                }
            }
            if let (Some(additional_node), Some(additional_schema)) =
                (node.additional.as_deref(), schema.additional_property_schema())
            {
                for (name, child) in map {
                    if schema.properties.contains_key(name) {
                        continue;
                    }
                    let child_old = old.and_then(|o| o.get(name));
                    eval_node(
                        additional_node,
                        additional_schema,
                        &path.key(name),
                        child,
                        child_old,
                        meter,
                        errs,
                    );
                }
            }
        }
        Value::Array(items) => {
            if let (Some(item_node), Some(item_schema)) =
                (node.items.as_deref(), schema.items.as_deref())
            {
                let old_by_key = build_old_item_index(schema, old);
                for (i, item) in items.iter().enumerate() {
                    let item_old = match &old_by_key {
                        Some(index) => {
                            item_key(&schema.extensions.x_list_map_keys, item)
                                .and_then(|k| index.get(&k).copied())
                        }
                        // items of atomic and set lists correlate by position
                        None => old.and_then(|o| o.as_array()).and_then(|o| o.get(i)),
                    };
                    eval_node(
                        item_node,
                        item_schema,
                        &path.index(i),
                        item,
                        item_old,
                        meter,
                        errs,
                    );
                }
            }
        }
        _ => {}
    }
}

fn build_old_item_index<'a>(
    schema: &Structural,
    old: Option<&'a Value>,
) -> Option<HashMap<String, &'a Value>> {
    if schema.list_type() != ListType::Map {
        return None;
    }
    let keys = &schema.extensions.x_list_map_keys;
    let old_items = old?.as_array()?;
    let mut index = HashMap::new();
    for item in old_items {
        if let Some(key) = item_key(keys, item) {
            index.insert(key, item);
        }
    }
    Some(index)
}

fn item_key(keys: &[String], item: &Value) -> Option<String> {
    if keys.is_empty() {
        return None;
    }
    let parts: Vec<String> = keys
        .iter()
        .map(|k| item.get(k).map(|v| v.to_string()).unwrap_or_else(|| "null".to_string()))
        .collect();
    Some(parts.join("/"))
}

fn eval_rule(
    rule: &CompiledRule,
    path: &Path,
    value: &Value,
    old: Option<&Value>,
    meter: &mut CostMeter,
    errs: &mut ErrorList,
) {
    let optional_old_self = rule.rule.optional_old_self.unwrap_or(false);
    if rule.transition && old.is_none() && !optional_old_self {
        return;
    }
    if meter.exceeded[rule.id] {
        return;
    }

    let cost = estimator::runtime_weight(value)
        .saturating_add(old.map(estimator::runtime_weight).unwrap_or(0))
        .saturating_add(rule.rule.rule.len() as u64);
    meter.spent[rule.id] = meter.spent[rule.id].saturating_add(cost);
    if meter.spent[rule.id] > PER_RULE_BUDGET {
        meter.exceeded[rule.id] = true;
        errs.push(invalid_with_reason(
            &anchor(path, &rule.rule.field_path),
            BadValue::from_json(value),
            "validation rule exceeded the runtime cost budget",
            RULE_COST_EXCEEDED_REASON,
        ));
        return;
    }

    let mut ctx = Context::default();
    ctx.add_variable_from_value("self", json_to_cel(value));
    if let Some(old_value) = old {
        ctx.add_variable_from_value("oldSelf", json_to_cel(old_value));
    }

    match rule.program.execute(&ctx) {
        Ok(CelValue::Bool(true)) => {}
        Ok(CelValue::Bool(false)) => {
            errs.push(invalid(
                &anchor(path, &rule.rule.field_path),
                BadValue::from_json(value),
                &failure_message(rule, &ctx),
            ));
        }
        Ok(_) => {
            errs.push(invalid(
                &anchor(path, &rule.rule.field_path),
                BadValue::from_json(value),
                &format!("rule '{}' must evaluate to a boolean", rule.rule.rule),
            ));
        }
        Err(err) => {
            errs.push(invalid(
                &anchor(path, &rule.rule.field_path),
                BadValue::from_json(value),
                &format!("rule '{}' evaluation failed: {}", rule.rule.rule, err),
            ));
        }
    }
}

fn invalid_with_reason(
    path: &Path,
    value: BadValue,
    detail: &str,
    reason: &str,
) -> crate::common::validation::Error {
    // the reason travels in the detail prefix; the dispatcher lifts it into
    // the Status cause reason
    let mut err = invalid(path, value, detail);
    err.detail = format!("{}: {}", reason, err.detail);
    err
}

fn failure_message(rule: &CompiledRule, ctx: &Context) -> String {
    if let Some(message_program) = rule.message_program.as_ref() {
        if let Ok(CelValue::String(s)) = message_program.execute(ctx) {
            if !s.is_empty() {
                return s.as_ref().clone();
            }
        }
        // fall back to the static message on any evaluation problem
    }
    if !rule.rule.message.is_empty() {
        return rule.rule.message.clone();
    }
    format!("failed rule: {}", rule.rule.rule)
}

fn anchor(node_path: &Path, field_path: &str) -> Path {
    let mut path = node_path.clone();
    for segment in field_path.trim_start_matches('.').split('.') {
        if !segment.is_empty() {
            path = path.child(segment);
        }
    }
    path
}

fn json_to_cel(value: &Value) -> CelValue {
    match value {
        Value::Null => CelValue::Null,
        Value::Bool(b) => CelValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CelValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                CelValue::UInt(u)
            } else {
                CelValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => CelValue::String(Arc::new(s.clone())),
        Value::Array(items) => CelValue::List(Arc::new(items.iter().map(json_to_cel).collect())),
        Value::Object(map) => {
            let entries: HashMap<String, CelValue> = map
                .iter()
                .map(|(k, v)| (k.clone(), json_to_cel(v)))
                .collect();
            CelValue::Map(entries.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiextensions::JSONSchemaProps;
    use serde_json::json;

    const CEILING: u64 = 3 * 1024 * 1024;

    fn schema(doc: serde_json::Value) -> Structural {
        let props: JSONSchemaProps = serde_json::from_value(doc).unwrap();
        let (s, violations) = Structural::from_props(&props);
        assert!(violations.is_empty(), "{}", violations);
        s
    }

    fn replicas_schema(rule: serde_json::Value) -> Structural {
        schema(json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "properties": {
                        "replicas": {"type": "integer", "x-kubernetes-validations": [rule]}
                    }
                }
            }
        }))
    }

    #[test]
    fn test_create_rule_failure_uses_static_message() {
        let s = replicas_schema(json!({
            "rule": "self >= 0",
            "message": "replicas must be non-negative"
        }));
        let rules = compile_rules(&s, CEILING);
        assert!(rules.compile_errors.is_empty(), "{:?}", rules.compile_errors);

        let errs = validate_expressions(&json!({"spec": {"replicas": -1}}), None, &s, &rules);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs.errors[0].field, "spec.replicas");
        assert!(errs.errors[0].detail.contains("replicas must be non-negative"));

        let ok = validate_expressions(&json!({"spec": {"replicas": 2}}), None, &s, &rules);
        assert!(ok.is_empty(), "{}", ok);
    }

    #[test]
    fn test_transition_rule_skipped_on_create_without_optional_old_self() {
        let s = replicas_schema(json!({
            "rule": "self >= oldSelf",
            "message": "replicas cannot decrease"
        }));
        let rules = compile_rules(&s, CEILING);
        let errs = validate_expressions(&json!({"spec": {"replicas": 0}}), None, &s, &rules);
        assert!(errs.is_empty(), "{}", errs);
    }

    #[test]
    fn test_optional_old_self_transition_rule() {
        let s = replicas_schema(json!({
            "rule": "!has(oldSelf) || self >= oldSelf",
            "optionalOldSelf": true,
            "message": "replicas cannot decrease"
        }));
        let rules = compile_rules(&s, CEILING);
        assert!(rules.compile_errors.is_empty(), "{:?}", rules.compile_errors);

        // create path evaluates with oldSelf absent
        let errs = validate_expressions(&json!({"spec": {"replicas": 1}}), None, &s, &rules);
        assert!(errs.is_empty(), "{}", errs);

        // update that grows passes
        let errs = validate_expressions(
            &json!({"spec": {"replicas": 4}}),
            Some(&json!({"spec": {"replicas": 3}})),
            &s,
            &rules,
        );
        assert!(errs.is_empty(), "{}", errs);

        // update that shrinks fails with the configured message
        let errs = validate_expressions(
            &json!({"spec": {"replicas": 2}}),
            Some(&json!({"spec": {"replicas": 3}})),
            &s,
            &rules,
        );
        assert_eq!(errs.len(), 1);
        assert_eq!(errs.errors[0].field, "spec.replicas");
        assert!(errs.errors[0].detail.contains("replicas cannot decrease"));
    }

    #[test]
    fn test_message_expression_wins_over_static() {
        let s = replicas_schema(json!({
            "rule": "self >= 0",
            "message": "static",
            "messageExpression": "'replicas was ' + string(self)"
        }));
        let rules = compile_rules(&s, CEILING);
        let errs = validate_expressions(&json!({"spec": {"replicas": -3}}), None, &s, &rules);
        assert_eq!(errs.len(), 1);
        assert!(
            errs.errors[0].detail.contains("replicas was -3"),
            "{}",
            errs.errors[0].detail
        );
    }

    #[test]
    fn test_compile_error_is_reported_not_fatal() {
        let s = replicas_schema(json!({"rule": "self >>>= bogus"}));
        let rules = compile_rules(&s, CEILING);
        assert_eq!(rules.compile_errors.len(), 1);
        assert!(!rules.has_rules());
        // evaluation with a broken ruleset is a no-op
        let errs = validate_expressions(&json!({"spec": {"replicas": 1}}), None, &s, &rules);
        assert!(errs.is_empty());
    }

    #[test]
    fn test_estimated_cost_rejects_unbounded_rule() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {"type": "string"},
                    "x-kubernetes-validations": [
                        {"rule": "self.all(x, x != '')"}
                    ]
                }
            }
        }));
        let rules = compile_rules(&s, CEILING);
        assert_eq!(rules.compile_errors.len(), 1);
        assert!(rules.compile_errors[0].contains("cost budget"));
    }

    #[test]
    fn test_rule_anchored_at_field_path() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "properties": {"replicas": {"type": "integer"}},
                    "x-kubernetes-validations": [
                        {"rule": "self.replicas <= 10", "fieldPath": ".replicas", "message": "too many"}
                    ]
                }
            }
        }));
        let rules = compile_rules(&s, CEILING);
        let errs = validate_expressions(&json!({"spec": {"replicas": 11}}), None, &s, &rules);
        assert_eq!(errs.errors[0].field, "spec.replicas");
    }

    #[test]
    fn test_runtime_cost_budget_enforced() {
        // compile-time estimate is small (maxItems and maxLength declared),
        // but the actual instance blows past the declared bounds; the
        // runtime meter catches it
        let s = schema(json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "maxItems": 10000,
                    "items": {
                        "type": "string",
                        "maxLength": 8,
                        "x-kubernetes-validations": [{"rule": "self != 'forbidden'"}]
                    }
                }
            }
        }));
        let rules = compile_rules(&s, CEILING);
        assert!(rules.compile_errors.is_empty(), "{:?}", rules.compile_errors);

        let big_string = "x".repeat(4000);
        let items: Vec<String> = (0..5000).map(|_| big_string.clone()).collect();
        let errs = validate_expressions(&json!({"items": items}), None, &s, &rules);
        assert!(
            errs.errors
                .iter()
                .any(|e| e.detail.contains(RULE_COST_EXCEEDED_REASON)),
            "{}",
            errs
        );
        // the meter reports once per rule, not once per item
        assert_eq!(
            errs.errors
                .iter()
                .filter(|e| e.detail.contains(RULE_COST_EXCEEDED_REASON))
                .count(),
            1
        );
    }

    #[test]
    fn test_map_list_old_self_correlated_by_keys() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "ports": {
                    "type": "array",
                    "x-kubernetes-list-type": "map",
                    "x-kubernetes-list-map-keys": ["name"],
                    "maxItems": 32,
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string", "maxLength": 63},
                            "port": {"type": "integer"}
                        },
                        "x-kubernetes-validations": [
                            {"rule": "self.port >= oldSelf.port", "message": "port cannot decrease"}
                        ]
                    }
                }
            }
        }));
        let rules = compile_rules(&s, CEILING);
        assert!(rules.compile_errors.is_empty(), "{:?}", rules.compile_errors);

        // old list has the items in a different order; correlation is by name
        let old = json!({"ports": [
            {"name": "b", "port": 9},
            {"name": "a", "port": 1}
        ]});
        let new = json!({"ports": [
            {"name": "a", "port": 2},
            {"name": "b", "port": 8}
        ]});
        let errs = validate_expressions(&new, Some(&old), &s, &rules);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs.errors[0].field, "ports[1]");
    }
}
