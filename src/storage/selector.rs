//! Label and field selector parsing and matching.
//!
//! Ported from k8s.io/apimachinery/pkg/labels and pkg/fields, covering the
//! grammar the request surface accepts: equality (`=`, `==`, `!=`),
//! set membership (`in`, `notin`) and existence (`key`, `!key`) for labels;
//! equality only for fields.

use std::collections::BTreeMap;

/// One parsed label requirement.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Eq(String, String),
    Neq(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    NotExists(String),
}

/// A parsed label selector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// True when the selector has no requirements and matches everything.
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Evaluates the selector against a label map.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| match req {
            Requirement::Eq(key, value) => labels.get(key) == Some(value),
            Requirement::Neq(key, value) => labels.get(key) != Some(value),
            Requirement::In(key, values) => {
                labels.get(key).map(|v| values.contains(v)).unwrap_or(false)
            }
            Requirement::NotIn(key, values) => {
                labels.get(key).map(|v| !values.contains(v)).unwrap_or(true)
            }
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::NotExists(key) => !labels.contains_key(key),
        })
    }
}

/// Parses a label selector string such as
/// `app=web,tier!=cache,env in (prod,staging),!legacy`.
pub fn parse_label_selector(selector: &str) -> Result<LabelSelector, String> {
    let mut requirements = Vec::new();
    for clause in split_clauses(selector) {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        if let Some((key, values)) = parse_set_clause(clause, " notin ") {
            requirements.push(Requirement::NotIn(key, values?));
        } else if let Some((key, values)) = parse_set_clause(clause, " in ") {
            requirements.push(Requirement::In(key, values?));
        } else if let Some((key, value)) = clause.split_once("!=") {
            requirements.push(Requirement::Neq(key.trim().to_string(), value.trim().to_string()));
        } else if let Some((key, value)) = clause.split_once("==") {
            requirements.push(Requirement::Eq(key.trim().to_string(), value.trim().to_string()));
        } else if let Some((key, value)) = clause.split_once('=') {
            requirements.push(Requirement::Eq(key.trim().to_string(), value.trim().to_string()));
        } else if let Some(key) = clause.strip_prefix('!') {
            requirements.push(Requirement::NotExists(key.trim().to_string()));
        } else {
            requirements.push(Requirement::Exists(clause.to_string()));
        }
    }
    Ok(LabelSelector { requirements })
}

type SetValues = Result<Vec<String>, String>;

fn parse_set_clause(clause: &str, op: &str) -> Option<(String, SetValues)> {
    let (key, rest) = split_once_str(clause, op)?;
    let rest = rest.trim();
    let values = if rest.starts_with('(') && rest.ends_with(')') {
        Ok(rest[1..rest.len() - 1]
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect())
    } else {
        Err(format!("set operator requires parenthesized values: {}", clause))
    };
    Some((key.trim().to_string(), values))
}

fn split_once_str<'a>(s: &'a str, pattern: &str) -> Option<(&'a str, &'a str)> {
    let idx = s.find(pattern)?;
    Some((&s[..idx], &s[idx + pattern.len()..]))
}

/// Splits selector clauses on commas that are not inside parentheses.
fn split_clauses(selector: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                clauses.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    clauses.push(&selector[start..]);
    clauses
}

/// A parsed field selector; equality and inequality over field paths.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<(String, String, bool)>,
}

impl FieldSelector {
    /// True when the selector has no requirements.
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The distinct field paths this selector reads.
    pub fn fields(&self) -> Vec<&str> {
        self.requirements.iter().map(|(k, _, _)| k.as_str()).collect()
    }

    /// Evaluates against a lookup from field path to value.
    pub fn matches(&self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        self.requirements.iter().all(|(key, value, equal)| {
            let actual = lookup(key).unwrap_or_default();
            (&actual == value) == *equal
        })
    }
}

/// Parses a field selector string such as
/// `metadata.name=a,metadata.namespace!=default`.
pub fn parse_field_selector(selector: &str) -> Result<FieldSelector, String> {
    let mut requirements = Vec::new();
    for clause in selector.split(',') {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        if let Some((key, value)) = clause.split_once("!=") {
            requirements.push((key.trim().to_string(), value.trim().to_string(), false));
        } else if let Some((key, value)) = clause.split_once("==") {
            requirements.push((key.trim().to_string(), value.trim().to_string(), true));
        } else if let Some((key, value)) = clause.split_once('=') {
            requirements.push((key.trim().to_string(), value.trim().to_string(), true));
        } else {
            return Err(format!("invalid field selector clause: {}", clause));
        }
    }
    Ok(FieldSelector { requirements })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_equality_selectors() {
        let sel = parse_label_selector("app=web,tier!=cache").unwrap();
        assert!(sel.matches(&labels(&[("app", "web"), ("tier", "frontend")])));
        assert!(!sel.matches(&labels(&[("app", "web"), ("tier", "cache")])));
        assert!(!sel.matches(&labels(&[("tier", "frontend")])));
    }

    #[test]
    fn test_set_selectors() {
        let sel = parse_label_selector("env in (prod, staging)").unwrap();
        assert!(sel.matches(&labels(&[("env", "prod")])));
        assert!(!sel.matches(&labels(&[("env", "dev")])));
        assert!(!sel.matches(&labels(&[])));

        let sel = parse_label_selector("env notin (prod)").unwrap();
        assert!(sel.matches(&labels(&[("env", "dev")])));
        assert!(sel.matches(&labels(&[])));
        assert!(!sel.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn test_existence_selectors() {
        let sel = parse_label_selector("app,!legacy").unwrap();
        assert!(sel.matches(&labels(&[("app", "x")])));
        assert!(!sel.matches(&labels(&[("app", "x"), ("legacy", "true")])));
        assert!(!sel.matches(&labels(&[])));
    }

    #[test]
    fn test_empty_selector_matches_all() {
        let sel = parse_label_selector("").unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&labels(&[("anything", "goes")])));
    }

    #[test]
    fn test_field_selector() {
        let sel = parse_field_selector("metadata.name=a,metadata.namespace!=kube-system").unwrap();
        let obj_a = |key: &str| match key {
            "metadata.name" => Some("a".to_string()),
            "metadata.namespace" => Some("default".to_string()),
            _ => None,
        };
        assert!(sel.matches(obj_a));
        let obj_b = |key: &str| match key {
            "metadata.name" => Some("a".to_string()),
            "metadata.namespace" => Some("kube-system".to_string()),
            _ => None,
        };
        assert!(!sel.matches(obj_b));
        assert!(parse_field_selector("garbage").is_err());
    }
}
