//! Label and annotation key/value validation.
//!
//! Ported from k8s.io/apimachinery/pkg/util/validation/validation.go and
//! k8s.io/apimachinery/pkg/apis/meta/v1/validation/validation.go

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::dns::is_dns1123_subdomain;
use super::errors::{BadValue, ErrorList, invalid, too_long};
use super::path::Path;

const QUALIFIED_NAME_FMT: &str = "([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]";
const QUALIFIED_NAME_ERR_MSG: &str = "must consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character";
const QUALIFIED_NAME_MAX_LENGTH: usize = 63;

const LABEL_VALUE_ERR_MSG: &str = "a valid label must be an empty string or consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character";
const LABEL_VALUE_MAX_LENGTH: usize = 63;

/// Total size limit for all annotations on one object, in bytes.
pub const TOTAL_ANNOTATION_SIZE_LIMIT: usize = 256 * 1024;

static QUALIFIED_NAME_RE: OnceLock<Regex> = OnceLock::new();
static LABEL_VALUE_RE: OnceLock<Regex> = OnceLock::new();

/// Tests whether the value passed is a qualified name: an optional DNS
/// subdomain prefix, '/', and a name part.
pub fn is_qualified_name(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    let parts: Vec<&str> = value.split('/').collect();
    let name = match parts.len() {
        1 => parts[0],
        2 => {
            let prefix = parts[0];
            if prefix.is_empty() {
                errs.push("prefix part must be non-empty".to_string());
            } else {
                for msg in is_dns1123_subdomain(prefix) {
                    errs.push(format!("prefix part {}", msg));
                }
            }
            parts[1]
        }
        _ => {
            errs.push(format!(
                "a qualified name {} with an optional DNS subdomain prefix and '/' (e.g. 'example.com/MyName')",
                QUALIFIED_NAME_ERR_MSG
            ));
            return errs;
        }
    };

    if name.is_empty() {
        errs.push("name part must be non-empty".to_string());
    } else if name.len() > QUALIFIED_NAME_MAX_LENGTH {
        errs.push(format!(
            "name part must be no more than {} characters",
            QUALIFIED_NAME_MAX_LENGTH
        ));
    }

    let re = QUALIFIED_NAME_RE
        .get_or_init(|| Regex::new(&format!("^{}$", QUALIFIED_NAME_FMT)).unwrap());
    if !name.is_empty() && !re.is_match(name) {
        errs.push(format!("name part {}", QUALIFIED_NAME_ERR_MSG));
    }

    errs
}

/// Tests whether the value passed is a valid label value.
pub fn is_valid_label_value(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > LABEL_VALUE_MAX_LENGTH {
        errs.push(format!(
            "must be no more than {} characters",
            LABEL_VALUE_MAX_LENGTH
        ));
    }

    let re = LABEL_VALUE_RE
        .get_or_init(|| Regex::new(&format!("^({})?$", QUALIFIED_NAME_FMT)).unwrap());
    if !re.is_match(value) {
        errs.push(LABEL_VALUE_ERR_MSG.to_string());
    }
    errs
}

/// Validates that a set of labels are correctly defined.
pub fn validate_labels(labels: &BTreeMap<String, String>, fld_path: &Path) -> ErrorList {
    let mut all_errs = ErrorList::new();
    for (key, value) in labels {
        for msg in is_qualified_name(key) {
            all_errs.push(invalid(fld_path, BadValue::String(key.clone()), &msg));
        }
        for msg in is_valid_label_value(value) {
            all_errs.push(invalid(
                &fld_path.key(key),
                BadValue::String(value.clone()),
                &msg,
            ));
        }
    }
    all_errs
}

/// Validates that a set of annotations have valid keys and a bounded total size.
pub fn validate_annotations(annotations: &BTreeMap<String, String>, fld_path: &Path) -> ErrorList {
    let mut all_errs = ErrorList::new();
    let mut total_size = 0usize;
    for (key, value) in annotations {
        for msg in is_qualified_name(&key.to_lowercase()) {
            all_errs.push(invalid(fld_path, BadValue::String(key.clone()), &msg));
        }
        total_size += key.len() + value.len();
    }
    if total_size > TOTAL_ANNOTATION_SIZE_LIMIT {
        all_errs.push(too_long(fld_path, TOTAL_ANNOTATION_SIZE_LIMIT));
    }
    all_errs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        assert!(is_qualified_name("simple").is_empty());
        assert!(is_qualified_name("example.com/MyName").is_empty());
        assert!(!is_qualified_name("/noname").is_empty());
        assert!(!is_qualified_name("a/b/c").is_empty());
        assert!(!is_qualified_name("-bad").is_empty());
    }

    #[test]
    fn test_label_value() {
        assert!(is_valid_label_value("").is_empty());
        assert!(is_valid_label_value("v1.2-rc_3").is_empty());
        assert!(!is_valid_label_value("has space").is_empty());
        assert!(!is_valid_label_value(&"x".repeat(64)).is_empty());
    }

    #[test]
    fn test_validate_labels() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "widget".to_string());
        labels.insert("bad key!".to_string(), "v".to_string());
        let errs = validate_labels(&labels, &Path::new("metadata").child("labels"));
        assert_eq!(errs.len(), 1);
    }
}
