//! DNS name validation utility functions.
//!
//! Ported from k8s.io/apimachinery/pkg/util/validation/validation.go

use regex::Regex;
use std::sync::OnceLock;

static DNS1123_LABEL_RE: OnceLock<Regex> = OnceLock::new();
static DNS1123_SUBDOMAIN_RE: OnceLock<Regex> = OnceLock::new();
static DNS1035_LABEL_RE: OnceLock<Regex> = OnceLock::new();

const DNS1123_LABEL_MAX_LEN: usize = 63;
const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;
const DNS1035_LABEL_MAX_LEN: usize = 63;

/// Error message for invalid DNS1123 labels.
pub const DNS1123_LABEL_ERROR_MSG: &str = "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character";

/// Error message for invalid DNS1123 subdomains.
pub const DNS1123_SUBDOMAIN_ERROR_MSG: &str = "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character";

/// Error message for invalid DNS1035 labels.
pub const DNS1035_LABEL_ERROR_MSG: &str = "a DNS-1035 label must consist of lower case alphanumeric characters or '-', start with an alphabetic character, and end with an alphanumeric character";

/// Tests for a string that conforms to the definition of a label in DNS (RFC 1123).
pub fn is_dns1123_label(value: &str) -> Vec<String> {
    let mut errs = Vec::new();

    if value.len() > DNS1123_LABEL_MAX_LEN {
        errs.push(format!(
            "must be no more than {} characters",
            DNS1123_LABEL_MAX_LEN
        ));
    }

    let re =
        DNS1123_LABEL_RE.get_or_init(|| Regex::new("^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());
    if !re.is_match(value) {
        errs.push(format!(
            "{} (e.g. 'my-name' or '123-abc')",
            DNS1123_LABEL_ERROR_MSG
        ));
    }

    errs
}

/// Tests for a string that conforms to the definition of a subdomain in DNS (RFC 1123).
pub fn is_dns1123_subdomain(value: &str) -> Vec<String> {
    let mut errs = Vec::new();

    if value.len() > DNS1123_SUBDOMAIN_MAX_LEN {
        errs.push(format!(
            "must be no more than {} characters",
            DNS1123_SUBDOMAIN_MAX_LEN
        ));
    }

    let re = DNS1123_SUBDOMAIN_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
    });
    if !re.is_match(value) {
        errs.push(format!(
            "{} (e.g. 'example.com')",
            DNS1123_SUBDOMAIN_ERROR_MSG
        ));
    }

    errs
}

/// Tests for a string that conforms to the definition of a label in DNS (RFC 1035).
pub fn is_dns1035_label(value: &str) -> Vec<String> {
    let mut errs = Vec::new();

    if value.len() > DNS1035_LABEL_MAX_LEN {
        errs.push(format!(
            "must be no more than {} characters",
            DNS1035_LABEL_MAX_LEN
        ));
    }

    let re =
        DNS1035_LABEL_RE.get_or_init(|| Regex::new("^[a-z]([-a-z0-9]*[a-z0-9])?$").unwrap());
    if !re.is_match(value) {
        errs.push(format!(
            "{} (e.g. 'my-name' or 'abc-123')",
            DNS1035_LABEL_ERROR_MSG
        ));
    }

    errs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns1123_label() {
        assert!(is_dns1123_label("my-name").is_empty());
        assert!(is_dns1123_label("abc-123").is_empty());
        assert!(!is_dns1123_label("My-Name").is_empty());
        assert!(!is_dns1123_label("my.name").is_empty());
        assert!(!is_dns1123_label("-leading").is_empty());
        assert!(!is_dns1123_label(&"a".repeat(64)).is_empty());
    }

    #[test]
    fn test_dns1123_subdomain() {
        assert!(is_dns1123_subdomain("example.com").is_empty());
        assert!(is_dns1123_subdomain("my-service.example.com").is_empty());
        assert!(!is_dns1123_subdomain("Example.com").is_empty());
        assert!(!is_dns1123_subdomain("my_service").is_empty());
        assert!(!is_dns1123_subdomain(&"a.".repeat(200)).is_empty());
    }

    #[test]
    fn test_dns1035_label() {
        assert!(is_dns1035_label("my-name").is_empty());
        assert!(!is_dns1035_label("1st-name").is_empty());
        assert!(!is_dns1035_label("trailing-").is_empty());
    }
}
