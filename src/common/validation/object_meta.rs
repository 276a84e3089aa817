//! ObjectMeta validation.
//!
//! Ported from k8s.io/apimachinery/pkg/api/validation/objectmeta.go

use super::dns::{is_dns1123_label, is_dns1123_subdomain};
use super::errors::{BadValue, ErrorList, forbidden, invalid, required};
use super::labels::{validate_annotations, validate_labels};
use super::path::Path;
use crate::common::ObjectMeta;

const IS_NEGATIVE_ERROR_MSG: &str = "must be greater than or equal to 0";

/// Validates that a name conforms to some naming convention; `prefix` is true
/// when the name will be extended by the server (generateName).
pub type ValidateNameFunc = fn(name: &str, prefix: bool) -> Vec<String>;

/// Name validator for resources whose names are DNS subdomains.
pub fn name_is_dns_subdomain(name: &str, prefix: bool) -> Vec<String> {
    let value = if prefix {
        mask_trailing_dash(name)
    } else {
        name.to_string()
    };
    is_dns1123_subdomain(&value)
}

/// Name validator for resources whose names are DNS labels.
pub fn name_is_dns_label(name: &str, prefix: bool) -> Vec<String> {
    let value = if prefix {
        mask_trailing_dash(name)
    } else {
        name.to_string()
    };
    is_dns1123_label(&value)
}

/// Validates an ObjectMeta on create.
pub fn validate_object_meta(
    meta: &ObjectMeta,
    requires_namespace: bool,
    name_fn: ValidateNameFunc,
    fld_path: &Path,
) -> ErrorList {
    let mut all_errs = ErrorList::new();

    if let Some(generate_name) = meta.generate_name.as_deref() {
        if !generate_name.is_empty() {
            for msg in name_fn(generate_name, true) {
                all_errs.push(invalid(
                    &fld_path.child("generateName"),
                    BadValue::String(generate_name.to_string()),
                    &msg,
                ));
            }
        }
    }

    let name = meta.name.as_deref().unwrap_or("");
    if name.is_empty() {
        if meta.generate_name.as_deref().unwrap_or("").is_empty() {
            all_errs.push(required(
                &fld_path.child("name"),
                "name or generateName is required",
            ));
        }
    } else {
        for msg in name_fn(name, false) {
            all_errs.push(invalid(
                &fld_path.child("name"),
                BadValue::String(name.to_string()),
                &msg,
            ));
        }
    }

    if requires_namespace {
        let namespace = meta.namespace.as_deref().unwrap_or("");
        if namespace.is_empty() {
            all_errs.push(required(&fld_path.child("namespace"), ""));
        } else {
            for msg in is_dns1123_label(namespace) {
                all_errs.push(invalid(
                    &fld_path.child("namespace"),
                    BadValue::String(namespace.to_string()),
                    &msg,
                ));
            }
        }
    } else if let Some(namespace) = meta.namespace.as_deref() {
        if !namespace.is_empty() {
            all_errs.push(forbidden(
                &fld_path.child("namespace"),
                "not allowed on this type",
            ));
        }
    }

    if let Some(generation) = meta.generation {
        if generation < 0 {
            all_errs.push(invalid(
                &fld_path.child("generation"),
                BadValue::Int(generation),
                IS_NEGATIVE_ERROR_MSG,
            ));
        }
    }

    for (i, finalizer) in meta.finalizers.iter().enumerate() {
        for msg in super::labels::is_qualified_name(finalizer) {
            all_errs.push(invalid(
                &fld_path.child("finalizers").index(i),
                BadValue::String(finalizer.clone()),
                &msg,
            ));
        }
    }

    all_errs.extend(validate_labels(&meta.labels, &fld_path.child("labels")));
    all_errs.extend(validate_annotations(
        &meta.annotations,
        &fld_path.child("annotations"),
    ));

    all_errs
}

/// Validates an ObjectMeta update: identity fields are immutable.
pub fn validate_object_meta_update(
    new_meta: &ObjectMeta,
    old_meta: &ObjectMeta,
    fld_path: &Path,
) -> ErrorList {
    let mut all_errs = ErrorList::new();

    if new_meta.name() != old_meta.name() {
        all_errs.push(invalid(
            &fld_path.child("name"),
            BadValue::String(new_meta.name().to_string()),
            "field is immutable",
        ));
    }
    if new_meta.namespace() != old_meta.namespace() {
        all_errs.push(invalid(
            &fld_path.child("namespace"),
            BadValue::String(new_meta.namespace().to_string()),
            "field is immutable",
        ));
    }
    if !new_meta.uid().is_empty() && new_meta.uid() != old_meta.uid() {
        all_errs.push(invalid(
            &fld_path.child("uid"),
            BadValue::String(new_meta.uid().to_string()),
            "field is immutable",
        ));
    }
    if new_meta.creation_timestamp != old_meta.creation_timestamp
        && new_meta.creation_timestamp.is_some()
    {
        all_errs.push(invalid(
            &fld_path.child("creationTimestamp"),
            BadValue::String(
                new_meta
                    .creation_timestamp
                    .as_ref()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            ),
            "field is immutable",
        ));
    }

    all_errs.extend(validate_labels(&new_meta.labels, &fld_path.child("labels")));
    all_errs.extend(validate_annotations(
        &new_meta.annotations,
        &fld_path.child("annotations"),
    ));

    all_errs
}

fn mask_trailing_dash(name: &str) -> String {
    if name.len() > 1 && name.ends_with('-') {
        format!("{}a", &name[..name.len() - 1])
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_object_meta_name() {
        let errs = validate_object_meta(
            &named("good-name"),
            false,
            name_is_dns_subdomain,
            &Path::new("metadata"),
        );
        assert!(errs.is_empty(), "{}", errs);

        let errs = validate_object_meta(
            &named("Bad_Name"),
            false,
            name_is_dns_subdomain,
            &Path::new("metadata"),
        );
        assert!(!errs.is_empty());
    }

    #[test]
    fn test_generate_name_only() {
        let meta = ObjectMeta {
            generate_name: Some("widget-".to_string()),
            ..Default::default()
        };
        let errs =
            validate_object_meta(&meta, false, name_is_dns_subdomain, &Path::new("metadata"));
        assert!(errs.is_empty(), "{}", errs);
    }

    #[test]
    fn test_namespace_forbidden_on_cluster_scoped() {
        let mut meta = named("a");
        meta.namespace = Some("default".to_string());
        let errs =
            validate_object_meta(&meta, false, name_is_dns_subdomain, &Path::new("metadata"));
        assert_eq!(errs.len(), 1);
        assert!(errs.errors[0].field.ends_with("namespace"));
    }

    #[test]
    fn test_update_immutable_name() {
        let errs =
            validate_object_meta_update(&named("new"), &named("old"), &Path::new("metadata"));
        assert!(!errs.is_empty());
    }
}
