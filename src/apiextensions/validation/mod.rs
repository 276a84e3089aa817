//! Validation for apiextensions API types.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apis/apiextensions/validation/validation.go
//!
//! This is the admin-surface validation of CRD objects themselves; instances
//! of the declared types are validated elsewhere against their structural
//! schemas.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::apiextensions::internal;
use crate::common::validation::{
    BadValue, ErrorList, Path, forbidden, invalid, is_dns1035_label, is_dns1123_label,
    is_dns1123_subdomain, required, validate_object_meta, validate_object_meta_update,
};

/// Maximum number of selectable fields per version.
pub const MAX_SELECTABLE_FIELDS: usize = 8;

/// Review versions of the ConversionReview envelope this server can emit.
pub const SUPPORTED_CONVERSION_REVIEW_VERSIONS: &[&str] = &["v1"];

static KIND_RE: OnceLock<Regex> = OnceLock::new();

fn is_kind_format(value: &str) -> bool {
    KIND_RE
        .get_or_init(|| Regex::new("^[A-Z][A-Za-z0-9]*$").unwrap())
        .is_match(value)
}

// ============================================================================
// Public validation entry points
// ============================================================================

/// Validates a CustomResourceDefinition on create.
pub fn validate_custom_resource_definition(obj: &internal::CustomResourceDefinition) -> ErrorList {
    let mut all_errs = validate_object_meta(
        &obj.metadata,
        false,
        crate::common::validation::name_is_dns_subdomain,
        &Path::new("metadata"),
    );

    // name must be <plural>.<group>
    if let Some(name) = obj.metadata.name.as_ref() {
        let required_name = format!("{}.{}", obj.spec.names.plural, obj.spec.group);
        if name != &required_name {
            all_errs.push(invalid(
                &Path::new("metadata").child("name"),
                BadValue::String(name.clone()),
                "must be spec.names.plural + '.' + spec.group",
            ));
        }
    }

    all_errs.extend(validate_custom_resource_definition_spec(
        &obj.spec,
        &Path::new("spec"),
    ));
    all_errs.extend(validate_custom_resource_definition_status(
        &obj.status,
        &Path::new("status"),
    ));
    all_errs.extend(validate_stored_versions(
        &obj.status.stored_versions,
        &obj.spec.versions,
        &Path::new("status").child("storedVersions"),
    ));

    all_errs
}

/// Validates a CustomResourceDefinition update against the existing object.
pub fn validate_custom_resource_definition_update(
    obj: &internal::CustomResourceDefinition,
    old: &internal::CustomResourceDefinition,
) -> ErrorList {
    let mut all_errs =
        validate_object_meta_update(&obj.metadata, &old.metadata, &Path::new("metadata"));

    if obj.spec.names.plural != old.spec.names.plural {
        all_errs.push(invalid(
            &Path::new("spec").child("names").child("plural"),
            BadValue::String(obj.spec.names.plural.clone()),
            "field is immutable",
        ));
    }
    if obj.spec.group != old.spec.group {
        all_errs.push(invalid(
            &Path::new("spec").child("group"),
            BadValue::String(obj.spec.group.clone()),
            "field is immutable",
        ));
    }
    if obj.spec.scope != old.spec.scope {
        all_errs.push(invalid(
            &Path::new("spec").child("scope"),
            BadValue::String(format!("{:?}", obj.spec.scope)),
            "field is immutable",
        ));
    }

    // a version still recorded in storedVersions cannot be dropped from spec
    for stored in &old.status.stored_versions {
        if !obj.spec.versions.iter().any(|v| &v.name == stored) {
            all_errs.push(invalid(
                &Path::new("spec").child("versions"),
                BadValue::String(stored.clone()),
                "must have exactly one version marked as storage version; a version cannot be removed while it is listed in status.storedVersions",
            ));
        }
    }

    all_errs.extend(validate_custom_resource_definition_spec(
        &obj.spec,
        &Path::new("spec"),
    ));
    all_errs.extend(validate_custom_resource_definition_status(
        &obj.status,
        &Path::new("status"),
    ));
    all_errs
}

/// Validates a status-subresource update: only status may change, and the
/// stored versions must stay consistent with spec.
pub fn validate_custom_resource_definition_status_update(
    obj: &internal::CustomResourceDefinition,
    old: &internal::CustomResourceDefinition,
) -> ErrorList {
    let mut all_errs =
        validate_object_meta_update(&obj.metadata, &old.metadata, &Path::new("metadata"));
    all_errs.extend(validate_custom_resource_definition_status(
        &obj.status,
        &Path::new("status"),
    ));
    all_errs.extend(validate_stored_versions(
        &obj.status.stored_versions,
        &obj.spec.versions,
        &Path::new("status").child("storedVersions"),
    ));
    all_errs
}

// ============================================================================
// Spec validation
// ============================================================================

/// Validates CustomResourceDefinitionSpec.
pub fn validate_custom_resource_definition_spec(
    spec: &internal::CustomResourceDefinitionSpec,
    fld_path: &Path,
) -> ErrorList {
    let mut all_errs = ErrorList::new();

    if spec.group.is_empty() {
        all_errs.push(required(&fld_path.child("group"), ""));
    } else {
        for msg in is_dns1123_subdomain(&spec.group) {
            all_errs.push(invalid(
                &fld_path.child("group"),
                BadValue::String(spec.group.clone()),
                &msg,
            ));
        }
        if spec.group.split('.').count() < 2 {
            all_errs.push(invalid(
                &fld_path.child("group"),
                BadValue::String(spec.group.clone()),
                "should be a domain with at least one dot",
            ));
        }
    }

    all_errs.extend(validate_names(&spec.names, &fld_path.child("names")));

    if spec.versions.is_empty() {
        all_errs.push(required(&fld_path.child("versions"), ""));
    }

    let mut seen = BTreeSet::new();
    let mut storage_count = 0;
    let mut served_count = 0;
    let mut storage_served = true;
    for (i, version) in spec.versions.iter().enumerate() {
        let version_path = fld_path.child("versions").index(i);
        if version.name.is_empty() {
            all_errs.push(required(&version_path.child("name"), ""));
        } else {
            for msg in is_dns1035_label(&version.name) {
                all_errs.push(invalid(
                    &version_path.child("name"),
                    BadValue::String(version.name.clone()),
                    &msg,
                ));
            }
            if !seen.insert(version.name.clone()) {
                all_errs.push(invalid(
                    &version_path.child("name"),
                    BadValue::String(version.name.clone()),
                    "must be unique",
                ));
            }
        }

        if version.storage {
            storage_count += 1;
            storage_served = version.served;
        }
        if version.served {
            served_count += 1;
        }

        if let Some(subresources) = version.subresources.as_ref() {
            all_errs.extend(validate_subresources(
                subresources,
                &version_path.child("subresources"),
            ));
        }

        if version.selectable_fields.len() > MAX_SELECTABLE_FIELDS {
            all_errs.push(too_many_selectable_fields(
                &version_path.child("selectableFields"),
                version.selectable_fields.len(),
            ));
        }
        for (j, field) in version.selectable_fields.iter().enumerate() {
            if !field.json_path.starts_with('.') {
                all_errs.push(invalid(
                    &version_path.child("selectableFields").index(j).child("jsonPath"),
                    BadValue::String(field.json_path.clone()),
                    "must be a simple JSON path starting with '.'",
                ));
            }
        }
    }

    if storage_count != 1 {
        all_errs.push(invalid(
            &fld_path.child("versions"),
            BadValue::Int(storage_count),
            "must have exactly one version marked as storage version",
        ));
    } else if !storage_served {
        all_errs.push(invalid(
            &fld_path.child("versions"),
            BadValue::String("storage".to_string()),
            "the storage version must be served",
        ));
    }
    if !spec.versions.is_empty() && served_count == 0 {
        all_errs.push(invalid(
            &fld_path.child("versions"),
            BadValue::Int(served_count),
            "must have at least one version marked as served",
        ));
    }

    if let Some(conversion) = spec.conversion.as_ref() {
        all_errs.extend(validate_conversion(conversion, &fld_path.child("conversion")));
    }

    if spec.preserve_unknown_fields == Some(true) {
        // v1 objects may only carry the false value; pruning opt-out lives in
        // per-node x-kubernetes-preserve-unknown-fields
        all_errs.push(invalid(
            &fld_path.child("preserveUnknownFields"),
            BadValue::Bool(true),
            "cannot be set to true; use x-kubernetes-preserve-unknown-fields in the schema instead",
        ));
    }

    all_errs
}

fn too_many_selectable_fields(path: &Path, actual: usize) -> crate::common::validation::Error {
    invalid(
        path,
        BadValue::Int(actual as i64),
        &format!("must not exceed {} selectable fields", MAX_SELECTABLE_FIELDS),
    )
}

/// Validates CustomResourceDefinitionNames.
pub fn validate_names(
    names: &internal::CustomResourceDefinitionNames,
    fld_path: &Path,
) -> ErrorList {
    let mut all_errs = ErrorList::new();

    if names.plural.is_empty() {
        all_errs.push(required(&fld_path.child("plural"), ""));
    } else {
        for msg in is_dns1123_label(&names.plural) {
            all_errs.push(invalid(
                &fld_path.child("plural"),
                BadValue::String(names.plural.clone()),
                &msg,
            ));
        }
    }

    if !names.singular.is_empty() {
        for msg in is_dns1123_label(&names.singular) {
            all_errs.push(invalid(
                &fld_path.child("singular"),
                BadValue::String(names.singular.clone()),
                &msg,
            ));
        }
    }

    if names.kind.is_empty() {
        all_errs.push(required(&fld_path.child("kind"), ""));
    } else if !is_kind_format(&names.kind) {
        all_errs.push(invalid(
            &fld_path.child("kind"),
            BadValue::String(names.kind.clone()),
            "must begin with an uppercase character and contain only alphanumeric characters",
        ));
    }

    if !names.list_kind.is_empty() && !is_kind_format(&names.list_kind) {
        all_errs.push(invalid(
            &fld_path.child("listKind"),
            BadValue::String(names.list_kind.clone()),
            "must begin with an uppercase character and contain only alphanumeric characters",
        ));
    }
    if !names.list_kind.is_empty() && names.list_kind == names.kind {
        all_errs.push(invalid(
            &fld_path.child("listKind"),
            BadValue::String(names.list_kind.clone()),
            "kind and listKind may not be the same",
        ));
    }

    for (i, short_name) in names.short_names.iter().enumerate() {
        for msg in is_dns1123_label(short_name) {
            all_errs.push(invalid(
                &fld_path.child("shortNames").index(i),
                BadValue::String(short_name.clone()),
                &msg,
            ));
        }
    }

    all_errs
}

/// Validates the subresource declarations of one version.
pub fn validate_subresources(
    subresources: &internal::CustomResourceSubresources,
    fld_path: &Path,
) -> ErrorList {
    let mut all_errs = ErrorList::new();
    if let Some(scale) = subresources.scale.as_ref() {
        let scale_path = fld_path.child("scale");
        if scale.spec_replicas_path.is_empty() {
            all_errs.push(required(&scale_path.child("specReplicasPath"), ""));
        } else if !scale.spec_replicas_path.starts_with('.') {
            all_errs.push(invalid(
                &scale_path.child("specReplicasPath"),
                BadValue::String(scale.spec_replicas_path.clone()),
                "should be a json path under .spec",
            ));
        }
        if scale.status_replicas_path.is_empty() {
            all_errs.push(required(&scale_path.child("statusReplicasPath"), ""));
        } else if !scale.status_replicas_path.starts_with('.') {
            all_errs.push(invalid(
                &scale_path.child("statusReplicasPath"),
                BadValue::String(scale.status_replicas_path.clone()),
                "should be a json path under .status",
            ));
        }
        if let Some(selector_path) = scale.label_selector_path.as_ref() {
            if !selector_path.starts_with('.') {
                all_errs.push(invalid(
                    &scale_path.child("labelSelectorPath"),
                    BadValue::String(selector_path.clone()),
                    "should be a json path under .status",
                ));
            }
        }
    }
    all_errs
}

/// Validates conversion settings.
pub fn validate_conversion(
    conversion: &internal::CustomResourceConversion,
    fld_path: &Path,
) -> ErrorList {
    let mut all_errs = ErrorList::new();

    match conversion.strategy {
        internal::ConversionStrategyType::None => {
            if conversion.webhook_client_config.is_some() {
                all_errs.push(forbidden(
                    &fld_path.child("webhookClientConfig"),
                    "may only be specified when strategy is set to Webhook",
                ));
            }
            if !conversion.conversion_review_versions.is_empty() {
                all_errs.push(forbidden(
                    &fld_path.child("conversionReviewVersions"),
                    "may only be specified when strategy is set to Webhook",
                ));
            }
        }
        internal::ConversionStrategyType::Webhook => {
            match conversion.webhook_client_config.as_ref() {
                None => all_errs.push(required(
                    &fld_path.child("webhookClientConfig"),
                    "required when strategy is set to Webhook",
                )),
                Some(config) => {
                    all_errs.extend(validate_webhook_client_config(
                        config,
                        &fld_path.child("webhookClientConfig"),
                    ));
                }
            }

            if conversion.conversion_review_versions.is_empty() {
                all_errs.push(required(
                    &fld_path.child("conversionReviewVersions"),
                    "required when strategy is set to Webhook",
                ));
            } else {
                let mut seen = BTreeSet::new();
                let mut any_supported = false;
                for (i, v) in conversion.conversion_review_versions.iter().enumerate() {
                    if !seen.insert(v.clone()) {
                        all_errs.push(invalid(
                            &fld_path.child("conversionReviewVersions").index(i),
                            BadValue::String(v.clone()),
                            "duplicate version",
                        ));
                    }
                    if SUPPORTED_CONVERSION_REVIEW_VERSIONS.contains(&v.as_str()) {
                        any_supported = true;
                    }
                }
                if !any_supported {
                    all_errs.push(invalid(
                        &fld_path.child("conversionReviewVersions"),
                        BadValue::Json(
                            serde_json::to_string(&conversion.conversion_review_versions)
                                .unwrap_or_default(),
                        ),
                        "must include at least one of v1",
                    ));
                }
            }
        }
    }

    all_errs
}

fn validate_webhook_client_config(
    config: &internal::WebhookClientConfig,
    fld_path: &Path,
) -> ErrorList {
    let mut all_errs = ErrorList::new();

    match (&config.url, &config.service) {
        (None, None) => all_errs.push(required(fld_path, "exactly one of url or service is required")),
        (Some(_), Some(_)) => all_errs.push(forbidden(
            fld_path,
            "may not specify both url and service",
        )),
        (Some(url), None) => {
            if !url.starts_with("https://") {
                all_errs.push(invalid(
                    &fld_path.child("url"),
                    BadValue::String(url.clone()),
                    "'https' is the only allowed URL scheme",
                ));
            }
        }
        (None, Some(service)) => {
            let service_path = fld_path.child("service");
            if service.name.is_empty() {
                all_errs.push(required(&service_path.child("name"), ""));
            }
            if service.namespace.is_empty() {
                all_errs.push(required(&service_path.child("namespace"), ""));
            } else {
                for msg in is_dns1123_label(&service.namespace) {
                    all_errs.push(invalid(
                        &service_path.child("namespace"),
                        BadValue::String(service.namespace.clone()),
                        &msg,
                    ));
                }
            }
            if let Some(port) = service.port {
                if !(1..=65535).contains(&port) {
                    all_errs.push(invalid(
                        &service_path.child("port"),
                        BadValue::Int(port as i64),
                        "port is not valid",
                    ));
                }
            }
        }
    }

    if !config.ca_bundle.is_empty() {
        let pem = String::from_utf8_lossy(&config.ca_bundle.0);
        if !pem.contains("-----BEGIN") {
            all_errs.push(invalid(
                &fld_path.child("caBundle"),
                BadValue::String("<bytes>".to_string()),
                "must be a valid PEM encoded certificate bundle",
            ));
        }
    }

    all_errs
}

// ============================================================================
// Status validation
// ============================================================================

/// Validates CustomResourceDefinitionStatus.
pub fn validate_custom_resource_definition_status(
    status: &internal::CustomResourceDefinitionStatus,
    fld_path: &Path,
) -> ErrorList {
    let mut all_errs = ErrorList::new();
    // acceptedNames may legitimately be empty before the naming controller
    // runs; validate shape only when set.
    if !status.accepted_names.plural.is_empty() {
        all_errs.extend(validate_names(
            &status.accepted_names,
            &fld_path.child("acceptedNames"),
        ));
    }
    all_errs
}

/// Validates storedVersions against spec.versions.
pub fn validate_stored_versions(
    stored_versions: &[String],
    versions: &[internal::CustomResourceDefinitionVersion],
    fld_path: &Path,
) -> ErrorList {
    let mut all_errs = ErrorList::new();

    if stored_versions.is_empty() {
        all_errs.push(invalid(
            fld_path,
            BadValue::String(String::new()),
            "must have at least one stored version",
        ));
        return all_errs;
    }

    let mut stored: std::collections::BTreeMap<&str, usize> = stored_versions
        .iter()
        .enumerate()
        .map(|(i, v)| (v.as_str(), i))
        .collect();

    for version in versions {
        if version.storage && !stored.contains_key(version.name.as_str()) {
            all_errs.push(invalid(
                fld_path,
                BadValue::String(version.name.clone()),
                "must contain the storage version",
            ));
        }
        stored.remove(version.name.as_str());
    }

    for (version, i) in stored {
        all_errs.push(invalid(
            &fld_path.index(i),
            BadValue::String(version.to_string()),
            "missing from spec.versions",
        ));
    }

    all_errs
}
