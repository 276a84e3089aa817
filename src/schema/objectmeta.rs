//! The fixed ObjectMeta schema and strict metadata validation.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apiserver/schema/objectmeta
//!
//! CRD authors cannot redefine the shape of object metadata: a fixed
//! structural form is overlaid on the root and on every embedded-resource
//! position, and the metadata subtree is validated strictly against the
//! typed ObjectMeta independent of the CRD schema.

use serde_json::Value;
use std::collections::BTreeMap;

use super::structural::{Extensions, Generic, ListType, Structural, StructuralOrBool};
use crate::common::validation::{
    BadValue, ErrorList, Path, ValidateNameFunc, type_invalid, validate_object_meta,
};

fn string_node() -> Structural {
    Structural {
        generic: Generic {
            type_: "string".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn string_map_node() -> Structural {
    Structural {
        generic: Generic {
            type_: "object".to_string(),
            ..Default::default()
        },
        additional_properties: Some(Box::new(StructuralOrBool::Structural(Box::new(
            string_node(),
        )))),
        ..Default::default()
    }
}

/// The fixed structural schema of object metadata.
pub fn object_meta_schema() -> Structural {
    let mut properties = BTreeMap::new();
    properties.insert("name".to_string(), string_node());
    properties.insert("generateName".to_string(), string_node());
    properties.insert("namespace".to_string(), string_node());
    properties.insert("uid".to_string(), string_node());
    properties.insert("resourceVersion".to_string(), string_node());
    properties.insert("creationTimestamp".to_string(), string_node());
    properties.insert("deletionTimestamp".to_string(), string_node());
    properties.insert(
        "generation".to_string(),
        Structural {
            generic: Generic {
                type_: "integer".to_string(),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    properties.insert("labels".to_string(), string_map_node());
    properties.insert("annotations".to_string(), string_map_node());
    properties.insert(
        "finalizers".to_string(),
        Structural {
            generic: Generic {
                type_: "array".to_string(),
                ..Default::default()
            },
            extensions: Extensions {
                x_list_type: Some(ListType::Set),
                ..Default::default()
            },
            items: Some(Box::new(string_node())),
            ..Default::default()
        },
    );
    // ownerReferences and managedFields have fixed shapes enforced by typed
    // decoding; schema-wise their interior is preserved
    let preserved_list = Structural {
        generic: Generic {
            type_: "array".to_string(),
            ..Default::default()
        },
        items: Some(Box::new(Structural {
            generic: Generic {
                type_: "object".to_string(),
                ..Default::default()
            },
            extensions: Extensions {
                x_preserve_unknown_fields: true,
                ..Default::default()
            },
            ..Default::default()
        })),
        ..Default::default()
    };
    properties.insert("ownerReferences".to_string(), preserved_list.clone());
    properties.insert("managedFields".to_string(), preserved_list);

    Structural {
        generic: Generic {
            type_: "object".to_string(),
            ..Default::default()
        },
        properties,
        ..Default::default()
    }
}

/// Overlays the fixed envelope schema (apiVersion, kind, metadata) on the
/// root of a structural schema and on every embedded-resource position.
pub fn overlay_envelope(schema: &mut Structural) {
    overlay_node(schema, true);
}

fn overlay_node(schema: &mut Structural, at_envelope: bool) {
    if at_envelope {
        schema
            .properties
            .insert("apiVersion".to_string(), string_node());
        schema.properties.insert("kind".to_string(), string_node());
        schema
            .properties
            .insert("metadata".to_string(), object_meta_schema());
    }

    for (name, prop) in schema.properties.iter_mut() {
        if at_envelope && (name == "metadata" || name == "apiVersion" || name == "kind") {
            continue;
        }
        overlay_node(prop, prop.extensions.x_embedded_resource);
    }
    if let Some(items) = schema.items.as_deref_mut() {
        overlay_node(items, items.extensions.x_embedded_resource);
    }
    if let Some(boxed) = schema.additional_properties.as_deref_mut() {
        if let StructuralOrBool::Structural(s) = boxed {
            overlay_node(s, s.extensions.x_embedded_resource);
        }
    }
}

/// Strictly validates the metadata of an instance: the subtree must decode
/// into the typed ObjectMeta and pass the apimachinery metadata rules.
pub fn validate_instance_object_meta(
    instance: &Value,
    requires_namespace: bool,
    name_fn: ValidateNameFunc,
    fld_path: &Path,
) -> ErrorList {
    let mut all_errs = ErrorList::new();
    let meta = match instance.get("metadata") {
        None | Some(Value::Null) => {
            all_errs.push(crate::common::validation::required(fld_path, ""));
            return all_errs;
        }
        Some(meta_value) => match serde_json::from_value::<crate::common::ObjectMeta>(
            meta_value.clone(),
        ) {
            Ok(meta) => meta,
            Err(err) => {
                all_errs.push(type_invalid(
                    fld_path,
                    BadValue::from_json(meta_value),
                    &err.to_string(),
                ));
                return all_errs;
            }
        },
    };

    all_errs.extend(validate_object_meta(
        &meta,
        requires_namespace,
        name_fn,
        fld_path,
    ));
    all_errs
}

/// Validates the envelope fields of an embedded resource.
pub fn validate_embedded_resource(value: &Value, fld_path: &Path) -> ErrorList {
    let mut all_errs = ErrorList::new();
    match value.get("apiVersion") {
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(other) if !other.is_string() => all_errs.push(type_invalid(
            &fld_path.child("apiVersion"),
            BadValue::from_json(other),
            "must be a string",
        )),
        _ => all_errs.push(crate::common::validation::required(
            &fld_path.child("apiVersion"),
            "",
        )),
    }
    match value.get("kind") {
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(other) if !other.is_string() => all_errs.push(type_invalid(
            &fld_path.child("kind"),
            BadValue::from_json(other),
            "must be a string",
        )),
        _ => all_errs.push(crate::common::validation::required(
            &fld_path.child("kind"),
            "",
        )),
    }
    if let Some(meta_value) = value.get("metadata") {
        if let Err(err) =
            serde_json::from_value::<crate::common::ObjectMeta>(meta_value.clone())
        {
            all_errs.push(type_invalid(
                &fld_path.child("metadata"),
                BadValue::from_json(meta_value),
                &err.to_string(),
            ));
        }
    }
    all_errs
}
