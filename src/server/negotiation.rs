//! Content-type negotiation and response projections.
//!
//! JSON and YAML are served; the Kubernetes Protobuf binding and CBOR are
//! recognized but rejected for custom resources with NotAcceptable /
//! UnsupportedMediaType, matching upstream behavior for schemaless types.
//! `Accept` parameters select the Table and PartialObjectMetadata
//! projections.

use serde::Serialize;
use serde_json::{Value, json};

use super::error::ApiError;
use super::request::{ApiResponse, ResponseBody};
use crate::apiextensions::internal::CustomResourceColumnDefinition;
use crate::unstructured;

/// A supported (or recognized) serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
    /// application/json
    Json,
    /// application/yaml
    Yaml,
}

impl MediaType {
    /// The content-type header value.
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::Yaml => "application/yaml",
        }
    }
}

/// Alternative object renderings selected through Accept parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Projection {
    /// The object itself.
    None,
    /// meta.k8s.io PartialObjectMetadata.
    PartialObjectMetadata,
    /// meta.k8s.io Table with server-side printed columns.
    Table,
}

/// The outcome of Accept negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Negotiated {
    /// The serialization.
    pub media: MediaType,
    /// The projection.
    pub projection: Projection,
}

/// Negotiates the request body encoding from Content-Type.
pub fn negotiate_input(content_type: Option<&str>) -> Result<MediaType, ApiError> {
    let media = content_type
        .unwrap_or("application/json")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match media.as_str() {
        "" | "application/json" => Ok(MediaType::Json),
        "application/yaml" => Ok(MediaType::Yaml),
        "application/vnd.kubernetes.protobuf" => Err(ApiError::unsupported_media_type(
            "the Kubernetes Protobuf binding is not supported for custom resources",
        )),
        "application/cbor" => Err(ApiError::unsupported_media_type(
            "CBOR is not enabled for custom resources",
        )),
        other => Err(ApiError::unsupported_media_type(format!(
            "unsupported media type {:?}",
            other
        ))),
    }
}

/// Negotiates the response encoding and projection from Accept.
pub fn negotiate_output(accept: Option<&str>) -> Result<Negotiated, ApiError> {
    let header = accept.unwrap_or("application/json");
    for clause in header.split(',') {
        let mut parts = clause.split(';');
        let media = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let mut as_param = None;
        for param in parts {
            if let Some((key, value)) = param.trim().split_once('=') {
                if key.trim() == "as" {
                    as_param = Some(value.trim().to_string());
                }
            }
        }
        let projection = match as_param.as_deref() {
            Some("Table") => Projection::Table,
            Some("PartialObjectMetadata") | Some("PartialObjectMetadataList") => {
                Projection::PartialObjectMetadata
            }
            Some(_) => continue,
            None => Projection::None,
        };
        let media = match media.as_str() {
            "application/json" | "*/*" | "application/*" | "" => MediaType::Json,
            "application/yaml" => MediaType::Yaml,
            "application/vnd.kubernetes.protobuf" | "application/cbor" => continue,
            _ => continue,
        };
        return Ok(Negotiated { media, projection });
    }
    Err(ApiError::not_acceptable(format!(
        "no supported media type in Accept header {:?}",
        header
    )))
}

/// Decodes a request body per the negotiated input encoding.
pub fn decode_body(body: &[u8], media: MediaType) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("request body is required"));
    }
    match media {
        MediaType::Json => serde_json::from_slice(body)
            .map_err(|err| ApiError::bad_request(format!("decoding request body: {}", err))),
        MediaType::Yaml => serde_yaml::from_slice(body)
            .map_err(|err| ApiError::bad_request(format!("decoding request body: {}", err))),
    }
}

/// Encodes a response per the negotiated output encoding.
pub fn encode_response(code: u16, value: &impl Serialize, media: MediaType) -> ApiResponse {
    let bytes = match media {
        MediaType::Json => serde_json::to_vec(value).unwrap_or_default(),
        MediaType::Yaml => serde_yaml::to_string(value)
            .map(String::into_bytes)
            .unwrap_or_default(),
    };
    ApiResponse {
        code,
        headers: vec![("content-type".to_string(), media.content_type().to_string())],
        body: ResponseBody::Bytes(bytes),
    }
}

/// Encodes an error per the negotiated output encoding.
pub fn encode_error(error: &ApiError, media: MediaType) -> ApiResponse {
    encode_response(error.code(), &error.to_status(), media)
}

// ============================================================================
// Projections
// ============================================================================

/// Projects an object to PartialObjectMetadata.
pub fn to_partial_object_metadata(object: &Value) -> Value {
    json!({
        "apiVersion": "meta.k8s.io/v1",
        "kind": "PartialObjectMetadata",
        "metadata": object.get("metadata").cloned().unwrap_or_else(|| json!({}))
    })
}

/// Projects a list of objects to a PartialObjectMetadataList.
pub fn to_partial_object_metadata_list(items: &[Value], list_meta: Value) -> Value {
    json!({
        "apiVersion": "meta.k8s.io/v1",
        "kind": "PartialObjectMetadataList",
        "metadata": list_meta,
        "items": items.iter().map(to_partial_object_metadata).collect::<Vec<_>>()
    })
}

/// Builds a server-side printed Table from objects and the CRD's additional
/// printer columns. Name and Age lead, as in the built-in printers.
pub fn to_table(
    items: &[Value],
    columns: &[CustomResourceColumnDefinition],
    list_meta: Value,
) -> Value {
    let mut column_definitions = vec![
        json!({"name": "Name", "type": "string", "format": "name", "description": "Name of the object", "priority": 0}),
        json!({"name": "Age", "type": "date", "description": "Creation time", "priority": 0}),
    ];
    for column in columns {
        column_definitions.push(json!({
            "name": column.name,
            "type": column.type_,
            "format": column.format,
            "description": column.description,
            "priority": column.priority,
        }));
    }

    let rows: Vec<Value> = items
        .iter()
        .map(|object| {
            let mut cells = vec![
                json!(unstructured::name(object)),
                unstructured::metadata(object)
                    .and_then(|m| m.get("creationTimestamp"))
                    .cloned()
                    .unwrap_or(Value::Null),
            ];
            for column in columns {
                cells.push(
                    unstructured::nested_by_json_path(object, &column.json_path)
                        .cloned()
                        .unwrap_or(Value::Null),
                );
            }
            json!({
                "cells": cells,
                "object": to_partial_object_metadata(object),
            })
        })
        .collect();

    json!({
        "apiVersion": "meta.k8s.io/v1",
        "kind": "Table",
        "metadata": list_meta,
        "columnDefinitions": column_definitions,
        "rows": rows
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_negotiation() {
        assert_eq!(negotiate_input(None).unwrap(), MediaType::Json);
        assert_eq!(
            negotiate_input(Some("application/json; charset=utf-8")).unwrap(),
            MediaType::Json
        );
        assert_eq!(
            negotiate_input(Some("application/yaml")).unwrap(),
            MediaType::Yaml
        );
        assert_eq!(
            negotiate_input(Some("application/vnd.kubernetes.protobuf"))
                .unwrap_err()
                .code(),
            415
        );
        assert_eq!(
            negotiate_input(Some("application/cbor")).unwrap_err().code(),
            415
        );
    }

    #[test]
    fn test_output_negotiation_prefers_first_supported() {
        let n = negotiate_output(Some("application/vnd.kubernetes.protobuf, application/json"))
            .unwrap();
        assert_eq!(n.media, MediaType::Json);

        let n = negotiate_output(Some("application/yaml")).unwrap();
        assert_eq!(n.media, MediaType::Yaml);

        assert_eq!(
            negotiate_output(Some("application/vnd.kubernetes.protobuf"))
                .unwrap_err()
                .code(),
            406
        );
    }

    #[test]
    fn test_table_and_partial_projections_negotiated() {
        let n = negotiate_output(Some(
            "application/json;as=Table;v=v1;g=meta.k8s.io",
        ))
        .unwrap();
        assert_eq!(n.projection, Projection::Table);

        let n = negotiate_output(Some(
            "application/json;as=PartialObjectMetadataList;v=v1;g=meta.k8s.io",
        ))
        .unwrap();
        assert_eq!(n.projection, Projection::PartialObjectMetadata);
    }

    #[test]
    fn test_yaml_round_trip() {
        let body = b"apiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: a\n";
        let value = decode_body(body, MediaType::Yaml).unwrap();
        assert_eq!(value["kind"], "Widget");
        let response = encode_response(200, &value, MediaType::Yaml);
        match response.body {
            ResponseBody::Bytes(bytes) => {
                assert!(String::from_utf8_lossy(&bytes).contains("kind: Widget"))
            }
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn test_table_rows_follow_columns() {
        let items = vec![serde_json::json!({
            "metadata": {"name": "a", "creationTimestamp": "2024-01-15T10:00:00Z"},
            "spec": {"replicas": 3}
        })];
        let columns = vec![CustomResourceColumnDefinition {
            name: "Replicas".to_string(),
            type_: "integer".to_string(),
            json_path: ".spec.replicas".to_string(),
            ..Default::default()
        }];
        let table = to_table(&items, &columns, serde_json::json!({}));
        assert_eq!(table["kind"], "Table");
        assert_eq!(table["columnDefinitions"][2]["name"], "Replicas");
        assert_eq!(table["rows"][0]["cells"][0], "a");
        assert_eq!(table["rows"][0]["cells"][2], 3);
    }
}
