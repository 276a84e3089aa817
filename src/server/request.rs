//! The resolved request and response model.
//!
//! The core begins where the HTTP server ends: a resolved (method, path,
//! headers, body) tuple. Path parsing recovers the request attributes
//! (group, version, resource, namespace, name, subresource, verb) the way
//! the Kubernetes request-info resolver does.

use http::Method;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::ApiError;

/// A resolved request entering the dispatcher.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Request path, e.g. `/apis/example.com/v1/namespaces/default/widgets`.
    pub path: String,
    /// Decoded query parameters.
    pub query: BTreeMap<String, String>,
    /// Header map with lowercase names.
    pub headers: BTreeMap<String, String>,
    /// Raw request body.
    pub body: Vec<u8>,
    /// Cancelled when the caller goes away.
    pub cancel: CancellationToken,
}

impl ApiRequest {
    /// A bodyless request.
    pub fn new(method: Method, path: &str) -> ApiRequest {
        ApiRequest {
            method,
            path: path.to_string(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// A request with a JSON body.
    pub fn with_json(method: Method, path: &str, body: &impl Serialize) -> ApiRequest {
        let mut request = ApiRequest::new(method, path);
        request.body = serde_json::to_vec(body).unwrap_or_default();
        request
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        request
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: &str, value: &str) -> ApiRequest {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    /// Adds a header (name lowercased).
    pub fn with_header(mut self, name: &str, value: &str) -> ApiRequest {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    /// Reads a header by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Reads a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Response body: a buffer, or a stream of chunks for watches.
pub enum ResponseBody {
    /// A complete body.
    Bytes(Vec<u8>),
    /// Newline-delimited chunks produced while the watch lives.
    Stream(mpsc::Receiver<Vec<u8>>),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            ResponseBody::Stream(_) => write!(f, "Stream"),
        }
    }
}

/// A response leaving the dispatcher.
#[derive(Debug)]
pub struct ApiResponse {
    /// HTTP status code.
    pub code: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Body.
    pub body: ResponseBody,
}

impl ApiResponse {
    /// A JSON-encoded response.
    pub fn json(code: u16, value: &impl Serialize) -> ApiResponse {
        ApiResponse {
            code,
            headers: vec![(
                "content-type".to_string(),
                "application/json".to_string(),
            )],
            body: ResponseBody::Bytes(serde_json::to_vec(value).unwrap_or_default()),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: &str) -> ApiResponse {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Decodes the body buffer as JSON; fails on streams.
    pub fn body_json(&self) -> Result<serde_json::Value, String> {
        match &self.body {
            ResponseBody::Bytes(bytes) => {
                serde_json::from_slice(bytes).map_err(|err| err.to_string())
            }
            ResponseBody::Stream(_) => Err("streaming body".to_string()),
        }
    }
}

/// The verb a request resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// Read one object.
    Get,
    /// Read a collection.
    List,
    /// Stream changes to a collection.
    Watch,
    /// Create an object.
    Create,
    /// Replace an object.
    Update,
    /// Patch an object.
    Patch,
    /// Delete one object.
    Delete,
    /// Delete a collection.
    DeleteCollection,
}

impl Verb {
    /// The discovery spelling of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Watch => "watch",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
            Verb::DeleteCollection => "deletecollection",
        }
    }
}

/// Parsed request attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestInfo {
    /// Resolved verb.
    pub verb: Verb,
    /// API group from the path.
    pub group: String,
    /// API version from the path.
    pub version: String,
    /// Plural resource name from the path.
    pub resource: String,
    /// Namespace for namespaced requests.
    pub namespace: Option<String>,
    /// Object name for single-object requests.
    pub name: Option<String>,
    /// Subresource (`status` or `scale`) when addressed.
    pub subresource: Option<String>,
}

/// Parses a resource path of the form
/// `/apis/{group}/{version}[/namespaces/{ns}]/{resource}[/{name}[/{subresource}]]`.
pub fn parse_request_info(
    method: &Method,
    path: &str,
    query: &BTreeMap<String, String>,
) -> Result<RequestInfo, ApiError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 4 || segments[0] != "apis" {
        return Err(ApiError::not_found_path(path));
    }

    let group = segments[1].to_string();
    let version = segments[2].to_string();

    let (namespace, rest) = if segments[3] == "namespaces" && segments.len() >= 6 {
        (Some(segments[4].to_string()), &segments[5..])
    } else {
        (None, &segments[3..])
    };

    if rest.is_empty() || rest.len() > 3 {
        return Err(ApiError::not_found_path(path));
    }
    let resource = rest[0].to_string();
    let name = rest.get(1).map(|s| s.to_string());
    let subresource = rest.get(2).map(|s| s.to_string());

    if let Some(sub) = subresource.as_deref() {
        if sub != "status" && sub != "scale" {
            return Err(ApiError::not_found_path(path));
        }
    }

    let watching = query.get("watch").map(String::as_str) == Some("true");
    let named = name.is_some();
    let verb = if *method == Method::GET && !named && watching {
        Verb::Watch
    } else if *method == Method::GET && !named {
        Verb::List
    } else if *method == Method::GET {
        Verb::Get
    } else if *method == Method::POST && !named {
        Verb::Create
    } else if *method == Method::PUT && named {
        Verb::Update
    } else if *method == Method::PATCH && named {
        Verb::Patch
    } else if *method == Method::DELETE && named {
        Verb::Delete
    } else if *method == Method::DELETE {
        Verb::DeleteCollection
    } else {
        return Err(ApiError::method_not_allowed());
    };

    Ok(RequestInfo {
        verb,
        group,
        version,
        resource,
        namespace,
        name,
        subresource,
    })
}
