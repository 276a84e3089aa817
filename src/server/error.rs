//! The request error taxonomy.
//!
//! Errors are identified by kind; the HTTP status code and the Status
//! `reason` string are projections of the kind. Validation failures carry
//! their field-path breakdown through to the Status causes unchanged.

use std::fmt;

use crate::common::validation::ErrorList;
use crate::common::{GroupResource, Status, StatusCause, StatusDetails, TypeMeta};

/// The kind of a request error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed body, unknown encoding, illegal field in request.
    BadRequest,
    /// Object or type not known.
    NotFound,
    /// Create collides with an existing name or UID.
    AlreadyExists,
    /// Compare-and-swap failed, or apply field ownership conflict.
    Conflict,
    /// Validation failure; carries per-field causes.
    Invalid,
    /// Admission rejected, or protected field mutation disallowed.
    Forbidden,
    /// Watch starting point too old, or object no longer available.
    Gone,
    /// Request deadline exceeded.
    Timeout,
    /// Webhook failure, conversion failure, unexpected store error.
    InternalError,
    /// Controller informers not yet synced.
    ServiceUnavailable,
    /// The HTTP method does not map to a verb on this path.
    MethodNotAllowed,
    /// No offered content type is acceptable.
    NotAcceptable,
    /// The request content type is not supported.
    UnsupportedMediaType,
}

impl ErrorKind {
    /// The HTTP status code projection.
    pub fn code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::NotAcceptable => 406,
            ErrorKind::AlreadyExists | ErrorKind::Conflict => 409,
            ErrorKind::Gone => 410,
            ErrorKind::UnsupportedMediaType => 415,
            ErrorKind::Invalid => 422,
            ErrorKind::Timeout => 504,
            ErrorKind::InternalError => 500,
            ErrorKind::ServiceUnavailable => 503,
        }
    }

    /// The machine-readable Status reason projection.
    pub fn reason(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Invalid => "Invalid",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::Gone => "Expired",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::ServiceUnavailable => "ServiceUnavailable",
            ErrorKind::MethodNotAllowed => "MethodNotAllowed",
            ErrorKind::NotAcceptable => "NotAcceptable",
            ErrorKind::UnsupportedMediaType => "UnsupportedMediaType",
        }
    }
}

/// A user-visible request error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    /// The kind; code and reason derive from it.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Structured details: resource identity and field causes.
    pub details: Option<StatusDetails>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.reason(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> ApiError {
        ApiError {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// BadRequest.
    pub fn bad_request(message: impl Into<String>) -> ApiError {
        ApiError::new(ErrorKind::BadRequest, message)
    }

    /// NotFound for a named object.
    pub fn not_found(gr: &GroupResource, name: &str) -> ApiError {
        let mut err = ApiError::new(
            ErrorKind::NotFound,
            format!("{} \"{}\" not found", gr, name),
        );
        err.details = Some(StatusDetails {
            name: name.to_string(),
            group: gr.group.clone(),
            kind: gr.resource.clone(),
            ..Default::default()
        });
        err
    }

    /// NotFound for an unrecognized path.
    pub fn not_found_path(path: &str) -> ApiError {
        ApiError::new(ErrorKind::NotFound, format!("the server could not find the requested resource at {}", path))
    }

    /// AlreadyExists.
    pub fn already_exists(gr: &GroupResource, name: &str) -> ApiError {
        let mut err = ApiError::new(
            ErrorKind::AlreadyExists,
            format!("{} \"{}\" already exists", gr, name),
        );
        err.details = Some(StatusDetails {
            name: name.to_string(),
            group: gr.group.clone(),
            kind: gr.resource.clone(),
            ..Default::default()
        });
        err
    }

    /// Conflict.
    pub fn conflict(gr: &GroupResource, name: &str, message: impl Into<String>) -> ApiError {
        let mut err = ApiError::new(
            ErrorKind::Conflict,
            format!(
                "Operation cannot be fulfilled on {} \"{}\": {}",
                gr,
                name,
                message.into()
            ),
        );
        err.details = Some(StatusDetails {
            name: name.to_string(),
            group: gr.group.clone(),
            kind: gr.resource.clone(),
            ..Default::default()
        });
        err
    }

    /// Invalid, carrying the field-path breakdown as Status causes.
    pub fn invalid(kind: &str, name: &str, errors: ErrorList) -> ApiError {
        let causes: Vec<StatusCause> = errors
            .errors
            .iter()
            .map(|err| {
                // rule-budget failures carry their reason as a detail
                // prefix; lift it into the cause
                let (reason, message) = match err
                    .detail
                    .strip_prefix(&format!("{}: ", crate::cel::RULE_COST_EXCEEDED_REASON))
                {
                    Some(rest) => (
                        crate::cel::RULE_COST_EXCEEDED_REASON.to_string(),
                        format!("{}: {}", err.error_type, rest),
                    ),
                    None => (err.reason().to_string(), err.error_body()),
                };
                StatusCause {
                    reason,
                    message,
                    field: err.field.clone(),
                }
            })
            .collect();
        ApiError {
            kind: ErrorKind::Invalid,
            message: format!("{} \"{}\" is invalid: {}", kind, name, errors),
            details: Some(StatusDetails {
                name: name.to_string(),
                kind: kind.to_string(),
                causes,
                ..Default::default()
            }),
        }
    }

    /// Forbidden.
    pub fn forbidden(message: impl Into<String>) -> ApiError {
        ApiError::new(ErrorKind::Forbidden, message)
    }

    /// Gone (reason Expired).
    pub fn gone(message: impl Into<String>) -> ApiError {
        ApiError::new(ErrorKind::Gone, message)
    }

    /// Timeout.
    pub fn timeout(message: impl Into<String>) -> ApiError {
        ApiError::new(ErrorKind::Timeout, message)
    }

    /// InternalError.
    pub fn internal(message: impl Into<String>) -> ApiError {
        ApiError::new(ErrorKind::InternalError, message)
    }

    /// ServiceUnavailable.
    pub fn service_unavailable(message: impl Into<String>) -> ApiError {
        ApiError::new(ErrorKind::ServiceUnavailable, message)
    }

    /// MethodNotAllowed.
    pub fn method_not_allowed() -> ApiError {
        ApiError::new(
            ErrorKind::MethodNotAllowed,
            "the server does not allow this method on the requested resource",
        )
    }

    /// NotAcceptable.
    pub fn not_acceptable(message: impl Into<String>) -> ApiError {
        ApiError::new(ErrorKind::NotAcceptable, message)
    }

    /// UnsupportedMediaType.
    pub fn unsupported_media_type(message: impl Into<String>) -> ApiError {
        ApiError::new(ErrorKind::UnsupportedMediaType, message)
    }

    /// The HTTP code.
    pub fn code(&self) -> u16 {
        self.kind.code()
    }

    /// The Status object projection.
    pub fn to_status(&self) -> Status {
        Status {
            type_meta: TypeMeta::new("v1", "Status"),
            status: Some(crate::common::status::FAILURE.to_string()),
            message: Some(self.message.clone()),
            reason: Some(self.kind.reason().to_string()),
            details: self.details.clone(),
            code: Some(self.code() as i32),
            ..Default::default()
        }
    }
}

impl From<crate::storage::StorageError> for ApiError {
    fn from(err: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError;
        match err {
            StorageError::NotFound(name) => {
                ApiError::new(ErrorKind::NotFound, format!("\"{}\" not found", name))
            }
            StorageError::AlreadyExists(name) => ApiError::new(
                ErrorKind::AlreadyExists,
                format!("\"{}\" already exists", name),
            ),
            StorageError::Conflict(message) => ApiError::new(ErrorKind::Conflict, message),
            StorageError::Expired => {
                ApiError::gone("too old resource version: the requested start point is no longer available")
            }
            StorageError::InvalidInput(message) => ApiError::bad_request(message),
            StorageError::Internal(message) => ApiError::internal(message),
        }
    }
}

impl From<crate::conversion::ConversionError> for ApiError {
    fn from(err: crate::conversion::ConversionError) -> Self {
        ApiError::internal(err.to_string())
    }
}
