//! Field-level validation errors.
//!
//! Ported from k8s.io/apimachinery/pkg/util/validation/field/errors.go

use std::fmt;

use super::path::Path;

/// Error is a field-level validation error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    /// Type of error
    pub error_type: ErrorType,
    /// Field path (e.g., "metadata.name")
    pub field: String,
    /// Bad value that caused the error
    pub bad_value: Option<BadValue>,
    /// Additional detail about the error
    pub detail: String,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.error_body())
    }
}

impl Error {
    /// Returns the error message without the field name.
    pub fn error_body(&self) -> String {
        let mut s = match self.error_type {
            ErrorType::Required
            | ErrorType::Forbidden
            | ErrorType::TooLong
            | ErrorType::TooShort
            | ErrorType::Internal => self.error_type.to_string(),
            _ => {
                if let Some(ref value) = self.bad_value {
                    format!("{}: {}", self.error_type, value)
                } else {
                    self.error_type.to_string()
                }
            }
        };

        if !self.detail.is_empty() {
            s.push_str(&format!(": {}", self.detail));
        }
        s
    }

    /// The machine-readable cause reason used in `Status` details.
    pub fn reason(&self) -> &'static str {
        match self.error_type {
            ErrorType::NotFound => "FieldValueNotFound",
            ErrorType::Required => "FieldValueRequired",
            ErrorType::Duplicate => "FieldValueDuplicate",
            ErrorType::Invalid => "FieldValueInvalid",
            ErrorType::NotSupported => "FieldValueNotSupported",
            ErrorType::Forbidden => "FieldValueForbidden",
            ErrorType::TooLong => "FieldValueTooLong",
            ErrorType::TooShort => "FieldValueTooShort",
            ErrorType::TooMany => "FieldValueTooMany",
            ErrorType::TooFew => "FieldValueTooFew",
            ErrorType::Internal => "InternalError",
            ErrorType::TypeInvalid => "FieldValueTypeInvalid",
        }
    }
}

/// Wrapper for the offending value in errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BadValue {
    String(String),
    Int(i64),
    Bool(bool),
    /// Arbitrary JSON rendered through its compact encoding.
    Json(String),
}

fn quote_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{:?}", value))
}

impl BadValue {
    /// Wraps an arbitrary JSON value.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => BadValue::String(s.clone()),
            serde_json::Value::Bool(b) => BadValue::Bool(*b),
            serde_json::Value::Number(n) if n.is_i64() => {
                BadValue::Int(n.as_i64().unwrap_or_default())
            }
            other => BadValue::Json(other.to_string()),
        }
    }
}

impl fmt::Display for BadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BadValue::String(s) => write!(f, "{}", quote_string(s)),
            BadValue::Int(i) => write!(f, "{}", i),
            BadValue::Bool(b) => write!(f, "{}", b),
            BadValue::Json(j) => write!(f, "{}", j),
        }
    }
}

/// ErrorType is a machine readable value providing more detail about why a
/// field is invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Failure to find a requested value
    NotFound,
    /// Required values that are not provided
    Required,
    /// Collisions of values that must be unique
    Duplicate,
    /// Malformed values (e.g., failed regex match, out of bounds)
    Invalid,
    /// Unknown values for enumerated fields
    NotSupported,
    /// Valid values not permitted by current conditions
    Forbidden,
    /// Value is too long
    TooLong,
    /// Value is too short
    TooShort,
    /// Too many items in a list
    TooMany,
    /// Too few items in a list
    TooFew,
    /// Internal error (not related to user input)
    Internal,
    /// Value did not match schema type
    TypeInvalid,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorType::NotFound => "Not found",
            ErrorType::Required => "Required value",
            ErrorType::Duplicate => "Duplicate value",
            ErrorType::Invalid => "Invalid value",
            ErrorType::NotSupported => "Unsupported value",
            ErrorType::Forbidden => "Forbidden",
            ErrorType::TooLong => "Too long",
            ErrorType::TooShort => "Too short",
            ErrorType::TooMany => "Too many",
            ErrorType::TooFew => "Too few",
            ErrorType::Internal => "Internal error",
            ErrorType::TypeInvalid => "Invalid value",
        };
        write!(f, "{}", s)
    }
}

/// ErrorList holds a set of Errors.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ErrorList {
    pub errors: Vec<Error>,
}

impl ErrorList {
    /// Creates a new empty ErrorList.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error to the list.
    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// Extends this ErrorList with another.
    pub fn extend(&mut self, other: ErrorList) {
        self.errors.extend(other.errors);
    }

    /// Returns true if there are no errors.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Re-anchors every error under the given prefix path.
    pub fn with_prefix(mut self, prefix: &Path) -> Self {
        let prefix = prefix.to_string();
        if prefix.is_empty() {
            return self;
        }
        for err in &mut self.errors {
            err.field = if err.field.is_empty() {
                prefix.clone()
            } else if err.field.starts_with('[') {
                format!("{}{}", prefix, err.field)
            } else {
                format!("{}.{}", prefix, err.field)
            };
        }
        self
    }
}

impl IntoIterator for ErrorList {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// NotFound returns an Error indicating "value not found".
pub fn not_found(field: &Path, value: BadValue) -> Error {
    Error {
        error_type: ErrorType::NotFound,
        field: field.to_string(),
        bad_value: Some(value),
        detail: String::new(),
    }
}

/// Required returns an Error indicating "value required".
pub fn required(field: &Path, detail: &str) -> Error {
    Error {
        error_type: ErrorType::Required,
        field: field.to_string(),
        bad_value: None,
        detail: detail.to_string(),
    }
}

/// Duplicate returns an Error indicating "duplicate value".
pub fn duplicate(field: &Path, value: BadValue) -> Error {
    Error {
        error_type: ErrorType::Duplicate,
        field: field.to_string(),
        bad_value: Some(value),
        detail: String::new(),
    }
}

/// Invalid returns an Error indicating "invalid value".
pub fn invalid(field: &Path, value: BadValue, detail: &str) -> Error {
    Error {
        error_type: ErrorType::Invalid,
        field: field.to_string(),
        bad_value: Some(value),
        detail: detail.to_string(),
    }
}

/// NotSupported returns an Error indicating "unsupported value".
pub fn not_supported(field: &Path, value: BadValue, valid_values: &[&str]) -> Error {
    let detail = if valid_values.is_empty() {
        String::new()
    } else {
        format!(
            "supported values: {}",
            valid_values
                .iter()
                .map(|v| quote_string(v))
                .collect::<Vec<_>>()
                .join(", ")
        )
    };
    Error {
        error_type: ErrorType::NotSupported,
        field: field.to_string(),
        bad_value: Some(value),
        detail,
    }
}

/// Forbidden returns an Error indicating "forbidden".
pub fn forbidden(field: &Path, detail: &str) -> Error {
    Error {
        error_type: ErrorType::Forbidden,
        field: field.to_string(),
        bad_value: None,
        detail: detail.to_string(),
    }
}

/// TooLong returns an Error indicating "too long".
pub fn too_long(field: &Path, max_length: usize) -> Error {
    let unit = if max_length == 1 { "character" } else { "characters" };
    Error {
        error_type: ErrorType::TooLong,
        field: field.to_string(),
        bad_value: Some(BadValue::String("<value omitted>".to_string())),
        detail: format!("may not be more than {} {}", max_length, unit),
    }
}

/// TooShort returns an Error indicating "too short".
pub fn too_short(field: &Path, min_length: usize) -> Error {
    let unit = if min_length == 1 { "character" } else { "characters" };
    Error {
        error_type: ErrorType::TooShort,
        field: field.to_string(),
        bad_value: Some(BadValue::String("<value omitted>".to_string())),
        detail: format!("must be at least {} {}", min_length, unit),
    }
}

/// TooMany returns an Error indicating "too many items".
pub fn too_many(field: &Path, actual: Option<usize>, max: usize) -> Error {
    let msg = if max == 1 {
        "must have at most 1 item".to_string()
    } else {
        format!("must have at most {} items", max)
    };
    Error {
        error_type: ErrorType::TooMany,
        field: field.to_string(),
        bad_value: actual.map(|value| BadValue::Int(value as i64)),
        detail: msg,
    }
}

/// TooFew returns an Error indicating "too few items".
pub fn too_few(field: &Path, actual: Option<usize>, min: usize) -> Error {
    let msg = if min == 1 {
        "must have at least 1 item".to_string()
    } else {
        format!("must have at least {} items", min)
    };
    Error {
        error_type: ErrorType::TooFew,
        field: field.to_string(),
        bad_value: actual.map(|value| BadValue::Int(value as i64)),
        detail: msg,
    }
}

/// InternalError returns an Error indicating "internal error".
pub fn internal_error(field: &Path, err: &str) -> Error {
    Error {
        error_type: ErrorType::Internal,
        field: field.to_string(),
        bad_value: None,
        detail: err.to_string(),
    }
}

/// TypeInvalid returns an Error indicating "type is invalid".
pub fn type_invalid(field: &Path, value: BadValue, detail: &str) -> Error {
    Error {
        error_type: ErrorType::TypeInvalid,
        field: field.to_string(),
        bad_value: Some(value),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_required() {
        let p = Path::new("metadata").child("name");
        let err = required(&p, "name is required");
        assert_eq!(
            err.to_string(),
            "metadata.name: Required value: name is required"
        );
    }

    #[test]
    fn test_error_invalid() {
        let p = Path::new("spec").child("replicas");
        let err = invalid(&p, BadValue::Int(-1), "must be non-negative");
        assert_eq!(
            err.to_string(),
            "spec.replicas: Invalid value: -1: must be non-negative"
        );
        assert_eq!(err.reason(), "FieldValueInvalid");
    }

    #[test]
    fn test_with_prefix() {
        let mut list = ErrorList::new();
        list.push(required(&Path::new("name"), ""));
        list.push(invalid(
            &Path::new("").index(0),
            BadValue::Bool(true),
            "nope",
        ));
        let list = list.with_prefix(&Path::new("items"));
        assert_eq!(list.errors[0].field, "items.name");
        assert_eq!(list.errors[1].field, "items[0]");
    }

    #[test]
    fn test_too_few_too_short() {
        let p = Path::new("spec").child("items");
        assert!(too_few(&p, Some(0), 2).to_string().contains("at least 2"));
        assert!(
            too_short(&Path::new("spec").child("name"), 3)
                .to_string()
                .contains("at least 3 characters")
        );
    }
}
