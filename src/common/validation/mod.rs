//! Field validation utilities.
//!
//! - `Path`: a path from root to a field (the Go `field.Path` shape)
//! - `Error` / `ErrorList`: accumulated validation failures
//! - DNS, qualified-name and label validators
//! - ObjectMeta validation

pub mod dns;
pub mod errors;
pub mod labels;
pub mod object_meta;
pub mod path;

pub use dns::{
    DNS1035_LABEL_ERROR_MSG, DNS1123_LABEL_ERROR_MSG, DNS1123_SUBDOMAIN_ERROR_MSG,
    is_dns1035_label, is_dns1123_label, is_dns1123_subdomain,
};
pub use errors::{
    BadValue, Error, ErrorList, ErrorType, duplicate, forbidden, internal_error, invalid,
    not_found, not_supported, required, too_few, too_long, too_many, too_short, type_invalid,
};
pub use labels::{is_qualified_name, is_valid_label_value, validate_annotations, validate_labels};
pub use object_meta::{
    ValidateNameFunc, name_is_dns_label, name_is_dns_subdomain, validate_object_meta,
    validate_object_meta_update,
};
pub use path::Path;
