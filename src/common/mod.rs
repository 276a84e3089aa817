//! Common Kubernetes metadata types shared across the server.
//!
//! This module carries the subset of apimachinery the extension server
//! consumes: object/list/type metadata, group-version identifiers, the
//! `Status` result object, timestamps, and the field-path validation
//! machinery used by every validating component.

pub mod bytes;
pub mod meta;
pub mod time;
pub mod traits;
pub mod validation;

pub use bytes::ByteString;
pub use meta::{
    GroupResource, GroupVersionKind, GroupVersionResource, ListMeta, ManagedFieldsEntry,
    ObjectMeta, OwnerReference, Status, StatusCause, StatusDetails, TypeMeta, status,
};
pub use time::Timestamp;
pub use traits::{ApplyDefault, FromInternal, ToInternal};
