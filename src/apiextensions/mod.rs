//! The `apiextensions.k8s.io` API group.
//!
//! Carries the CustomResourceDefinition types in their internal and v1
//! representations, the shared JSON Schema document, defaulting, version
//! conversion and admin-surface validation.

pub mod internal;
pub mod schema_props;
pub mod v1;
pub mod validation;

pub use schema_props::{JSONSchemaProps, JSONSchemaPropsOrBool, ValidationRule};
pub use v1::{ConversionRequest, ConversionResponse, ConversionReview};
