//! Structural schema machinery: the canonical schema model, the fixed
//! metadata overlay, schema-driven defaulting and pruning.

pub mod defaulting;
pub mod objectmeta;
pub mod pruning;
pub mod structural;

pub use defaulting::apply_defaults;
pub use objectmeta::{
    object_meta_schema, overlay_envelope, validate_embedded_resource,
    validate_instance_object_meta,
};
pub use pruning::prune;
pub use structural::{
    Extensions, Generic, ListType, NestedValueValidation, Structural, StructuralOrBool,
    ValueValidation,
};
