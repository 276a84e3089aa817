//! Core traits for versioned API types.
//!
//! The admin API group keeps the external (wire) representation separate from
//! the internal (business-logic) representation; these traits are the seams
//! between them.

/// Fills a resource's default values: TypeMeta (apiVersion, kind), spec field
/// defaults, and computed fields.
pub trait ApplyDefault {
    /// Fill default values in place.
    fn apply_default(&mut self);
}

/// External version to internal version (normalization). Consumes the
/// versioned instance and discards wire-only information.
pub trait ToInternal<I> {
    /// Convert to the internal version.
    fn to_internal(self) -> I;
}

/// Internal version to external version. Callers apply defaults afterwards to
/// restore TypeMeta.
pub trait FromInternal<I>: Sized {
    /// Construct from the internal version.
    fn from_internal(internal: I) -> Self;
}
