//! Taibai API Server - a dynamic API extension server core in Rust
//!
//! This library implements the core of a Kubernetes-style API extension
//! server: CustomResourceDefinitions are registered at runtime and instances
//! of the declared types are served with full REST/watch semantics without a
//! process restart.
//!
//! The crate is organized the way the server's subsystems depend on each
//! other, leaves first:
//!
//! - [`common`]: shared metadata types and field-path validation machinery.
//! - [`apiextensions`]: the `apiextensions.k8s.io` admin API group.
//! - [`schema`]: the structural schema model, defaulting and pruning.
//! - [`validation`]: instance validation against a structural schema.
//! - [`cel`]: expression rule compilation, cost budgeting and evaluation.
//! - [`conversion`]: identity and webhook conversion between versions.
//! - [`storage`]: the key/value backend contract and per-type stores.
//! - [`server`]: the request dispatcher and serving-info snapshot.
//! - [`registry`]: the CRD observation bus shared by dispatcher and controllers.
//! - [`controller`]: the seven lifecycle reconcilers.
//! - [`discovery`], [`openapi`]: published type catalogs and schema documents.

pub mod apiextensions;
pub mod cel;
pub mod common;
pub mod controller;
pub mod conversion;
pub mod discovery;
pub mod openapi;
pub mod registry;
pub mod schema;
pub mod server;
pub mod storage;
pub mod unstructured;
pub mod validation;

pub use common::{
    GroupResource, GroupVersionKind, GroupVersionResource, ListMeta, ObjectMeta, Status,
    StatusCause, StatusDetails, TypeMeta,
};
pub use server::{ApiError, ApiRequest, ApiResponse, ErrorKind, ExtensionServer, ServerConfig};
