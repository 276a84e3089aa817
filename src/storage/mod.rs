//! Storage: the key/value backend contract, the in-memory backend, and the
//! per-type resource stores built on top.

pub mod backend;
pub mod memory;
pub mod scale;
pub mod selector;
pub mod store;
pub mod watch;

pub use backend::{Backend, BackendError, BackendEvent, EventType, RawObject};
pub use memory::MemoryBackend;
pub use scale::{Scale, ScaleSpec, ScaleStatus, apply_scale_to_object, scale_from_object};
pub use selector::{FieldSelector, LabelSelector, parse_field_selector, parse_label_selector};
pub use store::{ListOptions, ListResult, Preconditions, ResourceStore, StorageError};
pub use watch::{WatchEvent, WatchEventType};
