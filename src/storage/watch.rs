//! Watch event types on the resource layer.

use serde_json::{Value, json};

/// Kind of a watch event as seen by clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventType {
    /// Object created.
    Added,
    /// Object updated.
    Modified,
    /// Object removed.
    Deleted,
    /// Progress marker carrying only a resourceVersion.
    Bookmark,
    /// Terminal error, e.g. an expired start revision.
    Error,
}

impl WatchEventType {
    /// The wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEventType::Added => "ADDED",
            WatchEventType::Modified => "MODIFIED",
            WatchEventType::Deleted => "DELETED",
            WatchEventType::Bookmark => "BOOKMARK",
            WatchEventType::Error => "ERROR",
        }
    }
}

/// One event on a watch stream.
#[derive(Clone, Debug, PartialEq)]
pub struct WatchEvent {
    /// What happened.
    pub event_type: WatchEventType,
    /// The object after the change (or the last state for deletes; a
    /// `Status` for errors).
    pub object: Value,
}

impl WatchEvent {
    /// The newline-delimited wire form.
    pub fn to_wire(&self) -> Value {
        json!({"type": self.event_type.as_str(), "object": self.object})
    }
}
