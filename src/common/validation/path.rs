//! Path represents a path from some root to a particular field.
//!
//! Ported from k8s.io/apimachinery/pkg/util/validation/field/path.go

use std::fmt;

/// Path represents a path from some root to a particular field.
///
/// Each node carries either a field `name` or, when `name` is empty, an
/// `index` subscript (a list index or a map key) applied to the parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    pub(crate) name: String,
    pub(crate) index: String,
    pub(crate) parent: Option<Box<Path>>,
}

impl Path {
    /// Creates a root Path object with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            index: String::new(),
            parent: None,
        }
    }

    /// Creates a root Path object with multiple segments.
    pub fn new_with_segments(segments: &[&str]) -> Self {
        let mut iter = segments.iter();
        let mut r = Self::new(iter.next().copied().unwrap_or(""));
        for segment in iter {
            r = r.child(segment);
        }
        r
    }

    /// Creates a new Path that is a child of the receiver.
    pub fn child(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            index: String::new(),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Indicates that the receiver is to be subscripted by an int.
    pub fn index(&self, idx: usize) -> Self {
        Self {
            name: String::new(),
            index: idx.to_string(),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Indicates that the receiver is to be subscripted by a string key.
    pub fn key(&self, key: &str) -> Self {
        Self {
            name: String::new(),
            index: key.to_string(),
            parent: Some(Box::new(self.clone())),
        }
    }
}

impl Default for Path {
    fn default() -> Self {
        Self::new("")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut elems = Vec::new();
        let mut p = Some(self);
        while let Some(curr) = p {
            elems.push(curr);
            p = curr.parent.as_deref();
        }

        let mut wrote = false;
        for elem in elems.iter().rev() {
            if elem.name.is_empty() && elem.index.is_empty() {
                continue;
            }
            if wrote && !elem.name.is_empty() {
                write!(f, ".")?;
            }
            if !elem.name.is_empty() {
                write!(f, "{}", elem.name)?;
            } else {
                write!(f, "[{}]", elem.index)?;
            }
            wrote = true;
        }
        Ok(())
    }
}
