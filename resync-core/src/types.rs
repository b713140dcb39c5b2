//! Domain types for open editor handles.
//!
//! The editing surface owns these values; the reconciliation engine only reads
//! snapshots of them and issues commands keyed by [`HandleId`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::ResourceIdentity;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of an open handle (leaf or composite), unique within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for HandleId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Position of an editor group in the registry's ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

impl From<u32> for GroupId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Content kind of an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandleKind {
    #[default]
    Text,
    Binary,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::Text => write!(f, "text"),
            HandleKind::Binary => write!(f, "binary"),
        }
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// One open editable resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenHandle {
    pub id: HandleId,
    pub resource: ResourceIdentity,
    /// Has unsaved edits.
    #[serde(default)]
    pub is_dirty: bool,
    #[serde(default)]
    pub last_save_attempt_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_known_modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub kind: HandleKind,
}

impl OpenHandle {
    /// A clean text handle with no save history.
    pub fn text(id: impl Into<HandleId>, resource: ResourceIdentity) -> Self {
        Self {
            id: id.into(),
            resource,
            is_dirty: false,
            last_save_attempt_time: None,
            last_known_modified_time: None,
            kind: HandleKind::Text,
        }
    }

    /// A clean binary handle.
    pub fn binary(id: impl Into<HandleId>, resource: ResourceIdentity) -> Self {
        Self {
            kind: HandleKind::Binary,
            ..Self::text(id, resource)
        }
    }

    pub fn dirty(mut self) -> Self {
        self.is_dirty = true;
        self
    }
}

/// Two handles shown side by side. Either side may be unbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeHandle {
    pub id: HandleId,
    #[serde(default)]
    pub primary: Option<OpenHandle>,
    #[serde(default)]
    pub secondary: Option<OpenHandle>,
}

/// Entry of an editor group: a plain handle or a composite of two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum EditorInput {
    Leaf(OpenHandle),
    Composite(CompositeHandle),
}

impl EditorInput {
    /// Identifier of the top-level entry.
    pub fn id(&self) -> HandleId {
        match self {
            EditorInput::Leaf(handle) => handle.id,
            EditorInput::Composite(composite) => composite.id,
        }
    }

    /// Leaf handles in primary, secondary order: zero, one, or two of them.
    pub fn leaves(&self) -> impl Iterator<Item = &OpenHandle> {
        let (first, second) = match self {
            EditorInput::Leaf(handle) => (Some(handle), None),
            EditorInput::Composite(composite) => {
                (composite.primary.as_ref(), composite.secondary.as_ref())
            }
        };
        first.into_iter().chain(second)
    }

    /// True when `id` names this entry or one of its leaves.
    pub fn contains(&self, id: HandleId) -> bool {
        self.id() == id || self.leaves().any(|leaf| leaf.id == id)
    }
}

impl From<OpenHandle> for EditorInput {
    fn from(handle: OpenHandle) -> Self {
        EditorInput::Leaf(handle)
    }
}

impl From<CompositeHandle> for EditorInput {
    fn from(composite: CompositeHandle) -> Self {
        EditorInput::Composite(composite)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> ResourceIdentity {
        ResourceIdentity::parse(s).expect("valid identity")
    }

    #[test]
    fn newtype_display() {
        assert_eq!(HandleId(7).to_string(), "#7");
        assert_eq!(GroupId(2).to_string(), "group-2");
        assert_eq!(HandleKind::Binary.to_string(), "binary");
    }

    #[test]
    fn leaf_unwraps_to_itself() {
        let input = EditorInput::from(OpenHandle::text(1, r("/a.txt")));
        let leaves: Vec<_> = input.leaves().map(|h| h.id).collect();
        assert_eq!(leaves, vec![HandleId(1)]);
    }

    #[test]
    fn composite_unwraps_to_zero_one_or_two_leaves() {
        let both = EditorInput::from(CompositeHandle {
            id: HandleId(10),
            primary: Some(OpenHandle::text(11, r("/a.txt"))),
            secondary: Some(OpenHandle::text(12, r("/b.txt"))),
        });
        let ids: Vec<_> = both.leaves().map(|h| h.id).collect();
        assert_eq!(ids, vec![HandleId(11), HandleId(12)]);

        let one = EditorInput::from(CompositeHandle {
            id: HandleId(20),
            primary: None,
            secondary: Some(OpenHandle::text(21, r("/c.txt"))),
        });
        assert_eq!(one.leaves().count(), 1);

        let none = EditorInput::from(CompositeHandle {
            id: HandleId(30),
            primary: None,
            secondary: None,
        });
        assert_eq!(none.leaves().count(), 0);
    }

    #[test]
    fn contains_matches_entry_and_leaves() {
        let input = EditorInput::from(CompositeHandle {
            id: HandleId(10),
            primary: Some(OpenHandle::text(11, r("/a.txt"))),
            secondary: None,
        });
        assert!(input.contains(HandleId(10)));
        assert!(input.contains(HandleId(11)));
        assert!(!input.contains(HandleId(12)));
    }

    #[test]
    fn handle_yaml_defaults() {
        let yaml = "id: 3\nresource: /x/y.rs\n";
        let handle: OpenHandle = serde_yaml::from_str(yaml).expect("deserialize");
        assert_eq!(handle, OpenHandle::text(3, r("/x/y.rs")));
    }
}
