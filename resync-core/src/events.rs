//! Change notifications from the two input streams.
//!
//! - [`FileChangesEvent`]: a batch of external filesystem changes.
//! - [`LocalOperationEvent`]: a single save/move/delete the host performed itself.
//!
//! Order within a batch carries no meaning, and nothing orders the two
//! streams against each other.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::{is_equal_or_ancestor, PathCasing, ResourceIdentity};

// ---------------------------------------------------------------------------
// External batch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
    Moved,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Updated => write!(f, "updated"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Moved => write!(f, "moved"),
        }
    }
}

/// One change record. For [`ChangeKind::Moved`], `resource` is the move
/// source and `moved_to` the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub resource: ResourceIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_to: Option<ResourceIdentity>,
}

impl ChangeEvent {
    pub fn added(resource: ResourceIdentity) -> Self {
        Self {
            kind: ChangeKind::Added,
            resource,
            moved_to: None,
        }
    }

    pub fn updated(resource: ResourceIdentity) -> Self {
        Self {
            kind: ChangeKind::Updated,
            resource,
            moved_to: None,
        }
    }

    pub fn deleted(resource: ResourceIdentity) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            resource,
            moved_to: None,
        }
    }

    pub fn moved(from: ResourceIdentity, to: ResourceIdentity) -> Self {
        Self {
            kind: ChangeKind::Moved,
            resource: from,
            moved_to: Some(to),
        }
    }
}

/// A batch of external changes delivered together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileChangesEvent {
    changes: Vec<ChangeEvent>,
}

impl FileChangesEvent {
    pub fn new(changes: Vec<ChangeEvent>) -> Self {
        Self { changes }
    }

    pub fn changes(&self) -> &[ChangeEvent] {
        &self.changes
    }

    pub fn push(&mut self, change: ChangeEvent) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Does this batch report `kind` for `resource`?
    ///
    /// `Deleted` also matches descendants of a deleted folder and the source
    /// side of a move. `Added` also matches a move destination. A `Moved`
    /// record with no destination is malformed and matches nothing.
    pub fn contains(&self, resource: &ResourceIdentity, kind: ChangeKind, casing: PathCasing) -> bool {
        self.changes.iter().any(|change| match (kind, change.kind) {
            (ChangeKind::Deleted, ChangeKind::Deleted) => {
                is_equal_or_ancestor(&change.resource, resource, casing)
            }
            (ChangeKind::Deleted, ChangeKind::Moved) => {
                change.moved_to.is_some() && is_equal_or_ancestor(&change.resource, resource, casing)
            }
            (ChangeKind::Added, ChangeKind::Added) | (ChangeKind::Updated, ChangeKind::Updated) => {
                change.resource.eq_with(resource, casing)
            }
            (ChangeKind::Added, ChangeKind::Moved) => change
                .moved_to
                .as_ref()
                .is_some_and(|to| to.eq_with(resource, casing)),
            (ChangeKind::Moved, ChangeKind::Moved) => {
                change.moved_to.is_some() && change.resource.eq_with(resource, casing)
            }
            _ => false,
        })
    }

    pub fn got_added(&self) -> bool {
        self.has_kind(ChangeKind::Added)
            || self.changes.iter().any(|c| c.kind == ChangeKind::Moved && c.moved_to.is_some())
    }

    pub fn got_deleted(&self) -> bool {
        self.has_kind(ChangeKind::Deleted)
            || self.changes.iter().any(|c| c.kind == ChangeKind::Moved && c.moved_to.is_some())
    }

    pub fn got_updated(&self) -> bool {
        self.has_kind(ChangeKind::Updated)
    }

    fn has_kind(&self, kind: ChangeKind) -> bool {
        self.changes.iter().any(|c| c.kind == kind)
    }
}

impl FromIterator<ChangeEvent> for FileChangesEvent {
    fn from_iter<T: IntoIterator<Item = ChangeEvent>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Local operations
// ---------------------------------------------------------------------------

/// File operation performed by the host itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalOperation {
    Create,
    Save,
    Delete,
    Move,
    Copy,
}

impl fmt::Display for LocalOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalOperation::Create => write!(f, "create"),
            LocalOperation::Save => write!(f, "save"),
            LocalOperation::Delete => write!(f, "delete"),
            LocalOperation::Move => write!(f, "move"),
            LocalOperation::Copy => write!(f, "copy"),
        }
    }
}

/// Lifecycle event for one resource. `before`/`after` may be missing even
/// where the operation implies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalOperationEvent {
    pub operation: LocalOperation,
    #[serde(default)]
    pub before: Option<ResourceIdentity>,
    #[serde(default)]
    pub after: Option<ResourceIdentity>,
}

impl LocalOperationEvent {
    pub fn moved(before: ResourceIdentity, after: ResourceIdentity) -> Self {
        Self {
            operation: LocalOperation::Move,
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn deleted(resource: ResourceIdentity) -> Self {
        Self {
            operation: LocalOperation::Delete,
            before: Some(resource),
            after: None,
        }
    }

    pub fn saved(resource: ResourceIdentity) -> Self {
        Self {
            operation: LocalOperation::Save,
            before: None,
            after: Some(resource),
        }
    }

    pub fn was_deleted(&self) -> bool {
        self.operation == LocalOperation::Delete
    }

    pub fn was_moved(&self) -> bool {
        self.operation == LocalOperation::Move
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> ResourceIdentity {
        ResourceIdentity::parse(s).expect("valid identity")
    }

    #[test]
    fn deleted_folder_contains_descendants() {
        let batch = FileChangesEvent::new(vec![ChangeEvent::deleted(r("/proj/src"))]);
        assert!(batch.contains(&r("/proj/src/x.ts"), ChangeKind::Deleted, PathCasing::Sensitive));
        assert!(!batch.contains(&r("/proj/srcx"), ChangeKind::Deleted, PathCasing::Sensitive));
        assert!(!batch.contains(&r("/proj/src/x.ts"), ChangeKind::Updated, PathCasing::Sensitive));
    }

    #[test]
    fn updated_requires_exact_resource() {
        let batch = FileChangesEvent::new(vec![ChangeEvent::updated(r("/proj/src"))]);
        assert!(!batch.contains(&r("/proj/src/x.ts"), ChangeKind::Updated, PathCasing::Sensitive));
        assert!(batch.contains(&r("/proj/src"), ChangeKind::Updated, PathCasing::Sensitive));
    }

    #[test]
    fn moved_record_splits_into_delete_and_add() {
        let batch = FileChangesEvent::new(vec![ChangeEvent::moved(r("/a.txt"), r("/b.txt"))]);
        assert!(batch.contains(&r("/a.txt"), ChangeKind::Deleted, PathCasing::Sensitive));
        assert!(batch.contains(&r("/b.txt"), ChangeKind::Added, PathCasing::Sensitive));
        assert!(batch.contains(&r("/a.txt"), ChangeKind::Moved, PathCasing::Sensitive));
        assert!(batch.got_added() && batch.got_deleted());
        assert!(!batch.got_updated());
    }

    #[test]
    fn moved_record_without_destination_matches_nothing() {
        let batch = FileChangesEvent::new(vec![ChangeEvent {
            kind: ChangeKind::Moved,
            resource: r("/a.txt"),
            moved_to: None,
        }]);
        assert!(!batch.contains(&r("/a.txt"), ChangeKind::Deleted, PathCasing::Sensitive));
        assert!(!batch.contains(&r("/a.txt"), ChangeKind::Moved, PathCasing::Sensitive));
        assert!(!batch.got_deleted());
    }

    #[test]
    fn casing_controls_matches() {
        let batch = FileChangesEvent::new(vec![ChangeEvent::deleted(r("/A/file.txt"))]);
        assert!(!batch.contains(&r("/a/file.txt"), ChangeKind::Deleted, PathCasing::Sensitive));
        assert!(batch.contains(&r("/a/file.txt"), ChangeKind::Deleted, PathCasing::Insensitive));
    }

    #[test]
    fn local_event_flags() {
        assert!(LocalOperationEvent::moved(r("/a"), r("/b")).was_moved());
        assert!(LocalOperationEvent::deleted(r("/a")).was_deleted());
        let saved = LocalOperationEvent::saved(r("/a"));
        assert!(!saved.was_moved() && !saved.was_deleted());
    }
}
