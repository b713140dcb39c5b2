//! Change ingestion: normalizes both input streams before reconciliation.

use resync_core::{ChangeKind, FileChangesEvent, LocalOperation, LocalOperationEvent, ResourceIdentity};
use serde::Serialize;

/// What a local operation asks of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalChange {
    Moved {
        from: ResourceIdentity,
        to: ResourceIdentity,
    },
    Deleted(ResourceIdentity),
    /// Nothing to reconcile (saves, creates, copies, malformed events).
    Ignored,
}

/// Classify a local lifecycle event.
///
/// A move missing either end, or a delete missing `before`, is malformed and
/// classified as [`LocalChange::Ignored`].
pub fn classify_local(event: &LocalOperationEvent) -> LocalChange {
    match (event.operation, &event.before, &event.after) {
        (LocalOperation::Move, Some(from), Some(to)) => LocalChange::Moved {
            from: from.clone(),
            to: to.clone(),
        },
        (LocalOperation::Move, before, after) => {
            tracing::debug!(
                before = ?before,
                after = ?after,
                "ignoring move event without both ends",
            );
            LocalChange::Ignored
        }
        (LocalOperation::Delete, Some(resource), _) => LocalChange::Deleted(resource.clone()),
        (LocalOperation::Delete, None, _) => {
            tracing::debug!("ignoring delete event without a resource");
            LocalChange::Ignored
        }
        (LocalOperation::Create | LocalOperation::Save | LocalOperation::Copy, _, _) => {
            LocalChange::Ignored
        }
    }
}

/// Per-kind record counts of an external batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub moved: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.added + self.updated + self.deleted + self.moved
    }
}

pub fn summarize(batch: &FileChangesEvent) -> BatchSummary {
    let mut summary = BatchSummary::default();
    for change in batch.changes() {
        match change.kind {
            ChangeKind::Added => summary.added += 1,
            ChangeKind::Updated => summary.updated += 1,
            ChangeKind::Deleted => summary.deleted += 1,
            ChangeKind::Moved => summary.moved += 1,
        }
    }
    summary
}
