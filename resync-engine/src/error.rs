//! Error types for resync-engine.

use resync_core::ResourceIdentity;
use thiserror::Error;

/// Failure reported by the editing surface collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("failed to open {resource}: {message}")]
    OpenFailed {
        resource: ResourceIdentity,
        message: String,
    },

    #[error("editor group {0} no longer exists")]
    GroupGone(resync_core::GroupId),
}

/// Failure reported by a content model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("resource not found: {0}")]
    NotFound(ResourceIdentity),

    #[error("model disposed")]
    Disposed,

    #[error("{0}")]
    Other(String),
}

/// Errors raised by asynchronous reconciliation sub-operations.
///
/// None of these abort a reconciliation pass; they are handed to the
/// [`ErrorSink`](crate::ErrorSink).
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("re-open of {resource} failed: {source}")]
    Reopen {
        resource: ResourceIdentity,
        #[source]
        source: SurfaceError,
    },

    #[error("reload of {resource} failed: {source}")]
    Reload {
        resource: ResourceIdentity,
        #[source]
        source: ModelError,
    },

    #[error("sub-operation join error: {0}")]
    TaskJoin(String),
}
