//! # resync-engine
//!
//! Reconciliation of open editor handles against filesystem changes.
//!
//! Build a [`Reconciler`] from a [`ReconcileConfig`](resync_core::ReconcileConfig)
//! and its [`Collaborators`], then feed it local operations with
//! [`Reconciler::handle_local_operation`] and external batches with
//! [`Reconciler::handle_file_changes`].

pub mod collaborators;
pub mod error;
pub mod ingest;
pub mod memory;
pub mod reconciler;

pub use collaborators::{
    Clock, ContentModel, EditingSurface, EditorGroup, ErrorSink, GroupEntry, HandleRegistry,
    Lifecycle, ManualClock, ModelAccess, ModelState, OpenOptions, ShutdownHook, SystemClock,
    Teardown, TracingErrorSink, ViewState, VisibleEditor,
};
pub use error::{ModelError, ReconcileError, SurfaceError};
pub use reconciler::{
    update_verdict, Collaborators, Completed, PassReport, Reconciler, ReloadOutcome, Repoint,
    Skip, SkipReason, UpdateVerdict,
};
