//! Interfaces of the collaborators the engine reads from and commands.
//!
//! The engine never mutates handle state itself. It reads snapshots from a
//! [`HandleRegistry`], and asks an [`EditingSurface`] or a [`ContentModel`] to
//! act. Implementations must be cheap to call from the event loop; anything
//! slow belongs behind the async methods.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resync_core::{EditorInput, GroupId, HandleId, OpenHandle, ResourceIdentity};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ReconcileError, SurfaceError};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One top-level entry of an editor group with its presentation attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub input: EditorInput,
    pub pinned: bool,
    pub active: bool,
}

/// Snapshot of one editor group, entries in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorGroup {
    pub id: GroupId,
    pub entries: Vec<GroupEntry>,
}

impl EditorGroup {
    pub fn handles(&self) -> impl Iterator<Item = &EditorInput> {
        self.entries.iter().map(|entry| &entry.input)
    }

    fn entry(&self, id: HandleId) -> Option<&GroupEntry> {
        self.entries.iter().find(|entry| entry.input.contains(id))
    }

    pub fn is_pinned(&self, id: HandleId) -> bool {
        self.entry(id).is_some_and(|entry| entry.pinned)
    }

    pub fn index_of(&self, id: HandleId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.input.contains(id))
    }

    pub fn is_active(&self, id: HandleId) -> bool {
        self.entry(id).is_some_and(|entry| entry.active)
    }
}

/// Read access to the currently open handles.
pub trait HandleRegistry: Send + Sync {
    /// Groups in registry order.
    fn groups(&self) -> Vec<EditorGroup>;
}

// ---------------------------------------------------------------------------
// Editing surface
// ---------------------------------------------------------------------------

/// Presentation attributes forwarded on open/re-open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenOptions {
    pub preserve_focus: bool,
    pub pinned: bool,
    pub index: Option<usize>,
    pub inactive: bool,
    pub force_open: bool,
    /// Handle superseded by this open, if any.
    pub replacing: Option<HandleId>,
}

/// Opaque editor view state (scroll position, selections, folding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewState(pub serde_json::Value);

/// An editor currently visible in some group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleEditor {
    pub group: GroupId,
    pub input: EditorInput,
}

#[async_trait]
pub trait EditingSurface: Send + Sync {
    async fn open_or_reopen(
        &self,
        resource: ResourceIdentity,
        options: OpenOptions,
        group: GroupId,
    ) -> Result<(), SurfaceError>;

    fn visible_handles(&self) -> Vec<VisibleEditor>;

    /// Close `handle`. Unknown or already-closed handles are a no-op.
    ///
    /// Closing one side of a side-by-side entry closes the whole entry.
    fn dispose_handle(&self, handle: &OpenHandle);

    fn view_state(&self, handle: HandleId) -> Option<ViewState>;

    fn restore_view_state(&self, handle: HandleId, state: ViewState);

    /// Resource the handle currently shows, `None` once it is gone.
    fn showing(&self, handle: HandleId) -> Option<ResourceIdentity>;
}

// ---------------------------------------------------------------------------
// Content models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Clean,
    Dirty,
    Saving,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::Clean => write!(f, "clean"),
            ModelState::Dirty => write!(f, "dirty"),
            ModelState::Saving => write!(f, "saving"),
        }
    }
}

#[async_trait]
pub trait ContentModel: Send + Sync {
    fn state(&self) -> ModelState;

    fn last_save_attempt_time(&self) -> Option<DateTime<Utc>>;

    fn last_modified_time(&self) -> Option<DateTime<Utc>>;

    /// Resolves once content has been refreshed from disk.
    async fn reload(&self) -> Result<(), ModelError>;
}

pub trait ModelAccess: Send + Sync {
    fn lookup_model(&self, resource: &ResourceIdentity) -> Option<Arc<dyn ContentModel>>;
}

// ---------------------------------------------------------------------------
// Errors, time, lifecycle
// ---------------------------------------------------------------------------

/// Destination for non-fatal sub-operation failures.
pub trait ErrorSink: Send + Sync {
    fn unexpected(&self, error: &ReconcileError);
}

/// Logs unexpected errors through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn unexpected(&self, error: &ReconcileError) {
        tracing::error!(error = %error, "unexpected reconciliation error");
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Callback run when the host process shuts down.
pub type Teardown = Box<dyn FnOnce() + Send>;

/// Host lifecycle hook.
pub trait Lifecycle: Send + Sync {
    /// Register `teardown`; it runs exactly once, at shutdown.
    fn on_shutdown(&self, teardown: Teardown);
}

/// Lifecycle driven by an explicit [`ShutdownHook::shutdown`] call.
pub struct ShutdownHook {
    teardowns: Mutex<Option<Vec<Teardown>>>,
}

impl ShutdownHook {
    pub fn new() -> Self {
        Self {
            teardowns: Mutex::new(Some(Vec::new())),
        }
    }

    /// Run every registered teardown. Later calls do nothing.
    pub fn shutdown(&self) {
        let pending = self
            .teardowns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        for teardown in pending.into_iter().flatten() {
            teardown();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.teardowns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

impl Default for ShutdownHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for ShutdownHook {
    fn on_shutdown(&self, teardown: Teardown) {
        let mut guard = self
            .teardowns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_mut() {
            Some(pending) => pending.push(teardown),
            // Already shut down: run now.
            None => {
                drop(guard);
                teardown();
            }
        }
    }
}

impl fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHook")
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;
    use resync_core::OpenHandle;

    use super::*;

    #[test]
    fn teardown_runs_exactly_once() {
        let hook = ShutdownHook::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        hook.on_shutdown(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        hook.shutdown();
        hook.shutdown();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(hook.is_shut_down());
    }

    #[test]
    fn late_registration_runs_immediately() {
        let hook = ShutdownHook::new();
        hook.shutdown();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        hook.on_shutdown(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_millis(1500));
        assert_eq!((clock.now() - start).num_milliseconds(), 1500);
    }

    #[test]
    fn group_queries_resolve_leaves_to_their_entry() {
        let r = |s: &str| ResourceIdentity::parse(s).expect("identity");
        let group = EditorGroup {
            id: GroupId(0),
            entries: vec![
                GroupEntry {
                    input: OpenHandle::text(1, r("/a.txt")).into(),
                    pinned: false,
                    active: false,
                },
                GroupEntry {
                    input: resync_core::CompositeHandle {
                        id: HandleId(2),
                        primary: Some(OpenHandle::text(3, r("/b.txt"))),
                        secondary: Some(OpenHandle::text(4, r("/c.txt"))),
                    }
                    .into(),
                    pinned: true,
                    active: true,
                },
            ],
        };
        assert_eq!(group.index_of(HandleId(4)), Some(1));
        assert!(group.is_pinned(HandleId(3)));
        assert!(group.is_active(HandleId(2)));
        assert!(!group.is_active(HandleId(1)));
        assert_eq!(group.index_of(HandleId(99)), None);
        assert_eq!(group.handles().count(), 2);
    }
}
