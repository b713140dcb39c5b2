//! Reconciliation engine.
//!
//! Each `handle_*` call is one synchronous pass over the registry: it decides
//! what every affected handle needs, issues disposals directly, and spawns
//! re-opens and reloads as sub-operations. Sub-operations finish on their
//! own schedule; [`Reconciler::next_completed`] yields them and hands any
//! failure to the [`ErrorSink`].
//!
//! Pass order for an external batch: deletes, then updates. For a local move:
//! re-point, then deletes (skipping everything just re-pointed).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use resync_core::{
    is_equal_or_ancestor, rewrite, ChangeKind, FileChangesEvent, GroupId, HandleId, HandleKind,
    LocalOperationEvent, PathCasing, ReconcileConfig, ResourceIdentity,
};

use crate::collaborators::{
    Clock, ContentModel, EditingSurface, ErrorSink, HandleRegistry, ModelAccess, ModelState,
    OpenOptions,
};
use crate::error::ReconcileError;
use crate::ingest::{classify_local, summarize, LocalChange};

/// Everything the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn HandleRegistry>,
    pub surface: Arc<dyn EditingSurface>,
    pub models: Arc<dyn ModelAccess>,
    pub errors: Arc<dyn ErrorSink>,
    pub clock: Arc<dyn Clock>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Unsaved edits.
    Dirty,
    /// The other side of the same side-by-side entry has unsaved edits.
    DirtySibling,
    /// Handle sits at or under the destination of the move being processed.
    MoveDestination,
    /// Re-pointed earlier in the same pass.
    Repointed,
    /// Destination of a local move made within the debounce window, matched
    /// only through case folding: the watcher's report of the old spelling.
    RecentMove,
    /// The same batch also adds the resource back.
    ReAdded,
    CloseOnDeleteDisabled,
    NoModel,
    /// Model is dirty or mid-save.
    NotClean,
    /// Update is presumed to echo the handle's own recent save.
    Debounced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skip {
    pub handle: HandleId,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repoint {
    pub handle: HandleId,
    pub from: ResourceIdentity,
    pub to: ResourceIdentity,
}

/// Decisions taken by one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub disposed: Vec<HandleId>,
    pub repointed: Vec<Repoint>,
    pub reloading: Vec<HandleId>,
    pub reopening: Vec<HandleId>,
    pub skipped: Vec<Skip>,
}

impl PassReport {
    pub fn is_empty(&self) -> bool {
        self.disposed.is_empty()
            && self.repointed.is_empty()
            && self.reloading.is_empty()
            && self.reopening.is_empty()
            && self.skipped.is_empty()
    }

    pub fn skip_reason(&self, handle: HandleId) -> Option<SkipReason> {
        self.skipped
            .iter()
            .find(|skip| skip.handle == handle)
            .map(|skip| skip.reason)
    }

    fn skip(&mut self, handle: HandleId, reason: SkipReason) {
        self.skipped.push(Skip { handle, reason });
    }
}

/// How a reload sub-operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadOutcome {
    ViewRestored,
    /// Content changed, but there was no view state to restore.
    NoViewState,
    /// Modification time did not move; nothing to restore.
    Unmodified,
    /// The handle was disposed or re-pointed while the reload ran.
    NoLongerShowing,
    /// The user edited during the reload; the edit stands.
    SupersededByEdit,
}

/// A finished sub-operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Completed {
    Reopened {
        handle: HandleId,
        resource: ResourceIdentity,
    },
    Reloaded {
        handle: HandleId,
        resource: ResourceIdentity,
        outcome: ReloadOutcome,
    },
}

// ---------------------------------------------------------------------------
// Debounce
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateVerdict {
    Reload,
    /// Within the debounce window of the last save attempt.
    SkipEcho,
}

/// Decide whether an update notification is trusted given the last save
/// attempt. Saves stamped in the future count as within the window.
pub fn update_verdict(
    last_save_attempt: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> UpdateVerdict {
    let Some(saved_at) = last_save_attempt else {
        return UpdateVerdict::Reload;
    };
    let elapsed_ms = now.signed_duration_since(saved_at).num_milliseconds();
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    if elapsed_ms > window_ms {
        UpdateVerdict::Reload
    } else {
        UpdateVerdict::SkipEcho
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum DeleteSignal<'a> {
    Batch(&'a FileChangesEvent),
    Local(&'a ResourceIdentity),
}

/// Destination of a local move, remembered for one debounce window.
#[derive(Debug, Clone)]
struct RecentMove {
    to: ResourceIdentity,
    at: DateTime<Utc>,
}

pub struct Reconciler {
    config: ReconcileConfig,
    collab: Collaborators,
    inflight: JoinSet<Result<Completed, ReconcileError>>,
    recent_moves: Vec<RecentMove>,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig, collab: Collaborators) -> Self {
        Self {
            config,
            collab,
            inflight: JoinSet::new(),
            recent_moves: Vec::new(),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Number of sub-operations still running.
    pub fn pending(&self) -> usize {
        self.inflight.len()
    }

    /// Reconcile a save/move/delete the host performed itself.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle_local_operation(&mut self, event: &LocalOperationEvent) -> PassReport {
        let mut report = PassReport::default();
        match classify_local(event) {
            LocalChange::Moved { from, to } => {
                tracing::debug!(from = %from, to = %to, "reconciling local move");
                let repointed = self.rewrite_moved(&from, &to, &mut report);
                self.dispose_deleted(DeleteSignal::Local(&from), Some(&to), &repointed, &mut report);
                self.remember_move(to);
            }
            LocalChange::Deleted(resource) => {
                tracing::debug!(resource = %resource, "reconciling local delete");
                self.dispose_deleted(DeleteSignal::Local(&resource), None, &HashSet::new(), &mut report);
            }
            LocalChange::Ignored => {}
        }
        report
    }

    /// Reconcile a batch of external filesystem changes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle_file_changes(&mut self, event: &FileChangesEvent) -> PassReport {
        let summary = summarize(event);
        tracing::debug!(
            added = summary.added,
            updated = summary.updated,
            deleted = summary.deleted,
            moved = summary.moved,
            "reconciling external batch",
        );

        let mut report = PassReport::default();
        self.forget_stale_moves();
        if event.got_deleted() {
            self.dispose_deleted(DeleteSignal::Batch(event), None, &HashSet::new(), &mut report);
        }
        if event.got_updated() || event.got_added() {
            self.reload_updated(event, &mut report);
        }
        report
    }

    /// Wait for the next successful sub-operation. Failures are routed to the
    /// error sink and skipped. `None` once nothing is in flight.
    pub async fn next_completed(&mut self) -> Option<Completed> {
        loop {
            let joined = self.inflight.join_next().await?;
            let error = match joined {
                Ok(Ok(done)) => return Some(done),
                Ok(Err(err)) => err,
                Err(join_err) => ReconcileError::TaskJoin(join_err.to_string()),
            };
            tracing::warn!(error = %error, "reconciliation sub-operation failed");
            self.collab.errors.unexpected(&error);
        }
    }

    /// Drain every in-flight sub-operation.
    pub async fn settle(&mut self) -> Vec<Completed> {
        let mut done = Vec::new();
        while let Some(completed) = self.next_completed().await {
            done.push(completed);
        }
        done
    }

    fn remember_move(&mut self, to: ResourceIdentity) {
        let at = self.collab.clock.now();
        self.recent_moves.push(RecentMove { to, at });
    }

    fn forget_stale_moves(&mut self) {
        let now = self.collab.clock.now();
        let window = self.config.debounce_window();
        self.recent_moves
            .retain(|moved| update_verdict(Some(moved.at), now, window) == UpdateVerdict::SkipEcho);
    }

    fn recently_moved_here(&self, resource: &ResourceIdentity) -> bool {
        let casing = self.config.path_casing;
        self.recent_moves
            .iter()
            .any(|moved| is_equal_or_ancestor(&moved.to, resource, casing))
    }

    /// Abort every in-flight sub-operation.
    pub fn abort_pending(&mut self) {
        self.inflight.abort_all();
    }

    fn dispose_deleted(
        &self,
        signal: DeleteSignal<'_>,
        moved_to: Option<&ResourceIdentity>,
        repointed: &HashSet<HandleId>,
        report: &mut PassReport,
    ) {
        let casing = self.config.path_casing;
        let batch = match signal {
            DeleteSignal::Batch(event) => Some(event),
            DeleteSignal::Local(_) => None,
        };
        for group in self.collab.registry.groups() {
            for input in group.handles() {
                let dirty_entry = input.leaves().any(|leaf| leaf.is_dirty);
                for leaf in input.leaves() {
                    let matched = match signal {
                        DeleteSignal::Batch(event) => {
                            event.contains(&leaf.resource, ChangeKind::Deleted, casing)
                        }
                        DeleteSignal::Local(deleted) => {
                            is_equal_or_ancestor(deleted, &leaf.resource, casing)
                        }
                    };
                    if !matched {
                        continue;
                    }

                    let skip = if leaf.is_dirty {
                        Some(SkipReason::Dirty)
                    } else if dirty_entry {
                        Some(SkipReason::DirtySibling)
                    } else if moved_to.is_some_and(|to| is_equal_or_ancestor(to, &leaf.resource, casing)) {
                        Some(SkipReason::MoveDestination)
                    } else if repointed.contains(&leaf.id) {
                        Some(SkipReason::Repointed)
                    } else if batch.is_some_and(|event| {
                        !event.contains(&leaf.resource, ChangeKind::Deleted, PathCasing::Sensitive)
                    }) && self.recently_moved_here(&leaf.resource)
                    {
                        Some(SkipReason::RecentMove)
                    } else if batch
                        .is_some_and(|event| event.contains(&leaf.resource, ChangeKind::Added, casing))
                    {
                        Some(SkipReason::ReAdded)
                    } else if !self.config.close_on_delete {
                        Some(SkipReason::CloseOnDeleteDisabled)
                    } else {
                        None
                    };

                    match skip {
                        Some(reason) => {
                            tracing::debug!(
                                handle = %leaf.id,
                                resource = %leaf.resource,
                                reason = ?reason,
                                "keeping handle despite delete",
                            );
                            report.skip(leaf.id, reason);
                        }
                        None => {
                            tracing::info!(
                                handle = %leaf.id,
                                resource = %leaf.resource,
                                "disposing handle for deleted resource",
                            );
                            self.collab.surface.dispose_handle(leaf);
                            report.disposed.push(leaf.id);
                        }
                    }
                }
            }
        }
    }

    fn rewrite_moved(
        &mut self,
        from: &ResourceIdentity,
        to: &ResourceIdentity,
        report: &mut PassReport,
    ) -> HashSet<HandleId> {
        let casing = self.config.path_casing;
        let mut repointed = HashSet::new();
        for group in self.collab.registry.groups() {
            for input in group.handles() {
                let entry = input.id();
                for leaf in input.leaves() {
                    if !is_equal_or_ancestor(from, &leaf.resource, casing) {
                        continue;
                    }
                    let target = rewrite(from, to, &leaf.resource, casing);
                    let options = OpenOptions {
                        preserve_focus: true,
                        pinned: group.is_pinned(entry),
                        index: group.index_of(entry),
                        inactive: !group.is_active(entry),
                        force_open: false,
                        replacing: Some(leaf.id),
                    };
                    tracing::info!(
                        handle = %leaf.id,
                        from = %leaf.resource,
                        to = %target,
                        "re-pointing handle after move",
                    );
                    report.repointed.push(Repoint {
                        handle: leaf.id,
                        from: leaf.resource.clone(),
                        to: target.clone(),
                    });
                    repointed.insert(leaf.id);
                    self.spawn_reopen(leaf.id, target, options, group.id);
                }
            }
        }
        repointed
    }

    fn reload_updated(&mut self, event: &FileChangesEvent, report: &mut PassReport) {
        let casing = self.config.path_casing;
        let window = self.config.debounce_window();
        let groups = self.collab.registry.groups();
        let now = self.collab.clock.now();

        for visible in self.collab.surface.visible_handles() {
            let entry = visible.input.id();
            let group = groups.iter().find(|group| group.id == visible.group);
            for leaf in visible.input.leaves() {
                let changed = event.contains(&leaf.resource, ChangeKind::Updated, casing)
                    || event.contains(&leaf.resource, ChangeKind::Added, casing);
                if !changed {
                    continue;
                }
                match leaf.kind {
                    HandleKind::Binary => {
                        let options = OpenOptions {
                            preserve_focus: true,
                            pinned: group.is_some_and(|g| g.is_pinned(entry)),
                            index: group.and_then(|g| g.index_of(entry)),
                            inactive: group.is_some_and(|g| !g.is_active(entry)),
                            force_open: true,
                            replacing: Some(leaf.id),
                        };
                        tracing::debug!(
                            handle = %leaf.id,
                            resource = %leaf.resource,
                            "force re-opening binary handle",
                        );
                        report.reopening.push(leaf.id);
                        self.spawn_reopen(leaf.id, leaf.resource.clone(), options, visible.group);
                    }
                    HandleKind::Text => {
                        if leaf.is_dirty {
                            report.skip(leaf.id, SkipReason::Dirty);
                            continue;
                        }
                        let Some(model) = self.collab.models.lookup_model(&leaf.resource) else {
                            report.skip(leaf.id, SkipReason::NoModel);
                            continue;
                        };
                        let state = model.state();
                        if state != ModelState::Clean {
                            tracing::debug!(
                                handle = %leaf.id,
                                state = %state,
                                "not reloading model with pending changes",
                            );
                            report.skip(leaf.id, SkipReason::NotClean);
                            continue;
                        }
                        let last_save = model
                            .last_save_attempt_time()
                            .or(leaf.last_save_attempt_time);
                        match update_verdict(last_save, now, window) {
                            UpdateVerdict::SkipEcho => {
                                tracing::debug!(
                                    handle = %leaf.id,
                                    resource = %leaf.resource,
                                    "update within debounce window of last save",
                                );
                                report.skip(leaf.id, SkipReason::Debounced);
                            }
                            UpdateVerdict::Reload => {
                                report.reloading.push(leaf.id);
                                self.spawn_reload(leaf.id, leaf.resource.clone(), model);
                            }
                        }
                    }
                }
            }
        }
    }

    fn spawn_reopen(
        &mut self,
        handle: HandleId,
        resource: ResourceIdentity,
        options: OpenOptions,
        group: GroupId,
    ) {
        let surface = Arc::clone(&self.collab.surface);
        self.inflight.spawn(async move {
            match surface.open_or_reopen(resource.clone(), options, group).await {
                Ok(()) => Ok(Completed::Reopened { handle, resource }),
                Err(source) => Err(ReconcileError::Reopen { resource, source }),
            }
        });
    }

    fn spawn_reload(
        &mut self,
        handle: HandleId,
        resource: ResourceIdentity,
        model: Arc<dyn ContentModel>,
    ) {
        let surface = Arc::clone(&self.collab.surface);
        self.inflight.spawn(async move {
            let view = surface.view_state(handle);
            let modified_before = model.last_modified_time();
            if let Err(source) = model.reload().await {
                return Err(ReconcileError::Reload { resource, source });
            }

            let outcome = if model.state() != ModelState::Clean {
                ReloadOutcome::SupersededByEdit
            } else if model.last_modified_time() == modified_before {
                ReloadOutcome::Unmodified
            } else if surface.showing(handle).as_ref() != Some(&resource) {
                ReloadOutcome::NoLongerShowing
            } else if let Some(view) = view {
                surface.restore_view_state(handle, view);
                ReloadOutcome::ViewRestored
            } else {
                ReloadOutcome::NoViewState
            };
            tracing::debug!(
                handle = %handle,
                resource = %resource,
                outcome = ?outcome,
                "reload finished",
            );
            Ok(Completed::Reloaded {
                handle,
                resource,
                outcome,
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn never_saved_is_trusted() {
        assert_eq!(
            update_verdict(None, at(0), Duration::from_millis(2000)),
            UpdateVerdict::Reload
        );
    }

    #[test]
    fn debounce_boundary_is_inclusive() {
        let window = Duration::from_millis(2000);
        assert_eq!(update_verdict(Some(at(0)), at(500), window), UpdateVerdict::SkipEcho);
        assert_eq!(update_verdict(Some(at(0)), at(2000), window), UpdateVerdict::SkipEcho);
        assert_eq!(update_verdict(Some(at(0)), at(2001), window), UpdateVerdict::Reload);
        assert_eq!(update_verdict(Some(at(0)), at(3000), window), UpdateVerdict::Reload);
    }

    #[test]
    fn future_save_stamp_counts_as_echo() {
        assert_eq!(
            update_verdict(Some(at(5000)), at(0), Duration::from_millis(2000)),
            UpdateVerdict::SkipEcho
        );
    }

    #[test]
    fn report_lookup_by_handle() {
        let mut report = PassReport::default();
        assert!(report.is_empty());
        report.skip(HandleId(4), SkipReason::Debounced);
        assert_eq!(report.skip_reason(HandleId(4)), Some(SkipReason::Debounced));
        assert_eq!(report.skip_reason(HandleId(5)), None);
    }
}
