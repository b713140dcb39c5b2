//! Bridge from `notify` events to [`FileChangesEvent`] batches.

use std::fs;
use std::path::Path;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use resync_core::{ChangeEvent, FileChangesEvent, ResourceIdentity};

use crate::error::{io_err, DaemonError};

/// Translate one watcher event into change records.
///
/// Renames reported with a single path and no direction are resolved by
/// checking whether the path still exists.
pub fn classify_event(event: &Event) -> Vec<ChangeEvent> {
    classify_event_with(event, |path| path.exists())
}

pub fn classify_event_with(event: &Event, exists: impl Fn(&Path) -> bool) -> Vec<ChangeEvent> {
    let each = |make: fn(ResourceIdentity) -> ChangeEvent| -> Vec<ChangeEvent> {
        event
            .paths
            .iter()
            .filter_map(|path| to_resource(path))
            .map(make)
            .collect()
    };

    match &event.kind {
        EventKind::Create(_) => each(ChangeEvent::added),
        EventKind::Remove(_) => each(ChangeEvent::deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => match (to_resource(from), to_resource(to)) {
                (Some(from), Some(to)) => vec![ChangeEvent::moved(from, to)],
                _ => Vec::new(),
            },
            other => {
                tracing::debug!(paths = other.len(), "ignoring rename without two paths");
                Vec::new()
            }
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(ChangeEvent::deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(ChangeEvent::added),
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .filter_map(|path| {
                let resource = to_resource(path)?;
                Some(if exists(path) {
                    ChangeEvent::added(resource)
                } else {
                    ChangeEvent::deleted(resource)
                })
            })
            .collect(),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Metadata(_) | ModifyKind::Any) => {
            each(ChangeEvent::updated)
        }
        EventKind::Modify(ModifyKind::Other) | EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            Vec::new()
        }
    }
}

fn to_resource(path: &Path) -> Option<ResourceIdentity> {
    match ResourceIdentity::from_path(path) {
        Ok(resource) => Some(resource),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "skipping unusable watcher path");
            None
        }
    }
}

/// Coalesce watcher events into batches. A batch opens with its first change
/// and is flushed `window` later; duplicate records within a batch collapse.
///
/// Returns when shutdown is signalled, when the event source closes (after
/// flushing what is pending), or when the batch receiver is gone.
pub async fn batch_events(
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    batches: mpsc::Sender<FileChangesEvent>,
    window: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut pending = FileChangesEvent::default();
    let mut deadline: Option<Instant> = None;

    loop {
        let flush_at = deadline;
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            event = events.recv() => {
                let Some(event) = event else { break };
                absorb(&mut pending, event);
                if deadline.is_none() && !pending.is_empty() {
                    deadline = Some(Instant::now() + window);
                }
            }
            _ = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                while let Ok(event) = events.try_recv() {
                    absorb(&mut pending, event);
                }
                deadline = None;
                if !flush(&batches, std::mem::take(&mut pending)).await {
                    return Ok(());
                }
            }
        }
    }

    if !pending.is_empty() {
        flush(&batches, pending).await;
    }
    Ok(())
}

fn absorb(pending: &mut FileChangesEvent, event: notify::Result<Event>) {
    let event = match event {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "watcher event error");
            return;
        }
    };
    for change in classify_event(&event) {
        if !pending.changes().contains(&change) {
            pending.push(change);
        }
    }
}

async fn flush(batches: &mpsc::Sender<FileChangesEvent>, batch: FileChangesEvent) -> bool {
    tracing::debug!(changes = batch.len(), "flushing change batch");
    if batches.send(batch).await.is_err() {
        tracing::debug!("batch receiver gone, stopping bridge");
        return false;
    }
    true
}

/// A live recursive watcher plus its batching task.
pub struct WatchBridge {
    root: ResourceIdentity,
    watcher: RecommendedWatcher,
    task: JoinHandle<Result<(), DaemonError>>,
}

impl WatchBridge {
    pub fn start(
        root: &Path,
        window: Duration,
        batches: mpsc::Sender<FileChangesEvent>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self, DaemonError> {
        // FSEvents reports real paths (/private/var/... on macOS).
        let root = fs::canonicalize(root).map_err(|e| io_err(root, e))?;
        let root_id = ResourceIdentity::from_path(&root)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let task = tokio::spawn(batch_events(event_rx, batches, window, shutdown_rx));
        Ok(Self {
            root: root_id,
            watcher,
            task,
        })
    }

    /// Canonical identity of the watched directory.
    pub fn root(&self) -> &ResourceIdentity {
        &self.root
    }

    /// Drop the watcher and wait for the batching task to drain.
    pub async fn stop(self) -> Result<(), DaemonError> {
        let Self { watcher, task, .. } = self;
        drop(watcher);
        task.await.map_err(|err| DaemonError::Join {
            task: "watch_bridge",
            message: err.to_string(),
        })?
    }
}
