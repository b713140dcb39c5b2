//! In-memory workbench.
//!
//! [`MemoryWorkbench`] plays registry, editing surface and model store at
//! once, and records every effective command in an ordered log. Each group
//! shows its active entry; those are the visible handles.
//!
//! Handles keep their id when re-opened at a new resource, so a reload that
//! outlives a move sees [`EditingSurface::showing`] report the new resource.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resync_core::{EditorInput, GroupId, HandleId, OpenHandle, ResourceIdentity};
use serde::Serialize;

use crate::collaborators::{
    Clock, ContentModel, EditingSurface, EditorGroup, ErrorSink, GroupEntry, HandleRegistry,
    ModelAccess, ModelState, OpenOptions, ViewState, VisibleEditor,
};
use crate::error::{ModelError, ReconcileError, SurfaceError};
use crate::reconciler::Collaborators;

// ---------------------------------------------------------------------------
// Command log
// ---------------------------------------------------------------------------

/// A command that changed workbench state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Dispose {
        handle: HandleId,
        resource: ResourceIdentity,
    },
    Open {
        resource: ResourceIdentity,
        group: GroupId,
        options: OpenOptions,
    },
    RestoreViewState {
        handle: HandleId,
    },
}

/// Flattened view of one open leaf, for assertions and tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleRow {
    pub group: GroupId,
    pub index: usize,
    pub handle: HandleId,
    pub resource: ResourceIdentity,
    pub pinned: bool,
    pub active: bool,
    pub dirty: bool,
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ModelInner {
    state: ModelState,
    last_save_attempt: Option<DateTime<Utc>>,
    last_modified: Option<DateTime<Utc>>,
    /// Modification time a reload will observe.
    disk_modified: Option<DateTime<Utc>>,
    missing_on_disk: bool,
    edit_during_reload: bool,
    reloads: usize,
}

/// Content model whose disk side is set by the test or scenario.
#[derive(Debug)]
pub struct MemoryModel {
    resource: ResourceIdentity,
    inner: Mutex<ModelInner>,
}

impl MemoryModel {
    pub fn new(resource: ResourceIdentity) -> Self {
        Self {
            resource,
            inner: Mutex::new(ModelInner {
                state: ModelState::Clean,
                last_save_attempt: None,
                last_modified: None,
                disk_modified: None,
                missing_on_disk: false,
                edit_during_reload: false,
                reloads: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModelInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn resource(&self) -> &ResourceIdentity {
        &self.resource
    }

    pub fn set_state(&self, state: ModelState) {
        self.lock().state = state;
    }

    pub fn set_last_save_attempt(&self, at: Option<DateTime<Utc>>) {
        self.lock().last_save_attempt = at;
    }

    pub fn set_last_modified(&self, at: Option<DateTime<Utc>>) {
        let mut inner = self.lock();
        inner.last_modified = at;
        inner.disk_modified = at;
    }

    /// Simulate the file changing on disk.
    pub fn touch_on_disk(&self, at: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.disk_modified = Some(at);
        inner.missing_on_disk = false;
    }

    /// Simulate the file vanishing; the next reload fails.
    pub fn remove_on_disk(&self) {
        self.lock().missing_on_disk = true;
    }

    /// The next reload ends with the user having typed meanwhile.
    pub fn edit_during_next_reload(&self) {
        self.lock().edit_during_reload = true;
    }

    pub fn reloads(&self) -> usize {
        self.lock().reloads
    }
}

#[async_trait]
impl ContentModel for MemoryModel {
    fn state(&self) -> ModelState {
        self.lock().state
    }

    fn last_save_attempt_time(&self) -> Option<DateTime<Utc>> {
        self.lock().last_save_attempt
    }

    fn last_modified_time(&self) -> Option<DateTime<Utc>> {
        self.lock().last_modified
    }

    async fn reload(&self) -> Result<(), ModelError> {
        tokio::task::yield_now().await;
        let mut inner = self.lock();
        if inner.missing_on_disk {
            return Err(ModelError::NotFound(self.resource.clone()));
        }
        inner.reloads += 1;
        inner.last_modified = inner.disk_modified;
        if std::mem::take(&mut inner.edit_during_reload) {
            inner.state = ModelState::Dirty;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workbench
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    input: EditorInput,
    pinned: bool,
}

#[derive(Debug)]
struct Group {
    id: GroupId,
    entries: Vec<Entry>,
    active: Option<HandleId>,
}

#[derive(Debug, Default)]
struct State {
    groups: Vec<Group>,
    models: HashMap<ResourceIdentity, Arc<MemoryModel>>,
    view_states: HashMap<HandleId, ViewState>,
    failing_opens: Vec<ResourceIdentity>,
    log: Vec<Command>,
    next_id: u64,
}

impl State {
    fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.iter_mut().find(|group| group.id == id)
    }

    fn allocate_id(&mut self) -> HandleId {
        self.next_id += 1;
        HandleId(self.next_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryWorkbench {
    state: Mutex<State>,
}

impl MemoryWorkbench {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an empty group and return its id.
    pub fn add_group(&self) -> GroupId {
        let mut state = self.lock();
        let id = GroupId(state.groups.len() as u32);
        state.groups.push(Group {
            id,
            entries: Vec::new(),
            active: None,
        });
        id
    }

    /// Fresh handle id, unique within this workbench.
    pub fn next_handle_id(&self) -> HandleId {
        self.lock().allocate_id()
    }

    /// Place `input` at the end of `group`. The first entry becomes active.
    pub fn open(&self, group: GroupId, input: impl Into<EditorInput>, pinned: bool) {
        let input = input.into();
        let mut state = self.lock();
        let floor = input
            .leaves()
            .map(|leaf| leaf.id.0)
            .chain(std::iter::once(input.id().0))
            .max()
            .unwrap_or(0);
        state.next_id = state.next_id.max(floor);
        if let Some(target) = state.group_mut(group) {
            if target.active.is_none() {
                target.active = Some(input.id());
            }
            target.entries.push(Entry { input, pinned });
        }
    }

    pub fn activate(&self, group: GroupId, handle: HandleId) {
        if let Some(target) = self.lock().group_mut(group) {
            if let Some(entry) = target.entries.iter().find(|e| e.input.contains(handle)) {
                target.active = Some(entry.input.id());
            }
        }
    }

    /// Flip the dirty flag of every leaf with this id.
    pub fn set_dirty(&self, handle: HandleId, dirty: bool) {
        let mut state = self.lock();
        for group in &mut state.groups {
            for entry in &mut group.entries {
                for leaf in leaves_mut(&mut entry.input) {
                    if leaf.id == handle {
                        leaf.is_dirty = dirty;
                    }
                }
            }
        }
    }

    pub fn add_model(&self, model: MemoryModel) -> Arc<MemoryModel> {
        let model = Arc::new(model);
        self.lock()
            .models
            .insert(model.resource().clone(), Arc::clone(&model));
        model
    }

    pub fn model(&self, resource: &ResourceIdentity) -> Option<Arc<MemoryModel>> {
        self.lock().models.get(resource).cloned()
    }

    pub fn set_view_state(&self, handle: HandleId, view: ViewState) {
        self.lock().view_states.insert(handle, view);
    }

    /// Opens of `resource` fail from now on.
    pub fn fail_opens_of(&self, resource: ResourceIdentity) {
        self.lock().failing_opens.push(resource);
    }

    pub fn command_log(&self) -> Vec<Command> {
        self.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Every open leaf, in group then display order.
    pub fn rows(&self) -> Vec<HandleRow> {
        let state = self.lock();
        let mut rows = Vec::new();
        for group in &state.groups {
            for (index, entry) in group.entries.iter().enumerate() {
                for leaf in entry.input.leaves() {
                    rows.push(HandleRow {
                        group: group.id,
                        index,
                        handle: leaf.id,
                        resource: leaf.resource.clone(),
                        pinned: entry.pinned,
                        active: group.active == Some(entry.input.id()),
                        dirty: leaf.is_dirty,
                    });
                }
            }
        }
        rows
    }

    /// Resources of every open leaf, sorted.
    pub fn open_resources(&self) -> Vec<ResourceIdentity> {
        let mut resources: Vec<_> = self.rows().into_iter().map(|row| row.resource).collect();
        resources.sort();
        resources
    }

    pub fn row(&self, handle: HandleId) -> Option<HandleRow> {
        self.rows().into_iter().find(|row| row.handle == handle)
    }

    /// Wire this workbench in as registry, surface and model store.
    pub fn collaborators(
        self: &Arc<Self>,
        clock: Arc<dyn Clock>,
        errors: Arc<dyn ErrorSink>,
    ) -> Collaborators {
        Collaborators {
            registry: Arc::clone(self) as Arc<dyn HandleRegistry>,
            surface: Arc::clone(self) as Arc<dyn EditingSurface>,
            models: Arc::clone(self) as Arc<dyn ModelAccess>,
            errors,
            clock,
        }
    }
}

fn leaves_mut(input: &mut EditorInput) -> Vec<&mut OpenHandle> {
    match input {
        EditorInput::Leaf(handle) => vec![handle],
        EditorInput::Composite(composite) => composite
            .primary
            .iter_mut()
            .chain(composite.secondary.iter_mut())
            .collect(),
    }
}

impl HandleRegistry for MemoryWorkbench {
    fn groups(&self) -> Vec<EditorGroup> {
        let state = self.lock();
        state
            .groups
            .iter()
            .map(|group| EditorGroup {
                id: group.id,
                entries: group
                    .entries
                    .iter()
                    .map(|entry| GroupEntry {
                        input: entry.input.clone(),
                        pinned: entry.pinned,
                        active: group.active == Some(entry.input.id()),
                    })
                    .collect(),
            })
            .collect()
    }
}

#[async_trait]
impl EditingSurface for MemoryWorkbench {
    async fn open_or_reopen(
        &self,
        resource: ResourceIdentity,
        options: OpenOptions,
        group: GroupId,
    ) -> Result<(), SurfaceError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        if state.failing_opens.contains(&resource) {
            return Err(SurfaceError::OpenFailed {
                resource,
                message: "simulated open failure".to_owned(),
            });
        }
        let fresh_id = state.allocate_id();
        let State { groups, models, log, .. } = &mut *state;
        let target = groups
            .iter_mut()
            .find(|g| g.id == group)
            .ok_or(SurfaceError::GroupGone(group))?;

        let mut previous = None;
        let replaced = options.replacing.and_then(|id| {
            let position = target.entries.iter().position(|e| e.input.contains(id))?;
            let entry = &mut target.entries[position];
            let leaf = leaves_mut(&mut entry.input).into_iter().find(|l| l.id == id)?;
            previous = Some(leaf.resource.clone());
            leaf.resource = resource.clone();
            entry.pinned = options.pinned;
            Some(position)
        });

        let position = match replaced {
            Some(position) => position,
            None => {
                let existing = target.entries.iter().position(|e| {
                    e.input.leaves().any(|leaf| leaf.resource == resource)
                });
                match existing {
                    Some(position) => position,
                    None => {
                        let handle = OpenHandle::text(fresh_id, resource.clone());
                        target.entries.push(Entry {
                            input: handle.into(),
                            pinned: options.pinned,
                        });
                        target.entries.len() - 1
                    }
                }
            }
        };

        if let Some(index) = options.index {
            let index = index.min(target.entries.len() - 1);
            if index != position {
                let entry = target.entries.remove(position);
                target.entries.insert(index, entry);
            }
        }
        if !options.inactive {
            let index = options.index.unwrap_or(position).min(target.entries.len() - 1);
            target.active = Some(target.entries[index].input.id());
        }

        if let Some(old) = previous.filter(|old| *old != resource) {
            if let Some(model) = models.remove(&old) {
                let moved = MemoryModel::new(resource.clone());
                {
                    let source = model.lock();
                    let mut inner = moved.lock();
                    inner.state = source.state;
                    inner.last_save_attempt = source.last_save_attempt;
                    inner.last_modified = source.last_modified;
                    inner.disk_modified = source.disk_modified;
                }
                models.insert(resource.clone(), Arc::new(moved));
            }
        }

        log.push(Command::Open {
            resource,
            group,
            options,
        });
        Ok(())
    }

    fn visible_handles(&self) -> Vec<VisibleEditor> {
        let state = self.lock();
        state
            .groups
            .iter()
            .filter_map(|group| {
                let active = group.active?;
                let entry = group.entries.iter().find(|e| e.input.id() == active)?;
                Some(VisibleEditor {
                    group: group.id,
                    input: entry.input.clone(),
                })
            })
            .collect()
    }

    fn dispose_handle(&self, handle: &OpenHandle) {
        let mut state = self.lock();
        let State { groups, log, view_states, .. } = &mut *state;
        for group in groups.iter_mut() {
            let Some(position) = group.entries.iter().position(|e| e.input.contains(handle.id))
            else {
                continue;
            };
            let entry = group.entries.remove(position);
            if group.active == Some(entry.input.id()) {
                group.active = group.entries.first().map(|e| e.input.id());
            }
            view_states.remove(&handle.id);
            log.push(Command::Dispose {
                handle: handle.id,
                resource: handle.resource.clone(),
            });
            return;
        }
    }

    fn view_state(&self, handle: HandleId) -> Option<ViewState> {
        self.lock().view_states.get(&handle).cloned()
    }

    fn restore_view_state(&self, handle: HandleId, view: ViewState) {
        let mut state = self.lock();
        state.view_states.insert(handle, view);
        state.log.push(Command::RestoreViewState { handle });
    }

    fn showing(&self, handle: HandleId) -> Option<ResourceIdentity> {
        self.rows()
            .into_iter()
            .find(|row| row.handle == handle)
            .map(|row| row.resource)
    }
}

impl ModelAccess for MemoryWorkbench {
    fn lookup_model(&self, resource: &ResourceIdentity) -> Option<Arc<dyn ContentModel>> {
        self.lock()
            .models
            .get(resource)
            .map(|model| Arc::clone(model) as Arc<dyn ContentModel>)
    }
}

/// Error sink that keeps every reported error message.
#[derive(Debug, Default)]
pub struct RecordingErrorSink {
    errors: Mutex<Vec<String>>,
}

impl RecordingErrorSink {
    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn unexpected(&self, error: &ReconcileError) {
        tracing::warn!(error = %error, "recorded unexpected error");
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> ResourceIdentity {
        ResourceIdentity::parse(s).expect("identity")
    }

    #[test]
    fn first_entry_is_active_and_visible() {
        let bench = MemoryWorkbench::new();
        let group = bench.add_group();
        bench.open(group, OpenHandle::text(1, r("/a.txt")), false);
        bench.open(group, OpenHandle::text(2, r("/b.txt")), true);

        let visible = bench.visible_handles();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].input.id(), HandleId(1));
        assert!(bench.row(HandleId(2)).expect("row").pinned);
        assert_eq!(bench.next_handle_id(), HandleId(3));
    }

    #[test]
    fn dispose_is_idempotent() {
        let bench = MemoryWorkbench::new();
        let group = bench.add_group();
        let handle = OpenHandle::text(1, r("/a.txt"));
        bench.open(group, handle.clone(), false);

        bench.dispose_handle(&handle);
        bench.dispose_handle(&handle);
        assert!(bench.rows().is_empty());
        assert_eq!(bench.command_log().len(), 1);
    }

    #[tokio::test]
    async fn reopen_replacing_keeps_id_and_position() {
        let bench = MemoryWorkbench::new();
        let group = bench.add_group();
        bench.open(group, OpenHandle::text(1, r("/a.txt")), false);
        bench.open(group, OpenHandle::text(2, r("/b.txt")), true);

        let options = OpenOptions {
            pinned: true,
            index: Some(1),
            inactive: true,
            replacing: Some(HandleId(2)),
            ..OpenOptions::default()
        };
        bench
            .open_or_reopen(r("/c.txt"), options, group)
            .await
            .expect("reopen");

        let row = bench.row(HandleId(2)).expect("row");
        assert_eq!(row.resource, r("/c.txt"));
        assert_eq!(row.index, 1);
        assert!(row.pinned);
        assert!(!row.active);
        assert_eq!(bench.showing(HandleId(2)), Some(r("/c.txt")));
    }

    #[tokio::test]
    async fn reload_picks_up_disk_time_and_can_fail() {
        let model = MemoryModel::new(r("/a.txt"));
        let t = Utc::now();
        model.touch_on_disk(t);
        model.reload().await.expect("reload");
        assert_eq!(model.last_modified_time(), Some(t));
        assert_eq!(model.reloads(), 1);

        model.remove_on_disk();
        assert_eq!(
            model.reload().await,
            Err(ModelError::NotFound(r("/a.txt")))
        );
    }
}
