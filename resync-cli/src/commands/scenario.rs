//! Scenario files: a seeded workbench plus a list of steps.
//!
//! ```yaml
//! config:
//!   path_casing: sensitive
//! groups:
//!   - entries:
//!       - { resource: /proj/src/x.ts, pinned: true, active: true }
//!       - composite:
//!           primary: { resource: /left.txt }
//!           secondary: { resource: /right.txt }
//! models:
//!   - { resource: /proj/src/x.ts, last_save_ms_ago: 500 }
//! steps:
//!   - local: { operation: move, before: /proj/src, after: /proj/lib }
//!   - external: [{ kind: updated, resource: /proj/lib/x.ts }]
//!   - advance_ms: 3000
//!   - touch: /proj/lib/x.ts
//! ```

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use resync_core::{
    ChangeEvent, CompositeHandle, EditorInput, HandleId, HandleKind, LocalOperationEvent,
    OpenHandle, ReconcileConfig, ResourceIdentity,
};
use resync_engine::memory::{MemoryModel, MemoryWorkbench};
use resync_engine::{ModelState, ViewState};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Overrides the user configuration when present.
    #[serde(default)]
    pub config: Option<ReconcileConfig>,
    /// Clock origin; `*_ms_ago` offsets are relative to it.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    /// Steps are single-key maps (`- advance_ms: 500`), not YAML tags.
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    #[serde(default)]
    pub entries: Vec<EntrySpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EntrySpec {
    Composite { composite: CompositeSpec },
    Leaf(HandleSpec),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandleSpec {
    #[serde(default)]
    pub id: Option<u64>,
    pub resource: ResourceIdentity,
    #[serde(default)]
    pub kind: HandleKind,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub last_save_ms_ago: Option<u64>,
    #[serde(default)]
    pub view_state: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeSpec {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub primary: Option<HandleSpec>,
    #[serde(default)]
    pub secondary: Option<HandleSpec>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub resource: ResourceIdentity,
    #[serde(default)]
    pub state: Option<ModelState>,
    #[serde(default)]
    pub last_save_ms_ago: Option<u64>,
    #[serde(default)]
    pub modified_ms_ago: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// A save/move/delete performed by the host.
    Local(LocalOperationEvent),
    /// One external batch.
    External(Vec<ChangeEvent>),
    AdvanceMs(u64),
    /// The file's content changes on disk.
    Touch(ResourceIdentity),
    /// The file disappears from disk.
    Remove(ResourceIdentity),
    /// The user types while the next reload runs.
    Edit(ResourceIdentity),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Local(event) => {
                write!(f, "local {}", event.operation)?;
                if let Some(before) = &event.before {
                    write!(f, " {before}")?;
                }
                if let Some(after) = &event.after {
                    write!(f, " -> {after}")?;
                }
                Ok(())
            }
            Step::External(changes) => {
                write!(f, "external")?;
                for change in changes {
                    write!(f, " {}:{}", change.kind, change.resource)?;
                    if let Some(to) = &change.moved_to {
                        write!(f, "->{to}")?;
                    }
                }
                Ok(())
            }
            Step::AdvanceMs(ms) => write!(f, "advance {ms}ms"),
            Step::Touch(resource) => write!(f, "touch {resource}"),
            Step::Remove(resource) => write!(f, "remove {resource}"),
            Step::Edit(resource) => write!(f, "edit {resource}"),
        }
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    /// Clock origin, fixed so replays are reproducible.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
            .unwrap_or_else(|| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default())
    }

    /// Populate `bench` with the scenario's groups and models.
    pub fn seed(&self, bench: &MemoryWorkbench, now: DateTime<Utc>) -> Result<()> {
        let mut seen = HashSet::new();
        let mut claim = |id: Option<u64>| -> Result<HandleId> {
            let id = id.map(HandleId).unwrap_or_else(|| bench.next_handle_id());
            if !seen.insert(id) {
                bail!("duplicate handle id {id}");
            }
            Ok(id)
        };

        for group in &self.groups {
            let group_id = bench.add_group();
            for entry in &group.entries {
                let (input, pinned, active, views) = match entry {
                    EntrySpec::Leaf(spec) => {
                        let handle = build_handle(spec, claim(spec.id)?, now);
                        let views = view_of(spec, handle.id);
                        (EditorInput::from(handle), spec.pinned, spec.active, views)
                    }
                    EntrySpec::Composite { composite } => {
                        let id = claim(composite.id)?;
                        let mut views = Vec::new();
                        let mut side = |spec: &Option<HandleSpec>| -> Result<Option<OpenHandle>> {
                            let Some(spec) = spec else { return Ok(None) };
                            let handle = build_handle(spec, claim(spec.id)?, now);
                            views.extend(view_of(spec, handle.id));
                            Ok(Some(handle))
                        };
                        let primary = side(&composite.primary)?;
                        let secondary = side(&composite.secondary)?;
                        let input = EditorInput::from(CompositeHandle {
                            id,
                            primary,
                            secondary,
                        });
                        (input, composite.pinned, composite.active, views)
                    }
                };
                let id = input.id();
                bench.open(group_id, input, pinned);
                if active {
                    bench.activate(group_id, id);
                }
                for (handle, view) in views {
                    bench.set_view_state(handle, view);
                }
            }
        }

        for spec in &self.models {
            let model = bench.add_model(MemoryModel::new(spec.resource.clone()));
            model.set_state(spec.state.unwrap_or(ModelState::Clean));
            model.set_last_save_attempt(spec.last_save_ms_ago.map(|ms| ago(now, ms)));
            model.set_last_modified(spec.modified_ms_ago.map(|ms| ago(now, ms)));
        }
        Ok(())
    }
}

fn build_handle(spec: &HandleSpec, id: HandleId, now: DateTime<Utc>) -> OpenHandle {
    let mut handle = match spec.kind {
        HandleKind::Text => OpenHandle::text(id, spec.resource.clone()),
        HandleKind::Binary => OpenHandle::binary(id, spec.resource.clone()),
    };
    handle.is_dirty = spec.dirty;
    handle.last_save_attempt_time = spec.last_save_ms_ago.map(|ms| ago(now, ms));
    handle
}

fn view_of(spec: &HandleSpec, id: HandleId) -> Vec<(HandleId, ViewState)> {
    spec.view_state
        .clone()
        .map(|view| (id, ViewState(view)))
        .into_iter()
        .collect()
}

fn ago(now: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    now - chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
