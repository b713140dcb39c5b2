//! `resync replay`: run a scenario step by step against an in-memory workbench.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use resync_core::{FileChangesEvent, ReconcileConfig, ResourceIdentity};
use resync_engine::memory::{Command, HandleRow, MemoryModel, MemoryWorkbench, RecordingErrorSink};
use resync_engine::{Clock, Completed, ManualClock, PassReport, Reconciler, ReloadOutcome};

use super::scenario::{Scenario, Step};

/// Arguments for `resync replay`.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Scenario file (YAML).
    pub scenario: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ReplayArgs {
    pub fn run(self) -> Result<()> {
        resync_daemon::init_tracing();
        let scenario = Scenario::load(&self.scenario)?;
        let config = match scenario.config.clone() {
            Some(config) => config,
            None => resync_core::config::load().context("failed to load configuration")?,
        };

        let runtime = resync_daemon::runtime()?;
        let outcome = runtime.block_on(replay(&scenario, config))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("failed to serialize replay JSON")?
            );
        } else {
            print_outcome(&outcome);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct ReplayOutcome {
    pub steps: Vec<StepRecord>,
    pub errors: Vec<String>,
    pub handles: Vec<HandleRow>,
}

#[derive(Debug, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PassReport>,
    pub completed: Vec<Completed>,
    pub commands: Vec<Command>,
}

/// Seed, apply every step and settle its sub-operations before the next.
pub async fn replay(scenario: &Scenario, config: ReconcileConfig) -> Result<ReplayOutcome> {
    let bench = Arc::new(MemoryWorkbench::new());
    let clock = Arc::new(ManualClock::new(scenario.start()));
    let errors = Arc::new(RecordingErrorSink::default());
    scenario.seed(&bench, scenario.start())?;

    let mut engine = Reconciler::new(config, bench.collaborators(clock.clone(), errors.clone()));
    let mut steps = Vec::with_capacity(scenario.steps.len());

    for (index, step) in scenario.steps.iter().enumerate() {
        let log_start = bench.command_log().len();
        let report = match step {
            Step::Local(event) => Some(engine.handle_local_operation(event)),
            Step::External(changes) => {
                Some(engine.handle_file_changes(&FileChangesEvent::new(changes.clone())))
            }
            Step::AdvanceMs(ms) => {
                clock.advance(Duration::from_millis(*ms));
                None
            }
            Step::Touch(resource) => {
                model_for(&bench, resource)?.touch_on_disk(clock.now());
                None
            }
            Step::Remove(resource) => {
                model_for(&bench, resource)?.remove_on_disk();
                None
            }
            Step::Edit(resource) => {
                model_for(&bench, resource)?.edit_during_next_reload();
                None
            }
        };
        let completed = engine.settle().await;
        let commands = bench.command_log().split_off(log_start);
        steps.push(StepRecord {
            index: index + 1,
            step: step.to_string(),
            report,
            completed,
            commands,
        });
    }

    Ok(ReplayOutcome {
        steps,
        errors: errors.errors(),
        handles: bench.rows(),
    })
}

fn model_for(bench: &MemoryWorkbench, resource: &ResourceIdentity) -> Result<Arc<MemoryModel>> {
    bench
        .model(resource)
        .with_context(|| format!("scenario has no model for {resource}"))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct HandleTableRow {
    #[tabled(rename = "group")]
    group: String,
    #[tabled(rename = "index")]
    index: usize,
    #[tabled(rename = "handle")]
    handle: String,
    #[tabled(rename = "resource")]
    resource: String,
    #[tabled(rename = "flags")]
    flags: String,
}

fn print_outcome(outcome: &ReplayOutcome) {
    let separator = "■".repeat(60).bright_black().to_string();
    for record in &outcome.steps {
        println!("{} {}", format!("[{}]", record.index).bold(), record.step);
        if let Some(report) = &record.report {
            for skip in &report.skipped {
                println!("    {} {} ({:?})", "skip".yellow(), skip.handle, skip.reason);
            }
        }
        for command in &record.commands {
            println!("    {}", describe_command(command));
        }
        for done in &record.completed {
            if let Completed::Reloaded { handle, outcome, .. } = done {
                println!("    {} {} ({})", "reloaded".cyan(), handle, outcome_label(*outcome));
            }
        }
    }
    println!("{separator}");

    for error in &outcome.errors {
        println!("{} {error}", "error".red().bold());
    }

    if outcome.handles.is_empty() {
        println!("No open handles.");
        return;
    }
    let rows: Vec<HandleTableRow> = outcome
        .handles
        .iter()
        .map(|row| HandleTableRow {
            group: row.group.to_string(),
            index: row.index,
            handle: row.handle.to_string(),
            resource: row.resource.to_string(),
            flags: flags(row),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn describe_command(command: &Command) -> String {
    match command {
        Command::Dispose { handle, resource } => {
            format!("{} {handle} {resource}", "dispose".red())
        }
        Command::Open {
            resource, options, ..
        } => {
            let verb = if options.force_open {
                "force-open"
            } else {
                "open"
            };
            match options.replacing {
                Some(handle) => format!("{} {handle} -> {resource}", verb.green()),
                None => format!("{} {resource}", verb.green()),
            }
        }
        Command::RestoreViewState { handle } => {
            format!("{} {handle}", "restore-view".blue())
        }
    }
}

fn outcome_label(outcome: ReloadOutcome) -> &'static str {
    match outcome {
        ReloadOutcome::ViewRestored => "view restored",
        ReloadOutcome::NoViewState => "no view state",
        ReloadOutcome::Unmodified => "unmodified",
        ReloadOutcome::NoLongerShowing => "no longer showing",
        ReloadOutcome::SupersededByEdit => "superseded by edit",
    }
}

fn flags(row: &HandleRow) -> String {
    let mut flags = Vec::new();
    if row.active {
        flags.push("active");
    }
    if row.pinned {
        flags.push("pinned");
    }
    if row.dirty {
        flags.push("dirty");
    }
    flags.join(",")
}

#[cfg(test)]
mod tests {
    use resync_core::HandleId;

    use super::*;

    fn r(s: &str) -> ResourceIdentity {
        ResourceIdentity::parse(s).expect("identity")
    }

    fn run(yaml: &str) -> ReplayOutcome {
        let scenario: Scenario = serde_yaml::from_str(yaml).expect("parse");
        let config = scenario.config.clone().unwrap_or_default();
        resync_daemon::runtime()
            .expect("runtime")
            .block_on(replay(&scenario, config))
            .expect("replay")
    }

    #[test]
    fn debounce_then_reload_after_window() {
        let outcome = run(r#"
config: { path_casing: sensitive, debounce_window_ms: 2000 }
groups:
  - entries: [{ resource: /doc.txt }]
models:
  - { resource: /doc.txt, last_save_ms_ago: 0, modified_ms_ago: 0 }
steps:
  - advance_ms: 500
  - external: [{ kind: updated, resource: /doc.txt }]
  - advance_ms: 2500
  - touch: /doc.txt
  - external: [{ kind: updated, resource: /doc.txt }]
"#);
        let first = outcome.steps[1].report.as_ref().expect("report");
        assert_eq!(first.skipped.len(), 1);
        let second = outcome.steps[4].report.as_ref().expect("report");
        assert_eq!(second.reloading, vec![HandleId(1)]);
        assert!(matches!(
            outcome.steps[4].completed.as_slice(),
            [Completed::Reloaded {
                outcome: ReloadOutcome::NoViewState,
                ..
            }]
        ));
    }

    #[test]
    fn unknown_model_is_an_error() {
        let scenario: Scenario = serde_yaml::from_str("steps:\n  - touch: /nope\n").expect("parse");
        let err = resync_daemon::runtime()
            .expect("runtime")
            .block_on(replay(&scenario, ReconcileConfig::default()))
            .expect_err("missing model");
        assert!(err.to_string().contains("no model for /nope"));
    }

    #[test]
    fn records_commands_per_step() {
        let outcome = run(r#"
config: { path_casing: sensitive }
groups:
  - entries: [{ resource: /proj/src/x.ts, pinned: true }]
steps:
  - local: { operation: move, before: /proj/src, after: /proj/lib }
"#);
        assert_eq!(outcome.steps[0].commands.len(), 1);
        assert_eq!(outcome.handles[0].resource, r("/proj/lib/x.ts"));
        assert!(outcome.handles[0].pinned);
    }
}
