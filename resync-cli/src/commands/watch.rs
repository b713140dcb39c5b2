//! `resync watch`: reconcile a seeded workbench against live filesystem events.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use resync_core::ReconcileConfig;
use resync_daemon::LoopEvent;
use resync_engine::memory::MemoryWorkbench;
use resync_engine::{SystemClock, TracingErrorSink};

use super::scenario::Scenario;

/// Arguments for `resync watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directory to watch recursively.
    pub root: PathBuf,

    /// Scenario whose groups and models seed the workbench. Its steps are ignored.
    #[arg(long)]
    pub scenario: Option<PathBuf>,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let bench = Arc::new(MemoryWorkbench::new());
        let config = match &self.scenario {
            Some(path) => {
                let scenario = Scenario::load(path)?;
                if !scenario.steps.is_empty() {
                    eprintln!(
                        "{} ignoring {} scripted steps while watching",
                        "note:".yellow(),
                        scenario.steps.len()
                    );
                }
                scenario.seed(&bench, chrono::Utc::now())?;
                effective_config(scenario.config)?
            }
            None => {
                bench.add_group();
                effective_config(None)?
            }
        };

        let collab = bench.collaborators(Arc::new(SystemClock), Arc::new(TracingErrorSink));
        let (observer_tx, mut observer_rx) = resync_daemon::observer_channel();
        let printer = {
            let bench = Arc::clone(&bench);
            thread::spawn(move || {
                let mut printed = 0;
                while let Some(event) = observer_rx.blocking_recv() {
                    if let LoopEvent::Batch { changes, .. } = &event {
                        println!("{} {changes} change(s)", "batch".bold());
                    }
                    let log = bench.command_log();
                    for command in log.iter().skip(printed) {
                        println!(
                            "    {}",
                            serde_json::to_string(command).unwrap_or_else(|_| format!("{command:?}"))
                        );
                    }
                    printed = log.len();
                }
            })
        };

        let stats = resync_daemon::watch_blocking(&self.root, config, collab, Some(observer_tx))
            .with_context(|| format!("failed to watch {}", self.root.display()))?;
        let _ = printer.join();

        println!(
            "{} {} batch(es), {} sub-operation(s) completed",
            "stopped:".bold(),
            stats.batches,
            stats.completed
        );
        Ok(())
    }
}

fn effective_config(from_scenario: Option<ReconcileConfig>) -> Result<ReconcileConfig> {
    resync_daemon::effective_config(from_scenario).context("failed to load configuration")
}
