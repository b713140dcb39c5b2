//! resync: keep open editor handles consistent with filesystem changes.
//!
//! # Usage
//!
//! ```text
//! resync replay <scenario.yaml> [--json]
//! resync watch <root> [--scenario <scenario.yaml>]
//! resync config [--path <config.yaml>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigArgs, replay::ReplayArgs, watch::WatchArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "resync",
    version,
    about = "Reconcile open editor handles against filesystem changes",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a scenario against an in-memory workbench and print what happened.
    Replay(ReplayArgs),

    /// Watch a directory and reconcile a seeded workbench until ctrl-c.
    Watch(WatchArgs),

    /// Print the effective configuration as YAML.
    Config(ConfigArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Replay(args) => args.run(),
        Commands::Watch(args) => args.run(),
        Commands::Config(args) => args.run(),
    }
}
