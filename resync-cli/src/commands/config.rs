//! `resync config`: print the effective configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use resync_core::config::{config_path_at, load_at};
use resync_core::ReconcileConfig;

/// Arguments for `resync config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Read this file instead of `~/.config/resync/config.yaml`.
    #[arg(long)]
    pub path: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn run(self) -> Result<()> {
        let (source, config) = match self.path {
            Some(path) => {
                let config = ReconcileConfig::from_path(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                (path, config)
            }
            None => {
                let home = dirs::home_dir().context("could not determine home directory")?;
                let config = load_at(&home).context("failed to load configuration")?;
                (config_path_at(&home), config)
            }
        };

        let origin = if source.exists() { "" } else { " (not found, defaults)" };
        println!("# {}{origin}", source.display());
        print!("{}", config.to_yaml().context("failed to render configuration")?);
        Ok(())
    }
}
