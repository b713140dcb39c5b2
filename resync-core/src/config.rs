//! Engine configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.config/resync/config.yaml   (optional: absent means defaults)
//! ```
//!
//! Every field is optional in the file; missing fields take their defaults.
//!
//! # API pattern
//!
//! Same as the rest of the workspace:
//! - `load_at(home)`: explicit home; used in tests with `TempDir`
//! - `load()`: derives home from `dirs::home_dir()`, delegates to `load_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::resource::PathCasing;

/// Minimum age of a local save before an external update for the same
/// resource is trusted.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(2000);

/// Window over which raw watcher notifications are coalesced into one batch.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub debounce_window_ms: u64,
    pub path_casing: PathCasing,
    /// When false, delete notifications never dispose handles.
    pub close_on_delete: bool,
    pub batch_window_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW.as_millis() as u64,
            path_casing: PathCasing::platform(),
            close_on_delete: true,
            batch_window_ms: DEFAULT_BATCH_WINDOW.as_millis() as u64,
        }
    }
}

impl ReconcileConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn with_casing(mut self, casing: PathCasing) -> Self {
        self.path_casing = casing;
        self
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window_ms = window.as_millis() as u64;
        self
    }

    /// Parse a YAML document. `origin` only labels parse errors.
    pub fn from_yaml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Read an explicit config file. The file must exist.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents, path)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// `<home>/.config/resync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".config").join("resync").join("config.yaml")
}

/// Load configuration under `home`; a missing file yields defaults.
pub fn load_at(home: &Path) -> Result<ReconcileConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(ReconcileConfig::default());
    }
    ReconcileConfig::from_path(&path)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<ReconcileConfig, ConfigError> {
    load_at(&home()?)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}
