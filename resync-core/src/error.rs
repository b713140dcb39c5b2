//! Error types for resync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from parsing a [`ResourceIdentity`](crate::ResourceIdentity).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The input was empty.
    #[error("resource identity must not be empty")]
    Empty,

    /// Identities are absolute; relative inputs are rejected.
    #[error("resource identity must be absolute, got '{input}'")]
    Relative { input: String },
}

/// All errors that can arise while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the file involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML serialization error (printing the effective config).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
