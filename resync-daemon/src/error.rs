use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the event loop and the watcher bridge.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(#[from] resync_core::ConfigError),

    #[error("resource error: {0}")]
    Resource(#[from] resync_core::ResourceError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
