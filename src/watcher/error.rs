//! Error types for the change-notification system.

use std::path::PathBuf;
use thiserror::Error;

use crate::error::ResolveError;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to start poller: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Change detection failed for {path}: {reason}")]
    DetectionFailed { path: PathBuf, reason: String },

    #[error("Failed to reload weight rules: {reason}")]
    ConfigError { reason: String },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Poller has been cancelled")]
    PollerStopped,
}

impl From<std::io::Error> for WatchError {
    fn from(e: std::io::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
