//! Error types for resolution and provider I/O.
//!
//! Absence is not an error here: a read that no provider can satisfy
//! resolves to `None`. Only caller mistakes and backend faults are raised.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No provider can write {path}")]
    WriteUnsupported { path: String },

    #[error("Malformed logical path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("Invalid list pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("I/O error in provider {location}: {source}")]
    BackendIo {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Resource {path} is not valid UTF-8 text")]
    Encoding { path: String },

    #[error("Failed to load weight rules from {path}: {reason}")]
    WeightRules { path: PathBuf, reason: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },
}

impl ResolveError {
    pub(crate) fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ResolveError::MalformedPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(location: impl Into<String>, source: std::io::Error) -> Self {
        ResolveError::BackendIo {
            location: location.into(),
            source,
        }
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;
