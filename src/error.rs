//! Error types shared by the collectors.
//!
//! Collectors never surface these to the scheduling loop; they are logged and
//! the affected metric group is skipped for the cycle.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Truncated record: read {read} of {expected} bytes")]
    TruncatedRecord { read: usize, expected: usize },

    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Unknown process state [ {0} ]")]
    UnknownProcessState(char),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid config file {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },
}
