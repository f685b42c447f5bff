//! Error types
//!
//! Only [`ConfigError`] aborts a run. Every other error is recovered into a
//! visible failure signal by the component that observes it.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or missing run options, detected before scheduling
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("thread count must be at least 1")]
    ZeroThreads,

    #[error("rerun is enabled but attempts is 0")]
    ZeroRerunAttempts,

    #[error("run timeout must be greater than 0 seconds")]
    ZeroTimeout,

    #[error("engine command is empty")]
    EmptyEngineCommand,

    #[error("no report formats configured")]
    NoReportFormats,

    #[error("duplicate run unit id: {0}")]
    DuplicateUnit(String),

    #[error("run unit {0} has an empty feature uri")]
    EmptyFeatureUri(String),
}

/// The engine could not be invoked for a unit
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("failed to launch engine `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running engine: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine was cancelled")]
    Cancelled,

    #[error("executor panicked: {0}")]
    Panicked(String),
}

/// The failed sub-elements of a unit could not be determined
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("engine did not write a rerun manifest")]
    Missing,

    #[error("rerun manifest {0} is empty")]
    Empty(PathBuf),

    #[error("failed to read rerun manifest {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A report fragment that cannot take part in a merge
#[derive(Error, Debug)]
pub enum FragmentError {
    #[error("failed to read fragment: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("fragment is not valid UTF-8")]
    Utf8,

    #[error("unexpected structure: {0}")]
    Structure(String),
}

/// Failure reported by an event sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
