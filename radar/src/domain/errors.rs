//! Structured error types for radar
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::types::ServiceState;

/// Fatal errors raised while bringing the sensor up or tearing it down.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Failed to raise locked-memory limit to {limit} bytes")]
    ResourceLimit {
        limit: u64,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load probe artifact {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Permission denied while {action}: {reason}")]
    Permission { action: &'static str, reason: String },

    #[error("Program {0} not found in probe artifact")]
    ProgramNotFound(String),

    #[error("Map {0} not found in probe artifact")]
    MapNotFound(String),

    #[error("Failed to attach {program} to {group}/{event}: {reason}")]
    Attach { program: String, group: String, event: String, reason: String },

    #[error("Failed to open ring buffer on map {map}: {reason}")]
    Source { map: String, reason: String },

    #[error("Failed to release {resource}: {reason}")]
    Release { resource: &'static str, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Pipeline task failed: {0}")]
    Task(String),

    #[error("Startup failed while {}", .phase.activity())]
    Startup {
        phase: ServiceState,
        #[source]
        source: Box<SensorError>,
    },
}

impl SensorError {
    /// Innermost sensor error, looking through [`SensorError::Startup`].
    pub fn root(&self) -> &SensorError {
        match self {
            SensorError::Startup { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the failure was caused by missing privileges.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.root(), SensorError::Permission { .. })
            || matches!(
                self.root(),
                SensorError::ResourceLimit { source, .. } if source.kind() == io::ErrorKind::PermissionDenied
            )
    }
}

/// Returns true if any error in the source chain is an `EPERM`/`EACCES` I/O error.
pub fn caused_by_permission(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::PermissionDenied {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Renders an error and all of its sources on one line.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        out.push_str(": ");
        out.push_str(&e.to_string());
        current = e.source();
    }
    out
}

/// A raw record that could not be turned into an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid record length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// Recoverable anomaly reported by a ring buffer source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Lost {count} samples on CPU {cpu}")]
    Lost { cpu: u32, count: usize },

    #[error("Perf buffer on CPU {cpu} failed: {reason}")]
    Buffer { cpu: u32, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloseError {
    #[error("Ring buffer source already closed")]
    AlreadyClosed,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to serialize events: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
