//! Core domain types
//!
//! - [`RawRecord`]: bytes exactly as the kernel delivered them
//! - [`CoreEvent`]: a decoded deletion record
//! - [`DomainEvent`]: the timestamped shape handed to downstream sinks
//! - [`ServiceState`]: lifecycle of the whole sensor

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Event type reported for every decoded deletion
pub const FILE_DELETED: &str = "file_deleted";

/// A sample read from the kernel buffer, not yet validated.
///
/// Lives for one decode call; the decoder never keeps a reference to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord(Vec<u8>);

impl RawRecord {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for RawRecord {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for RawRecord {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// A file deletion observed by the probe.
///
/// Text fields keep the exact bytes the kernel sent (up to the first NUL);
/// nothing is lost to UTF-8 conversion. Use [`CoreEvent::command_lossy`] and
/// [`Path::display`] for human output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreEvent {
    pid: u32,
    command: OsString,
    path: PathBuf,
}

impl CoreEvent {
    pub fn new(pid: u32, command: &[u8], path: &[u8]) -> Self {
        Self {
            pid,
            command: OsStr::from_bytes(command).to_os_string(),
            path: PathBuf::from(OsStr::from_bytes(path)),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &OsStr {
        &self.command
    }

    pub fn command_lossy(&self) -> String {
        self.command.to_string_lossy().into_owned()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Project into the downstream event shape, stamped with `at`.
    pub fn to_domain(&self, at: DateTime<Utc>) -> DomainEvent {
        let mut data = BTreeMap::new();
        data.insert("pid".to_string(), Value::from(self.pid));
        data.insert("command".to_string(), Value::from(self.command_lossy()));
        data.insert("file".to_string(), Value::from(self.path.to_string_lossy().into_owned()));

        DomainEvent { event_type: FILE_DELETED.to_string(), event_time: at, data }
    }
}

impl fmt::Display for CoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid={} command={} file={}",
            self.pid,
            self.command.to_string_lossy(),
            self.path.display()
        )
    }
}

/// Event as seen by downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEvent {
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub data: BTreeMap<String, Value>,
}

/// Lifecycle of the sensor. Variants are declared in transition order;
/// the derived ordering is what keeps transitions forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    ProbeLoaded,
    Attached,
    Running,
    ShuttingDown,
    Stopped,
}

impl ServiceState {
    /// What the sensor is doing while trying to reach this state.
    pub fn activity(self) -> &'static str {
        match self {
            ServiceState::Uninitialized => "idle",
            ServiceState::Initializing => "raising resource limits",
            ServiceState::ProbeLoaded => "loading probe",
            ServiceState::Attached => "attaching probe",
            ServiceState::Running => "opening ring buffer",
            ServiceState::ShuttingDown => "shutting down",
            ServiceState::Stopped => "stopping",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Uninitialized => "uninitialized",
            ServiceState::Initializing => "initializing",
            ServiceState::ProbeLoaded => "probe-loaded",
            ServiceState::Attached => "attached",
            ServiceState::Running => "running",
            ServiceState::ShuttingDown => "shutting-down",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
