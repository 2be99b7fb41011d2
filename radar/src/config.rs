//! Sensor configuration
//!
//! Every operating parameter of the pipeline lives here instead of being a
//! literal in the component that uses it. Values come from [`Default`],
//! optionally overlaid by a JSON file, then by command-line flags.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::domain::SensorError;

/// Locked-memory ceiling required for the perf maps (64 MiB)
pub const DEFAULT_MEMLOCK_LIMIT: u64 = 64 * 1024 * 1024;

/// Depth of the queue between the read loop and the consumer
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Where the compiled probe object is expected by default
pub const DEFAULT_OBJECT_PATH: &str = "./radar.o";

/// Tracepoint target of the deletion probe.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AttachTarget {
    /// Program name inside the probe object
    pub program: String,
    /// Tracepoint category (`/sys/kernel/tracing/events/<group>`)
    pub group: String,
    /// Tracepoint name within the group
    pub event: String,
}

impl Default for AttachTarget {
    fn default() -> Self {
        Self {
            program: "trace_unlinkat".to_string(),
            group: "syscalls".to_string(),
            event: "sys_enter_unlinkat".to_string(),
        }
    }
}

impl AttachTarget {
    /// ELF section name libbpf-style objects use for this tracepoint
    pub fn section_name(&self) -> String {
        format!("tracepoint/{}/{}", self.group, self.event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub object_path: PathBuf,
    pub memlock_limit: u64,
    pub attach: AttachTarget,
    /// Name of the perf event array the probe writes to
    pub events_map: String,
    pub queue_capacity: usize,
    /// Pages of perf buffer per CPU (power of two)
    pub perf_page_count: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            object_path: PathBuf::from(DEFAULT_OBJECT_PATH),
            memlock_limit: DEFAULT_MEMLOCK_LIMIT,
            attach: AttachTarget::default(),
            events_map: "events".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            perf_page_count: 1,
        }
    }
}

impl SensorConfig {
    /// Read a JSON config file; missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns [`SensorError::Config`] if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self, SensorError> {
        let content = fs::read_to_string(path)
            .map_err(|e| SensorError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| SensorError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// # Errors
    /// Returns [`SensorError::Config`] describing the first invalid field
    pub fn validate(&self) -> Result<(), SensorError> {
        if self.queue_capacity == 0 {
            return Err(SensorError::Config("queue_capacity must be greater than zero".into()));
        }
        if !self.perf_page_count.is_power_of_two() {
            return Err(SensorError::Config(format!(
                "perf_page_count must be a power of two, got {}",
                self.perf_page_count
            )));
        }
        if self.memlock_limit == 0 {
            return Err(SensorError::Config("memlock_limit must be greater than zero".into()));
        }
        for (field, value) in [
            ("attach.program", &self.attach.program),
            ("attach.group", &self.attach.group),
            ("attach.event", &self.attach.event),
            ("events_map", &self.events_map),
        ] {
            if value.is_empty() {
                return Err(SensorError::Config(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}
