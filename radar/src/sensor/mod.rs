//! Event capture pipeline
//!
//! Kernel resources are reached only through the capability traits below so
//! the decode, dispatch and shutdown logic can run against substitutes:
//!
//! - [`ResourceLimiter`] - raise `RLIMIT_MEMLOCK` before maps are created
//! - [`ProbeLoader`] - turn a compiled object into a [`ProbeCollection`]
//! - [`AttachmentManager`] - bind a program to a tracepoint
//! - [`RingBufferSource`] - blocking "next record" plus a [`CloseSource`] handle
//!
//! The aya-backed implementations live in [`memlock`], [`loader`] and
//! [`perf_source`]. [`coordinator`] drives the lifecycle on top of them.

use std::future::Future;
use std::path::Path;

use crate::config::AttachTarget;
use crate::domain::{CloseError, RawRecord, ReadError, SensorError};

pub mod consumer;
pub mod coordinator;
pub mod decoder;
pub mod dispatcher;
pub mod loader;
pub mod memlock;
pub mod perf_source;
pub mod read_loop;
pub mod sink;
pub mod state;

// Re-export common types
pub use consumer::Consumer;
pub use coordinator::{Pipeline, PipelineSummary, PipelineTasks, ReleaseStep, Sensor, ShutdownReport};
pub use decoder::{decode, trim_at_nul};
pub use dispatcher::{bounded, EventReceiver, EventSender};
pub use loader::{AyaCollection, AyaProbeLoader, TracepointAttachment};
pub use memlock::MemlockLimiter;
pub use perf_source::{PerfEventSource, PerfSourceCloser};
pub use read_loop::{run_read_loop, ReadLoopStats};
pub use sink::{EventSink, JsonLinesSink};
pub use state::StateTracker;

/// Raises the locked-memory ceiling of the current process.
pub trait ResourceLimiter {
    /// Set both soft and hard `RLIMIT_MEMLOCK` to `limit` bytes.
    ///
    /// # Errors
    /// Returns [`SensorError::ResourceLimit`] if the kernel refuses the new limit
    fn raise(&self, limit: u64) -> Result<(), SensorError>;
}

/// Instantiates a compiled probe artifact against the running kernel.
pub trait ProbeLoader {
    type Collection: ProbeCollection;

    /// # Errors
    /// Returns [`SensorError::Load`] or [`SensorError::Permission`]
    fn load(&self, path: &Path) -> Result<Self::Collection, SensorError>;
}

/// Binds programs of a loaded collection to kernel hooks.
pub trait AttachmentManager {
    type Handle: AttachmentHandle;

    /// # Errors
    /// Returns [`SensorError::Attach`] if the hook is missing or the program
    /// type does not fit it
    fn attach(&mut self, target: &AttachTarget) -> Result<Self::Handle, SensorError>;
}

/// Live binding of one program to one hook.
///
/// Releasing consumes the handle, so it can only happen once.
pub trait AttachmentHandle: Send + 'static {
    /// # Errors
    /// Returns [`SensorError::Release`] if the kernel reports a detach failure
    fn release(self) -> Result<(), SensorError>;
}

/// Loaded programs and maps. Must outlive every attachment made from it.
pub trait ProbeCollection: AttachmentManager + Send + 'static {
    type Source: RingBufferSource;

    /// Open the named perf map for reading, with `page_count` pages per CPU.
    ///
    /// # Errors
    /// Returns [`SensorError::MapNotFound`] or [`SensorError::Source`]
    fn open_source(&mut self, map: &str, page_count: usize) -> Result<Self::Source, SensorError>;

    /// # Errors
    /// Returns [`SensorError::Release`] if unloading fails
    fn release(self) -> Result<(), SensorError>;
}

/// Outcome of a successful [`RingBufferSource::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRead {
    Record(RawRecord),
    /// The source was closed; no further records will arrive.
    Closed,
}

/// Kernel-shared buffer delivering raw records.
pub trait RingBufferSource: Send + 'static {
    type Closer: CloseSource;

    /// Handle that closes this source from another task.
    fn closer(&self) -> Self::Closer;

    /// Wait for the next record.
    ///
    /// An `Err` is a recoverable anomaly (lost samples, a failed per-CPU
    /// buffer); the caller should log it and read again. After the source is
    /// closed every call returns [`SourceRead::Closed`].
    fn read(&mut self) -> impl Future<Output = Result<SourceRead, ReadError>> + Send;
}

/// Interrupts a pending [`RingBufferSource::read`] by releasing the kernel buffers.
pub trait CloseSource: Send + Sync + 'static {
    /// Resolves once the buffers are released, not merely scheduled for release.
    ///
    /// # Errors
    /// Returns [`CloseError::AlreadyClosed`] on every call after the first
    fn close(&self) -> impl Future<Output = Result<(), CloseError>> + Send;
}
