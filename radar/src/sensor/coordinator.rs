//! # Sensor Lifecycle
//!
//! Acquires kernel resources in order, runs the pipeline, and releases
//! everything in reverse order on cancellation.
//!
//! ```text
//! Uninitialized → Initializing → ProbeLoaded → Attached → Running → ShuttingDown → Stopped
//!                      │              │           │
//!                      └──────────────┴───────────┴──▶ Stopped (startup failure)
//! ```
//!
//! ## Tasks
//!
//! - **Producer**: [`run_read_loop`] over the ring buffer source
//! - **Supervisor**: waits for cancellation, then closes the source,
//!   releases the attachment, releases the collection
//! - **Consumer**: driven by the caller through [`Pipeline::events`]
//!
//! The supervisor owns the closer, the attachment and the collection, so it
//! is the only place any of them is released.

use std::fmt;

use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{bounded, EventReceiver};
use super::read_loop::{run_read_loop, ReadLoopStats};
use super::state::StateTracker;
use super::{
    AttachmentHandle, AttachmentManager, CloseSource, ProbeCollection, ProbeLoader,
    ResourceLimiter, RingBufferSource,
};
use crate::config::SensorConfig;
use crate::domain::{SensorError, ServiceState};

/// One step of the shutdown sequence, in the order it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStep {
    CloseSource,
    ReleaseAttachment,
    ReleaseCollection,
}

impl fmt::Display for ReleaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReleaseStep::CloseSource => "close ring buffer",
            ReleaseStep::ReleaseAttachment => "release attachment",
            ReleaseStep::ReleaseCollection => "release probe collection",
        })
    }
}

/// What the supervisor did during shutdown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Steps in execution order with the error each one reported, if any
    pub steps: Vec<(ReleaseStep, Option<String>)>,
}

impl ShutdownReport {
    fn record<E: fmt::Display>(&mut self, step: ReleaseStep, result: Result<(), E>) {
        let failure = result.err().map(|e| {
            error!("Shutdown step '{step}' failed: {e}");
            e.to_string()
        });
        self.steps.push((step, failure));
    }

    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|(_, failure)| failure.is_none())
    }
}

/// Final result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub read_loop: ReadLoopStats,
    pub shutdown: ShutdownReport,
}

/// Background tasks of a running pipeline.
pub struct PipelineTasks {
    producer: JoinHandle<ReadLoopStats>,
    supervisor: JoinHandle<ShutdownReport>,
}

impl PipelineTasks {
    /// Wait for the producer and the supervisor to finish.
    ///
    /// # Errors
    /// Returns [`SensorError::Task`] if either task panicked
    pub async fn join(self) -> Result<PipelineSummary, SensorError> {
        let read_loop = self.producer.await.map_err(|e| SensorError::Task(e.to_string()))?;
        let shutdown = self.supervisor.await.map_err(|e| SensorError::Task(e.to_string()))?;
        Ok(PipelineSummary { read_loop, shutdown })
    }
}

/// A running sensor, as returned by [`Sensor::start`].
pub struct Pipeline {
    /// Decoded events in arrival order; closes after shutdown has drained it
    pub events: EventReceiver,
    pub tasks: PipelineTasks,
    pub state: StateTracker,
}

/// Owns the configuration and the two capabilities needed before any
/// kernel resource exists.
pub struct Sensor<L, P> {
    config: SensorConfig,
    limiter: L,
    loader: P,
    state: StateTracker,
}

impl<L, P> Sensor<L, P>
where
    L: ResourceLimiter,
    P: ProbeLoader,
{
    pub fn new(config: SensorConfig, limiter: L, loader: P) -> Self {
        Self { config, limiter, loader, state: StateTracker::new() }
    }

    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    /// Acquire every resource and start the producer and supervisor tasks.
    ///
    /// Cancelling `cancel` shuts the pipeline down. Must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`SensorError::Startup`] naming the phase that failed. Any
    /// resource acquired before the failure has been released, and the state
    /// is [`ServiceState::Stopped`].
    pub fn start(self, cancel: CancellationToken) -> Result<Pipeline, SensorError> {
        let Sensor { config, limiter, loader, state } = self;

        state.advance(ServiceState::Initializing);
        config
            .validate()
            .and_then(|()| limiter.raise(config.memlock_limit))
            .map_err(|e| fail(&state, ServiceState::Initializing, e))?;

        let mut collection = loader
            .load(&config.object_path)
            .map_err(|e| fail(&state, ServiceState::ProbeLoaded, e))?;
        state.advance(ServiceState::ProbeLoaded);

        let attachment = match collection.attach(&config.attach) {
            Ok(attachment) => attachment,
            Err(e) => {
                release_collection(collection);
                return Err(fail(&state, ServiceState::Attached, e));
            }
        };
        state.advance(ServiceState::Attached);

        let source = match collection.open_source(&config.events_map, config.perf_page_count) {
            Ok(source) => source,
            Err(e) => {
                release_attachment(attachment);
                release_collection(collection);
                return Err(fail(&state, ServiceState::Running, e));
            }
        };
        let closer = source.closer();
        state.advance(ServiceState::Running);

        let (tx, events) = bounded(config.queue_capacity);

        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            let stats = run_read_loop(source, tx, producer_cancel.clone()).await;
            // Source gone without a shutdown request: resources still need releasing
            if !producer_cancel.is_cancelled() {
                warn!("Read loop ended before shutdown was requested, shutting down");
                producer_cancel.cancel();
            }
            stats
        });

        let supervisor =
            tokio::spawn(supervise(collection, attachment, closer, cancel, state.clone()));

        info!("Sensor running: capturing {}/{}", config.attach.group, config.attach.event);
        Ok(Pipeline { events, tasks: PipelineTasks { producer, supervisor }, state })
    }
}

async fn supervise<C, H, K>(
    collection: C,
    attachment: H,
    closer: K,
    cancel: CancellationToken,
    state: StateTracker,
) -> ShutdownReport
where
    C: ProbeCollection,
    H: AttachmentHandle,
    K: CloseSource,
{
    cancel.cancelled().await;
    state.advance(ServiceState::ShuttingDown);
    info!("graceful shutdown");

    // Closing first is what unblocks the read loop
    let mut report = ShutdownReport::default();
    report.record(ReleaseStep::CloseSource, closer.close().await);
    report.record(ReleaseStep::ReleaseAttachment, attachment.release());
    report.record(ReleaseStep::ReleaseCollection, collection.release());

    state.advance(ServiceState::Stopped);
    report
}

fn fail(state: &StateTracker, phase: ServiceState, err: SensorError) -> SensorError {
    error!("Startup failed while {}: {err}", phase.activity());
    state.advance(ServiceState::Stopped);
    SensorError::Startup { phase, source: Box::new(err) }
}

fn release_attachment<H: AttachmentHandle>(attachment: H) {
    if let Err(e) = attachment.release() {
        error!("Failed to release attachment after startup failure: {e}");
    }
}

fn release_collection<C: ProbeCollection>(collection: C) {
    if let Err(e) = collection.release() {
        error!("Failed to release probe collection after startup failure: {e}");
    }
}

