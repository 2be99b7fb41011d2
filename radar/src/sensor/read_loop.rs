//! # Read Loop
//!
//! Producer side of the pipeline: read a record, decode it, enqueue it.
//!
//! ## Record Handling
//!
//! - Record → decode → dispatcher (waits while the queue is full)
//! - Read anomaly (lost samples, failed CPU buffer) → logged, next read
//! - Wrong-sized record → logged, dropped, next read
//! - [`SourceRead::Closed`] → loop ends
//! - Cancellation while waiting on a full queue → loop ends
//!
//! The loop never checks the cancellation token before a read. A pending
//! read is interrupted only by closing the source.

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use super::decoder::decode;
use super::dispatcher::EventSender;
use super::{RingBufferSource, SourceRead};

/// Counters kept by [`run_read_loop`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadLoopStats {
    /// Records returned by the source
    pub records: u64,
    /// Events handed to the dispatcher
    pub dispatched: u64,
    pub decode_errors: u64,
    pub read_errors: u64,
}

/// Run until the source reports closed, the consumer disappears, or
/// `cancel` fires while an enqueue is waiting.
///
/// Drops `events` on return, which closes the dispatcher.
pub async fn run_read_loop<S: RingBufferSource>(
    mut source: S,
    events: EventSender,
    cancel: CancellationToken,
) -> ReadLoopStats {
    let mut stats = ReadLoopStats::default();

    loop {
        let record = match source.read().await {
            Ok(SourceRead::Record(record)) => record,
            Ok(SourceRead::Closed) => {
                debug!("ring buffer closed, stopping read loop");
                break;
            }
            Err(e) => {
                stats.read_errors += 1;
                warn!("Failed to read from ring buffer: {e}");
                continue;
            }
        };
        stats.records += 1;

        let event = match decode(&record) {
            Ok(event) => event,
            Err(e) => {
                stats.decode_errors += 1;
                warn!("Failed to decode record: {e}");
                continue;
            }
        };

        tokio::select! {
            biased;
            sent = events.send(event) => {
                if sent.is_err() {
                    debug!("consumer gone, stopping read loop");
                    break;
                }
                stats.dispatched += 1;
            }
            () = cancel.cancelled() => {
                debug!("cancelled while waiting for queue space");
                break;
            }
        }
    }

    info!(
        "read loop finished: {} records, {} dispatched, {} decode errors, {} read errors",
        stats.records, stats.dispatched, stats.decode_errors, stats.read_errors
    );
    stats
}
