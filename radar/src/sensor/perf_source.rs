//! # Perf Event Array Source
//!
//! Reads deletion records from the probe's `BPF_MAP_TYPE_PERF_EVENT_ARRAY`.
//!
//! The kernel keeps one buffer per CPU. Each buffer is owned by its own
//! reader task, and all readers feed a single channel that
//! [`PerfEventSource::read`] waits on:
//!
//! ```text
//! CPU 0 buffer ──▶ reader task ─┐
//! CPU 1 buffer ──▶ reader task ─┼──▶ channel ──▶ PerfEventSource::read()
//! CPU N buffer ──▶ reader task ─┘
//! ```
//!
//! A failing buffer is reported and retried; readers only stop when they
//! are aborted or the source is gone. [`PerfSourceCloser::close`] aborts the
//! readers and waits until every one of them has dropped its buffer
//! (unmapping it and closing its perf fd). The last senders go with them,
//! which makes a pending `read()` return [`SourceRead::Closed`]. No flag is
//! polled anywhere.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use aya::maps::perf::{AsyncPerfEventArray, AsyncPerfEventArrayBuffer};
use aya::maps::{Map, MapData};
use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{CloseSource, RingBufferSource, SourceRead};
use crate::domain::errors::error_chain;
use crate::domain::{CloseError, RawRecord, ReadError, SensorError};

/// Records handed over by one `read_events` call
const SLOTS_PER_READ: usize = 16;

/// Room for one sample; records are 276 bytes
const SLOT_CAPACITY: usize = 512;

/// Depth of the fan-in channel between the per-CPU readers and `read()`
const FAN_IN_CAPACITY: usize = 64;

/// Delay before re-reading a buffer that just failed, doubled per failure
const RETRY_DELAY_MIN: Duration = Duration::from_millis(10);
const RETRY_DELAY_MAX: Duration = Duration::from_secs(1);

type ReaderSet = Arc<Mutex<Option<Vec<JoinHandle<()>>>>>;

pub struct PerfEventSource {
    records: mpsc::Receiver<Result<RawRecord, ReadError>>,
    readers: ReaderSet,
}

impl PerfEventSource {
    /// Open a buffer on every online CPU and start one reader per buffer.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`SensorError::Source`] if the map is not a perf event array,
    /// the online CPUs cannot be listed, or a per-CPU buffer cannot be opened
    pub fn open(name: &str, map: Map, page_count: usize) -> Result<Self, SensorError> {
        let source_error = |reason: String| SensorError::Source { map: name.to_string(), reason };

        let mut array: AsyncPerfEventArray<MapData> =
            AsyncPerfEventArray::try_from(map).map_err(|e| source_error(error_chain(&e)))?;
        let cpus = aya::util::online_cpus()
            .map_err(|(path, e)| source_error(format!("{path}: {e}")))?;

        let mut buffers = Vec::with_capacity(cpus.len());
        for cpu in &cpus {
            let buffer = array
                .open(*cpu, Some(page_count))
                .map_err(|e| source_error(format!("CPU {cpu}: {}", error_chain(&e))))?;
            buffers.push((*cpu, buffer));
        }

        info!(
            "✓ Opened perf buffers on {} CPUs ({page_count} page(s) each) for map {name}",
            cpus.len()
        );
        Ok(Self::spawn_readers(buffers))
    }

    fn spawn_readers<B: CpuBuffer>(buffers: Vec<(u32, B)>) -> Self {
        let (tx, records) = mpsc::channel(FAN_IN_CAPACITY);
        let readers = buffers
            .into_iter()
            .map(|(cpu, buffer)| tokio::spawn(read_cpu(cpu, buffer, tx.clone())))
            .collect();
        Self { records, readers: Arc::new(Mutex::new(Some(readers))) }
    }
}

impl RingBufferSource for PerfEventSource {
    type Closer = PerfSourceCloser;

    fn closer(&self) -> PerfSourceCloser {
        PerfSourceCloser { readers: Arc::clone(&self.readers) }
    }

    async fn read(&mut self) -> Result<SourceRead, ReadError> {
        match self.records.recv().await {
            Some(Ok(record)) => Ok(SourceRead::Record(record)),
            Some(Err(e)) => Err(e),
            None => Ok(SourceRead::Closed),
        }
    }
}

impl Drop for PerfEventSource {
    fn drop(&mut self) {
        // Readers blocked on an idle buffer would otherwise hold it forever.
        // The handles stay in place so the closer still sees an open source.
        let readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(readers) = readers.as_ref() {
            readers.iter().for_each(JoinHandle::abort);
        }
    }
}

/// Closes a [`PerfEventSource`] from the shutdown path.
pub struct PerfSourceCloser {
    readers: ReaderSet,
}

impl CloseSource for PerfSourceCloser {
    async fn close(&self) -> Result<(), CloseError> {
        let readers = self
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(CloseError::AlreadyClosed)?;

        for reader in &readers {
            reader.abort();
        }
        let count = readers.len();
        for reader in readers {
            // A cancelled task has dropped its future, and with it the buffer
            if let Err(e) = reader.await {
                if e.is_panic() {
                    warn!("perf reader panicked before close: {e}");
                }
            }
        }

        info!("✓ Closed perf buffers ({count} readers)");
        Ok(())
    }
}

/// Counts reported by one read of a per-CPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Batch {
    read: usize,
    lost: usize,
}

/// One CPU's kernel buffer, owned by its reader task.
trait CpuBuffer: Send + 'static {
    /// Fill the front of `slots` with samples.
    fn read_batch(&mut self, slots: &mut [BytesMut])
        -> impl Future<Output = Result<Batch, String>> + Send;
}

impl CpuBuffer for AsyncPerfEventArrayBuffer<MapData> {
    async fn read_batch(&mut self, slots: &mut [BytesMut]) -> Result<Batch, String> {
        let events = self.read_events(slots).await.map_err(|e| error_chain(&e))?;
        Ok(Batch { read: events.read, lost: events.lost })
    }
}

async fn read_cpu<B: CpuBuffer>(
    cpu: u32,
    mut buffer: B,
    tx: mpsc::Sender<Result<RawRecord, ReadError>>,
) {
    let mut slots: Vec<BytesMut> =
        (0..SLOTS_PER_READ).map(|_| BytesMut::with_capacity(SLOT_CAPACITY)).collect();
    let mut retry_delay = RETRY_DELAY_MIN;

    loop {
        let batch = match buffer.read_batch(&mut slots).await {
            Ok(batch) => {
                retry_delay = RETRY_DELAY_MIN;
                batch
            }
            Err(reason) => {
                if tx.send(Err(ReadError::Buffer { cpu, reason })).await.is_err() {
                    return;
                }
                tokio::time::sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(RETRY_DELAY_MAX);
                continue;
            }
        };

        if batch.lost > 0
            && tx.send(Err(ReadError::Lost { cpu, count: batch.lost })).await.is_err()
        {
            return;
        }

        for slot in slots.iter().take(batch.read) {
            if tx.send(Ok(RawRecord::from(&slot[..]))).await.is_err() {
                debug!("perf reader on CPU {cpu}: receiver gone");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    type DropLog = Arc<Mutex<Vec<&'static str>>>;

    /// Scripted per-CPU buffer; idles forever once the script runs out
    struct FakeBuffer {
        script: VecDeque<Result<Vec<u8>, String>>,
        dropped: Option<DropLog>,
    }

    impl FakeBuffer {
        fn idle() -> Self {
            Self { script: VecDeque::new(), dropped: None }
        }

        fn scripted(script: impl IntoIterator<Item = Result<Vec<u8>, String>>) -> Self {
            Self { script: script.into_iter().collect(), dropped: None }
        }
    }

    impl Drop for FakeBuffer {
        fn drop(&mut self) {
            if let Some(log) = &self.dropped {
                log.lock().unwrap().push("buffer_dropped");
            }
        }
    }

    impl CpuBuffer for FakeBuffer {
        async fn read_batch(&mut self, slots: &mut [BytesMut]) -> Result<Batch, String> {
            match self.script.pop_front() {
                Some(Ok(bytes)) => {
                    slots[0].clear();
                    slots[0].extend_from_slice(&bytes);
                    Ok(Batch { read: 1, lost: 0 })
                }
                Some(Err(reason)) => Err(reason),
                None => std::future::pending().await,
            }
        }
    }

    fn idle_source(cpus: u32) -> PerfEventSource {
        PerfEventSource::spawn_readers((0..cpus).map(|cpu| (cpu, FakeBuffer::idle())).collect())
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let mut source = idle_source(4);
        let closer = source.closer();

        let reader = tokio::spawn(async move { source.read().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished(), "read should block while buffers are idle");

        closer.close().await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
        assert_eq!(outcome, Ok(SourceRead::Closed));
    }

    #[tokio::test]
    async fn test_close_returns_after_buffers_are_dropped() {
        let log = DropLog::default();
        let buffers = (0..3)
            .map(|cpu| (cpu, FakeBuffer { script: VecDeque::new(), dropped: Some(log.clone()) }))
            .collect();
        let source = PerfEventSource::spawn_readers(buffers);
        tokio::time::sleep(Duration::from_millis(10)).await;

        source.closer().close().await.unwrap();
        log.lock().unwrap().push("release_attachment");

        assert_eq!(
            *log.lock().unwrap(),
            ["buffer_dropped", "buffer_dropped", "buffer_dropped", "release_attachment"]
        );
    }

    #[tokio::test]
    async fn test_second_close_is_rejected() {
        let source = idle_source(1);
        let closer = source.closer();
        assert_eq!(closer.close().await, Ok(()));
        assert_eq!(closer.close().await, Err(CloseError::AlreadyClosed));
        assert_eq!(source.closer().close().await, Err(CloseError::AlreadyClosed));
    }

    #[tokio::test]
    async fn test_buffer_errors_do_not_stop_reader() {
        let buffer = FakeBuffer::scripted([
            Err("EIO".to_string()),
            Err("EIO".to_string()),
            Ok(vec![7; 3]),
        ]);
        let mut source = PerfEventSource::spawn_readers(vec![(2, buffer)]);

        for _ in 0..2 {
            assert_eq!(
                source.read().await,
                Err(ReadError::Buffer { cpu: 2, reason: "EIO".to_string() })
            );
        }
        assert_eq!(source.read().await, Ok(SourceRead::Record(RawRecord::from(vec![7; 3]))));

        // Still monitored: nothing but the closer ends the source
        let pending = tokio::time::timeout(Duration::from_millis(50), source.read()).await;
        assert!(pending.is_err(), "source closed without close(): {pending:?}");
    }

    #[tokio::test]
    async fn test_failing_buffers_never_close_source() {
        let failing = (0..2)
            .map(|cpu| (cpu, FakeBuffer::scripted(vec![Err("ENODEV".to_string()); 5])))
            .collect();
        let mut source = PerfEventSource::spawn_readers(failing);

        for _ in 0..10 {
            assert!(matches!(source.read().await, Err(ReadError::Buffer { .. })));
        }
        let pending = tokio::time::timeout(Duration::from_millis(50), source.read()).await;
        assert!(pending.is_err());

        source.closer().close().await.unwrap();
        assert_eq!(source.read().await, Ok(SourceRead::Closed));
    }

    #[tokio::test]
    async fn test_drop_leaves_close_available() {
        let source = idle_source(2);
        let closer = source.closer();
        drop(source);
        assert_eq!(closer.close().await, Ok(()));
    }
}
