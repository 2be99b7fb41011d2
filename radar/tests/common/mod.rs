//! In-memory stand-ins for the kernel-facing capabilities.
//!
//! Every capability appends its operation name to a shared call log so tests
//! can assert on acquisition and release order.

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use radar::config::{AttachTarget, SensorConfig};
use radar::domain::{CloseError, RawRecord, ReadError, SensorError};
use radar::sensor::{
    AttachmentHandle, AttachmentManager, CloseSource, ProbeCollection, ProbeLoader,
    ResourceLimiter, RingBufferSource, Sensor, SourceRead,
};
use radar_common::{COMM_LEN, COMM_OFFSET, FILENAME_LEN, FILENAME_OFFSET, RECORD_SIZE};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<&'static str>>>);

impl CallLog {
    pub fn push(&self, call: &'static str) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

/// Which capability calls should fail.
#[derive(Clone, Copy, Default)]
pub struct Faults {
    pub raise: bool,
    pub load: bool,
    pub attach: bool,
    pub open: bool,
    pub release_attachment: bool,
}

/// Build a well-formed 276-byte record.
pub fn record(pid: u32, comm: &str, filename: &str) -> RawRecord {
    assert!(comm.len() <= COMM_LEN && filename.len() <= FILENAME_LEN);
    let mut bytes = vec![0u8; RECORD_SIZE];
    bytes[..4].copy_from_slice(&pid.to_le_bytes());
    bytes[COMM_OFFSET..COMM_OFFSET + comm.len()].copy_from_slice(comm.as_bytes());
    bytes[FILENAME_OFFSET..FILENAME_OFFSET + filename.len()].copy_from_slice(filename.as_bytes());
    RawRecord::from(bytes)
}

/// Test side of a [`ScriptedSource`]: pushes records and read errors.
pub struct Feed {
    tx: mpsc::UnboundedSender<Result<RawRecord, ReadError>>,
}

impl Feed {
    pub fn record(&self, record: RawRecord) {
        let _ = self.tx.send(Ok(record));
    }

    pub fn error(&self, err: ReadError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Ring buffer source fed from a test. A pending read returns `Closed` as
/// soon as the closer fires, and also once the feed is dropped.
pub struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<Result<RawRecord, ReadError>>,
    closed: CancellationToken,
    log: CallLog,
}

pub fn scripted_source(log: &CallLog) -> (ScriptedSource, Feed) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ScriptedSource { rx, closed: CancellationToken::new(), log: log.clone() }, Feed { tx })
}

impl RingBufferSource for ScriptedSource {
    type Closer = ScriptedCloser;

    fn closer(&self) -> ScriptedCloser {
        ScriptedCloser { closed: self.closed.clone(), log: self.log.clone() }
    }

    async fn read(&mut self) -> Result<SourceRead, ReadError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Ok(SourceRead::Closed),
            item = self.rx.recv() => match item {
                Some(Ok(record)) => Ok(SourceRead::Record(record)),
                Some(Err(e)) => Err(e),
                None => Ok(SourceRead::Closed),
            },
        }
    }
}

pub struct ScriptedCloser {
    closed: CancellationToken,
    log: CallLog,
}

impl CloseSource for ScriptedCloser {
    async fn close(&self) -> Result<(), CloseError> {
        if self.closed.is_cancelled() {
            return Err(CloseError::AlreadyClosed);
        }
        self.closed.cancel();
        // Buffers take a moment to go away; logged once they have
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.log.push("close_source");
        Ok(())
    }
}

pub struct MockLimiter {
    log: CallLog,
    fail: bool,
}

impl ResourceLimiter for MockLimiter {
    fn raise(&self, limit: u64) -> Result<(), SensorError> {
        self.log.push("raise_memlock");
        if self.fail {
            return Err(SensorError::ResourceLimit {
                limit,
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        Ok(())
    }
}

pub struct MockLoader {
    log: CallLog,
    faults: Faults,
    source: Mutex<Option<ScriptedSource>>,
}

impl ProbeLoader for MockLoader {
    type Collection = MockCollection;

    fn load(&self, path: &Path) -> Result<MockCollection, SensorError> {
        self.log.push("load");
        if self.faults.load {
            return Err(SensorError::Load {
                path: path.to_path_buf(),
                reason: "invalid ELF".to_string(),
            });
        }
        Ok(MockCollection {
            log: self.log.clone(),
            faults: self.faults,
            source: self.source.lock().unwrap().take(),
        })
    }
}

pub struct MockCollection {
    log: CallLog,
    faults: Faults,
    source: Option<ScriptedSource>,
}

impl AttachmentManager for MockCollection {
    type Handle = MockAttachment;

    fn attach(&mut self, target: &AttachTarget) -> Result<MockAttachment, SensorError> {
        self.log.push("attach");
        if self.faults.attach {
            return Err(SensorError::Attach {
                program: target.program.clone(),
                group: target.group.clone(),
                event: target.event.clone(),
                reason: "no such tracepoint".to_string(),
            });
        }
        Ok(MockAttachment { log: self.log.clone(), fail: self.faults.release_attachment })
    }
}

impl ProbeCollection for MockCollection {
    type Source = ScriptedSource;

    fn open_source(&mut self, map: &str, _page_count: usize) -> Result<ScriptedSource, SensorError> {
        self.log.push("open_source");
        if self.faults.open {
            return Err(SensorError::MapNotFound(map.to_string()));
        }
        self.source.take().ok_or_else(|| SensorError::Source {
            map: map.to_string(),
            reason: "already opened".to_string(),
        })
    }

    fn release(self) -> Result<(), SensorError> {
        self.log.push("release_collection");
        Ok(())
    }
}

pub struct MockAttachment {
    log: CallLog,
    fail: bool,
}

impl AttachmentHandle for MockAttachment {
    fn release(self) -> Result<(), SensorError> {
        self.log.push("release_attachment");
        if self.fail {
            return Err(SensorError::Release {
                resource: "attachment",
                reason: "link already gone".to_string(),
            });
        }
        Ok(())
    }
}

/// A sensor wired to mocks, the feed for its source and the shared call log.
pub fn sensor(faults: Faults) -> (Sensor<MockLimiter, MockLoader>, Feed, CallLog) {
    let log = CallLog::default();
    let (source, feed) = scripted_source(&log);
    let limiter = MockLimiter { log: log.clone(), fail: faults.raise };
    let loader = MockLoader { log: log.clone(), faults, source: Mutex::new(Some(source)) };
    (Sensor::new(SensorConfig::default(), limiter, loader), feed, log)
}
