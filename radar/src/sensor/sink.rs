//! Downstream event sinks

use std::io::Write;

use crate::domain::{DomainEvent, SinkError};

/// Accepts finalized events in batches.
pub trait EventSink: Send {
    /// # Errors
    /// Returns [`SinkError`] if the batch could not be delivered as a whole
    fn save_events(&mut self, events: &[DomainEvent]) -> Result<(), SinkError>;
}

/// Writes each event as one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn save_events(&mut self, events: &[DomainEvent]) -> Result<(), SinkError> {
        for event in events {
            serde_json::to_writer(&mut self.writer, event)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
