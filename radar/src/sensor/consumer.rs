//! Consumer side of the pipeline
//!
//! Logs every event and, when a sink is attached, hands it on as a batch
//! of one. Sink failures are logged; they never stop consumption.

use chrono::Utc;
use log::{error, info};

use super::dispatcher::EventReceiver;
use super::sink::EventSink;
use crate::domain::CoreEvent;

#[derive(Default)]
pub struct Consumer {
    sink: Option<Box<dyn EventSink>>,
    pub delivered: u64,
    pub sink_failures: u64,
}

impl Consumer {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Drain `events` until the dispatcher is closed and empty.
    ///
    /// Returns the number of events handled.
    pub async fn run(&mut self, events: &mut EventReceiver) -> u64 {
        let mut handled = 0;
        while let Some(event) = events.recv().await {
            self.handle(&event);
            handled += 1;
        }
        handled
    }

    pub fn handle(&mut self, event: &CoreEvent) {
        info!(
            "file deleted pid={} command={} file={}",
            event.pid(),
            event.command_lossy(),
            event.path().display()
        );

        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match sink.save_events(&[event.to_domain(Utc::now())]) {
            Ok(()) => self.delivered += 1,
            Err(e) => {
                self.sink_failures += 1;
                error!("Failed to save event ({event}): {e}");
            }
        }
    }
}
