//! Bounded FIFO between the read loop and the consumer
//!
//! A thin wrapper over `tokio::sync::mpsc`: sending waits while the queue is
//! full (backpressure, never drop), receiving waits while it is empty, and
//! the queue closes once the sender is dropped and the remaining events
//! have been drained.

use tokio::sync::mpsc;

use crate::domain::CoreEvent;

/// Create a dispatcher holding at most `capacity` events.
///
/// # Panics
/// Panics if `capacity` is zero; [`crate::config::SensorConfig::validate`]
/// rejects that value before the pipeline is built.
pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx }, EventReceiver { rx })
}

/// Producing half, owned by the read loop.
#[derive(Debug)]
pub struct EventSender {
    tx: mpsc::Sender<CoreEvent>,
}

impl EventSender {
    /// Enqueue `event`, waiting for room if the queue is full.
    ///
    /// # Errors
    /// Gives the event back if the consumer has gone away
    pub async fn send(&self, event: CoreEvent) -> Result<(), CoreEvent> {
        self.tx.send(event).await.map_err(|e| e.0)
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consuming half, driven by the caller.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<CoreEvent>,
}

impl EventReceiver {
    /// Next event in arrival order, or `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<CoreEvent> {
        self.rx.recv().await
    }

    /// Events currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
