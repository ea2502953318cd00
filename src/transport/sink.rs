use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex;
use thiserror::Error;

use crate::mapper::SessionEvent;

/// Sink delivery failure.
#[derive(Debug, Error, Diagnostic)]
pub enum SinkError {
    #[error("sink receiver disconnected")]
    #[diagnostic(
        code(ledgerflow::transport::disconnected),
        help("The consumer went away; the record will be redelivered by the caller.")
    )]
    Disconnected,
}

/// Abstraction over an outbound target that consumes full session events.
pub trait RecordSink: Send + Sync {
    /// Deliver one event. The sink decides how to serialize or forward it.
    fn handle(&mut self, event: &SessionEvent) -> Result<(), SinkError>;
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<SessionEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event delivered so far.
    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl RecordSink for MemorySink {
    fn handle(&mut self, event: &SessionEvent) -> Result<(), SinkError> {
        self.entries.lock().push(event.clone());
        Ok(())
    }
}

/// Channel-based sink for streaming to async consumers.
///
/// Events are forwarded without blocking; a dropped receiver surfaces as
/// [`SinkError::Disconnected`].
pub struct ChannelSink {
    tx: flume::Sender<SessionEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: flume::Sender<SessionEvent>) -> Self {
        Self { tx }
    }
}

impl RecordSink for ChannelSink {
    fn handle(&mut self, event: &SessionEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .map_err(|_| SinkError::Disconnected)
    }
}
