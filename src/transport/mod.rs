//! Outbound record fan-out.
//!
//! The mapper produces [`OutputRecord`]s; transport-bound ones fan out here
//! to every registered sink. Delivery is at-least-once by contract: a sink
//! failure leaves the record for the caller to retry, and the peer's mapper
//! dedups replays.

pub mod sink;

pub use sink::{ChannelSink, MemorySink, RecordSink, SinkError};

use tracing::warn;

use crate::mapper::OutputRecord;

/// Fans transport-bound records out to every registered sink.
#[derive(Default)]
pub struct TransportRouter {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl TransportRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sink(mut self, sink: impl RecordSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn add_sink(&mut self, sink: impl RecordSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    /// Deliver the transport-bound subset of `records` to every sink;
    /// returns how many events were dispatched. Other record kinds are the
    /// caller's responsibility and pass through untouched.
    pub fn route(&mut self, records: &[OutputRecord]) -> usize {
        let mut dispatched = 0;
        for record in records {
            if let OutputRecord::Transport { event } = record {
                dispatched += 1;
                for sink in &mut self.sinks {
                    if let Err(err) = sink.handle(event) {
                        warn!(session_id = %event.session_id, %err, "transport sink failed");
                    }
                }
            }
        }
        dispatched
    }
}
