//! Flow metrics tied to suspension boundaries.
//!
//! [`FlowMetrics`] observes fiber entry/exit and suspension/resumption
//! boundaries to time event lag, fiber execution, and per-session message
//! traffic. The accumulated [`FlowMetricState`] is persisted as part of
//! the flow's durable state so totals survive restarts.

pub mod recorder;

pub use recorder::{FlowMetricsRecorder, MemoryRecorder, MetricObservation, TracingRecorder};

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// Terminal status labels used for completion metrics.
pub const FLOW_STATUS_COMPLETED: &str = "COMPLETED";
pub const FLOW_STATUS_FAILED: &str = "FAILED";

/// Per-session watermark: highest contiguous sequence number already
/// counted, used to distinguish genuinely new sends from replays.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetricState {
    pub highest_contiguous_sequence_number: u64,
}

/// Metric accumulator attached to a flow's durable state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowMetricState {
    pub flow_processing_start_time_ms: i64,
    pub suspension_timestamp_ms: Option<i64>,
    pub suspension_action: Option<String>,
    pub suspension_count: u64,
    pub total_suspension_time_ms: i64,
    pub total_fiber_execution_time_ms: i64,
    pub total_pipeline_execution_time_ms: i64,
    #[serde(default)]
    pub session_metric_state_by_session_id: FxHashMap<String, SessionMetricState>,
}

/// Observes one flow's suspension boundaries for the duration of one
/// pipeline event, accumulating into the durable [`FlowMetricState`].
pub struct FlowMetrics {
    clock: Arc<dyn Clock>,
    recorder: Arc<dyn FlowMetricsRecorder>,
    state: FlowMetricState,
    event_received_ms: i64,
    record_timestamp_ms: i64,
    fiber_start_ms: i64,
    // Out-of-order arrivals buffered until the watermark catches up.
    pending_sequences: FxHashMap<String, BTreeSet<u64>>,
}

impl FlowMetrics {
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        recorder: Arc<dyn FlowMetricsRecorder>,
        state: FlowMetricState,
        record_timestamp_ms: i64,
    ) -> Self {
        let event_received_ms = clock.now_millis();
        Self {
            clock,
            recorder,
            state,
            event_received_ms,
            record_timestamp_ms,
            fiber_start_ms: event_received_ms,
            pending_sequences: FxHashMap::default(),
        }
    }

    /// The durable accumulator, persisted alongside the checkpoint.
    #[must_use]
    pub fn state(&self) -> &FlowMetricState {
        &self.state
    }

    /// Lag between the input record's timestamp and this event's receipt.
    pub fn flow_event_received(&self, flow_event_type: &str) {
        self.recorder
            .record_flow_event_lag(self.event_received_ms - self.record_timestamp_ms, flow_event_type);
    }

    /// Mark the start of flow processing; records start lag when the start
    /// context carries a creation timestamp.
    pub fn flow_started(&mut self, created_at: Option<DateTime<Utc>>) {
        self.state.flow_processing_start_time_ms = self.clock.now_millis();
        if let Some(created) = created_at {
            self.recorder
                .record_flow_start_lag(self.clock.now_millis() - created.timestamp_millis());
        }
    }

    /// The fiber is about to execute; closes out any pending suspension wait.
    pub fn fiber_entered(&mut self) {
        self.fiber_start_ms = self.clock.now_millis();

        if let (Some(action), Some(suspended_at)) = (
            self.state.suspension_action.take(),
            self.state.suspension_timestamp_ms.take(),
        ) {
            let suspension_time = self.clock.now_millis() - suspended_at;
            self.recorder
                .record_suspension_completion(&action, suspension_time);
            self.state.total_suspension_time_ms += suspension_time;
        }
    }

    /// The fiber yielded back to the scheduler.
    pub fn fiber_exited(&mut self) {
        let fiber_execution_time = self.clock.now_millis() - self.fiber_start_ms;
        self.recorder.record_fiber_execution(fiber_execution_time);
        self.state.total_fiber_execution_time_ms += fiber_execution_time;
        self.state.suspension_count += 1;
        self.state.suspension_action = None;
        self.state.suspension_timestamp_ms = None;
    }

    /// The fiber yielded on a named suspension; the wait is timed until the
    /// matching [`fiber_entered`](Self::fiber_entered).
    pub fn fiber_exited_with_suspension(&mut self, operation_name: &str) {
        self.fiber_exited();
        self.state.suspension_action = Some(operation_name.to_string());
        self.state.suspension_timestamp_ms = Some(self.clock.now_millis());
    }

    /// Close out one pipeline event and return the serialized accumulator
    /// for persistence with the checkpoint.
    pub fn flow_event_completed(&mut self, flow_event_type: &str) -> FlowMetricState {
        let pipeline_execution_time = self.clock.now_millis() - self.event_received_ms;
        self.recorder
            .record_pipeline_execution(pipeline_execution_time, flow_event_type);
        self.state.total_pipeline_execution_time_ms += pipeline_execution_time;
        self.state.clone()
    }

    pub fn flow_completed_successfully(&self) {
        self.record_flow_completed(FLOW_STATUS_COMPLETED);
    }

    pub fn flow_failed(&self) {
        self.record_flow_completed(FLOW_STATUS_FAILED);
    }

    /// Count one outbound session message, classifying replays against the
    /// per-session watermark. Out-of-order sequence numbers are buffered
    /// and the watermark advances only through contiguous runs.
    pub fn flow_session_message_sent(
        &mut self,
        flow_event_type: &str,
        session_id: &str,
        sequence_number: Option<u64>,
    ) {
        self.recorder.record_session_messages_sent(flow_event_type);

        let session_state = self
            .state
            .session_metric_state_by_session_id
            .entry(session_id.to_string())
            .or_default();

        if is_replay(sequence_number, session_state) {
            self.recorder
                .record_session_messages_replayed(flow_event_type);
        } else if is_ack_or_error(sequence_number) {
            // Unsequenced traffic never moves the watermark.
        } else if let Some(seq) = sequence_number {
            let pending = self
                .pending_sequences
                .entry(session_id.to_string())
                .or_default();
            pending.insert(seq);
            while pending.remove(&(session_state.highest_contiguous_sequence_number + 1)) {
                session_state.highest_contiguous_sequence_number += 1;
            }
        }
    }

    pub fn flow_session_message_received(&self, flow_event_type: &str) {
        self.recorder
            .record_session_messages_received(flow_event_type);
    }

    fn record_flow_completed(&self, status: &str) {
        let completion_time = self.clock.now_millis() - self.state.flow_processing_start_time_ms;
        self.recorder.record_flow_completion(completion_time, status);
        self.recorder
            .record_total_suspension_time(self.state.total_suspension_time_ms);
        self.recorder
            .record_total_fiber_execution_time(self.state.total_fiber_execution_time_ms);
        self.recorder
            .record_total_pipeline_execution_time(self.state.total_pipeline_execution_time_ms);
    }
}

fn is_ack_or_error(sequence_number: Option<u64>) -> bool {
    matches!(sequence_number, None | Some(0))
}

/// Out-of-order below the watermark means the message was already counted.
fn is_replay(sequence_number: Option<u64>, session_state: &SessionMetricState) -> bool {
    match sequence_number {
        None | Some(0) => false,
        Some(seq) => seq <= session_state.highest_contiguous_sequence_number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_detection_flags_sequences_at_or_below_watermark() {
        let mut state = SessionMetricState::default();
        state.highest_contiguous_sequence_number = 3;
        assert!(is_replay(Some(1), &state));
        assert!(is_replay(Some(3), &state));
        assert!(!is_replay(Some(4), &state));
        assert!(!is_replay(Some(0), &state));
        assert!(!is_replay(None, &state));
    }
}
