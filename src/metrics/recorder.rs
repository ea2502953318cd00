//! Metric observation sinks.
//!
//! Recorders are infallible at the call site: a broken sink must never
//! affect flow correctness, so implementations swallow their own errors.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Receives timing/count observations at suspension boundaries.
pub trait FlowMetricsRecorder: Send + Sync {
    fn record_flow_event_lag(&self, lag_ms: i64, event_type: &str);
    fn record_flow_start_lag(&self, lag_ms: i64);
    fn record_fiber_execution(&self, duration_ms: i64);
    fn record_suspension_completion(&self, operation: &str, duration_ms: i64);
    fn record_pipeline_execution(&self, duration_ms: i64, event_type: &str);
    fn record_flow_completion(&self, duration_ms: i64, status: &str);
    fn record_total_suspension_time(&self, duration_ms: i64);
    fn record_total_fiber_execution_time(&self, duration_ms: i64);
    fn record_total_pipeline_execution_time(&self, duration_ms: i64);
    fn record_session_messages_sent(&self, event_type: &str);
    fn record_session_messages_replayed(&self, event_type: &str);
    fn record_session_messages_received(&self, event_type: &str);
}

/// One captured observation, for assertions in tests.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricObservation {
    FlowEventLag { lag_ms: i64, event_type: String },
    FlowStartLag { lag_ms: i64 },
    FiberExecution { duration_ms: i64 },
    SuspensionCompletion { operation: String, duration_ms: i64 },
    PipelineExecution { duration_ms: i64, event_type: String },
    FlowCompletion { duration_ms: i64, status: String },
    TotalSuspensionTime { duration_ms: i64 },
    TotalFiberExecutionTime { duration_ms: i64 },
    TotalPipelineExecutionTime { duration_ms: i64 },
    SessionMessagesSent { event_type: String },
    SessionMessagesReplayed { event_type: String },
    SessionMessagesReceived { event_type: String },
}

/// In-memory recorder for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemoryRecorder {
    observations: Arc<Mutex<Vec<MetricObservation>>>,
}

impl MemoryRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of all captured observations.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MetricObservation> {
        self.observations.lock().clone()
    }

    pub fn clear(&self) {
        self.observations.lock().clear();
    }

    fn push(&self, observation: MetricObservation) {
        self.observations.lock().push(observation);
    }
}

impl FlowMetricsRecorder for MemoryRecorder {
    fn record_flow_event_lag(&self, lag_ms: i64, event_type: &str) {
        self.push(MetricObservation::FlowEventLag {
            lag_ms,
            event_type: event_type.to_string(),
        });
    }

    fn record_flow_start_lag(&self, lag_ms: i64) {
        self.push(MetricObservation::FlowStartLag { lag_ms });
    }

    fn record_fiber_execution(&self, duration_ms: i64) {
        self.push(MetricObservation::FiberExecution { duration_ms });
    }

    fn record_suspension_completion(&self, operation: &str, duration_ms: i64) {
        self.push(MetricObservation::SuspensionCompletion {
            operation: operation.to_string(),
            duration_ms,
        });
    }

    fn record_pipeline_execution(&self, duration_ms: i64, event_type: &str) {
        self.push(MetricObservation::PipelineExecution {
            duration_ms,
            event_type: event_type.to_string(),
        });
    }

    fn record_flow_completion(&self, duration_ms: i64, status: &str) {
        self.push(MetricObservation::FlowCompletion {
            duration_ms,
            status: status.to_string(),
        });
    }

    fn record_total_suspension_time(&self, duration_ms: i64) {
        self.push(MetricObservation::TotalSuspensionTime { duration_ms });
    }

    fn record_total_fiber_execution_time(&self, duration_ms: i64) {
        self.push(MetricObservation::TotalFiberExecutionTime { duration_ms });
    }

    fn record_total_pipeline_execution_time(&self, duration_ms: i64) {
        self.push(MetricObservation::TotalPipelineExecutionTime { duration_ms });
    }

    fn record_session_messages_sent(&self, event_type: &str) {
        self.push(MetricObservation::SessionMessagesSent {
            event_type: event_type.to_string(),
        });
    }

    fn record_session_messages_replayed(&self, event_type: &str) {
        self.push(MetricObservation::SessionMessagesReplayed {
            event_type: event_type.to_string(),
        });
    }

    fn record_session_messages_received(&self, event_type: &str) {
        self.push(MetricObservation::SessionMessagesReceived {
            event_type: event_type.to_string(),
        });
    }
}

/// Recorder that emits observations as structured trace events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingRecorder;

impl FlowMetricsRecorder for TracingRecorder {
    fn record_flow_event_lag(&self, lag_ms: i64, event_type: &str) {
        debug!(lag_ms, event_type, "flow event lag");
    }

    fn record_flow_start_lag(&self, lag_ms: i64) {
        debug!(lag_ms, "flow start lag");
    }

    fn record_fiber_execution(&self, duration_ms: i64) {
        debug!(duration_ms, "fiber execution");
    }

    fn record_suspension_completion(&self, operation: &str, duration_ms: i64) {
        debug!(operation, duration_ms, "suspension completed");
    }

    fn record_pipeline_execution(&self, duration_ms: i64, event_type: &str) {
        debug!(duration_ms, event_type, "pipeline execution");
    }

    fn record_flow_completion(&self, duration_ms: i64, status: &str) {
        debug!(duration_ms, status, "flow completed");
    }

    fn record_total_suspension_time(&self, duration_ms: i64) {
        debug!(duration_ms, "total suspension time");
    }

    fn record_total_fiber_execution_time(&self, duration_ms: i64) {
        debug!(duration_ms, "total fiber execution time");
    }

    fn record_total_pipeline_execution_time(&self, duration_ms: i64) {
        debug!(duration_ms, "total pipeline execution time");
    }

    fn record_session_messages_sent(&self, event_type: &str) {
        debug!(event_type, "session message sent");
    }

    fn record_session_messages_replayed(&self, event_type: &str) {
        debug!(event_type, "session message replayed");
    }

    fn record_session_messages_received(&self, event_type: &str) {
        debug!(event_type, "session message received");
    }
}
