//! Explicit execution context for one flow instance.
//!
//! Replaces ambient/thread-local state with explicit context-passing: the
//! worker executing a fiber may change across resumes, so everything the
//! logic needs (session stack, checkpoint capture, interrupt flag) travels
//! in the [`FlowContext`] handed to it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use super::continuation::FlowContinuation;
use super::io_request::FlowIoRequest;
use super::FlowError;
use crate::checkpoint::{CheckpointPayload, CheckpointSerializer};
use crate::metrics::FlowMetricState;
use crate::types::{FlowId, SessionId};

/// Lifecycle of one session as the owning flow sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Open,
    Closing,
    Closed,
}

/// One logical conversation with a counterparty within a flow.
///
/// Owned by the flow instance; the mapper only ever references the id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    /// Whether this side opened the conversation.
    pub initiated: bool,
    pub status: SessionStatus,
}

/// One frame of the flow stack. Top-level flows have exactly one; the
/// completion path treats any other count as a fatal invariant violation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStackItem {
    pub sessions: Vec<Session>,
}

/// Channel pair a fiber parks on: requests flow out to the waiting caller,
/// resumptions flow back in.
pub(crate) struct SuspendGate {
    pub(crate) request_tx: mpsc::Sender<FlowIoRequest>,
    pub(crate) continuation_rx: mpsc::Receiver<Resumption>,
}

/// One resume round: the continuation for the pending request plus the
/// caller's up-to-date metric accumulator, so the next checkpoint
/// serializes current totals rather than the values from spawn time.
pub(crate) struct Resumption {
    pub(crate) continuation: FlowContinuation,
    pub(crate) metrics: FlowMetricState,
}

/// Execution context passed into [`FlowLogic::call`].
///
/// [`FlowLogic::call`]: super::logic::FlowLogic::call
pub struct FlowContext {
    pub flow_id: FlowId,
    flow_stack: Vec<FlowStackItem>,
    /// Metric accumulator snapshot that rides each checkpoint.
    pub metrics: FlowMetricState,
    serializer: Arc<dyn CheckpointSerializer>,
    gate: SuspendGate,
    interrupted: Arc<AtomicBool>,
}

impl FlowContext {
    pub(crate) fn new(
        flow_id: FlowId,
        flow_stack: Vec<FlowStackItem>,
        metrics: FlowMetricState,
        serializer: Arc<dyn CheckpointSerializer>,
        gate: SuspendGate,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            flow_id,
            flow_stack,
            metrics,
            serializer,
            gate,
            interrupted,
        }
    }

    /// Park the fiber on `request`, durably capturing `snapshot` first.
    ///
    /// This is the only place execution state is captured. The call returns
    /// the value injected by [`FlowContinuation::Run`], or raises the
    /// injected error (wrapped in the `Discontinued` marker) at exactly
    /// this call site for [`FlowContinuation::Error`].
    pub async fn suspend(
        &mut self,
        request: FlowIoRequest,
        snapshot: Value,
    ) -> Result<Value, FlowError> {
        // The terminal session flushes run even for an interrupted flow:
        // open sessions must hear about the failure before teardown.
        let terminal_flush = matches!(
            request,
            FlowIoRequest::SubFlowFinished { .. } | FlowIoRequest::SubFlowFailed { .. }
        );
        if !terminal_flush && self.interrupted.load(Ordering::SeqCst) {
            return Err(FlowError::Interrupted);
        }

        let payload = CheckpointPayload {
            flow_id: self.flow_id,
            flow_state: snapshot,
            waiting_for: request.clone(),
            sessions: self.open_sessions(),
            metrics: self.metrics.clone(),
        };
        let checkpoint = self
            .serializer
            .serialize(&payload)
            .map_err(|e| FlowError::Checkpoint(e.to_string()))?;

        trace!(flow_id = %self.flow_id, operation = request.operation_name(), "parking fiber");
        self.gate
            .request_tx
            .send(FlowIoRequest::Suspended {
                checkpoint,
                request: Box::new(request),
            })
            .await
            .map_err(|_| {
                FlowError::Invariant("fiber handle dropped while suspending".to_string())
            })?;

        let resumption = self.gate.continuation_rx.recv().await.ok_or_else(|| {
            FlowError::Invariant("fiber resumed without a continuation".to_string())
        })?;
        self.metrics = resumption.metrics;

        if !terminal_flush && self.interrupted.load(Ordering::SeqCst) {
            return Err(FlowError::Interrupted);
        }

        match resumption.continuation {
            FlowContinuation::Run(value) => Ok(value),
            // The marker keeps upstream logs pointing at the origin of the
            // failure rather than at this internal rethrow.
            FlowContinuation::Error(error) => Err(FlowError::discontinued(error)),
        }
    }

    /// Record a session opened by this flow.
    pub fn open_session(&mut self, session_id: SessionId, initiated: bool) {
        if let Some(item) = self.flow_stack.last_mut() {
            item.sessions.push(Session {
                session_id,
                initiated,
                status: SessionStatus::Open,
            });
        }
    }

    /// Mark a session closed so the completion flush skips it.
    pub fn close_session(&mut self, session_id: &SessionId) {
        for item in &mut self.flow_stack {
            for session in &mut item.sessions {
                if &session.session_id == session_id {
                    session.status = SessionStatus::Closed;
                }
            }
        }
    }

    /// Sessions that are not yet closed, as persisted in checkpoints.
    #[must_use]
    pub fn open_sessions(&self) -> Vec<Session> {
        self.flow_stack
            .iter()
            .flat_map(|item| item.sessions.iter())
            .filter(|s| s.status != SessionStatus::Closed)
            .cloned()
            .collect()
    }

    /// Initiated, still-open session ids that the completion path must flush.
    ///
    /// Requires exactly one remaining flow stack item; zero or more than one
    /// means the stack was corrupted and the instance must fail.
    pub fn remaining_initiated_sessions(&self) -> Result<Vec<SessionId>, FlowError> {
        let item = self.remaining_flow_stack_item()?;
        Ok(item
            .sessions
            .iter()
            .filter(|s| s.initiated && s.status != SessionStatus::Closed)
            .map(|s| s.session_id.clone())
            .collect())
    }

    fn remaining_flow_stack_item(&self) -> Result<&FlowStackItem, FlowError> {
        match self.flow_stack.len() {
            1 => Ok(&self.flow_stack[0]),
            0 => Err(FlowError::Invariant(format!(
                "flow {} should have a single flow stack item when finishing but the stack was empty",
                self.flow_id
            ))),
            n => Err(FlowError::Invariant(format!(
                "flow {} should have a single flow stack item when finishing but contained {n} items",
                self.flow_id
            ))),
        }
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}
