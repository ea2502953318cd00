//! What a fiber is waiting on, and how each round of execution ends.
//!
//! Every `start`/`resume` round completes with exactly one [`FlowIoRequest`]:
//! either a `Suspended` wrapper pairing an opaque checkpoint with the inner
//! request that produced it, or a terminal outcome. Exhaustive matching at
//! every consumer is a correctness requirement; an unhandled variant would
//! silently drop protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::FlowError;
use crate::types::SessionId;

/// Produced exclusively by the continuation runtime; consumed by the fiber
/// controller and ultimately by the pipeline that persists checkpoints.
///
/// A checkpoint is meaningful only paired with the exact request that
/// produced it; resuming against a mismatched request must fail fast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FlowIoRequest {
    /// The fiber has just started and checkpointed before any user logic ran.
    InitialCheckpoint,

    /// User logic wants a payload delivered to a counterparty session.
    SessionSend {
        session_id: SessionId,
        payload: Value,
    },

    /// User logic is waiting for the next payload on a session.
    SessionReceive { session_id: SessionId },

    /// Final session flush on normal completion: close these still-open
    /// sessions before the terminal outcome is delivered.
    SubFlowFinished { open_sessions: Vec<SessionId> },

    /// Final session flush on failure: notify these still-open sessions of
    /// the error before the terminal outcome is delivered.
    SubFlowFailed {
        error: FlowError,
        open_sessions: Vec<SessionId>,
    },

    /// The fiber parked: `checkpoint` is the serialized continuation and
    /// `request` the inner I/O request it is waiting on.
    Suspended {
        checkpoint: Vec<u8>,
        request: Box<FlowIoRequest>,
    },

    /// Terminal: user logic returned this result.
    FlowFinished(Value),

    /// Terminal: the flow failed with this error.
    FlowFailed(FlowError),
}

impl FlowIoRequest {
    /// Terminal outcomes end the fiber; everything else expects a resume.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowIoRequest::FlowFinished(_) | FlowIoRequest::FlowFailed(_)
        )
    }

    /// Stable name of the suspension operation, used to key suspension
    /// timing metrics.
    #[must_use]
    pub fn operation_name(&self) -> &'static str {
        match self {
            FlowIoRequest::InitialCheckpoint => "InitialCheckpoint",
            FlowIoRequest::SessionSend { .. } => "SessionSend",
            FlowIoRequest::SessionReceive { .. } => "SessionReceive",
            FlowIoRequest::SubFlowFinished { .. } => "SubFlowFinished",
            FlowIoRequest::SubFlowFailed { .. } => "SubFlowFailed",
            FlowIoRequest::Suspended { request, .. } => request.operation_name(),
            FlowIoRequest::FlowFinished(_) => "FlowFinished",
            FlowIoRequest::FlowFailed(_) => "FlowFailed",
        }
    }
}
