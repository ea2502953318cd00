//! Mapper input events and the output records they produce.
//!
//! Events arrive keyed by session id (or flow id for RPC-triggered
//! starts). Executors consume them and emit [`OutputRecord`]s; side
//! effects are produced, never performed directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{FlowId, MessageDirection, SessionId};

/// Counterparty setup data carried by a session-establishing message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionInit {
    /// Name of the flow the responder should start.
    pub flow_name: String,
    /// Flow id on the initiating side, when known.
    pub flow_id: Option<FlowId>,
}

/// Payload variants of a session event.
///
/// `Ack` and `Error` carry no sequence number of their own and bypass the
/// dedup watermark entirely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SessionPayload {
    Init(SessionInit),
    Data {
        payload: Value,
        /// Piggybacked init: a data message that also establishes the
        /// session, so a lost standalone init cannot wedge the peer.
        session_init: Option<SessionInit>,
    },
    Error {
        message: String,
    },
    Close,
    Ack {
        /// Highest sequence number being acknowledged.
        acked_sequence_number: u64,
    },
}

impl SessionPayload {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SessionPayload::Init(_) => "SessionInit",
            SessionPayload::Data { .. } => "SessionData",
            SessionPayload::Error { .. } => "SessionError",
            SessionPayload::Close => "SessionClose",
            SessionPayload::Ack { .. } => "SessionAck",
        }
    }
}

/// One message on a session, in either direction.
///
/// Sequence numbers are monotonic per direction per session and are the
/// basis for dedup and replay detection. Acks and errors carry `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub sequence_number: Option<u64>,
    pub direction: MessageDirection,
    pub payload: SessionPayload,
    pub timestamp: DateTime<Utc>,
}

/// Command to start a new top-level flow, typically RPC-triggered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartFlow {
    pub flow_id: FlowId,
    pub flow_name: String,
    #[serde(default)]
    pub args: Value,
}

/// Everything the mapper state machine consumes, keyed by session or flow id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FlowMapperEvent {
    Session(SessionEvent),
    StartFlow(StartFlow),
    /// Arm cleanup of the key's state at a future time.
    ScheduleCleanup { expiry_time: DateTime<Utc> },
    /// Fire cleanup; deletes the state if the armed expiry has passed.
    ExecuteCleanup,
}

impl FlowMapperEvent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            FlowMapperEvent::Session(event) => event.payload.kind(),
            FlowMapperEvent::StartFlow(_) => "StartFlow",
            FlowMapperEvent::ScheduleCleanup { .. } => "ScheduleCleanup",
            FlowMapperEvent::ExecuteCleanup => "ExecuteCleanup",
        }
    }
}

/// Routed record produced by one mapper transition.
///
/// The caller commits these together with the new mapper state atomically;
/// the transport retries delivery until acknowledged (at-least-once).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OutputRecord {
    /// Deliver to the flow engine to resume (or start) a fiber.
    FlowEngine {
        flow_id: FlowId,
        event: FlowMapperEvent,
    },
    /// Deliver to the peer-to-peer transport, addressed by session id.
    Transport { event: SessionEvent },
    /// Ask the cleanup scheduler to re-inject `ExecuteCleanup` for this key
    /// once the expiry passes.
    ScheduleCleanup {
        key: String,
        expiry_time: DateTime<Utc>,
    },
}
