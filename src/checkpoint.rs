/*!
Checkpoint boundary: persistence models and the injected serializer.

The core treats checkpoint bytes as opaque. [`CheckpointPayload`] is the
serde-friendly shape handed to the serializer: the flow's explicit state
snapshot, the I/O request it is waiting on, its open sessions, and the
accumulated metric state. This module intentionally does NOT perform I/O;
it is pure data transformation and (de)serialization glue.

The serializer contract is `deserialize(serialize(x)) == x`, exactly. A
checkpoint is only meaningful paired with the request that produced it.
*/

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::fiber::context::Session;
use crate::fiber::io_request::FlowIoRequest;
use crate::metrics::FlowMetricState;
use crate::types::FlowId;

/// Everything needed to resume a suspended flow after a restart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub flow_id: FlowId,
    /// The flow logic's locals, promoted to explicit serializable state.
    #[serde(default)]
    pub flow_state: Value,
    /// The request this checkpoint is paired with.
    pub waiting_for: FlowIoRequest,
    /// Sessions open at the suspension point.
    #[serde(default)]
    pub sessions: Vec<Session>,
    /// Metric accumulator persisted as part of the flow's durable state.
    #[serde(default)]
    pub metrics: FlowMetricState,
}

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint serialization failed: {source}")]
    #[diagnostic(
        code(ledgerflow::checkpoint::serde),
        help("Ensure the flow state snapshot is valid JSON-representable data.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint error: {0}")]
    #[diagnostic(code(ledgerflow::checkpoint::other))]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Injected capability that turns an in-progress continuation into opaque
/// bytes and back. The internal format is outside the core's scope.
pub trait CheckpointSerializer: Send + Sync {
    fn serialize(&self, payload: &CheckpointPayload) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<CheckpointPayload>;
}

/// JSON-backed serializer, the in-tree implementation of the boundary.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCheckpointSerializer;

impl CheckpointSerializer for JsonCheckpointSerializer {
    fn serialize(&self, payload: &CheckpointPayload) -> Result<Vec<u8>> {
        serde_json::to_vec(payload).map_err(|e| CheckpointError::Serde { source: e })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CheckpointPayload> {
        serde_json::from_slice(bytes).map_err(|e| CheckpointError::Serde { source: e })
    }
}
