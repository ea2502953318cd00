//! User-supplied flow logic.
//!
//! There is no native stack capture here: flow logic promotes its locals to
//! explicit struct fields and exposes them through [`FlowLogic::snapshot`].
//! The suspension points inside [`FlowLogic::call`] are the only places
//! execution state is durably captured; everything between them is volatile
//! and re-executes after a crash, so non-idempotent external side effects
//! between suspensions are an explicit known hazard of this layer.

use async_trait::async_trait;
use serde_json::Value;

use super::context::FlowContext;
use super::FlowError;
use crate::checkpoint::CheckpointPayload;

/// The business-logic callable bound to one flow instance.
///
/// Owned exclusively by one fiber at a time. `call` runs until the flow
/// completes, suspending through the context at every I/O point. After a
/// restart the logic is rebuilt from its last snapshot and `call` runs
/// again from the top; its recorded phase must make it re-issue the pending
/// request rather than repeat earlier segments.
#[async_trait]
pub trait FlowLogic: Send {
    /// Serializable view of all local state, captured at each suspension.
    fn snapshot(&self) -> Value;

    /// Execute the flow to completion.
    async fn call(&mut self, ctx: &mut FlowContext) -> Result<Value, FlowError>;
}

/// Rebuilds flow logic from a deserialized checkpoint after a restart.
pub trait FlowLogicFactory: Send + Sync {
    fn rebuild(&self, payload: &CheckpointPayload) -> Result<Box<dyn FlowLogic>, FlowError>;
}
