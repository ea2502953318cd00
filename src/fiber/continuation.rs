//! Resume-time input for a suspended fiber.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::FlowError;

/// Produced by the pipeline after it has satisfied the pending I/O request;
/// consumed exactly once per suspension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FlowContinuation {
    /// Resume normally, injecting this value as the return of the suspended
    /// call.
    Run(Value),

    /// Resume by raising this error at the suspension point, so user code
    /// can react to an upstream failure.
    Error(FlowError),
}

impl FlowContinuation {
    /// Resume with no meaningful value (acknowledgement-style resumes).
    #[must_use]
    pub fn unit() -> Self {
        FlowContinuation::Run(Value::Null)
    }
}
