//! Flow continuation runtime: fiber lifecycle and the suspend/resume contract.
//!
//! A *fiber* is the execution unit for one flow instance. It runs the
//! user-supplied [`FlowLogic`] on its own cooperative task until the logic
//! either suspends (requesting I/O through [`FlowContext::suspend`]) or
//! terminates. Each suspension durably captures the flow's execution state
//! as an opaque checkpoint; the [`FlowFiberController`] multiplexes many
//! fibers and exposes the `start_flow`/`resume` contract to the pipeline.
//!
//! # Architecture
//!
//! - [`FlowLogic`] - user business logic with locals promoted to explicit,
//!   serializable state (suspension points are the only yield points)
//! - [`FlowContext`] - explicit execution context passed into the logic;
//!   owns the session stack and the suspend gate
//! - [`FlowFiber`] - one running task plus the channel handshake used to
//!   park and resume it
//! - [`FlowFiberController`] - registry of live fibers with eviction on
//!   terminal outcome
//!
//! [`FlowContext::suspend`]: context::FlowContext::suspend

pub mod context;
pub mod continuation;
pub mod controller;
pub mod fiber;
pub mod io_request;
pub mod logic;

pub use context::{FlowContext, FlowStackItem, Session, SessionStatus};
pub use continuation::FlowContinuation;
pub use controller::FlowFiberController;
pub use fiber::FlowFiber;
pub use io_request::FlowIoRequest;
pub use logic::{FlowLogic, FlowLogicFactory};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::types::{FlowId, SessionId};

/// Failure raised inside flow logic or surfaced into it.
///
/// The `Discontinued` variant is the marker for errors injected via
/// [`FlowContinuation::Error`]: something outside user code already failed
/// and was logged at its point of origin, so the resume machinery must not
/// re-log it with a misleading internal backtrace.
#[derive(Clone, Debug, PartialEq, Error, Diagnostic, Serialize, Deserialize)]
pub enum FlowError {
    #[error("flow logic error: {0}")]
    #[diagnostic(code(ledgerflow::fiber::logic))]
    Logic(String),

    #[error("flow was discontinued: {cause}")]
    #[diagnostic(code(ledgerflow::fiber::discontinued))]
    Discontinued { cause: Box<FlowError> },

    #[error("peer reported an error on session {session_id}: {message}")]
    #[diagnostic(code(ledgerflow::fiber::session))]
    Session {
        session_id: SessionId,
        message: String,
    },

    #[error("flow interrupted")]
    #[diagnostic(code(ledgerflow::fiber::interrupted))]
    Interrupted,

    #[error("checkpoint capture failed: {0}")]
    #[diagnostic(code(ledgerflow::fiber::checkpoint))]
    Checkpoint(String),

    #[error("invariant violation: {0}")]
    #[diagnostic(
        code(ledgerflow::fiber::invariant),
        help("Continuing would corrupt flow state; the instance must be failed.")
    )]
    Invariant(String),
}

impl FlowError {
    /// Unwrap the `Discontinued` marker down to the originating error.
    #[must_use]
    pub fn origin(&self) -> &FlowError {
        match self {
            FlowError::Discontinued { cause } => cause.origin(),
            other => other,
        }
    }

    /// Convenience constructor for the injected-error marker.
    #[must_use]
    pub fn discontinued(cause: FlowError) -> Self {
        FlowError::Discontinued {
            cause: Box::new(cause),
        }
    }
}

/// Errors surfaced by the fiber controller to the event pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum FiberError {
    #[error("flow already has an active fiber: {flow_id}")]
    #[diagnostic(
        code(ledgerflow::fiber::duplicate_flow),
        help("The caller must serialize start/resume per flow id.")
    )]
    DuplicateFlow { flow_id: FlowId },

    #[error("no fiber registered for flow: {flow_id}")]
    #[diagnostic(code(ledgerflow::fiber::unknown_flow))]
    UnknownFlow { flow_id: FlowId },

    #[error("fiber registry is at its worker limit of {limit}")]
    #[diagnostic(
        code(ledgerflow::fiber::at_capacity),
        help("Leave the event for redelivery, or raise LEDGERFLOW_WORKER_LIMIT.")
    )]
    AtCapacity { limit: usize },

    #[error("fiber for flow {flow_id} is not suspended; resume does not match a pending checkpoint")]
    #[diagnostic(code(ledgerflow::fiber::not_suspended))]
    NotSuspended { flow_id: FlowId },

    #[error("fiber for flow {flow_id} exited without completing its pending result")]
    #[diagnostic(code(ledgerflow::fiber::fiber_died))]
    FiberDied { flow_id: FlowId },

    #[error(transparent)]
    #[diagnostic(code(ledgerflow::fiber::checkpoint))]
    Checkpoint(#[from] CheckpointError),
}
