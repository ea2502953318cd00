//! One running fiber: the task executing flow logic plus the channel
//! handshake used to park and resume it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::context::{FlowContext, FlowStackItem, Resumption, SuspendGate};
use super::continuation::FlowContinuation;
use super::io_request::FlowIoRequest;
use super::logic::FlowLogic;
use super::{FiberError, FlowError};
use crate::checkpoint::{CheckpointPayload, CheckpointSerializer};
use crate::metrics::FlowMetricState;
use crate::types::FlowId;

/// Handle to one in-flight flow execution.
///
/// The owning controller serializes access: at most one outstanding
/// start/resume round exists per fiber, and each round completes with
/// exactly one [`FlowIoRequest`]. The run wrapper guarantees a terminal
/// outcome is delivered on every exit path, including panics in user
/// logic; a fiber that exits otherwise would block the pipeline forever.
pub struct FlowFiber {
    pub flow_id: FlowId,
    continuation_tx: mpsc::Sender<Resumption>,
    request_rx: mpsc::Receiver<FlowIoRequest>,
    interrupted: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl FlowFiber {
    /// Spawn a fresh fiber. The first request it hands back is the
    /// `InitialCheckpoint` suspension taken before any user logic runs.
    #[must_use]
    pub fn start(
        flow_id: FlowId,
        logic: Box<dyn FlowLogic>,
        serializer: Arc<dyn CheckpointSerializer>,
        metrics: FlowMetricState,
    ) -> Self {
        Self::spawn(
            flow_id,
            logic,
            serializer,
            vec![FlowStackItem::default()],
            metrics,
            false,
        )
    }

    /// Spawn a fiber rehydrated from a checkpoint. The initial-checkpoint
    /// suspension already happened in a previous incarnation, so the logic
    /// re-enters at its recorded phase and re-issues the pending request.
    #[must_use]
    pub fn resume_from_checkpoint(payload: &CheckpointPayload, logic: Box<dyn FlowLogic>,
        serializer: Arc<dyn CheckpointSerializer>,
    ) -> Self {
        let stack = vec![FlowStackItem {
            sessions: payload.sessions.clone(),
        }];
        Self::spawn(
            payload.flow_id,
            logic,
            serializer,
            stack,
            payload.metrics.clone(),
            true,
        )
    }

    fn spawn(
        flow_id: FlowId,
        mut logic: Box<dyn FlowLogic>,
        serializer: Arc<dyn CheckpointSerializer>,
        flow_stack: Vec<FlowStackItem>,
        metrics: FlowMetricState,
        resumed: bool,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel(1);
        let (continuation_tx, continuation_rx) = mpsc::channel(1);
        let interrupted = Arc::new(AtomicBool::new(false));

        let gate = SuspendGate {
            request_tx: request_tx.clone(),
            continuation_rx,
        };
        let mut ctx = FlowContext::new(
            flow_id,
            flow_stack,
            metrics,
            serializer,
            gate,
            Arc::clone(&interrupted),
        );

        let task = tokio::spawn(async move {
            // The wrapper, not run_flow, owns terminal delivery: every exit
            // path (including a panic in user logic) must complete the
            // pending-result slot exactly once.
            let terminal =
                match std::panic::AssertUnwindSafe(run_flow(&mut ctx, logic.as_mut(), resumed))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) if outcome.is_terminal() => outcome,
                    Ok(_) => {
                        warn!(flow_id = %flow_id, "flow failed to complete normally, forcing a failure");
                        FlowIoRequest::FlowFailed(FlowError::Invariant(
                            "flow failed to complete normally".to_string(),
                        ))
                    }
                    Err(_) => {
                        warn!(flow_id = %flow_id, "flow logic panicked");
                        FlowIoRequest::FlowFailed(FlowError::Logic(
                            "flow logic panicked".to_string(),
                        ))
                    }
                };
            if request_tx.send(terminal).await.is_err() {
                debug!(flow_id = %flow_id, "fiber handle dropped before terminal delivery");
            }
        });

        Self {
            flow_id,
            continuation_tx,
            request_rx,
            interrupted,
            task,
        }
    }

    /// Wait for the next request out of the fiber (first round of a start).
    pub async fn next_request(&mut self) -> Result<FlowIoRequest, FiberError> {
        self.request_rx.recv().await.ok_or(FiberError::FiberDied {
            flow_id: self.flow_id,
        })
    }

    /// Deliver a continuation for the pending suspension and wait for the
    /// round to complete with the next request. `metrics` is the caller's
    /// current accumulator; the fiber adopts it so the next checkpoint
    /// persists up-to-date totals.
    pub async fn resume(
        &mut self,
        continuation: FlowContinuation,
        metrics: FlowMetricState,
    ) -> Result<FlowIoRequest, FiberError> {
        self.continuation_tx
            .send(Resumption {
                continuation,
                metrics,
            })
            .await
            .map_err(|_| FiberError::NotSuspended {
                flow_id: self.flow_id,
            })?;
        self.next_request().await
    }

    /// Advisory interrupt: marks the fiber for termination without touching
    /// shared state. Safe to invoke at any time, including mid-suspend;
    /// teardown happens through the normal failure path once control
    /// returns to the fiber.
    pub fn attempt_interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

impl Drop for FlowFiber {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Execute one flow from (re)entry to terminal outcome.
///
/// Returns the terminal request; the spawn wrapper delivers it.
async fn run_flow(
    ctx: &mut FlowContext,
    logic: &mut dyn FlowLogic,
    resumed: bool,
) -> FlowIoRequest {
    if !resumed {
        // Checkpoint before invoking user logic so a crash during the first
        // segment restarts from a well-defined point.
        if let Err(error) = ctx
            .suspend(FlowIoRequest::InitialCheckpoint, logic.snapshot())
            .await
        {
            return fail_top_level(ctx, logic, error).await;
        }
    }

    match logic.call(ctx).await {
        Ok(result) => finish_top_level(ctx, logic, result).await,
        Err(error) => fail_top_level(ctx, logic, error).await,
    }
}

async fn finish_top_level(
    ctx: &mut FlowContext,
    logic: &mut dyn FlowLogic,
    result: serde_json::Value,
) -> FlowIoRequest {
    debug!(flow_id = %ctx.flow_id, "flow completed successfully");
    let sessions = match ctx.remaining_initiated_sessions() {
        Ok(sessions) => sessions,
        Err(error) => {
            warn!(flow_id = %ctx.flow_id, error = %error, "flow stack corrupted at completion");
            return FlowIoRequest::FlowFailed(error);
        }
    };
    if !sessions.is_empty() {
        let flush = ctx
            .suspend(
                FlowIoRequest::SubFlowFinished {
                    open_sessions: sessions,
                },
                logic.snapshot(),
            )
            .await;
        if let Err(error) = flush {
            warn!(flow_id = %ctx.flow_id, error = %error.origin(), "session close failed");
            return FlowIoRequest::FlowFailed(error.origin().clone());
        }
    }
    FlowIoRequest::FlowFinished(result)
}

async fn fail_top_level(
    ctx: &mut FlowContext,
    logic: &mut dyn FlowLogic,
    error: FlowError,
) -> FlowIoRequest {
    // Discontinued means something outside user code already failed and was
    // logged at its origin; a backtrace pointing here would be misleading.
    match &error {
        FlowError::Discontinued { cause } => {
            warn!(flow_id = %ctx.flow_id, reason = %cause, "flow was discontinued");
        }
        other => {
            warn!(flow_id = %ctx.flow_id, error = %other, "flow failed");
        }
    }
    let cause = error.origin().clone();
    let sessions = match ctx.remaining_initiated_sessions() {
        Ok(sessions) => sessions,
        Err(invariant) => {
            warn!(flow_id = %ctx.flow_id, error = %invariant, "flow stack corrupted at failure");
            return FlowIoRequest::FlowFailed(invariant);
        }
    };
    if !sessions.is_empty() {
        let flush = ctx
            .suspend(
                FlowIoRequest::SubFlowFailed {
                    error: cause.clone(),
                    open_sessions: sessions,
                },
                logic.snapshot(),
            )
            .await;
        if let Err(flush_error) = flush {
            debug!(
                flow_id = %ctx.flow_id,
                error = %flush_error.origin(),
                "session error flush did not complete cleanly"
            );
        }
    }
    FlowIoRequest::FlowFailed(cause)
}
