//! Registry and public contract for fiber execution.
//!
//! The controller owns exactly one [`FlowFiber`] per flow id, wires metric
//! observation to the suspension boundaries, and evicts fibers on terminal
//! outcome so the registry cannot grow unboundedly. It does not lock
//! across calls: the event pipeline must serialize `start_flow`/`resume`
//! per flow id (single-writer discipline).

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, instrument};

use super::continuation::FlowContinuation;
use super::fiber::FlowFiber;
use super::io_request::FlowIoRequest;
use super::logic::{FlowLogic, FlowLogicFactory};
use super::FiberError;
use crate::checkpoint::CheckpointSerializer;
use crate::clock::Clock;
use crate::config::FlowEngineConfig;
use crate::metrics::{FlowMetricState, FlowMetrics, FlowMetricsRecorder};
use crate::types::FlowId;

pub struct FlowFiberController {
    fibers: FxHashMap<FlowId, FlowFiber>,
    metrics: FxHashMap<FlowId, FlowMetrics>,
    worker_limit: usize,
    serializer: Arc<dyn CheckpointSerializer>,
    recorder: Arc<dyn FlowMetricsRecorder>,
    clock: Arc<dyn Clock>,
}

impl FlowFiberController {
    #[must_use]
    pub fn new(
        config: &FlowEngineConfig,
        serializer: Arc<dyn CheckpointSerializer>,
        recorder: Arc<dyn FlowMetricsRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fibers: FxHashMap::default(),
            metrics: FxHashMap::default(),
            worker_limit: config.worker_limit,
            serializer,
            recorder,
            clock,
        }
    }

    /// Start a new fiber for `flow_id` and run it to its first suspension
    /// or terminal outcome.
    #[instrument(skip(self, logic), err)]
    pub async fn start_flow(
        &mut self,
        flow_id: FlowId,
        logic: Box<dyn FlowLogic>,
    ) -> Result<FlowIoRequest, FiberError> {
        if self.fibers.contains_key(&flow_id) {
            return Err(FiberError::DuplicateFlow { flow_id });
        }
        self.check_capacity()?;

        let mut metrics = FlowMetrics::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.recorder),
            Default::default(),
            self.clock.now_millis(),
        );
        metrics.flow_started(Some(self.clock.now()));
        metrics.fiber_entered();

        let mut fiber = FlowFiber::start(
            flow_id,
            logic,
            Arc::clone(&self.serializer),
            metrics.state().clone(),
        );
        let request = fiber.next_request().await?;
        self.metrics.insert(flow_id, metrics);
        self.settle_round(flow_id, Some(fiber), &request);
        Ok(request)
    }

    /// Rehydrate a fiber from checkpoint bytes after a restart. The
    /// returned request is the re-issued pending suspension.
    #[instrument(skip(self, checkpoint, factory), err)]
    pub async fn resume_from_checkpoint(
        &mut self,
        checkpoint: &[u8],
        factory: &dyn FlowLogicFactory,
    ) -> Result<(FlowId, FlowIoRequest), FiberError> {
        let payload = self.serializer.deserialize(checkpoint)?;
        let flow_id = payload.flow_id;
        if self.fibers.contains_key(&flow_id) {
            return Err(FiberError::DuplicateFlow { flow_id });
        }
        self.check_capacity()?;
        let logic = factory
            .rebuild(&payload)
            .map_err(|e| FiberError::Checkpoint(crate::checkpoint::CheckpointError::Other(
                e.to_string(),
            )))?;

        let mut metrics = FlowMetrics::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.recorder),
            payload.metrics.clone(),
            self.clock.now_millis(),
        );
        metrics.fiber_entered();

        let mut fiber =
            FlowFiber::resume_from_checkpoint(&payload, logic, Arc::clone(&self.serializer));
        let request = fiber.next_request().await?;
        self.metrics.insert(flow_id, metrics);
        self.settle_round(flow_id, Some(fiber), &request);
        Ok((flow_id, request))
    }

    /// Resume the suspended fiber for `flow_id` with the outcome of its
    /// pending I/O request.
    #[instrument(skip(self, continuation), err)]
    pub async fn resume(
        &mut self,
        flow_id: FlowId,
        continuation: FlowContinuation,
    ) -> Result<FlowIoRequest, FiberError> {
        let fiber = self
            .fibers
            .get_mut(&flow_id)
            .ok_or(FiberError::UnknownFlow { flow_id })?;

        // The fiber adopts the current accumulator so the checkpoint taken
        // at its next suspension carries this round's totals.
        let metrics_state = match self.metrics.get_mut(&flow_id) {
            Some(metrics) => {
                metrics.fiber_entered();
                metrics.state().clone()
            }
            None => FlowMetricState::default(),
        };
        let request = fiber.resume(continuation, metrics_state).await?;
        self.settle_round(flow_id, None, &request);
        Ok(request)
    }

    /// Advisory interrupt for a live fiber; no-op for unknown flows.
    pub fn attempt_interrupt(&self, flow_id: FlowId) {
        if let Some(fiber) = self.fibers.get(&flow_id) {
            fiber.attempt_interrupt();
        }
    }

    /// The durable metric state for a live flow, for checkpoint persistence.
    #[must_use]
    pub fn metric_state(&self, flow_id: FlowId) -> Option<&crate::metrics::FlowMetricState> {
        self.metrics.get(&flow_id).map(|m| m.state())
    }

    #[must_use]
    pub fn active_flows(&self) -> usize {
        self.fibers.len()
    }

    fn check_capacity(&self) -> Result<(), FiberError> {
        if self.fibers.len() >= self.worker_limit {
            return Err(FiberError::AtCapacity {
                limit: self.worker_limit,
            });
        }
        Ok(())
    }

    /// Record the boundary metrics for a completed round and either retain
    /// the fiber (suspended) or evict it (terminal outcome).
    fn settle_round(&mut self, flow_id: FlowId, fiber: Option<FlowFiber>, request: &FlowIoRequest) {
        if let Some(metrics) = self.metrics.get_mut(&flow_id) {
            match request {
                FlowIoRequest::Suspended { .. } => {
                    metrics.fiber_exited_with_suspension(request.operation_name());
                }
                _ => metrics.fiber_exited(),
            }
        }

        match request {
            FlowIoRequest::FlowFinished(_) => {
                if let Some(metrics) = self.metrics.remove(&flow_id) {
                    metrics.flow_completed_successfully();
                }
                self.fibers.remove(&flow_id);
                debug!(flow_id = %flow_id, "fiber evicted after completion");
            }
            FlowIoRequest::FlowFailed(_) => {
                if let Some(metrics) = self.metrics.remove(&flow_id) {
                    metrics.flow_failed();
                }
                self.fibers.remove(&flow_id);
                debug!(flow_id = %flow_id, "fiber evicted after failure");
            }
            _ => {
                if let Some(fiber) = fiber {
                    self.fibers.insert(flow_id, fiber);
                }
            }
        }
    }
}
