//! Mapper service: the state map plus the atomic commit boundary.
//!
//! The service owns the per-key states, runs one executor per input event,
//! and commits `(new state, output records)` through a [`Pipeline`] before
//! the in-memory view advances. Cleanup records produced by executors are
//! re-injected as events on the same queue, so every state mutation flows
//! through the same transition path.

use std::collections::VecDeque;
use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, instrument};

use super::cleanup::CleanupScheduler;
use super::event::{FlowMapperEvent, OutputRecord};
use super::executor::FlowMapperExecutorFactory;
use super::state::FlowMapperState;
use crate::clock::Clock;
use crate::config::FlowEngineConfig;

/// Commit failure in the durable pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("pipeline unavailable: {0}")]
    #[diagnostic(
        code(ledgerflow::mapper::pipeline_unavailable),
        help("The event will be redelivered; transitions are idempotent.")
    )]
    Unavailable(String),

    #[error("commit conflict for key {key}")]
    #[diagnostic(code(ledgerflow::mapper::commit_conflict))]
    Conflict { key: String },
}

/// Mapper processing failure.
#[derive(Debug, Error, Diagnostic)]
pub enum MapperError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Atomic commit of one transition: the key's new state (None deletes it)
/// together with the records it produced. Either everything lands or the
/// input event is considered undelivered and will be replayed.
#[async_trait::async_trait]
pub trait Pipeline: Send + Sync {
    async fn commit(
        &self,
        key: &str,
        state: Option<&FlowMapperState>,
        outputs: &[OutputRecord],
    ) -> Result<(), PipelineError>;
}

/// In-memory pipeline that records every committed transition.
#[derive(Clone, Default)]
pub struct MemoryPipeline {
    committed: Arc<Mutex<Vec<(String, Option<FlowMapperState>, Vec<OutputRecord>)>>>,
}

impl MemoryPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed(&self) -> Vec<(String, Option<FlowMapperState>, Vec<OutputRecord>)> {
        self.committed.lock().clone()
    }

    pub fn clear(&self) {
        self.committed.lock().clear();
    }
}

#[async_trait::async_trait]
impl Pipeline for MemoryPipeline {
    async fn commit(
        &self,
        key: &str,
        state: Option<&FlowMapperState>,
        outputs: &[OutputRecord],
    ) -> Result<(), PipelineError> {
        self.committed
            .lock()
            .push((key.to_string(), state.cloned(), outputs.to_vec()));
        Ok(())
    }
}

/// Owns the per-key state machine and its cleanup schedule.
///
/// Callers must keep per-key processing sequential; the service assumes a
/// single writer per key, the way the surrounding platform partitions its
/// event streams.
pub struct FlowMapperService {
    states: FxHashMap<String, FlowMapperState>,
    factory: FlowMapperExecutorFactory,
    scheduler: CleanupScheduler,
    clock: Arc<dyn Clock>,
    pipeline: Arc<dyn Pipeline>,
}

impl FlowMapperService {
    #[must_use]
    pub fn new(
        config: &FlowEngineConfig,
        clock: Arc<dyn Clock>,
        pipeline: Arc<dyn Pipeline>,
    ) -> Self {
        Self {
            states: FxHashMap::default(),
            factory: FlowMapperExecutorFactory::new(config.cleanup_ttl),
            scheduler: CleanupScheduler::new(),
            clock,
            pipeline,
        }
    }

    /// Process one keyed event to completion.
    ///
    /// Cleanup-scheduling records fold back into the queue as events so the
    /// expiry lands in durable state; everything else is returned for the
    /// caller to deliver.
    #[instrument(skip(self, event), fields(kind = event.kind()))]
    pub async fn process(
        &mut self,
        key: &str,
        event: FlowMapperEvent,
    ) -> Result<Vec<OutputRecord>, MapperError> {
        let mut queue: VecDeque<(String, FlowMapperEvent)> = VecDeque::new();
        queue.push_back((key.to_string(), event));
        let mut delivered = Vec::new();

        while let Some((key, event)) = queue.pop_front() {
            let now = self.clock.now();
            let state = self.states.get(&key).cloned();
            let result = self.factory.create(&key, event, state, now).execute();

            self.pipeline
                .commit(&key, result.state.as_ref(), &result.outputs)
                .await?;

            match result.state {
                Some(state) => {
                    self.states.insert(key.clone(), state);
                }
                None => {
                    self.states.remove(&key);
                }
            }

            for record in result.outputs {
                match record {
                    OutputRecord::ScheduleCleanup { key, expiry_time } => {
                        self.scheduler.schedule(key.clone(), expiry_time);
                        queue.push_back((key, FlowMapperEvent::ScheduleCleanup { expiry_time }));
                    }
                    other => delivered.push(other),
                }
            }
        }

        Ok(delivered)
    }

    /// Fire all cleanups whose expiry has passed.
    #[instrument(skip(self))]
    pub async fn run_due_cleanups(&mut self) -> Result<usize, MapperError> {
        let now = self.clock.now();
        let due = self.scheduler.due(now);
        let fired = due.len();
        for key in due {
            debug!(%key, "executing scheduled cleanup");
            self.process(&key, FlowMapperEvent::ExecuteCleanup).await?;
        }
        Ok(fired)
    }

    #[must_use]
    pub fn state(&self, key: &str) -> Option<&FlowMapperState> {
        self.states.get(key)
    }

    #[must_use]
    pub fn pending_cleanups(&self) -> usize {
        self.scheduler.len()
    }
}
