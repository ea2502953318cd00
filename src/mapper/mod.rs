//! Session mapper: the durable routing layer between transport and fibers.
//!
//! Every inbound or outbound session message passes through a per-key state
//! machine ([`executor`]) that decides where the message goes and how the
//! key's [`state::FlowMapperState`] changes. Transitions are pure; the
//! [`service::FlowMapperService`] performs them and commits state + outputs
//! atomically, which is what makes redelivery of an already-applied event a
//! routing no-op.

pub mod cleanup;
pub mod event;
pub mod executor;
pub mod service;
pub mod state;

pub use cleanup::CleanupScheduler;
pub use event::{
    FlowMapperEvent, OutputRecord, SessionEvent, SessionInit, SessionPayload, StartFlow,
};
pub use executor::{ExecutorResult, FlowMapperEventExecutor, FlowMapperExecutorFactory};
pub use service::{FlowMapperService, MapperError, MemoryPipeline, Pipeline, PipelineError};
pub use state::{FlowMapperState, MapperStatus};
