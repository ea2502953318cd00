//! Ledgerflow: a durable flow-execution engine.
//!
//! Ledgerflow runs long-lived, multi-party "flows" that survive process
//! restarts. A flow suspends whenever it needs the outside world (a session
//! message, a sub-flow result), and every suspension produces a serialized
//! checkpoint from which the flow can resume on any host. Between the
//! transport and the flows sits a session mapper: a small per-key state
//! machine that routes messages, deduplicates redelivery, and garbage
//! collects finished sessions.
//!
//! # Architecture
//!
//! - [`fiber`] - the continuation runtime: one task per in-flight flow,
//!   suspended and resumed through explicit checkpoints, plus the
//!   controller that owns the fiber registry.
//! - [`mapper`] - the session-mapping state machine: pure per-event
//!   executors, replay dedup via per-direction watermarks, and deferred
//!   cleanup of closed sessions.
//! - [`metrics`] - wall-clock accounting tied to suspension boundaries,
//!   persisted alongside the checkpoint.
//! - [`checkpoint`] - the serializer boundary and persistence models.
//! - [`transport`] - fan-out of outbound session records to sinks.
//! - [`clock`], [`config`], [`types`] - ambient pieces: injectable time,
//!   env-backed configuration, identity newtypes.
//!
//! # Delivery model
//!
//! Everything assumes at-least-once delivery with per-key ordering. The
//! mapper's transitions are idempotent for engine routing: replaying an
//! already-applied event may re-acknowledge, but never produces a second
//! record for the flow engine.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ledgerflow::clock::SystemClock;
//! use ledgerflow::config::FlowEngineConfig;
//! use ledgerflow::mapper::{FlowMapperService, MemoryPipeline};
//!
//! let config = FlowEngineConfig::default();
//! let service = FlowMapperService::new(
//!     &config,
//!     Arc::new(SystemClock),
//!     Arc::new(MemoryPipeline::new()),
//! );
//! # let _ = service;
//! ```

pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod fiber;
pub mod mapper;
pub mod metrics;
pub mod transport;
pub mod types;
