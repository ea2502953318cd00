//! Per-event mapper executors.
//!
//! Each executor is a pure function of (current state, event) to
//! (new state, output records): nothing here performs I/O, which is what
//! makes the state machine testable and replay-safe. The factory picks
//! the executor by payload variant.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::event::{
    FlowMapperEvent, OutputRecord, SessionEvent, SessionInit, SessionPayload, StartFlow,
};
use super::state::{FlowMapperState, MapperStatus};
use crate::types::{FlowId, MessageDirection};

/// Outcome of one transition: the key's new durable state (`None` deletes
/// it) plus the records to commit alongside it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutorResult {
    pub state: Option<FlowMapperState>,
    pub outputs: Vec<OutputRecord>,
}

impl ExecutorResult {
    #[must_use]
    pub fn unchanged(state: Option<FlowMapperState>) -> Self {
        Self {
            state,
            outputs: Vec::new(),
        }
    }

    /// Records routed to the flow engine, for dedup assertions.
    #[must_use]
    pub fn engine_records(&self) -> Vec<&OutputRecord> {
        self.outputs
            .iter()
            .filter(|r| matches!(r, OutputRecord::FlowEngine { .. }))
            .collect()
    }
}

/// One transition of the per-key state machine.
pub trait FlowMapperEventExecutor {
    fn execute(self: Box<Self>) -> ExecutorResult;
}

/// Selects the executor for an incoming event.
#[derive(Clone, Debug)]
pub struct FlowMapperExecutorFactory {
    cleanup_ttl: Duration,
}

impl FlowMapperExecutorFactory {
    #[must_use]
    pub fn new(cleanup_ttl: Duration) -> Self {
        Self { cleanup_ttl }
    }

    #[must_use]
    pub fn create(
        &self,
        key: &str,
        event: FlowMapperEvent,
        state: Option<FlowMapperState>,
        now: DateTime<Utc>,
    ) -> Box<dyn FlowMapperEventExecutor> {
        match event {
            FlowMapperEvent::Session(session_event) => match &session_event.payload {
                SessionPayload::Init(init) => Box::new(SessionInitExecutor {
                    key: key.to_string(),
                    init: init.clone(),
                    event: session_event,
                    state,
                    now,
                }),
                // A data message with a piggybacked init establishes the
                // session for an absent key before normal processing.
                SessionPayload::Data {
                    session_init: Some(init),
                    ..
                } if state.is_none() => Box::new(SessionInitExecutor {
                    key: key.to_string(),
                    init: init.clone(),
                    event: session_event,
                    state,
                    now,
                }),
                SessionPayload::Error { .. } => Box::new(SessionErrorExecutor {
                    key: key.to_string(),
                    event: session_event,
                    state,
                    now,
                    cleanup_ttl: self.cleanup_ttl,
                }),
                _ => Box::new(SessionEventExecutor {
                    key: key.to_string(),
                    event: session_event,
                    state,
                    now,
                    cleanup_ttl: self.cleanup_ttl,
                }),
            },
            FlowMapperEvent::StartFlow(start) => Box::new(StartFlowExecutor {
                key: key.to_string(),
                start,
                state,
            }),
            FlowMapperEvent::ScheduleCleanup { expiry_time } => Box::new(ScheduleCleanupExecutor {
                key: key.to_string(),
                expiry_time,
                state,
            }),
            FlowMapperEvent::ExecuteCleanup => Box::new(ExecuteCleanupExecutor {
                key: key.to_string(),
                state,
                now,
            }),
        }
    }
}

/// Synthesized error reply for traffic on a session this node cannot map.
fn unknown_session_error(event: &SessionEvent, now: DateTime<Utc>) -> OutputRecord {
    OutputRecord::Transport {
        event: SessionEvent {
            session_id: event.session_id.counterpart(),
            sequence_number: None,
            direction: MessageDirection::Outbound,
            payload: SessionPayload::Error {
                message: format!("no session state for {}", event.session_id),
            },
            timestamp: now,
        },
    }
}

/// Acknowledgement for an inbound sequenced message; replays re-send it
/// because the peer may not have seen the prior ack.
fn ack_for(event: &SessionEvent, acked: u64, now: DateTime<Utc>) -> OutputRecord {
    OutputRecord::Transport {
        event: SessionEvent {
            session_id: event.session_id.counterpart(),
            sequence_number: None,
            direction: MessageDirection::Outbound,
            payload: SessionPayload::Ack {
                acked_sequence_number: acked,
            },
            timestamp: now,
        },
    }
}

fn route_inbound(state: &FlowMapperState, key: &str, event: SessionEvent) -> Option<OutputRecord> {
    match state.flow_id {
        Some(flow_id) => Some(OutputRecord::FlowEngine {
            flow_id,
            event: FlowMapperEvent::Session(event),
        }),
        None => {
            warn!(key, "mapper state has no flow id; dropping inbound event");
            None
        }
    }
}

struct SessionInitExecutor {
    key: String,
    init: SessionInit,
    event: SessionEvent,
    state: Option<FlowMapperState>,
    now: DateTime<Utc>,
}

impl FlowMapperEventExecutor for SessionInitExecutor {
    fn execute(self: Box<Self>) -> ExecutorResult {
        if let Some(state) = self.state {
            // Duplicate init: drop, but re-ack inbound copies since the
            // peer may have missed the original ack.
            debug!(key = %self.key, "duplicate session init dropped");
            let outputs = match self.event.direction {
                MessageDirection::Inbound => {
                    vec![ack_for(&self.event, state.watermark(MessageDirection::Inbound), self.now)]
                }
                MessageDirection::Outbound => Vec::new(),
            };
            return ExecutorResult {
                state: Some(state),
                outputs,
            };
        }

        match self.event.direction {
            MessageDirection::Outbound => {
                // We are the initiator: record the key and forward the init.
                let mut state = FlowMapperState::open(self.init.flow_id);
                if let Some(seq) = self.event.sequence_number.filter(|s| *s > 0) {
                    state.observe(MessageDirection::Outbound, seq);
                }
                ExecutorResult {
                    state: Some(state),
                    outputs: vec![OutputRecord::Transport { event: self.event }],
                }
            }
            MessageDirection::Inbound => {
                // Peer-initiated: mint a flow id and hand the init to the
                // engine as a new flow trigger.
                let flow_id = self.init.flow_id.unwrap_or_else(FlowId::new);
                let mut state = FlowMapperState::open(Some(flow_id));
                let mut outputs = Vec::new();
                let acked = match self.event.sequence_number.filter(|s| *s > 0) {
                    Some(seq) => {
                        state.observe(MessageDirection::Inbound, seq);
                        seq
                    }
                    None => 0,
                };
                outputs.push(OutputRecord::FlowEngine {
                    flow_id,
                    event: FlowMapperEvent::Session(self.event.clone()),
                });
                outputs.push(ack_for(&self.event, acked, self.now));
                ExecutorResult {
                    state: Some(state),
                    outputs,
                }
            }
        }
    }
}

struct SessionEventExecutor {
    key: String,
    event: SessionEvent,
    state: Option<FlowMapperState>,
    now: DateTime<Utc>,
    cleanup_ttl: Duration,
}

impl FlowMapperEventExecutor for SessionEventExecutor {
    fn execute(self: Box<Self>) -> ExecutorResult {
        let Some(mut state) = self.state else {
            return match self.event.direction {
                MessageDirection::Inbound => {
                    warn!(key = %self.key, "session event for unknown session; replying with error");
                    ExecutorResult {
                        state: None,
                        outputs: vec![unknown_session_error(&self.event, self.now)],
                    }
                }
                MessageDirection::Outbound => {
                    warn!(key = %self.key, "outbound session event with no state; dropping");
                    ExecutorResult::unchanged(None)
                }
            };
        };

        let mut outputs = Vec::new();

        // Pure acknowledgements bypass the watermark and are always routed.
        let bypass = matches!(self.event.sequence_number, None | Some(0))
            || matches!(self.event.payload, SessionPayload::Ack { .. });
        let is_new = if bypass {
            true
        } else if let Some(seq) = self.event.sequence_number {
            state.observe(self.event.direction, seq)
        } else {
            true
        };

        let closing = matches!(self.event.payload, SessionPayload::Close);

        match self.event.direction {
            MessageDirection::Inbound => {
                if is_new {
                    if let Some(record) = route_inbound(&state, &self.key, self.event.clone()) {
                        outputs.push(record);
                    }
                } else {
                    debug!(key = %self.key, seq = ?self.event.sequence_number, "replayed session event dropped");
                }
                if let Some(seq) = self.event.sequence_number.filter(|s| *s > 0) {
                    outputs.push(ack_for(&self.event, seq, self.now));
                }
            }
            MessageDirection::Outbound => {
                if is_new {
                    outputs.push(OutputRecord::Transport {
                        event: self.event.clone(),
                    });
                } else {
                    debug!(key = %self.key, seq = ?self.event.sequence_number, "replayed outbound event dropped");
                }
            }
        }

        if closing && is_new && state.status == MapperStatus::Open {
            state.status = MapperStatus::Closing;
            outputs.push(OutputRecord::ScheduleCleanup {
                key: self.key.clone(),
                expiry_time: self.now + self.cleanup_ttl,
            });
        }

        ExecutorResult {
            state: Some(state),
            outputs,
        }
    }
}

struct SessionErrorExecutor {
    key: String,
    event: SessionEvent,
    state: Option<FlowMapperState>,
    now: DateTime<Utc>,
    cleanup_ttl: Duration,
}

impl FlowMapperEventExecutor for SessionErrorExecutor {
    fn execute(self: Box<Self>) -> ExecutorResult {
        let Some(mut state) = self.state else {
            return match self.event.direction {
                MessageDirection::Inbound => {
                    warn!(key = %self.key, "session error for unknown session; replying with error");
                    ExecutorResult {
                        state: None,
                        outputs: vec![unknown_session_error(&self.event, self.now)],
                    }
                }
                MessageDirection::Outbound => {
                    warn!(key = %self.key, "outbound session error with no state; dropping");
                    ExecutorResult::unchanged(None)
                }
            };
        };

        // Errors bypass the watermark check entirely.
        let mut outputs = Vec::new();
        match self.event.direction {
            MessageDirection::Inbound => {
                if let Some(record) = route_inbound(&state, &self.key, self.event.clone()) {
                    outputs.push(record);
                }
            }
            MessageDirection::Outbound => {
                outputs.push(OutputRecord::Transport {
                    event: self.event.clone(),
                });
            }
        }

        if state.status == MapperStatus::Open {
            state.status = MapperStatus::Closing;
            outputs.push(OutputRecord::ScheduleCleanup {
                key: self.key.clone(),
                expiry_time: self.now + self.cleanup_ttl,
            });
        }

        ExecutorResult {
            state: Some(state),
            outputs,
        }
    }
}

struct StartFlowExecutor {
    key: String,
    start: StartFlow,
    state: Option<FlowMapperState>,
}

impl FlowMapperEventExecutor for StartFlowExecutor {
    fn execute(self: Box<Self>) -> ExecutorResult {
        if self.state.is_some() {
            // Redelivered start command: already routed once, drop.
            debug!(key = %self.key, "duplicate StartFlow dropped");
            return ExecutorResult::unchanged(self.state);
        }
        let flow_id = self.start.flow_id;
        ExecutorResult {
            state: Some(FlowMapperState::open(Some(flow_id))),
            outputs: vec![OutputRecord::FlowEngine {
                flow_id,
                event: FlowMapperEvent::StartFlow(self.start),
            }],
        }
    }
}

struct ScheduleCleanupExecutor {
    key: String,
    expiry_time: DateTime<Utc>,
    state: Option<FlowMapperState>,
}

impl FlowMapperEventExecutor for ScheduleCleanupExecutor {
    fn execute(self: Box<Self>) -> ExecutorResult {
        match self.state {
            Some(mut state) => {
                if !state.scheduled_cleanup {
                    state.expiry_time = Some(self.expiry_time);
                    state.scheduled_cleanup = true;
                }
                ExecutorResult::unchanged(Some(state))
            }
            None => {
                debug!(key = %self.key, "schedule cleanup for absent state dropped");
                ExecutorResult::unchanged(None)
            }
        }
    }
}

struct ExecuteCleanupExecutor {
    key: String,
    state: Option<FlowMapperState>,
    now: DateTime<Utc>,
}

impl FlowMapperEventExecutor for ExecuteCleanupExecutor {
    fn execute(self: Box<Self>) -> ExecutorResult {
        match self.state {
            Some(state) => match state.expiry_time {
                Some(expiry) if expiry <= self.now => {
                    debug!(key = %self.key, "mapper state expired and deleted");
                    ExecutorResult::unchanged(None)
                }
                _ => ExecutorResult::unchanged(Some(state)),
            },
            None => ExecutorResult::unchanged(None),
        }
    }
}
