//! Mapper transition table: routing, dedup, and unknown-session handling.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use proptest::prelude::*;
use serde_json::json;

use common::init_tracing;
use ledgerflow::clock::SystemClock;
use ledgerflow::config::FlowEngineConfig;
use ledgerflow::mapper::{
    FlowMapperEvent, FlowMapperExecutorFactory, FlowMapperService, FlowMapperState, MapperStatus,
    MemoryPipeline, OutputRecord, SessionEvent, SessionInit, SessionPayload, StartFlow,
};
use ledgerflow::types::{FlowId, MessageDirection, SessionId};

fn service() -> FlowMapperService {
    let config = FlowEngineConfig::default();
    FlowMapperService::new(
        &config,
        Arc::new(SystemClock),
        Arc::new(MemoryPipeline::new()),
    )
}

fn inbound_init(session: &str, seq: u64) -> FlowMapperEvent {
    FlowMapperEvent::Session(SessionEvent {
        session_id: SessionId::new(session),
        sequence_number: Some(seq),
        direction: MessageDirection::Inbound,
        payload: SessionPayload::Init(SessionInit {
            flow_name: "responder".to_string(),
            flow_id: None,
        }),
        timestamp: Utc::now(),
    })
}

fn inbound_data(session: &str, seq: u64) -> FlowMapperEvent {
    FlowMapperEvent::Session(SessionEvent {
        session_id: SessionId::new(session),
        sequence_number: Some(seq),
        direction: MessageDirection::Inbound,
        payload: SessionPayload::Data {
            payload: json!({ "n": seq }),
            session_init: None,
        },
        timestamp: Utc::now(),
    })
}

fn inbound_close(session: &str, seq: u64) -> FlowMapperEvent {
    FlowMapperEvent::Session(SessionEvent {
        session_id: SessionId::new(session),
        sequence_number: Some(seq),
        direction: MessageDirection::Inbound,
        payload: SessionPayload::Close,
        timestamp: Utc::now(),
    })
}

fn engine_records(records: &[OutputRecord]) -> usize {
    records
        .iter()
        .filter(|r| matches!(r, OutputRecord::FlowEngine { .. }))
        .count()
}

fn acks(records: &[OutputRecord]) -> usize {
    records
        .iter()
        .filter(|r| {
            matches!(
                r,
                OutputRecord::Transport {
                    event: SessionEvent {
                        payload: SessionPayload::Ack { .. },
                        ..
                    }
                }
            )
        })
        .count()
}

#[tokio::test]
async fn inbound_init_creates_state_and_routes_to_engine() {
    init_tracing();
    let mut service = service();
    let records = service.process("s1", inbound_init("s1", 1)).await.unwrap();

    assert_eq!(engine_records(&records), 1);
    assert_eq!(acks(&records), 1);
    let state = service.state("s1").unwrap();
    assert_eq!(state.status, MapperStatus::Open);
    assert!(state.flow_id.is_some());
    assert_eq!(state.watermark(MessageDirection::Inbound), 1);
}

#[tokio::test]
async fn duplicate_inbound_init_is_dropped_but_reacked() {
    init_tracing();
    let mut service = service();
    service.process("s1", inbound_init("s1", 1)).await.unwrap();
    let flow_id = service.state("s1").unwrap().flow_id;

    let records = service.process("s1", inbound_init("s1", 1)).await.unwrap();
    assert_eq!(engine_records(&records), 0);
    assert_eq!(acks(&records), 1);
    // The mapping survives untouched.
    assert_eq!(service.state("s1").unwrap().flow_id, flow_id);
}

#[tokio::test]
async fn init_then_data_at_same_sequence_routes_exactly_once() {
    init_tracing();
    let mut service = service();
    let first = service.process("s1", inbound_init("s1", 1)).await.unwrap();
    let second = service.process("s1", inbound_data("s1", 1)).await.unwrap();

    assert_eq!(engine_records(&first) + engine_records(&second), 1);
    assert_eq!(
        service.state("s1").unwrap().watermark(MessageDirection::Inbound),
        1
    );
    // The replay still gets acknowledged.
    assert_eq!(acks(&second), 1);
}

#[tokio::test]
async fn fresh_data_advances_the_watermark_and_routes() {
    init_tracing();
    let mut service = service();
    service.process("s1", inbound_init("s1", 1)).await.unwrap();
    let records = service.process("s1", inbound_data("s1", 2)).await.unwrap();

    assert_eq!(engine_records(&records), 1);
    assert_eq!(
        service.state("s1").unwrap().watermark(MessageDirection::Inbound),
        2
    );
}

#[tokio::test]
async fn data_for_unknown_session_gets_an_error_reply_and_no_state() {
    init_tracing();
    let mut service = service();
    let records = service.process("s9", inbound_data("s9", 1)).await.unwrap();

    assert_eq!(records.len(), 1);
    match &records[0] {
        OutputRecord::Transport { event } => {
            assert_eq!(event.session_id, SessionId::new("s9").counterpart());
            assert!(matches!(event.payload, SessionPayload::Error { .. }));
            assert_eq!(event.direction, MessageDirection::Outbound);
        }
        other => panic!("expected transport error reply, got {other:?}"),
    }
    assert!(service.state("s9").is_none());
}

#[tokio::test]
async fn data_with_piggybacked_init_establishes_the_session() {
    init_tracing();
    let mut service = service();
    let event = FlowMapperEvent::Session(SessionEvent {
        session_id: SessionId::new("s1"),
        sequence_number: Some(1),
        direction: MessageDirection::Inbound,
        payload: SessionPayload::Data {
            payload: json!({ "hello": true }),
            session_init: Some(SessionInit {
                flow_name: "responder".to_string(),
                flow_id: None,
            }),
        },
        timestamp: Utc::now(),
    });

    let records = service.process("s1", event).await.unwrap();
    assert_eq!(engine_records(&records), 1);
    assert!(service.state("s1").is_some());
}

#[tokio::test]
async fn duplicate_start_flow_routes_exactly_once() {
    init_tracing();
    let mut service = service();
    let flow_id = FlowId::new();
    let start = FlowMapperEvent::StartFlow(StartFlow {
        flow_id,
        flow_name: "initiator".to_string(),
        args: json!({}),
    });

    let first = service
        .process(&flow_id.to_string(), start.clone())
        .await
        .unwrap();
    let second = service.process(&flow_id.to_string(), start).await.unwrap();

    assert_eq!(engine_records(&first), 1);
    assert_eq!(engine_records(&second), 0);
}

#[tokio::test]
async fn close_moves_state_to_closing_and_schedules_cleanup() {
    init_tracing();
    let mut service = service();
    service.process("s1", inbound_init("s1", 1)).await.unwrap();
    service.process("s1", inbound_close("s1", 2)).await.unwrap();

    let state = service.state("s1").unwrap();
    assert_eq!(state.status, MapperStatus::Closing);
    assert!(state.scheduled_cleanup);
    assert!(state.expiry_time.is_some());
    assert_eq!(service.pending_cleanups(), 1);
}

#[tokio::test]
async fn outbound_error_closes_the_session_and_reaches_transport() {
    init_tracing();
    let mut service = service();
    let outbound_init = FlowMapperEvent::Session(SessionEvent {
        session_id: SessionId::new("s1"),
        sequence_number: Some(1),
        direction: MessageDirection::Outbound,
        payload: SessionPayload::Init(SessionInit {
            flow_name: "initiator".to_string(),
            flow_id: Some(FlowId::new()),
        }),
        timestamp: Utc::now(),
    });
    service.process("s1", outbound_init).await.unwrap();

    let error = FlowMapperEvent::Session(SessionEvent {
        session_id: SessionId::new("s1"),
        sequence_number: None,
        direction: MessageDirection::Outbound,
        payload: SessionPayload::Error {
            message: "boom".to_string(),
        },
        timestamp: Utc::now(),
    });
    let records = service.process("s1", error).await.unwrap();

    assert!(records.iter().any(|r| matches!(
        r,
        OutputRecord::Transport {
            event: SessionEvent {
                payload: SessionPayload::Error { .. },
                ..
            }
        }
    )));
    assert_eq!(service.state("s1").unwrap().status, MapperStatus::Closing);
}

proptest! {
    // Replaying any prefix of an applied event sequence produces no
    // additional engine-routed records; transitions are idempotent for
    // engine routing.
    #[test]
    fn replaying_applied_events_routes_nothing_new(
        seqs in proptest::collection::vec(1u64..20, 1..10),
    ) {
        let factory = FlowMapperExecutorFactory::new(Duration::seconds(30));
        let now = Utc::now();
        let mut state: Option<FlowMapperState> = None;

        let events: Vec<FlowMapperEvent> = std::iter::once(inbound_init("p", 1))
            .chain(seqs.iter().map(|s| inbound_data("p", *s)))
            .collect();

        let mut first_pass = 0usize;
        for event in &events {
            let result = factory.create("p", event.clone(), state.clone(), now).execute();
            first_pass += result.engine_records().len();
            state = result.state;
        }

        for event in &events {
            let result = factory.create("p", event.clone(), state.clone(), now).execute();
            prop_assert_eq!(result.engine_records().len(), 0);
            state = result.state;
        }

        // Each distinct new high-water sequence routed exactly once.
        let mut watermark = 0u64;
        let mut expected = 0usize;
        for seq in std::iter::once(1u64).chain(seqs.iter().copied()) {
            if seq > watermark {
                watermark = seq;
                expected += 1;
            }
        }
        prop_assert_eq!(first_pass, expected);
    }
}
