//! Controller contract: start/resume rounds, completion flush, eviction.

mod common;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use common::{ScriptedFlow, init_tracing};
use ledgerflow::checkpoint::JsonCheckpointSerializer;
use ledgerflow::clock::SystemClock;
use ledgerflow::config::FlowEngineConfig;
use ledgerflow::fiber::io_request::FlowIoRequest;
use ledgerflow::fiber::{FiberError, FlowContinuation, FlowError, FlowFiberController};
use ledgerflow::mapper::{
    FlowMapperEvent, FlowMapperService, MemoryPipeline, SessionEvent, SessionInit, SessionPayload,
};
use ledgerflow::metrics::MemoryRecorder;
use ledgerflow::transport::{MemorySink, TransportRouter};
use ledgerflow::types::{FlowId, MessageDirection, SessionId};

fn controller() -> FlowFiberController {
    FlowFiberController::new(
        &FlowEngineConfig::default(),
        Arc::new(JsonCheckpointSerializer),
        Arc::new(MemoryRecorder::new()),
        Arc::new(SystemClock),
    )
}

fn inner(request: &FlowIoRequest) -> &FlowIoRequest {
    match request {
        FlowIoRequest::Suspended { request, .. } => request,
        other => other,
    }
}

#[tokio::test]
async fn start_suspends_on_initial_checkpoint_then_completes() {
    init_tracing();
    let mut controller = controller();
    let flow_id = FlowId::new();

    let request = controller
        .start_flow(flow_id, Box::new(ScriptedFlow::completing(&[])))
        .await
        .unwrap();
    assert!(matches!(inner(&request), FlowIoRequest::InitialCheckpoint));
    assert_eq!(controller.active_flows(), 1);

    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    assert!(matches!(request, FlowIoRequest::FlowFinished(_)));
    assert_eq!(controller.active_flows(), 0);
}

#[tokio::test]
async fn second_start_for_live_flow_is_rejected() {
    init_tracing();
    let mut controller = controller();
    let flow_id = FlowId::new();

    controller
        .start_flow(flow_id, Box::new(ScriptedFlow::completing(&[])))
        .await
        .unwrap();
    let err = controller
        .start_flow(flow_id, Box::new(ScriptedFlow::completing(&[])))
        .await
        .unwrap_err();
    assert!(matches!(err, FiberError::DuplicateFlow { .. }));
}

#[tokio::test]
async fn resume_without_fiber_fails_fast() {
    init_tracing();
    let mut controller = controller();
    let err = controller
        .resume(FlowId::new(), FlowContinuation::unit())
        .await
        .unwrap_err();
    assert!(matches!(err, FiberError::UnknownFlow { .. }));
}

#[tokio::test]
async fn completion_flushes_open_initiated_sessions_exactly_once() {
    init_tracing();
    let mut controller = controller();
    let flow_id = FlowId::new();

    controller
        .start_flow(
            flow_id,
            Box::new(ScriptedFlow::completing(&[("s1", true), ("s2", true), ("s3", false)])),
        )
        .await
        .unwrap();

    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    match inner(&request) {
        FlowIoRequest::SubFlowFinished { open_sessions } => {
            assert_eq!(
                open_sessions,
                &vec![SessionId::new("s1"), SessionId::new("s2")]
            );
        }
        other => panic!("expected SubFlowFinished, got {other:?}"),
    }

    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    assert!(matches!(request, FlowIoRequest::FlowFinished(_)));
}

#[tokio::test]
async fn failure_flushes_sessions_then_fails_and_errors_reach_transport() {
    init_tracing();
    let mut controller = controller();
    let flow_id = FlowId::new();

    controller
        .start_flow(
            flow_id,
            Box::new(ScriptedFlow::failing(&[("s1", true), ("s2", true)], "boom")),
        )
        .await
        .unwrap();

    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    let flushed = match inner(&request) {
        FlowIoRequest::SubFlowFailed {
            error,
            open_sessions,
        } => {
            assert_eq!(error, &FlowError::Logic("boom".to_string()));
            assert_eq!(
                open_sessions,
                &vec![SessionId::new("s1"), SessionId::new("s2")]
            );
            open_sessions.clone()
        }
        other => panic!("expected SubFlowFailed, got {other:?}"),
    };

    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    assert_eq!(
        request,
        FlowIoRequest::FlowFailed(FlowError::Logic("boom".to_string()))
    );
    assert_eq!(controller.active_flows(), 0);

    // The pipeline turns the flush into outbound error events; each one
    // lands at the transport addressed to its session.
    let config = FlowEngineConfig::default();
    let mut service = FlowMapperService::new(
        &config,
        Arc::new(SystemClock),
        Arc::new(MemoryPipeline::new()),
    );
    let sink = MemorySink::new();
    let mut router = TransportRouter::new().with_sink(sink.clone());
    for session_id in &flushed {
        let init = SessionEvent {
            session_id: session_id.clone(),
            sequence_number: Some(1),
            direction: MessageDirection::Outbound,
            payload: SessionPayload::Init(SessionInit {
                flow_name: "scripted".to_string(),
                flow_id: Some(flow_id),
            }),
            timestamp: Utc::now(),
        };
        let records = service
            .process(session_id.as_str(), FlowMapperEvent::Session(init))
            .await
            .unwrap();
        router.route(&records);
        let error = SessionEvent {
            session_id: session_id.clone(),
            sequence_number: None,
            direction: MessageDirection::Outbound,
            payload: SessionPayload::Error {
                message: "boom".to_string(),
            },
            timestamp: Utc::now(),
        };
        let records = service
            .process(session_id.as_str(), FlowMapperEvent::Session(error))
            .await
            .unwrap();
        router.route(&records);
    }
    let errors: Vec<_> = sink
        .snapshot()
        .into_iter()
        .filter(|e| matches!(e.payload, SessionPayload::Error { .. }))
        .collect();
    assert_eq!(errors.len(), 2);
}

#[tokio::test]
async fn injected_error_raises_at_the_suspension_point() {
    init_tracing();
    let mut controller = controller();
    let flow_id = FlowId::new();

    controller
        .start_flow(flow_id, Box::new(ScriptedFlow::awaiting(&[], "s1")))
        .await
        .unwrap();

    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    assert!(matches!(
        inner(&request),
        FlowIoRequest::SessionReceive { .. }
    ));

    let injected = FlowError::Session {
        session_id: SessionId::new("s1"),
        message: "peer gave up".to_string(),
    };
    let request = controller
        .resume(flow_id, FlowContinuation::Error(injected.clone()))
        .await
        .unwrap();
    // The terminal carries the origin, not the Discontinued wrapper.
    assert_eq!(request, FlowIoRequest::FlowFailed(injected));
}

#[tokio::test]
async fn panicking_logic_is_forced_to_a_failure() {
    init_tracing();
    let mut controller = controller();
    let flow_id = FlowId::new();

    controller
        .start_flow(flow_id, Box::new(ScriptedFlow::panicking()))
        .await
        .unwrap();
    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    assert!(matches!(request, FlowIoRequest::FlowFailed(_)));
    assert_eq!(controller.active_flows(), 0);
}

#[tokio::test]
async fn interrupted_flow_still_flushes_its_open_sessions() {
    init_tracing();
    let mut controller = controller();
    let flow_id = FlowId::new();

    controller
        .start_flow(
            flow_id,
            Box::new(ScriptedFlow::awaiting(&[("s1", true)], "sx")),
        )
        .await
        .unwrap();
    // Run the logic to its receive suspension so s1 is open, then interrupt.
    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    assert!(matches!(
        inner(&request),
        FlowIoRequest::SessionReceive { .. }
    ));
    controller.attempt_interrupt(flow_id);

    // The failure path still owes the open session its error notice.
    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    match inner(&request) {
        FlowIoRequest::SubFlowFailed {
            error,
            open_sessions,
        } => {
            assert_eq!(error, &FlowError::Interrupted);
            assert_eq!(open_sessions, &vec![SessionId::new("s1")]);
        }
        other => panic!("expected the session flush, got {other:?}"),
    }

    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    assert_eq!(request, FlowIoRequest::FlowFailed(FlowError::Interrupted));
    assert_eq!(controller.active_flows(), 0);
}

#[tokio::test]
async fn starts_beyond_the_worker_limit_are_refused() {
    init_tracing();
    let config = FlowEngineConfig::new(Some(1), None);
    let mut controller = FlowFiberController::new(
        &config,
        Arc::new(JsonCheckpointSerializer),
        Arc::new(MemoryRecorder::new()),
        Arc::new(SystemClock),
    );

    let first = FlowId::new();
    controller
        .start_flow(first, Box::new(ScriptedFlow::awaiting(&[], "s1")))
        .await
        .unwrap();

    let err = controller
        .start_flow(FlowId::new(), Box::new(ScriptedFlow::completing(&[])))
        .await
        .unwrap_err();
    assert!(matches!(err, FiberError::AtCapacity { limit: 1 }));

    // Finishing the live flow frees its slot.
    controller
        .resume(first, FlowContinuation::Run(json!("done")))
        .await
        .unwrap();
    let request = controller
        .resume(first, FlowContinuation::Run(json!("done")))
        .await
        .unwrap();
    assert!(matches!(request, FlowIoRequest::FlowFinished(_)));
    controller
        .start_flow(FlowId::new(), Box::new(ScriptedFlow::completing(&[])))
        .await
        .unwrap();
}

#[tokio::test]
async fn interrupt_fails_the_flow_at_the_next_suspension() {
    init_tracing();
    let mut controller = controller();
    let flow_id = FlowId::new();

    controller
        .start_flow(flow_id, Box::new(ScriptedFlow::awaiting(&[], "s1")))
        .await
        .unwrap();
    controller.attempt_interrupt(flow_id);

    let request = controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();
    assert_eq!(request, FlowIoRequest::FlowFailed(FlowError::Interrupted));
}

#[tokio::test]
async fn resumed_flow_receives_the_injected_value() {
    init_tracing();
    let mut controller = controller();
    let flow_id = FlowId::new();

    controller
        .start_flow(flow_id, Box::new(ScriptedFlow::awaiting(&[], "s1")))
        .await
        .unwrap();
    controller
        .resume(flow_id, FlowContinuation::unit())
        .await
        .unwrap();

    let request = controller
        .resume(flow_id, FlowContinuation::Run(json!("payload")))
        .await
        .unwrap();
    assert_eq!(
        request,
        FlowIoRequest::FlowFinished(json!({ "result": "payload" }))
    );
}
