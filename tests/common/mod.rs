//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use ledgerflow::checkpoint::CheckpointPayload;
use ledgerflow::fiber::io_request::FlowIoRequest;
use ledgerflow::fiber::{FlowContext, FlowError, FlowLogic, FlowLogicFactory};
use ledgerflow::types::SessionId;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Scriptable flow logic with all locals promoted to serializable fields.
///
/// Opens its configured sessions on first entry, optionally parks on a
/// `SessionReceive`, and either completes with the received value or fails
/// with the scripted error.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScriptedFlow {
    /// `(session id, initiated)` pairs opened on first entry.
    pub sessions: Vec<(String, bool)>,
    /// Session to park on waiting for a payload, if any.
    pub awaiting: Option<String>,
    /// Fail with this message instead of completing.
    pub fail_with: Option<String>,
    /// Panic instead of completing, to exercise the forced-failure path.
    pub panic: bool,
    pub opened: bool,
    pub received: Option<Value>,
}

impl ScriptedFlow {
    pub fn completing(sessions: &[(&str, bool)]) -> Self {
        Self {
            sessions: sessions
                .iter()
                .map(|(id, initiated)| ((*id).to_string(), *initiated))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing(sessions: &[(&str, bool)], message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::completing(sessions)
        }
    }

    pub fn awaiting(sessions: &[(&str, bool)], session_id: &str) -> Self {
        Self {
            awaiting: Some(session_id.to_string()),
            ..Self::completing(sessions)
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl FlowLogic for ScriptedFlow {
    fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    async fn call(&mut self, ctx: &mut FlowContext) -> Result<Value, FlowError> {
        if !self.opened {
            for (id, initiated) in &self.sessions {
                ctx.open_session(SessionId::new(id.clone()), *initiated);
            }
            self.opened = true;
        }

        if self.panic {
            panic!("scripted panic");
        }

        if let Some(message) = &self.fail_with {
            return Err(FlowError::Logic(message.clone()));
        }

        if let Some(session) = self.awaiting.clone() {
            if self.received.is_none() {
                let value = ctx
                    .suspend(
                        FlowIoRequest::SessionReceive {
                            session_id: SessionId::new(session),
                        },
                        self.snapshot(),
                    )
                    .await?;
                self.received = Some(value);
            }
        }

        Ok(json!({ "result": self.received.clone().unwrap_or(Value::Null) }))
    }
}

/// Rebuilds a [`ScriptedFlow`] from its checkpointed snapshot.
pub struct ScriptedFlowFactory;

impl FlowLogicFactory for ScriptedFlowFactory {
    fn rebuild(&self, payload: &CheckpointPayload) -> Result<Box<dyn FlowLogic>, FlowError> {
        let flow: ScriptedFlow = serde_json::from_value(payload.flow_state.clone())
            .map_err(|e| FlowError::Checkpoint(e.to_string()))?;
        Ok(Box::new(flow))
    }
}

pub fn factory() -> Arc<ScriptedFlowFactory> {
    Arc::new(ScriptedFlowFactory)
}
