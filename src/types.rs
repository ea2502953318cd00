//! Core identity types for the ledgerflow engine.
//!
//! This module defines the stable identifiers used throughout the system
//! for correlating flows and sessions. These are the core domain concepts
//! the rest of the engine is keyed by.
//!
//! # Key Types
//!
//! - [`FlowId`]: Opaque unique identifier for one flow instance
//! - [`SessionId`]: Identifier for one logical conversation with a counterparty
//! - [`MessageDirection`]: Whether a session event is travelling to or from a peer

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque unique identifier for one flow instance.
///
/// Created when a flow starts and referenced for the instance's entire
/// lifetime, including after completion for audit lookups.
///
/// # Examples
///
/// ```rust
/// use ledgerflow::types::FlowId;
///
/// let id = FlowId::new();
/// let same = FlowId::from(id.as_uuid());
/// assert_eq!(id, same);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(Uuid);

impl FlowId {
    /// Generate a fresh flow id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for FlowId {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one logical conversation with a counterparty within a flow.
///
/// The initiating side and the responding side of a conversation share the
/// same base identifier; the responder's copy carries the `-INITIATED`
/// suffix so both ends map to distinct mapper keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

/// Suffix distinguishing the responder-side copy of a session id.
pub const INITIATED_SESSION_SUFFIX: &str = "-INITIATED";

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh initiator-side session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is the responder-side copy of the id.
    #[must_use]
    pub fn is_initiated(&self) -> bool {
        self.0.ends_with(INITIATED_SESSION_SUFFIX)
    }

    /// The id the counterparty knows this session by.
    ///
    /// Toggles the `-INITIATED` suffix: the initiator addresses the
    /// responder's copy and vice versa.
    #[must_use]
    pub fn counterpart(&self) -> SessionId {
        match self.0.strip_suffix(INITIATED_SESSION_SUFFIX) {
            Some(base) => SessionId(base.to_string()),
            None => SessionId(format!("{}{INITIATED_SESSION_SUFFIX}", self.0)),
        }
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a session event relative to this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageDirection {
    /// Delivered by the transport from a counterparty.
    Inbound,
    /// Produced locally, to be delivered to a counterparty.
    Outbound,
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}
