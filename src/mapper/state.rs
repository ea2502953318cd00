//! Durable per-key mapper state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FlowId, MessageDirection};

/// Routing status of one session-or-flow key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapperStatus {
    Open,
    Closing,
}

/// Small durable record keyed by session or flow identifier.
///
/// Exactly one exists per key at any time; all mutations to one key are
/// strictly sequential (single-writer-per-key, enforced upstream).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowMapperState {
    pub status: MapperStatus,
    /// Flow instance inbound traffic on this key routes to.
    pub flow_id: Option<FlowId>,
    pub expiry_time: Option<DateTime<Utc>>,
    pub scheduled_cleanup: bool,
    /// Highest contiguous sequence number observed per direction; the
    /// basis for dedup.
    pub inbound_watermark: u64,
    pub outbound_watermark: u64,
}

impl FlowMapperState {
    #[must_use]
    pub fn open(flow_id: Option<FlowId>) -> Self {
        Self {
            status: MapperStatus::Open,
            flow_id,
            expiry_time: None,
            scheduled_cleanup: false,
            inbound_watermark: 0,
            outbound_watermark: 0,
        }
    }

    /// Record `sequence_number` for `direction`; returns `false` when the
    /// event is a replay (at or below the watermark).
    pub fn observe(&mut self, direction: MessageDirection, sequence_number: u64) -> bool {
        let watermark = match direction {
            MessageDirection::Inbound => &mut self.inbound_watermark,
            MessageDirection::Outbound => &mut self.outbound_watermark,
        };
        if sequence_number <= *watermark {
            return false;
        }
        *watermark = sequence_number;
        true
    }

    #[must_use]
    pub fn watermark(&self, direction: MessageDirection) -> u64 {
        match direction {
            MessageDirection::Inbound => self.inbound_watermark,
            MessageDirection::Outbound => self.outbound_watermark,
        }
    }
}
