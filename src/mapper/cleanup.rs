//! Deferred cleanup of expired mapper state.
//!
//! No timer threads: expiries sit in a min-heap and the caller drains the
//! due ones into `ExecuteCleanup` events, re-injected into the same ordered
//! per-key event stream. Deletion always happens as a state transition, not
//! out-of-band.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use tracing::debug;

/// Min-heap of `(expiry, key)` pairs waiting to fire.
#[derive(Debug, Default)]
pub struct CleanupScheduler {
    pending: BinaryHeap<Reverse<(DateTime<Utc>, String)>>,
}

impl CleanupScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, key: impl Into<String>, expiry_time: DateTime<Utc>) {
        let key = key.into();
        debug!(%key, %expiry_time, "cleanup scheduled");
        self.pending.push(Reverse((expiry_time, key)));
    }

    /// Keys whose expiry is at or before `now`, in expiry order.
    ///
    /// The executor re-checks the armed expiry against the durable state,
    /// so firing for a key whose state was refreshed is harmless.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut fired = Vec::new();
        while let Some(Reverse((expiry, _))) = self.pending.peek() {
            if *expiry > now {
                break;
            }
            if let Some(Reverse((_, key))) = self.pending.pop() {
                fired.push(key);
            }
        }
        fired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
