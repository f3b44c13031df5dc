// Delivery queue wire types: the durable log entry and per-consumer position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::SystemEvent;

/// One externally-observable event, stamped with its position in the
/// session's ordered log. Cursors are dense and monotonic per session,
/// never derived from wall-clock time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub cursor: u64,
    pub session_id: Uuid,
    pub event: SystemEvent,
    pub enqueued_at: DateTime<Utc>,
}

/// A consumer's subscription state for one session.
///
/// `last_acked_cursor` is `i64` rather than `u64` so a brand-new consumer can
/// be bootstrapped at `-1` ("nothing seen yet") - a sentinel distinct from
/// any real cursor, which are always `>= 0`. Using `0` for that sentinel
/// would collide with an empty session's very first event and silently drop
/// it on reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerCursor {
    pub session_id: Uuid,
    pub consumer_id: String,
    pub last_acked_cursor: i64,
    pub subscribed_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl ConsumerCursor {
    pub fn new(session_id: Uuid, consumer_id: impl Into<String>, start_at: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            consumer_id: consumer_id.into(),
            last_acked_cursor: start_at,
            subscribed_at: now,
            last_seen_at: now,
        }
    }

    /// Advance the ack position, enforcing monotonicity. Idempotent and
    /// tolerant of out-of-order acks.
    pub fn ack(&mut self, cursor: u64) {
        if cursor as i64 > self.last_acked_cursor {
            self.last_acked_cursor = cursor as i64;
        }
        self.last_seen_at = Utc::now();
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }
}
