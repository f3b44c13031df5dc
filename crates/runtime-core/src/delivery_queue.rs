// Delivery Queue: per-session ordered log with monotonic cursors, per-consumer
// positions, ACK, reconnect resume and TTL cleanup. The largest and most
// load-bearing component of the runtime core - see SPEC_FULL.md §4.9.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use runtime_contracts::event::EventIntent;
use runtime_contracts::{ConsumerCursor, DeliveryRecord, SystemEvent};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

struct ConsumerState {
    cursor: ConsumerCursor,
    sender: Option<mpsc::Sender<DeliveryRecord>>,
}

#[derive(Default)]
struct SessionLog {
    records: Vec<DeliveryRecord>,
    next_cursor: u64,
    consumers: HashMap<String, ConsumerState>,
}

pub struct DeliveryQueueConfig {
    pub high_water_mark: usize,
    pub consumer_ttl: ChronoDuration,
    pub event_ttl: ChronoDuration,
}

impl Default for DeliveryQueueConfig {
    fn default() -> Self {
        Self {
            high_water_mark: 1024,
            consumer_ttl: ChronoDuration::hours(24),
            event_ttl: ChronoDuration::hours(48),
        }
    }
}

pub struct DeliveryQueue {
    sessions: RwLock<HashMap<Uuid, SessionLog>>,
    config: DeliveryQueueConfig,
}

impl DeliveryQueue {
    pub fn new(config: DeliveryQueueConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Appends an externally-observable event to its session's log and
    /// fans it out to every currently-connected consumer. `user_message`
    /// with `intent=Request` (the internal trigger) is never enqueued here -
    /// only the `source=agent` notification variant is.
    pub async fn append(&self, event: SystemEvent) {
        if event.intent == EventIntent::Request {
            return;
        }
        let Some(session_id) = event.context.session_id else {
            return;
        };

        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(session_id).or_default();
        let cursor = log.next_cursor;
        log.next_cursor += 1;
        let record = DeliveryRecord {
            cursor,
            session_id,
            event,
            enqueued_at: Utc::now(),
        };
        log.records.push(record.clone());

        let mut dead = Vec::new();
        for (consumer_id, state) in log.consumers.iter_mut() {
            let Some(sender) = &state.sender else { continue };
            if sender.try_send(record.clone()).is_err() {
                warn!(%consumer_id, %session_id, "consumer backpressure exceeded, dropping connection");
                dead.push(consumer_id.clone());
            }
        }
        for consumer_id in dead {
            if let Some(state) = log.consumers.get_mut(&consumer_id) {
                state.sender = None;
            }
        }
    }

    /// Subscribes a consumer to a session, resuming from `last_acked_cursor
    /// + 1` if a cursor record already exists, or from the current tail
    /// (no history) for a brand new consumer. Returns a receiver for the
    /// live stream; any events enqueued while this consumer was disconnected
    /// are replayed onto it before returning.
    pub async fn subscribe(&self, session_id: Uuid, consumer_id: &str) -> mpsc::Receiver<DeliveryRecord> {
        let (tx, rx) = mpsc::channel(self.config.high_water_mark);

        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(session_id).or_default();

        // next_cursor - 1 yields -1 (the "nothing seen" sentinel) for an
        // empty log, and the cursor of the last existing record otherwise -
        // either way, exactly the threshold a new subscriber should start
        // strictly after.
        let start_cursor = log.next_cursor as i64 - 1;
        let state = log
            .consumers
            .entry(consumer_id.to_string())
            .or_insert_with(|| ConsumerState {
                cursor: ConsumerCursor::new(session_id, consumer_id, start_cursor),
                sender: None,
            });
        state.cursor.touch();

        let resume_from = state.cursor.last_acked_cursor;
        let backlog: Vec<_> = log
            .records
            .iter()
            .filter(|r| r.cursor as i64 > resume_from)
            .cloned()
            .collect();
        for record in backlog {
            if tx.try_send(record).is_err() {
                warn!(%consumer_id, %session_id, "backlog replay exceeded high-water mark, truncating");
                break;
            }
        }
        state.sender = Some(tx);

        debug!(%consumer_id, %session_id, resume_from, "consumer subscribed");
        rx
    }

    pub async fn unsubscribe(&self, session_id: Uuid, consumer_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(log) = sessions.get_mut(&session_id) {
            if let Some(state) = log.consumers.get_mut(consumer_id) {
                state.sender = None;
                state.cursor.touch();
            }
        }
    }

    /// Advances the consumer's ack position monotonically. Idempotent and
    /// tolerant of out-of-order acks.
    pub async fn ack(&self, session_id: Uuid, consumer_id: &str, cursor: u64) {
        let mut sessions = self.sessions.write().await;
        if let Some(log) = sessions.get_mut(&session_id) {
            if let Some(state) = log.consumers.get_mut(consumer_id) {
                state.cursor.ack(cursor);
            }
        }
    }

    /// Removes stale consumer cursors (absent beyond the TTL) and events
    /// that every live consumer has already acked past and that are older
    /// than the event TTL. Never deletes an event a live consumer could
    /// still need.
    pub async fn sweep(&self) {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        for (session_id, log) in sessions.iter_mut() {
            let stale: Vec<String> = log
                .consumers
                .iter()
                .filter(|(_, state)| now.signed_duration_since(state.cursor.last_seen_at) >= self.config.consumer_ttl)
                .map(|(id, _)| id.clone())
                .collect();
            for consumer_id in &stale {
                log.consumers.remove(consumer_id);
                debug!(%session_id, %consumer_id, "consumer cursor expired");
            }

            let min_acked = log.consumers.values().map(|s| s.cursor.last_acked_cursor).min();
            let before = log.records.len();
            log.records.retain(|record| {
                let past_ttl = now.signed_duration_since(record.enqueued_at) >= self.config.event_ttl;
                let safe_to_drop = match min_acked {
                    Some(min) => record.cursor as i64 <= min,
                    // no live consumers at all - still only drop once past TTL
                    None => true,
                };
                !(past_ttl && safe_to_drop)
            });
            let removed = before - log.records.len();
            if removed > 0 {
                debug!(%session_id, removed, "delivery records expired");
            }
        }
        sessions.retain(|_, log| !log.records.is_empty() || !log.consumers.is_empty());
    }

    /// Spawns a periodic background sweep. Returns the task handle so
    /// callers can cancel it on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                queue.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_contracts::event::{EventCategory, EventContext, EventSource};

    fn notification(session_id: Uuid) -> SystemEvent {
        SystemEvent::new(
            "text_delta",
            EventSource::Agent,
            EventCategory::Stream,
            EventIntent::Notification,
            serde_json::json!({"text": "x"}),
        )
        .with_context(EventContext::default().with_session(session_id))
    }

    #[tokio::test]
    async fn cursor_monotonicity_and_no_phantom_history() {
        let queue = DeliveryQueue::new(DeliveryQueueConfig::default());
        let session_id = Uuid::now_v7();

        queue.append(notification(session_id)).await;
        queue.append(notification(session_id)).await;

        // brand new consumer: no history, only events appended after subscribe
        let mut rx = queue.subscribe(session_id, "c1").await;
        queue.append(notification(session_id)).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.cursor, 2);
    }

    #[tokio::test]
    async fn resume_from_ack_after_reconnect() {
        let queue = DeliveryQueue::new(DeliveryQueueConfig::default());
        let session_id = Uuid::now_v7();

        let mut rx = queue.subscribe(session_id, "c1").await;
        for _ in 0..5 {
            queue.append(notification(session_id)).await;
        }
        for _ in 0..5 {
            rx.recv().await.unwrap();
        }
        queue.ack(session_id, "c1", 1).await;
        queue.unsubscribe(session_id, "c1").await;

        queue.append(notification(session_id)).await; // cursor 5, while disconnected

        let mut rx2 = queue.subscribe(session_id, "c1").await;
        let replayed = rx2.recv().await.unwrap();
        assert_eq!(replayed.cursor, 2);
        let cursors: Vec<u64> = {
            let mut c = vec![replayed.cursor];
            while let Ok(r) = rx2.try_recv() {
                c.push(r.cursor);
            }
            c
        };
        assert_eq!(cursors, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn unacked_new_consumer_still_gets_cursor_zero_after_reconnect() {
        // A consumer that subscribes to a brand new (empty) session, drops
        // without acking anything, and reconnects after events land while it
        // was away must still see cursor 0 - not skip it as "already seen".
        let queue = DeliveryQueue::new(DeliveryQueueConfig::default());
        let session_id = Uuid::now_v7();

        let _rx = queue.subscribe(session_id, "c1").await;
        queue.unsubscribe(session_id, "c1").await;

        queue.append(notification(session_id)).await; // cursor 0, while offline
        queue.append(notification(session_id)).await; // cursor 1, while offline

        let mut rx2 = queue.subscribe(session_id, "c1").await;
        let first = rx2.recv().await.unwrap();
        assert_eq!(first.cursor, 0);
        let second = rx2.recv().await.unwrap();
        assert_eq!(second.cursor, 1);
    }

    #[tokio::test]
    async fn ttl_sweep_removes_stale_consumer_and_acked_events() {
        let mut config = DeliveryQueueConfig::default();
        config.consumer_ttl = ChronoDuration::seconds(-1); // already expired
        config.event_ttl = ChronoDuration::seconds(-1);
        let queue = DeliveryQueue::new(config);
        let session_id = Uuid::now_v7();

        let _rx = queue.subscribe(session_id, "c1").await;
        queue.append(notification(session_id)).await;
        queue.ack(session_id, "c1", 0).await;

        queue.sweep().await;

        let sessions = queue.sessions.read().await;
        assert!(sessions.get(&session_id).is_none() || sessions[&session_id].consumers.is_empty());
    }
}
