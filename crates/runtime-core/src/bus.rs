// SystemBus: in-process typed pub/sub with request/response correlation.
//
// Dispatch for a single `emit` is synchronous in the sense that every matching
// handler has completed (or been isolated on panic/error) before `emit`
// returns - callers that need fire-and-forget should spawn themselves.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use runtime_contracts::event::{EventCategory, EventIntent};
use runtime_contracts::SystemEvent;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, RuntimeError};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type EventHandler = Arc<dyn Fn(SystemEvent) -> BoxFuture<'static, ()> + Send + Sync>;
pub type EventFilter = Arc<dyn Fn(&SystemEvent) -> bool + Send + Sync>;

#[derive(Clone)]
enum Pattern {
    Any,
    One(String),
}

impl Pattern {
    fn matches(&self, event_type: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::One(t) => t == event_type,
        }
    }
}

struct Subscription {
    id: u64,
    pattern: Pattern,
    priority: i32,
    once: bool,
    filter: Option<EventFilter>,
    handler: EventHandler,
}

#[derive(Default)]
pub struct SubscribeOptions {
    pub priority: i32,
    pub once: bool,
    pub filter: Option<EventFilter>,
}

/// A handle returned from `on`/`on_command`. Dropping it does not
/// unsubscribe; call `unsubscribe()` explicitly.
pub struct Subscriber {
    id: u64,
    bus: SystemBus,
}

impl Subscriber {
    pub async fn unsubscribe(self) {
        self.bus.remove(self.id).await;
    }
}

#[derive(Default)]
struct BusState {
    subscriptions: Vec<Subscription>,
}

/// Cheaply cloneable handle to the shared bus state.
#[derive(Clone)]
pub struct SystemBus {
    state: Arc<RwLock<BusState>>,
    next_id: Arc<AtomicU64>,
}

impl SystemBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(BusState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn remove(&self, id: u64) {
        let mut state = self.state.write().await;
        state.subscriptions.retain(|s| s.id != id);
    }

    fn subscribe_inner(
        &self,
        pattern: Pattern,
        handler: EventHandler,
        opts: SubscribeOptions,
    ) -> (u64, Subscription) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        (
            id,
            Subscription {
                id,
                pattern,
                priority: opts.priority,
                once: opts.once,
                filter: opts.filter,
                handler,
            },
        )
    }

    /// Subscribe to one type, a set of types, or `"*"` for everything.
    pub async fn on(
        &self,
        event_type: &str,
        handler: EventHandler,
        opts: SubscribeOptions,
    ) -> Subscriber {
        let pattern = if event_type == "*" {
            Pattern::Any
        } else {
            Pattern::One(event_type.to_string())
        };
        let (id, sub) = self.subscribe_inner(pattern, handler, opts);
        let mut state = self.state.write().await;
        let pos = state
            .subscriptions
            .partition_point(|s| s.priority >= sub.priority);
        state.subscriptions.insert(pos, sub);
        Subscriber {
            id,
            bus: self.clone(),
        }
    }

    /// Subscribe to a `_request` type, treated identically to `on` - named
    /// separately only to mark intent at call sites inside CommandHandler.
    pub async fn on_command(&self, request_type: &str, handler: EventHandler) -> Subscriber {
        self.on(request_type, handler, SubscribeOptions::default())
            .await
    }

    /// Deliver `event` to every matching subscriber in priority order,
    /// awaiting each handler before moving to the next. Handlers that panic
    /// are caught and logged so one bad subscriber cannot break dispatch for
    /// the rest.
    pub async fn emit(&self, event: SystemEvent) {
        let (matching, once_ids) = {
            let state = self.state.read().await;
            let mut matching = Vec::new();
            let mut once_ids = Vec::new();
            for sub in state.subscriptions.iter() {
                if !sub.pattern.matches(&event.r#type) {
                    continue;
                }
                if let Some(filter) = &sub.filter {
                    if !filter(&event) {
                        continue;
                    }
                }
                matching.push(sub.handler.clone());
                if sub.once {
                    once_ids.push(sub.id);
                }
            }
            (matching, once_ids)
        };

        if !once_ids.is_empty() {
            let mut state = self.state.write().await;
            state.subscriptions.retain(|s| !once_ids.contains(&s.id));
        }

        debug!(event_type = %event.r#type, handlers = matching.len(), "bus dispatch");
        for handler in matching {
            let fut = std::panic::AssertUnwindSafe(handler(event.clone()));
            if let Err(_panic) = futures::FutureExt::catch_unwind(fut).await {
                warn!(event_type = %event.r#type, "event handler panicked");
            }
        }
    }

    /// Stamp timestamp/category/intent by suffix and emit. `_request` types
    /// get `category=Request, intent=Request`; `_response` types get
    /// `category=Response, intent=Result`; anything else is left as given.
    pub async fn emit_command(&self, mut event: SystemEvent) {
        if event.r#type.ends_with("_request") {
            event.category = EventCategory::Request;
            event.intent = EventIntent::Request;
        } else if event.r#type.ends_with("_response") {
            event.category = EventCategory::Response;
            event.intent = EventIntent::Result;
        }
        self.emit(event).await;
    }

    /// Request/response round trip: emits a `_request` event (stamping a
    /// fresh `request_id`), subscribes once to the paired `_response` type
    /// filtered by that id, and resolves with the first match or times out.
    pub async fn request(
        &self,
        mut event: SystemEvent,
        timeout: std::time::Duration,
    ) -> Result<SystemEvent> {
        let response_type = SystemEvent::response_type_for(&event.r#type)
            .ok_or_else(|| RuntimeError::config(format!("{} is not a request type", event.r#type)))?;

        let request_id = event.request_id.unwrap_or_else(Uuid::now_v7);
        event.request_id = Some(request_id);
        if let serde_json::Value::Object(map) = &mut event.data {
            map.insert("request_id".to_string(), serde_json::json!(request_id));
        }

        let (tx, rx) = oneshot::channel::<SystemEvent>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
        let filter: EventFilter = {
            let expected = request_id;
            Arc::new(move |e: &SystemEvent| e.request_id == Some(expected))
        };
        let handler: EventHandler = {
            let tx = tx.clone();
            Arc::new(move |e: SystemEvent| {
                let tx = tx.clone();
                Box::pin(async move {
                    if let Some(sender) = tx.lock().unwrap().take() {
                        let _ = sender.send(e);
                    }
                })
            })
        };
        let subscriber = self
            .on(
                &response_type,
                handler,
                SubscribeOptions {
                    priority: 0,
                    once: true,
                    filter: Some(filter),
                },
            )
            .await;

        self.emit_command(event).await;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RuntimeError::RequestTimeout(timeout)),
            Err(_) => {
                subscriber.unsubscribe().await;
                Err(RuntimeError::RequestTimeout(timeout))
            }
        }
    }

    /// A write-only view: only `emit`/`emit_command` are reachable.
    pub fn as_producer(&self) -> BusProducer {
        BusProducer { bus: self.clone() }
    }

    /// A read-only view: only `on`/`on_command` are reachable.
    pub fn as_consumer(&self) -> BusConsumer {
        BusConsumer { bus: self.clone() }
    }
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct BusProducer {
    bus: SystemBus,
}

impl BusProducer {
    pub async fn emit(&self, event: SystemEvent) {
        self.bus.emit(event).await;
    }

    pub async fn emit_command(&self, event: SystemEvent) {
        self.bus.emit_command(event).await;
    }
}

#[derive(Clone)]
pub struct BusConsumer {
    bus: SystemBus,
}

impl BusConsumer {
    pub async fn on(
        &self,
        event_type: &str,
        handler: EventHandler,
        opts: SubscribeOptions,
    ) -> Subscriber {
        self.bus.on(event_type, handler, opts).await
    }
}

pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(SystemEvent) -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_contracts::event::EventSource;
    use std::sync::atomic::AtomicUsize;

    fn evt(t: &str, source: EventSource, category: EventCategory, intent: EventIntent) -> SystemEvent {
        SystemEvent::new(t, source, category, intent, serde_json::json!({}))
    }

    #[tokio::test]
    async fn dispatch_calls_matching_handlers_only() {
        let bus = SystemBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.on(
            "text_delta",
            handler(move |_e| {
                let count = count2.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }),
            SubscribeOptions::default(),
        )
        .await;

        bus.emit(evt(
            "text_delta",
            EventSource::Environment,
            EventCategory::Stream,
            EventIntent::Notification,
        ))
        .await;
        bus.emit(evt(
            "message_stop",
            EventSource::Environment,
            EventCategory::Stream,
            EventIntent::Notification,
        ))
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn once_subscription_fires_once() {
        let bus = SystemBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.on(
            "ping",
            handler(move |_e| {
                let count = count2.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }),
            SubscribeOptions {
                once: true,
                ..Default::default()
            },
        )
        .await;

        let e = evt("ping", EventSource::Agent, EventCategory::Action, EventIntent::Notification);
        bus.emit(e.clone()).await;
        bus.emit(e).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let bus = SystemBus::new();
        let bus2 = bus.clone();
        bus.on_command(
            "ping_request",
            handler(move |e| {
                let bus2 = bus2.clone();
                Box::pin(async move {
                    let mut response = SystemEvent::new(
                        "ping_response",
                        EventSource::Command,
                        EventCategory::Response,
                        EventIntent::Result,
                        serde_json::json!({"ok": true}),
                    );
                    response.request_id = e.request_id;
                    bus2.emit_command(response).await;
                })
            }),
        )
        .await;

        let request = SystemEvent::new(
            "ping_request",
            EventSource::Command,
            EventCategory::Request,
            EventIntent::Request,
            serde_json::json!({}),
        );
        let response = bus
            .request(request, std::time::Duration::from_secs(1))
            .await
            .expect("response");
        assert_eq!(response.r#type, "ping_response");
    }

    #[tokio::test]
    async fn request_times_out_with_no_responder() {
        let bus = SystemBus::new();
        let request = SystemEvent::new(
            "nobody_home_request",
            EventSource::Command,
            EventCategory::Request,
            EventIntent::Request,
            serde_json::json!({}),
        );
        let result = bus
            .request(request, std::time::Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(RuntimeError::RequestTimeout(_))));
    }
}
