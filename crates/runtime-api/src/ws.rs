// WebSocket transport: one connection per client, bidirectional JSON frames
// `{ type, data }`. The teacher's own streaming endpoint (events.rs) is SSE,
// not a true upgrade, so this handler is authored fresh against
// `axum::extract::ws` while keeping the teacher's route-module/AppState
// shape (`routes(state) -> Router`).
//
// Each connection runs a read pump (this task) plus one writer task that
// owns the `SplitSink` exclusively - everything else (request futures,
// delivery-queue forwarders, the system_error broadcast) sends frames
// through an mpsc channel rather than touching the socket directly.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use runtime_contracts::event::{EventCategory, EventIntent, EventSource};
use runtime_contracts::SystemEvent;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    r#type: String,
    #[serde(default)]
    data: Value,
}

struct ConnectionState {
    out_tx: mpsc::UnboundedSender<Message>,
    state: AppState,
    consumer_id: String,
    subscribed: Mutex<HashSet<Uuid>>,
}

impl ConnectionState {
    fn send_frame(&self, r#type: &str, data: Value) {
        let frame = json!({"type": r#type, "data": data});
        let _ = self.out_tx.send(Message::Text(frame.to_string()));
    }

    fn send_event(&self, event: &SystemEvent, cursor: Option<u64>) {
        let mut data = event.data.clone();
        if let (Some(request_id), Value::Object(map)) = (event.request_id, &mut data) {
            map.entry("request_id").or_insert_with(|| json!(request_id));
        }
        if let (Some(cursor), Value::Object(map)) = (cursor, &mut data) {
            map.insert("cursor".to_string(), json!(cursor));
        }
        self.send_frame(&event.r#type, data);
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let conn = Arc::new(ConnectionState {
        out_tx: out_tx.clone(),
        state: state.clone(),
        consumer_id: Uuid::now_v7().to_string(),
        subscribed: Mutex::new(HashSet::new()),
    });

    let error_bridge = spawn_system_error_bridge(conn.clone()).await;

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(err) => {
                debug!(error = %err, "websocket receive error");
                break;
            }
        };
        match message {
            Message::Text(text) => handle_client_frame(&conn, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    error_bridge.unsubscribe().await;
    let subscribed: Vec<Uuid> = conn.subscribed.lock().await.iter().copied().collect();
    for session_id in subscribed {
        conn.state.delivery_queue().unsubscribe(session_id, &conn.consumer_id).await;
    }
    drop(conn);
    writer.abort();
}

async fn handle_client_frame(conn: &Arc<ConnectionState>, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(err) => {
            warn!(error = %err, "malformed client frame");
            return;
        }
    };

    match frame.r#type.as_str() {
        "subscribe" => {
            if let Some(session_id) = parse_session_id(&frame.data) {
                subscribe_session(conn.clone(), session_id).await;
            }
        }
        "unsubscribe" => {
            if let Some(session_id) = parse_session_id(&frame.data) {
                conn.state.delivery_queue().unsubscribe(session_id, &conn.consumer_id).await;
                conn.subscribed.lock().await.remove(&session_id);
            }
        }
        "ack" => {
            if let Some(session_id) = parse_session_id(&frame.data) {
                let cursor = frame.data.get("cursor").and_then(|v| v.as_u64()).unwrap_or(0);
                conn.state.delivery_queue().ack(session_id, &conn.consumer_id, cursor).await;
            }
        }
        t if t.ends_with("_request") => {
            dispatch_command(conn.clone(), frame).await;
        }
        other => {
            debug!(frame_type = other, "ignoring unrecognized client frame type");
        }
    }
}

fn parse_session_id(data: &Value) -> Option<Uuid> {
    data.get("session_id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok())
}

async fn subscribe_session(conn: Arc<ConnectionState>, session_id: Uuid) {
    {
        let mut subscribed = conn.subscribed.lock().await;
        if !subscribed.insert(session_id) {
            return;
        }
    }
    let mut rx = conn.state.delivery_queue().subscribe(session_id, &conn.consumer_id).await;
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            conn.send_event(&record.event, Some(record.cursor));
        }
    });
}

async fn dispatch_command(conn: Arc<ConnectionState>, frame: ClientFrame) {
    tokio::spawn(async move {
        let request = SystemEvent::new(frame.r#type.clone(), EventSource::Command, EventCategory::Request, EventIntent::Request, frame.data);
        let timeout = conn.state.config.request_timeout();
        match conn.state.bus().request(request, timeout).await {
            Ok(response) => {
                if let Some(sessions) = response.data.get("__subscriptions").and_then(|v| v.as_array()) {
                    for session_id in sessions.iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()) {
                        subscribe_session(conn.clone(), session_id).await;
                    }
                }
                conn.send_event(&response, None);
            }
            Err(err) => {
                let response_type =
                    SystemEvent::response_type_for(&frame.r#type).unwrap_or_else(|| format!("{}_response", frame.r#type));
                conn.send_frame(&response_type, json!({"error": err.to_string()}));
            }
        }
    });
}

async fn spawn_system_error_bridge(conn: Arc<ConnectionState>) -> runtime_core::bus::Subscriber {
    conn.state
        .bus()
        .on(
            "system_error",
            runtime_core::bus::handler(move |event| {
                let conn = conn.clone();
                Box::pin(async move {
                    conn.send_event(&event, None);
                })
            }),
            runtime_core::bus::SubscribeOptions::default(),
        )
        .await
}
