// Environment = Receptor + Effector: the adapter between the bus and an
// external LLM SDK stream.
//
// The Effector side owns a single-flight queue per agent (backed by
// AsyncQueue) so that a `user_message` arriving mid-turn is queued rather
// than interleaved with the turn already in flight. The Receptor side
// consumes the upstream SDK stream and emits DriveableEvents tagged with the
// `request_id`/`context` captured at send time - this mapping mirrors the
// OpenAI streaming-SSE adapter's accumulator style (index-keyed tool call
// buffers, a running block-kind per content index) generalized to any SDK.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use runtime_contracts::event::{DriveableEventType, EventCategory, EventContext, EventIntent, EventSource};
use runtime_contracts::SystemEvent;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::SystemBus;
use crate::error::Result;
use crate::queue::{async_queue, AsyncQueueSender};

/// Content a user turn is sent with. Multimodal parts are passed through
/// opaquely; the adapter is responsible for understanding them.
#[derive(Debug, Clone)]
pub enum OutboundContent {
    Text(String),
    Parts(serde_json::Value),
}

/// A single partial event from the upstream SDK stream, already reduced to
/// the shape the Receptor needs - SDK-specific parsing happens in the
/// adapter crate (runtime-llm), not here.
#[derive(Debug, Clone)]
pub enum SdkStreamEvent {
    MessageStart { message_id: String, model: Option<String> },
    TextBlockStart { index: usize },
    TextDelta { index: usize, text: String },
    TextBlockStop { index: usize },
    ToolUseBlockStart { index: usize, id: String, name: String },
    InputJsonDelta { index: usize, partial_json: String },
    ToolUseBlockStop { index: usize },
    MessageStop { stop_reason: Option<String> },
    ToolResult { tool_use_id: String, result: serde_json::Value, is_error: bool },
    Interrupted { reason: String },
    Error { message: String, code: Option<String> },
}

/// Parameters the adapter needs to start or resume a turn with the upstream
/// SDK. `resume_session_id`, once first observed, should be reported back
/// via the `on_session_id` callback so the caller can persist it on the
/// image's metadata.
pub struct TurnRequest {
    pub content: OutboundContent,
    pub system_prompt: Option<String>,
    pub cwd: PathBuf,
    pub mcp_servers: serde_json::Value,
    pub resume_session_id: Option<String>,
    pub cancel: CancellationToken,
}

/// The external collaborator: something that can drive one turn of
/// conversation against an LLM SDK and yield its stream. Implemented by
/// runtime-llm's SDK adapter and by the in-memory mock used in tests.
#[async_trait]
pub trait LlmSdk: Send + Sync {
    async fn stream_turn(&self, request: TurnRequest) -> Result<BoxStream<'static, SdkStreamEvent>>;

    /// Best-effort hint of the SDK session id to resume from, observed as
    /// soon as the adapter knows it (often before the first event).
    fn session_id_hint(&self) -> Option<String> {
        None
    }
}

enum EffectorCommand {
    UserMessage {
        request_id: Uuid,
        content: OutboundContent,
    },
    Interrupt {
        request_id: Option<Uuid>,
    },
}

/// Per-agent LLM bridge. Construction spawns the effector loop task; call
/// `shutdown` to cancel any in-flight turn and stop it. `queue_tx` is held
/// behind a lock so `shutdown` can take and drop it from a shared `&self` -
/// closing the channel is what ends the effector loop, since the sender has
/// no other owner.
pub struct Environment {
    queue_tx: Mutex<Option<AsyncQueueSender<EffectorCommand>>>,
    current_cancel: Arc<Mutex<Option<CancellationToken>>>,
}

impl Environment {
    pub fn spawn(
        bus: SystemBus,
        sdk: Arc<dyn LlmSdk>,
        context: EventContext,
        system_prompt: Option<String>,
        cwd: PathBuf,
        mcp_servers: serde_json::Value,
        resume_session_id: Option<String>,
        on_session_id: Arc<dyn Fn(String) + Send + Sync>,
    ) -> Self {
        let (tx, mut rx) = async_queue::<EffectorCommand>();
        let current_cancel = Arc::new(Mutex::new(None::<CancellationToken>));
        let current_cancel_task = current_cancel.clone();

        tokio::spawn(async move {
            let mut resume_id = resume_session_id;
            while let Some(cmd) = rx.next().await {
                match cmd {
                    EffectorCommand::Interrupt { .. } => {
                        if let Some(token) = current_cancel_task.lock().await.as_ref() {
                            token.cancel();
                        }
                    }
                    EffectorCommand::UserMessage { request_id, content } => {
                        let cancel = CancellationToken::new();
                        *current_cancel_task.lock().await = Some(cancel.clone());

                        let request = TurnRequest {
                            content,
                            system_prompt: system_prompt.clone(),
                            cwd: cwd.clone(),
                            mcp_servers: mcp_servers.clone(),
                            resume_session_id: resume_id.clone(),
                            cancel: cancel.clone(),
                        };

                        match sdk.stream_turn(request).await {
                            Ok(mut stream) => {
                                if let Some(hint) = sdk.session_id_hint() {
                                    if resume_id.as_deref() != Some(hint.as_str()) {
                                        resume_id = Some(hint.clone());
                                        (on_session_id)(hint);
                                    }
                                }
                                loop {
                                    tokio::select! {
                                        biased;
                                        _ = cancel.cancelled() => {
                                            emit_driveable(
                                                &bus,
                                                DriveableEventType::Interrupted,
                                                json!({"reason": "interrupted"}),
                                                request_id,
                                                context.clone(),
                                            ).await;
                                            break;
                                        }
                                        next = stream.next() => {
                                            match next {
                                                Some(event) => {
                                                    dispatch_sdk_event(&bus, event, request_id, context.clone()).await;
                                                }
                                                None => break,
                                            }
                                        }
                                    }
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "environment failed to start turn");
                                emit_driveable(
                                    &bus,
                                    DriveableEventType::ErrorReceived,
                                    json!({"message": err.to_string(), "error_code": null}),
                                    request_id,
                                    context.clone(),
                                )
                                .await;
                            }
                        }
                        *current_cancel_task.lock().await = None;
                    }
                }
            }
            debug!("environment effector loop ended");
        });

        Self {
            queue_tx: Mutex::new(Some(tx)),
            current_cancel,
        }
    }

    pub async fn receive(&self, request_id: Uuid, content: OutboundContent) {
        if let Some(tx) = self.queue_tx.lock().await.as_ref() {
            tx.push(EffectorCommand::UserMessage { request_id, content });
        }
    }

    pub async fn interrupt(&self, request_id: Option<Uuid>) {
        if let Some(tx) = self.queue_tx.lock().await.as_ref() {
            tx.push(EffectorCommand::Interrupt { request_id });
        }
    }

    pub async fn is_streaming(&self) -> bool {
        self.current_cancel.lock().await.is_some()
    }

    /// Cancels any in-flight turn and closes the effector loop's channel,
    /// ending its background task. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(token) = self.current_cancel.lock().await.take() {
            token.cancel();
        }
        self.queue_tx.lock().await.take();
    }
}

async fn dispatch_sdk_event(bus: &SystemBus, event: SdkStreamEvent, request_id: Uuid, context: EventContext) {
    use SdkStreamEvent::*;
    let (kind, data) = match event {
        MessageStart { message_id, model } => (
            DriveableEventType::MessageStart,
            json!({"message_id": message_id, "model": model}),
        ),
        TextBlockStart { index } => (
            DriveableEventType::TextContentBlockStart,
            json!({"index": index}),
        ),
        TextDelta { index, text } => (
            DriveableEventType::TextDelta,
            json!({"index": index, "text": text}),
        ),
        TextBlockStop { index } => (
            DriveableEventType::TextContentBlockStop,
            json!({"index": index}),
        ),
        ToolUseBlockStart { index, id, name } => (
            DriveableEventType::ToolUseContentBlockStart,
            json!({"index": index, "id": id, "name": name}),
        ),
        InputJsonDelta { index, partial_json } => (
            DriveableEventType::InputJsonDelta,
            json!({"index": index, "partial_json": partial_json}),
        ),
        ToolUseBlockStop { index } => (
            DriveableEventType::ToolUseContentBlockStop,
            json!({"index": index}),
        ),
        MessageStop { stop_reason } => (
            DriveableEventType::MessageStop,
            json!({"stop_reason": stop_reason}),
        ),
        ToolResult { tool_use_id, result, is_error } => (
            DriveableEventType::ToolResult,
            json!({"tool_use_id": tool_use_id, "result": result, "is_error": is_error}),
        ),
        Interrupted { reason } => (
            DriveableEventType::Interrupted,
            json!({"reason": reason}),
        ),
        Error { message, code } => (
            DriveableEventType::ErrorReceived,
            json!({"message": message, "error_code": code}),
        ),
    };
    emit_driveable(bus, kind, data, request_id, context).await;
}

async fn emit_driveable(
    bus: &SystemBus,
    kind: DriveableEventType,
    data: serde_json::Value,
    request_id: Uuid,
    context: EventContext,
) {
    let event = SystemEvent::new(
        kind.as_str(),
        EventSource::Environment,
        EventCategory::Stream,
        EventIntent::Notification,
        data,
    )
    .with_context(context)
    .with_request_id(request_id);
    bus.emit(event).await;
}
