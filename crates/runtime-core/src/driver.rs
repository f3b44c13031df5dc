// BusDriver: the outbound side of an agent. Filters the bus for this agent's
// DriveableEvents and normalizes them into the engine's StreamEvent shape.

use std::sync::Arc;

use runtime_contracts::event::{DriveableEventType, EventSource};
use runtime_contracts::SystemEvent;
use tracing::warn;
use uuid::Uuid;

use crate::bus::{handler, SubscribeOptions, Subscriber, SystemBus};
use crate::engine::{AgentEngine, StreamEvent};

pub struct BusDriver {
    subscriber: Option<Subscriber>,
}

impl BusDriver {
    pub async fn attach(bus: &SystemBus, agent_id: Uuid, engine: Arc<AgentEngine>) -> Self {
        let agent_id_filter = agent_id;
        let filter = Arc::new(move |e: &SystemEvent| {
            e.source == EventSource::Environment
                && e.context.agent_id == Some(agent_id_filter)
                && is_driveable_type(&e.r#type)
        });

        let subscriber = bus
            .on(
                "*",
                handler(move |event| {
                    let engine = engine.clone();
                    Box::pin(async move {
                        if let Some(stream_event) = to_stream_event(&event) {
                            if let Err(err) = engine.on_stream_event(stream_event).await {
                                warn!(error = %err, "agent engine failed to process stream event");
                            }
                        }
                    })
                }),
                SubscribeOptions {
                    priority: 0,
                    once: false,
                    filter: Some(filter),
                },
            )
            .await;

        Self {
            subscriber: Some(subscriber),
        }
    }

    pub async fn detach(mut self) {
        if let Some(subscriber) = self.subscriber.take() {
            subscriber.unsubscribe().await;
        }
    }
}

fn is_driveable_type(t: &str) -> bool {
    DriveableEventType::all().iter().any(|d| d.as_str() == t)
}

fn to_stream_event(event: &SystemEvent) -> Option<StreamEvent> {
    let data = &event.data;
    let get_u32 = |key: &str| data.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let get_str = |key: &str| data.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string();

    match event.r#type.as_str() {
        "message_start" => Some(StreamEvent::MessageStart { message_id: get_str("message_id") }),
        "text_content_block_start" => Some(StreamEvent::TextBlockStart { index: get_u32("index") }),
        "text_delta" => Some(StreamEvent::TextDelta { index: get_u32("index"), text: get_str("text") }),
        "text_content_block_stop" => Some(StreamEvent::TextBlockStop { index: get_u32("index") }),
        "tool_use_content_block_start" => Some(StreamEvent::ToolUseStart {
            index: get_u32("index"),
            tool_call_id: get_str("id"),
            name: get_str("name"),
        }),
        "input_json_delta" => Some(StreamEvent::InputJsonDelta {
            index: get_u32("index"),
            partial_json: get_str("partial_json"),
        }),
        "tool_use_content_block_stop" => Some(StreamEvent::ToolUseStop { index: get_u32("index") }),
        "message_stop" => Some(StreamEvent::MessageStop {
            stop_reason: data.get("stop_reason").and_then(|v| v.as_str()).map(str::to_string),
        }),
        "tool_result" => Some(StreamEvent::ToolResult {
            tool_call_id: get_str("tool_use_id"),
            result: data.get("result").cloned().unwrap_or(serde_json::Value::Null),
            is_error: data.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false),
        }),
        "interrupted" => Some(StreamEvent::MessageStop {
            stop_reason: Some("end_turn".to_string()),
        }),
        "error_received" => Some(StreamEvent::ErrorReceived {
            message: get_str("message"),
            code: data.get("error_code").and_then(|v| v.as_str()).map(str::to_string),
        }),
        _ => None,
    }
}
