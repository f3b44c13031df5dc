// AgentEngine + Presenter: assembles the BusDriver's StreamEvents into
// complete Messages and emits the externally-observable message/turn events.
//
// State machine (per turn): idle -> in_message -> {in_text_block,
// in_tool_block} -> in_message -> idle. `tool_result` is accepted in any
// state since it may legitimately arrive after `message_stop` for its turn
// (see DESIGN.md's Open Question decision) - it does not reopen the turn.

use std::collections::HashMap;
use std::sync::Arc;

use runtime_contracts::event::{EventCategory, EventContext, EventIntent, EventSource};
use runtime_contracts::message::{ToolCallContent, ToolResultContent};
use runtime_contracts::{Message, SystemEvent};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::bus::SystemBus;
use crate::error::Result;
use crate::persistence::PersistenceDriver;

/// Normalized stream event the BusDriver hands to the engine - already
/// filtered to this agent and stripped of bus envelope concerns.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MessageStart { message_id: String },
    TextBlockStart { index: u32 },
    TextDelta { index: u32, text: String },
    TextBlockStop { index: u32 },
    ToolUseStart { index: u32, tool_call_id: String, name: String },
    InputJsonDelta { index: u32, partial_json: String },
    ToolUseStop { index: u32 },
    MessageStop { stop_reason: Option<String> },
    ToolResult { tool_call_id: String, result: serde_json::Value, is_error: bool },
    ErrorReceived { message: String, code: Option<String> },
}

enum BlockAcc {
    Text { text: String },
    Tool { id: String, name: String, json_buf: String },
}

struct MessageState {
    assistant_message_id: Uuid,
    blocks: HashMap<u32, BlockAcc>,
    order: Vec<u32>,
}

impl MessageState {
    fn new() -> Self {
        Self {
            assistant_message_id: Uuid::now_v7(),
            blocks: HashMap::new(),
            order: Vec::new(),
        }
    }
}

struct EngineState {
    current: Option<MessageState>,
}

/// Emits the externally-observable message/turn SystemEvents and persists
/// finalized Messages. Stream-shaped passthrough (text_delta etc.) is not
/// this component's concern - see `crate::agent::spawn_stream_bridge`.
pub struct Presenter {
    bus: SystemBus,
    persistence: Arc<dyn PersistenceDriver>,
    context: EventContext,
    session_id: Uuid,
}

impl Presenter {
    pub fn new(
        bus: SystemBus,
        persistence: Arc<dyn PersistenceDriver>,
        context: EventContext,
        session_id: Uuid,
    ) -> Self {
        Self {
            bus,
            persistence,
            context,
            session_id,
        }
    }

    async fn persist_and_emit(&self, message: Message) -> Result<()> {
        let event = SystemEvent::new(
            message.content.subtype(),
            EventSource::Agent,
            EventCategory::Message,
            EventIntent::Notification,
            json!({ "message": &message }),
        )
        .with_context(self.context.clone());
        self.persistence.add_message(message).await?;
        self.bus.emit(event).await;
        Ok(())
    }

    async fn emit_turn_response(&self, assistant_message_id: Uuid) {
        let event = SystemEvent::new(
            "turn_response",
            EventSource::Agent,
            EventCategory::Turn,
            EventIntent::Notification,
            json!({ "message_id": assistant_message_id }),
        )
        .with_context(self.context.clone());
        self.bus.emit(event).await;
    }
}

pub struct AgentEngine {
    state: Mutex<EngineState>,
    presenter: Presenter,
}

impl AgentEngine {
    pub fn new(presenter: Presenter) -> Self {
        Self {
            state: Mutex::new(EngineState { current: None }),
            presenter,
        }
    }

    pub async fn on_stream_event(&self, event: StreamEvent) -> Result<()> {
        match event {
            StreamEvent::MessageStart { .. } => {
                let mut state = self.state.lock().await;
                state.current = Some(MessageState::new());
            }
            StreamEvent::TextBlockStart { index } => {
                let mut state = self.state.lock().await;
                if let Some(msg) = state.current.as_mut() {
                    msg.blocks.insert(index, BlockAcc::Text { text: String::new() });
                    msg.order.push(index);
                }
            }
            StreamEvent::TextDelta { index, text } => {
                let mut state = self.state.lock().await;
                if let Some(msg) = state.current.as_mut() {
                    if let Some(BlockAcc::Text { text: buf }) = msg.blocks.get_mut(&index) {
                        buf.push_str(&text);
                    }
                }
            }
            StreamEvent::TextBlockStop { .. } => {
                // finalized as part of the composed assistant message at message_stop
            }
            StreamEvent::ToolUseStart { index, tool_call_id, name } => {
                let mut state = self.state.lock().await;
                if let Some(msg) = state.current.as_mut() {
                    msg.blocks.insert(
                        index,
                        BlockAcc::Tool {
                            id: tool_call_id,
                            name,
                            json_buf: String::new(),
                        },
                    );
                    msg.order.push(index);
                }
            }
            StreamEvent::InputJsonDelta { index, partial_json } => {
                let mut state = self.state.lock().await;
                if let Some(msg) = state.current.as_mut() {
                    if let Some(BlockAcc::Tool { json_buf, .. }) = msg.blocks.get_mut(&index) {
                        json_buf.push_str(&partial_json);
                    }
                }
            }
            StreamEvent::ToolUseStop { index } => {
                let (parent_id, call) = {
                    let state = self.state.lock().await;
                    let Some(msg) = state.current.as_ref() else {
                        return Ok(());
                    };
                    let Some(BlockAcc::Tool { id, name, json_buf }) = msg.blocks.get(&index) else {
                        return Ok(());
                    };
                    let input = if json_buf.is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(json_buf).unwrap_or_else(|_| json!({}))
                    };
                    (
                        msg.assistant_message_id,
                        ToolCallContent {
                            id: id.clone(),
                            name: name.clone(),
                            input,
                        },
                    )
                };
                let message = Message::tool_call(self.presenter.session_id, parent_id, call);
                self.presenter.persist_and_emit(message).await?;
            }
            StreamEvent::MessageStop { .. } => {
                let finished = {
                    let mut state = self.state.lock().await;
                    state.current.take()
                };
                let Some(msg) = finished else { return Ok(()) };
                let mut text = String::new();
                for index in &msg.order {
                    if let Some(BlockAcc::Text { text: t }) = msg.blocks.get(index) {
                        text.push_str(t);
                    }
                }
                let assistant = Message {
                    id: msg.assistant_message_id,
                    session_id: self.presenter.session_id,
                    content: runtime_contracts::message::MessageContent::Assistant { text },
                    parent_id: None,
                    timestamp: chrono::Utc::now(),
                };
                self.presenter.persist_and_emit(assistant).await?;
                self.presenter.emit_turn_response(msg.assistant_message_id).await;
            }
            StreamEvent::ToolResult { tool_call_id, result, is_error } => {
                let message = Message::tool_result(
                    self.presenter.session_id,
                    ToolResultContent {
                        tool_call_id,
                        output: result,
                        is_error,
                    },
                );
                self.presenter.persist_and_emit(message).await?;
            }
            StreamEvent::ErrorReceived { message, code } => {
                {
                    let mut state = self.state.lock().await;
                    state.current = None;
                }
                let error_message = Message::error(self.presenter.session_id, message, code);
                self.presenter.persist_and_emit(error_message).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistenceDriver;
    use std::collections::HashMap as Map;
    use tokio::sync::RwLock;

    struct FakeStore(RwLock<Map<Uuid, Vec<Message>>>);

    #[async_trait::async_trait]
    impl PersistenceDriver for FakeStore {
        async fn save_container(&self, _c: runtime_contracts::ContainerRecord) -> Result<()> {
            Ok(())
        }
        async fn find_container_by_id(&self, _id: &str) -> Result<Option<runtime_contracts::ContainerRecord>> {
            Ok(None)
        }
        async fn create_image(
            &self,
            _i: runtime_contracts::ImageRecord,
            _s: runtime_contracts::SessionRecord,
        ) -> Result<()> {
            Ok(())
        }
        async fn find_image_by_id(&self, _id: Uuid) -> Result<Option<runtime_contracts::ImageRecord>> {
            Ok(None)
        }
        async fn find_images_by_container_id(&self, _id: &str) -> Result<Vec<runtime_contracts::ImageRecord>> {
            Ok(vec![])
        }
        async fn find_all_images(&self) -> Result<Vec<runtime_contracts::ImageRecord>> {
            Ok(vec![])
        }
        async fn update_image(&self, _i: runtime_contracts::ImageRecord) -> Result<()> {
            Ok(())
        }
        async fn update_image_metadata(&self, _id: Uuid, _m: runtime_contracts::ImageMetadata) -> Result<()> {
            Ok(())
        }
        async fn delete_image(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn find_session_by_id(&self, _id: Uuid) -> Result<Option<runtime_contracts::SessionRecord>> {
            Ok(None)
        }
        async fn add_message(&self, message: Message) -> Result<()> {
            self.0.write().await.entry(message.session_id).or_default().push(message);
            Ok(())
        }
        async fn get_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
            Ok(self.0.read().await.get(&session_id).cloned().unwrap_or_default())
        }
        async fn clear_messages(&self, session_id: Uuid) -> Result<()> {
            self.0.write().await.remove(&session_id);
            Ok(())
        }
        async fn delete_session(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn assembles_text_turn_into_assistant_message() {
        let bus = SystemBus::new();
        let store = Arc::new(FakeStore(RwLock::new(Map::new())));
        let session_id = Uuid::now_v7();
        let presenter = Presenter::new(bus.clone(), store.clone(), EventContext::default(), session_id);
        let engine = AgentEngine::new(presenter);

        engine.on_stream_event(StreamEvent::MessageStart { message_id: "m1".into() }).await.unwrap();
        engine.on_stream_event(StreamEvent::TextBlockStart { index: 0 }).await.unwrap();
        engine.on_stream_event(StreamEvent::TextDelta { index: 0, text: "hel".into() }).await.unwrap();
        engine.on_stream_event(StreamEvent::TextDelta { index: 0, text: "lo".into() }).await.unwrap();
        engine.on_stream_event(StreamEvent::TextBlockStop { index: 0 }).await.unwrap();
        engine.on_stream_event(StreamEvent::MessageStop { stop_reason: Some("end_turn".into()) }).await.unwrap();

        let messages = store.get_messages(session_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0].content {
            runtime_contracts::message::MessageContent::Assistant { text } => assert_eq!(text, "hello"),
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_call_then_result_binds_by_id() {
        let bus = SystemBus::new();
        let store = Arc::new(FakeStore(RwLock::new(Map::new())));
        let session_id = Uuid::now_v7();
        let presenter = Presenter::new(bus.clone(), store.clone(), EventContext::default(), session_id);
        let engine = AgentEngine::new(presenter);

        engine.on_stream_event(StreamEvent::MessageStart { message_id: "m1".into() }).await.unwrap();
        engine
            .on_stream_event(StreamEvent::ToolUseStart { index: 0, tool_call_id: "tc1".into(), name: "lookup".into() })
            .await
            .unwrap();
        engine
            .on_stream_event(StreamEvent::InputJsonDelta { index: 0, partial_json: "{\"q\":1}".into() })
            .await
            .unwrap();
        engine.on_stream_event(StreamEvent::ToolUseStop { index: 0 }).await.unwrap();
        engine.on_stream_event(StreamEvent::MessageStop { stop_reason: None }).await.unwrap();
        // tool_result arrives after message_stop - must still be accepted.
        engine
            .on_stream_event(StreamEvent::ToolResult { tool_call_id: "tc1".into(), result: json!({"ok": true}), is_error: false })
            .await
            .unwrap();

        let messages = store.get_messages(session_id).await.unwrap();
        assert_eq!(messages.len(), 3); // tool_call, assistant(empty text), tool_result
        assert!(messages.iter().any(|m| m.content.subtype() == "tool_call"));
        assert!(messages.iter().any(|m| m.content.subtype() == "tool_result"));
    }
}
