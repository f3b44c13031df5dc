// SystemEvent: the bus atom. Internal DriveableEvents (source=environment) and
// external command/stream events are both instances of this shape, distinguished
// by `source`/`category`/`intent` rather than by separate wire types - this keeps
// the bus itself untyped over payload while callers narrow by `r#type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Environment,
    Agent,
    Session,
    Container,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Stream,
    State,
    Message,
    Turn,
    Lifecycle,
    Persist,
    Request,
    Response,
    Error,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventIntent {
    Request,
    Result,
    Notification,
}

/// Sparse addressing context attached to an event. Any subset may be set
/// depending on how far the event has propagated through the hierarchy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

impl EventContext {
    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_image(mut self, image_id: Uuid) -> Self {
        self.image_id = Some(image_id);
        self
    }

    pub fn with_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }
}

/// The bus atom. `r#type` is the dispatch key (e.g. `"text_delta"`,
/// `"message_send_request"`); `data` is the type-specific payload, kept as
/// a raw `Value` so the bus itself stays generic over payload shape -
/// consumers narrow by matching on `r#type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub r#type: String,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub category: EventCategory,
    pub intent: EventIntent,
    pub data: Value,
    #[serde(default)]
    pub context: EventContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl SystemEvent {
    pub fn new(
        r#type: impl Into<String>,
        source: EventSource,
        category: EventCategory,
        intent: EventIntent,
        data: Value,
    ) -> Self {
        Self {
            r#type: r#type.into(),
            timestamp: Utc::now(),
            source,
            category,
            intent,
            data,
            context: EventContext::default(),
            request_id: None,
        }
    }

    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// The response type for a `*_request` event type, by suffix transform.
    /// Matches how the runtime derives pairing at dispatch time rather than
    /// through a static map.
    pub fn response_type_for(request_type: &str) -> Option<String> {
        request_type
            .strip_suffix("_request")
            .map(|stem| format!("{stem}_response"))
    }

    pub fn is_request(&self) -> bool {
        self.r#type.ends_with("_request")
    }
}

/// The internal, driver-facing taxonomy: events produced by the Environment's
/// Receptor while consuming the upstream LLM SDK stream. These always carry
/// `source = EventSource::Environment`, `category = EventCategory::Stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveableEventType {
    MessageStart,
    TextContentBlockStart,
    TextDelta,
    TextContentBlockStop,
    ToolUseContentBlockStart,
    InputJsonDelta,
    ToolUseContentBlockStop,
    MessageStop,
    ToolResult,
    Interrupted,
    ErrorReceived,
}

impl DriveableEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            DriveableEventType::MessageStart => "message_start",
            DriveableEventType::TextContentBlockStart => "text_content_block_start",
            DriveableEventType::TextDelta => "text_delta",
            DriveableEventType::TextContentBlockStop => "text_content_block_stop",
            DriveableEventType::ToolUseContentBlockStart => "tool_use_content_block_start",
            DriveableEventType::InputJsonDelta => "input_json_delta",
            DriveableEventType::ToolUseContentBlockStop => "tool_use_content_block_stop",
            DriveableEventType::MessageStop => "message_stop",
            DriveableEventType::ToolResult => "tool_result",
            DriveableEventType::Interrupted => "interrupted",
            DriveableEventType::ErrorReceived => "error_received",
        }
    }

    pub fn all() -> [DriveableEventType; 11] {
        use DriveableEventType::*;
        [
            MessageStart,
            TextContentBlockStart,
            TextDelta,
            TextContentBlockStop,
            ToolUseContentBlockStart,
            InputJsonDelta,
            ToolUseContentBlockStop,
            MessageStop,
            ToolResult,
            Interrupted,
            ErrorReceived,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_type_suffix_transform() {
        assert_eq!(
            SystemEvent::response_type_for("image_create_request").as_deref(),
            Some("image_create_response")
        );
        assert_eq!(SystemEvent::response_type_for("text_delta"), None);
    }

    #[test]
    fn driveable_event_type_strings() {
        assert_eq!(DriveableEventType::TextDelta.as_str(), "text_delta");
        assert_eq!(DriveableEventType::all().len(), 11);
    }
}
