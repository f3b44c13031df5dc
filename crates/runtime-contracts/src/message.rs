// Message model: the persisted conversation log, tagged by subtype.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tools::ToolCall;

/// A tool call emitted inside an assistant turn, before its result is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContent {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl From<ToolCall> for ToolCallContent {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            name: call.name,
            input: call.arguments,
        }
    }
}

/// The outcome of a tool call, bound back to it by `tool_call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultContent {
    pub tool_call_id: String,
    pub output: serde_json::Value,
    pub is_error: bool,
}

/// Tagged message content. `subtype` drives which fields are populated;
/// this mirrors the five message kinds the spec names: user, assistant,
/// tool_call, tool_result, error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum MessageContent {
    User { text: String },
    Assistant { text: String },
    ToolCall { tool_call: ToolCallContent },
    ToolResult { tool_result: ToolResultContent },
    Error { message: String, code: Option<String> },
}

impl MessageContent {
    pub fn subtype(&self) -> &'static str {
        match self {
            MessageContent::User { .. } => "user",
            MessageContent::Assistant { .. } => "assistant",
            MessageContent::ToolCall { .. } => "tool_call",
            MessageContent::ToolResult { .. } => "tool_result",
            MessageContent::Error { .. } => "error",
        }
    }
}

/// A single entry in a session's durable message log. Message ids are
/// globally unique; `parent_id` links a tool_call to its originating
/// assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: MessageContent,
    pub parent_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: Uuid, content: MessageContent) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            content,
            parent_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn user(session_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(session_id, MessageContent::User { text: text.into() })
    }

    pub fn assistant(session_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(
            session_id,
            MessageContent::Assistant { text: text.into() },
        )
    }

    pub fn tool_call(session_id: Uuid, parent_id: Uuid, call: ToolCallContent) -> Self {
        Self::new(session_id, MessageContent::ToolCall { tool_call: call }).with_parent(parent_id)
    }

    pub fn tool_result(session_id: Uuid, result: ToolResultContent) -> Self {
        Self::new(session_id, MessageContent::ToolResult { tool_result: result })
    }

    pub fn error(session_id: Uuid, message: impl Into<String>, code: Option<String>) -> Self {
        Self::new(
            session_id,
            MessageContent::Error {
                message: message.into(),
                code,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_user_subtype() {
        let sid = Uuid::now_v7();
        let msg = Message::user(sid, "hello");
        assert_eq!(msg.content.subtype(), "user");
    }

    #[test]
    fn tool_call_carries_parent() {
        let sid = Uuid::now_v7();
        let parent = Uuid::now_v7();
        let call = ToolCallContent {
            id: "t1".into(),
            name: "lookup".into(),
            input: serde_json::json!({}),
        };
        let msg = Message::tool_call(sid, parent, call);
        assert_eq!(msg.parent_id, Some(parent));
        assert_eq!(msg.content.subtype(), "tool_call");
    }
}
