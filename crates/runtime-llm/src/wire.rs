// Anthropic Messages API wire types, grounded on the teacher's
// `everruns-anthropic` driver - same request/response shapes, but kept
// local to this crate since the SDK boundary here is runtime-core's
// `LlmSdk` trait rather than the teacher's `LlmDriver` abstraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Converts the opaque outbound payload the Effector hands the adapter
/// (either plain text or a pass-through multimodal-parts JSON array) into
/// the request content blocks for one user turn.
pub fn content_blocks_from_outbound(text: Option<&str>, parts: Option<&Value>) -> Vec<AnthropicContentBlock> {
    if let Some(parts) = parts {
        if let Some(array) = parts.as_array() {
            let blocks: Vec<AnthropicContentBlock> = array
                .iter()
                .filter_map(|part| serde_json::from_value(part.clone()).ok())
                .collect();
            if !blocks.is_empty() {
                return blocks;
            }
        }
    }
    vec![AnthropicContentBlock::Text {
        text: text.unwrap_or_default().to_string(),
    }]
}

// Streaming response events (SSE `event:`/`data:` pairs).

#[derive(Debug, Deserialize)]
pub struct MessageStartEvent {
    pub message: MessageInfo,
}

#[derive(Debug, Deserialize)]
pub struct MessageInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlockStartEvent {
    pub index: usize,
    pub content_block: ContentBlockStart,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlockStart {
    #[serde(rename = "text")]
    Text {},
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
}

#[derive(Debug, Deserialize)]
pub struct ContentBlockDeltaEvent {
    pub index: usize,
    pub delta: ContentBlockDelta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
pub struct ContentBlockStopEvent {
    pub index: usize,
}

#[derive(Debug, Deserialize)]
pub struct MessageDeltaEvent {
    pub delta: MessageDeltaData,
}

#[derive(Debug, Deserialize)]
pub struct MessageDeltaData {
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

/// A speculative extension event some agent SDKs stream inline when tools
/// are executed server-side. The raw Anthropic Messages API never emits
/// this; kept so the mapping table in SPEC_FULL.md §4.2 has a concrete
/// parse path rather than a silent gap.
#[derive(Debug, Deserialize)]
pub struct ToolResultEvent {
    pub tool_use_id: String,
    pub result: Value,
    #[serde(default)]
    pub is_error: bool,
}
