// Anthropic-shaped SDK adapter implementing runtime-core's `LlmSdk` trait,
// grounded on the teacher's `AnthropicLlmDriver::chat_completion_stream`:
// build a request, POST with `x-api-key`/`anthropic-version` headers, turn
// the response into an SSE event stream via `eventsource_stream::Eventsource`,
// and `.then(...)` over it producing one adapter event per SSE frame.
//
// Two things the teacher's driver didn't need that this one does:
//   - per-block-index kind tracking, so a `content_block_stop` can be
//     reported as either `TextBlockStop` or `ToolUseBlockStop`
//   - message-history accumulation keyed by `resume_session_id`, since the
//     raw Messages API is stateless and has no native session/thread concept

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::Client;
use runtime_core::environment::{LlmSdk, OutboundContent, SdkStreamEvent, TurnRequest};
use runtime_core::error::{Result as RuntimeResult, RuntimeError};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AnthropicSdkConfig;
use crate::wire::{
    content_blocks_from_outbound, AnthropicMessage, AnthropicRequest, ContentBlockDelta, ContentBlockDeltaEvent,
    ContentBlockStart, ContentBlockStartEvent, ContentBlockStopEvent, MessageDeltaEvent, MessageStartEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    ToolUse,
}

/// History for one resumed session. The SDK has no native thread concept so
/// the adapter keeps the running transcript itself, keyed by the session id
/// it hands back through `session_id_hint`.
#[derive(Default)]
struct SessionHistory {
    messages: Vec<AnthropicMessage>,
}

pub struct AnthropicSdk {
    client: Client,
    config: AnthropicSdkConfig,
    histories: Mutex<HashMap<String, SessionHistory>>,
    last_session_id: Mutex<Option<String>>,
}

impl AnthropicSdk {
    pub fn new(config: AnthropicSdkConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            histories: Mutex::new(HashMap::new()),
            last_session_id: Mutex::new(None),
        }
    }

    async fn session_key_for(&self, resume_session_id: &Option<String>) -> String {
        if let Some(id) = resume_session_id {
            id.clone()
        } else {
            Uuid::now_v7().to_string()
        }
    }
}

#[async_trait]
impl LlmSdk for AnthropicSdk {
    async fn stream_turn(&self, request: TurnRequest) -> RuntimeResult<BoxStream<'static, SdkStreamEvent>> {
        let session_key = self.session_key_for(&request.resume_session_id).await;

        let user_blocks = match &request.content {
            OutboundContent::Text(text) => content_blocks_from_outbound(Some(text), None),
            OutboundContent::Parts(parts) => content_blocks_from_outbound(None, Some(parts)),
        };

        let history_messages = {
            let mut histories = self.histories.lock().await;
            let history = histories.entry(session_key.clone()).or_default();
            history.messages.push(AnthropicMessage {
                role: "user".to_string(),
                content: user_blocks,
            });
            history.messages.clone()
        };

        *self.last_session_id.lock().await = Some(session_key.clone());

        let body = AnthropicRequest {
            model: self.config.model.clone(),
            messages: history_messages,
            max_tokens: self.config.max_tokens,
            system: request.system_prompt.clone(),
            stream: true,
        };

        let response = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.anthropic_version)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RuntimeError::environment(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(RuntimeError::environment(format!("LLM API error ({status}): {text}")));
        }

        let block_kinds: Arc<Mutex<HashMap<usize, BlockKind>>> = Arc::new(Mutex::new(HashMap::new()));
        let cancel = request.cancel.clone();

        let sse = response.bytes_stream().eventsource();
        let mapped = sse.then(move |frame| {
            let block_kinds = block_kinds.clone();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return stream::iter(Vec::<SdkStreamEvent>::new());
                }
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "sse frame decode error");
                        return stream::iter(vec![SdkStreamEvent::Error {
                            message: err.to_string(),
                            code: None,
                        }]);
                    }
                };

                let events = match frame.event.as_str() {
                    "message_start" => serde_json::from_str::<MessageStartEvent>(&frame.data)
                        .ok()
                        .map(|e| {
                            vec![SdkStreamEvent::MessageStart {
                                message_id: e.message.id.unwrap_or_default(),
                                model: e.message.model,
                            }]
                        }),
                    "content_block_start" => serde_json::from_str::<ContentBlockStartEvent>(&frame.data)
                        .ok()
                        .map(|e| match &e.content_block {
                            ContentBlockStart::Text {} => {
                                vec![SdkStreamEvent::TextBlockStart { index: e.index }]
                            }
                            ContentBlockStart::ToolUse { id, name } => {
                                vec![SdkStreamEvent::ToolUseBlockStart {
                                    index: e.index,
                                    id: id.clone(),
                                    name: name.clone(),
                                }]
                            }
                        }),
                    "content_block_delta" => serde_json::from_str::<ContentBlockDeltaEvent>(&frame.data)
                        .ok()
                        .map(|e| match e.delta {
                            ContentBlockDelta::TextDelta { text } => {
                                vec![SdkStreamEvent::TextDelta { index: e.index, text }]
                            }
                            ContentBlockDelta::InputJsonDelta { partial_json } => {
                                vec![SdkStreamEvent::InputJsonDelta { index: e.index, partial_json }]
                            }
                        }),
                    "content_block_stop" => serde_json::from_str::<ContentBlockStopEvent>(&frame.data)
                        .ok()
                        .map(|e| vec![e.index]),
                    "message_delta" => serde_json::from_str::<MessageDeltaEvent>(&frame.data)
                        .ok()
                        .map(|e| vec![SdkStreamEvent::MessageStop { stop_reason: e.delta.stop_reason }]),
                    "message_stop" => Some(vec![SdkStreamEvent::MessageStop { stop_reason: None }]),
                    "error" => {
                        let message = serde_json::from_str::<serde_json::Value>(&frame.data)
                            .ok()
                            .and_then(|v| v.get("error").and_then(|e| e.get("message")).cloned())
                            .and_then(|v| v.as_str().map(str::to_string))
                            .unwrap_or_else(|| frame.data.clone());
                        Some(vec![SdkStreamEvent::Error { message, code: None }])
                    }
                    "ping" => Some(vec![]),
                    "tool_result" => serde_json::from_str::<crate::wire::ToolResultEvent>(&frame.data)
                        .ok()
                        .map(|e| {
                            vec![SdkStreamEvent::ToolResult {
                                tool_use_id: e.tool_use_id,
                                result: e.result,
                                is_error: e.is_error,
                            }]
                        }),
                    other => {
                        debug!(event_type = other, "unrecognized SSE event type");
                        Some(vec![])
                    }
                };

                // content_block_stop needs the recorded block kind to disambiguate.
                if frame.event == "content_block_stop" {
                    if let Some(indices) = events {
                        if let Some(index) = indices.first().copied() {
                            let kinds = block_kinds.lock().await;
                            let kind = kinds.get(&index).copied().unwrap_or(BlockKind::Text);
                            let out = match kind {
                                BlockKind::Text => SdkStreamEvent::TextBlockStop { index },
                                BlockKind::ToolUse => SdkStreamEvent::ToolUseBlockStop { index },
                            };
                            return stream::iter(vec![out]);
                        }
                    }
                    return stream::iter(vec![]);
                }

                // record block kinds as blocks open, for the eventual stop event.
                if frame.event == "content_block_start" {
                    if let Ok(parsed) = serde_json::from_str::<ContentBlockStartEvent>(&frame.data) {
                        let kind = match parsed.content_block {
                            ContentBlockStart::Text {} => BlockKind::Text,
                            ContentBlockStart::ToolUse { .. } => BlockKind::ToolUse,
                        };
                        block_kinds.lock().await.insert(parsed.index, kind);
                    }
                }

                stream::iter(events.unwrap_or_default())
            }
        });

        let flattened = mapped.flatten();
        Ok(Box::pin(flattened))
    }

    fn session_id_hint(&self) -> Option<String> {
        self.last_session_id.try_lock().ok().and_then(|guard| guard.clone())
    }
}

/// Convenience builder mirroring the teacher's `AnthropicLlmDriver::new`.
pub fn build_sdk(config: AnthropicSdkConfig) -> Arc<dyn LlmSdk> {
    Arc::new(AnthropicSdk::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::environment::OutboundContent;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STREAM_BODY: &str = concat!(
        "event: message_start\n",
        "data: {\"message\":{\"id\":\"msg_1\",\"model\":\"claude-sonnet-4-5\"}}\n\n",
        "event: content_block_start\n",
        "data: {\"index\":0,\"content_block\":{\"type\":\"text\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"index\":0}\n\n",
        "event: message_delta\n",
        "data: {\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
        "event: message_stop\n",
        "data: {}\n\n",
    );

    async fn request(cancel: CancellationToken) -> TurnRequest {
        TurnRequest {
            content: OutboundContent::Text("hello".to_string()),
            system_prompt: None,
            cwd: std::env::temp_dir(),
            mcp_servers: serde_json::json!([]),
            resume_session_id: None,
            cancel,
        }
    }

    #[tokio::test]
    async fn streams_text_delta_between_block_start_and_stop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(STREAM_BODY, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let mut config = AnthropicSdkConfig::new("test-key");
        config.base_url = server.uri();
        let sdk = AnthropicSdk::new(config);

        let cancel = CancellationToken::new();
        let mut stream = sdk.stream_turn(request(cancel).await).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        assert!(matches!(events[0], SdkStreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], SdkStreamEvent::TextBlockStart { index: 0 }));
        assert!(matches!(&events[2], SdkStreamEvent::TextDelta { index: 0, text } if text == "hi"));
        assert!(matches!(events[3], SdkStreamEvent::TextBlockStop { index: 0 }));
    }

    #[tokio::test]
    async fn surfaces_non_2xx_responses_as_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let mut config = AnthropicSdkConfig::new("bad-key");
        config.base_url = server.uri();
        let sdk = AnthropicSdk::new(config);

        let cancel = CancellationToken::new();
        let result = sdk.stream_turn(request(cancel).await).await;
        assert!(result.is_err());
    }
}
