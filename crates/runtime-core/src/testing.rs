// In-memory test doubles, grounded on the teacher's MockLlmProvider: a
// scripted SDK that replays a fixed sequence of stream events per turn.
// Exposed unconditionally (not cfg(test)) so downstream crates (runtime-api's
// integration tests) can exercise the full pipeline without a real LLM.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use tokio::sync::RwLock;

use crate::environment::{LlmSdk, SdkStreamEvent, TurnRequest};
use crate::error::Result;

/// A single scripted turn: the events it yields, in order.
pub struct ScriptedTurn {
    pub events: Vec<SdkStreamEvent>,
}

impl ScriptedTurn {
    pub fn text(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self {
            events: vec![
                SdkStreamEvent::MessageStart {
                    message_id: "mock-msg".to_string(),
                    model: Some("mock-model".to_string()),
                },
                SdkStreamEvent::TextBlockStart { index: 0 },
                SdkStreamEvent::TextDelta { index: 0, text: reply },
                SdkStreamEvent::TextBlockStop { index: 0 },
                SdkStreamEvent::MessageStop {
                    stop_reason: Some("end_turn".to_string()),
                },
            ],
        }
    }
}

pub struct MockLlmSdk {
    turns: RwLock<Vec<ScriptedTurn>>,
    call_index: AtomicUsize,
    pub calls: RwLock<Vec<String>>,
}

impl MockLlmSdk {
    pub fn new(turns: Vec<ScriptedTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: RwLock::new(turns),
            call_index: AtomicUsize::new(0),
            calls: RwLock::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmSdk for MockLlmSdk {
    async fn stream_turn(&self, request: TurnRequest) -> Result<BoxStream<'static, SdkStreamEvent>> {
        if let crate::environment::OutboundContent::Text(text) = &request.content {
            self.calls.write().await.push(text.clone());
        }
        let index = self.call_index.fetch_add(1, Ordering::SeqCst);
        let turns = self.turns.read().await;
        let events = turns
            .get(index)
            .map(|t| t.events.clone())
            .unwrap_or_else(|| ScriptedTurn::text("").events);
        Ok(Box::pin(stream::iter(events)))
    }
}
