// End-to-end integration tests wiring the full pipeline (bus, command
// handler, container/agent lifecycle, engine, delivery queue) against the
// in-memory persistence driver and the scripted mock SDK. This crate is the
// natural home for them: runtime-core cannot dev-depend on runtime-storage
// (that would cycle), but runtime-storage already depends on runtime-core
// and exposes `InMemoryPersistence`.

use std::sync::Arc;
use std::time::Duration;

use runtime_contracts::event::{EventCategory, EventIntent, EventSource};
use runtime_contracts::SystemEvent;
use runtime_core::config::{DefaultAgentConfig, RuntimeConfig};
use runtime_core::environment::SdkStreamEvent;
use runtime_core::testing::{MockLlmSdk, ScriptedTurn};
use runtime_core::Runtime;
use runtime_storage::InMemoryPersistence;
use serde_json::json;
use uuid::Uuid;

async fn start_runtime(sdk: Arc<MockLlmSdk>) -> Runtime {
    let base_path = std::env::temp_dir().join(format!("runtime-core-test-{}", Uuid::now_v7()));
    let config = RuntimeConfig {
        base_path: base_path.to_string_lossy().into_owned(),
        ..RuntimeConfig::default()
    };
    Runtime::start(
        config,
        DefaultAgentConfig::default(),
        Arc::new(InMemoryPersistence::new()),
        sdk,
    )
    .await
}

fn request(r#type: &str, data: serde_json::Value) -> SystemEvent {
    SystemEvent::new(r#type, EventSource::Command, EventCategory::Request, EventIntent::Request, data)
}

async fn create_container_and_image(runtime: &Runtime, container_id: &str, name: &str) -> serde_json::Value {
    runtime
        .bus
        .request(request("container_create_request", json!({"container_id": container_id})), Duration::from_secs(1))
        .await
        .expect("container_create_response");

    let response = runtime
        .bus
        .request(
            request("image_create_request", json!({"container_id": container_id, "config": {"name": name}})),
            Duration::from_secs(1),
        )
        .await
        .expect("image_create_response");
    response.data
}

#[tokio::test]
async fn image_create_auto_subscribes_and_message_send_streams_and_persists() {
    let sdk = MockLlmSdk::new(vec![ScriptedTurn::text("hello there")]);
    let runtime = start_runtime(sdk).await;

    let created = create_container_and_image(&runtime, "c1", "Hello").await;
    let record = &created["record"];
    let image_id: Uuid = record["image_id"].as_str().unwrap().parse().unwrap();
    let session_id: Uuid = record["session_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(record["name"], "Hello");
    assert_eq!(created["__subscriptions"], json!([session_id]));

    // Subscribe before sending so we observe the live stream, not history.
    let mut consumer = runtime.delivery_queue.subscribe(session_id, "client-1").await;

    let send_response = runtime
        .bus
        .request(
            request("message_send_request", json!({"image_id": image_id, "content": "hi"})),
            Duration::from_secs(1),
        )
        .await
        .expect("message_send_response");
    assert!(send_response.data.get("error").is_none());
    assert!(send_response.data["agent_id"].is_string());

    let mut saw_text_delta = false;
    let mut saw_message_stop = false;
    let mut last_cursor: Option<u64> = None;
    for _ in 0..16 {
        let Ok(Some(record)) = tokio::time::timeout(Duration::from_secs(2), consumer.recv()).await else {
            break;
        };
        if let Some(prev) = last_cursor {
            assert!(record.cursor > prev, "cursors must be strictly increasing");
        }
        last_cursor = Some(record.cursor);
        assert_eq!(record.event.source, EventSource::Agent, "external consumers see source=agent");
        match record.event.r#type.as_str() {
            "text_delta" => saw_text_delta = true,
            "message_stop" => {
                saw_message_stop = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_text_delta, "expected at least one text_delta");
    assert!(saw_message_stop, "expected a terminating message_stop");

    // Durability: the user message is present once message_send_request completed.
    let messages_response = runtime
        .bus
        .request(request("image_messages_request", json!({"image_id": image_id})), Duration::from_secs(1))
        .await
        .expect("image_messages_response");
    let messages = messages_response.data["messages"].as_array().unwrap();
    assert!(messages.iter().any(|m| m["content"]["subtype"] == "user" && m["content"]["text"] == "hi"));
    assert!(messages
        .iter()
        .any(|m| m["content"]["subtype"] == "assistant" && m["content"]["text"] == "hello there"));
}

#[tokio::test]
async fn repeated_image_run_reuses_the_same_agent() {
    let sdk = MockLlmSdk::new(vec![]);
    let runtime = start_runtime(sdk).await;
    let created = create_container_and_image(&runtime, "c1", "Reuse").await;
    let image_id: Uuid = created["record"]["image_id"].as_str().unwrap().parse().unwrap();

    let first = runtime
        .bus
        .request(request("image_run_request", json!({"image_id": image_id})), Duration::from_secs(1))
        .await
        .expect("image_run_response");
    assert_eq!(first.data["reused"], false);
    let agent_id = first.data["agent_id"].clone();

    let second = runtime
        .bus
        .request(request("image_run_request", json!({"image_id": image_id})), Duration::from_secs(1))
        .await
        .expect("image_run_response");
    assert_eq!(second.data["reused"], true);
    assert_eq!(second.data["agent_id"], agent_id);
}

#[tokio::test]
async fn agent_interrupt_on_offline_image_is_a_noop_error() {
    let sdk = MockLlmSdk::new(vec![]);
    let runtime = start_runtime(sdk).await;
    let created = create_container_and_image(&runtime, "c1", "Offline").await;
    let image_id: Uuid = created["record"]["image_id"].as_str().unwrap().parse().unwrap();

    // Image was never run, so there is no live agent for it.
    let response = runtime
        .bus
        .request(request("agent_interrupt_request", json!({"image_id": image_id})), Duration::from_secs(1))
        .await
        .expect("agent_interrupt_response");
    assert!(response.data.get("error").is_some(), "interrupting an offline image should surface as an error, not panic");
}

#[tokio::test]
async fn tool_call_turn_persists_call_and_result_bound_by_id() {
    let turn = ScriptedTurn {
        events: vec![
            SdkStreamEvent::MessageStart { message_id: "m1".into(), model: Some("mock-model".into()) },
            SdkStreamEvent::ToolUseBlockStart { index: 0, id: "call_1".into(), name: "lookup".into() },
            SdkStreamEvent::InputJsonDelta { index: 0, partial_json: "{\"q\":\"rust\"}".into() },
            SdkStreamEvent::ToolUseBlockStop { index: 0 },
            SdkStreamEvent::ToolResult { tool_use_id: "call_1".into(), result: json!({"found": true}), is_error: false },
            SdkStreamEvent::MessageStop { stop_reason: Some("tool_use".into()) },
        ],
    };
    let sdk = MockLlmSdk::new(vec![turn]);
    let runtime = start_runtime(sdk).await;
    let created = create_container_and_image(&runtime, "c1", "Tools").await;
    let image_id: Uuid = created["record"]["image_id"].as_str().unwrap().parse().unwrap();

    runtime
        .bus
        .request(
            request("message_send_request", json!({"image_id": image_id, "content": "find rust"})),
            Duration::from_secs(1),
        )
        .await
        .expect("message_send_response");

    // Give the streamed turn a moment to finish assembling asynchronously.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let messages_response = runtime
        .bus
        .request(request("image_messages_request", json!({"image_id": image_id})), Duration::from_secs(1))
        .await
        .expect("image_messages_response");
    let messages = messages_response.data["messages"].as_array().unwrap();

    let tool_call = messages
        .iter()
        .find(|m| m["content"]["subtype"] == "tool_call")
        .expect("tool_call message");
    let tool_call_id = tool_call["content"]["tool_call"]["id"].as_str().unwrap();
    assert_eq!(tool_call_id, "call_1");

    let tool_result = messages
        .iter()
        .find(|m| m["content"]["subtype"] == "tool_result")
        .expect("tool_result message");
    assert_eq!(tool_result["content"]["tool_result"]["tool_call_id"], "call_1");
    assert_eq!(tool_result["content"]["tool_result"]["is_error"], false);
}

#[tokio::test]
async fn unknown_image_surfaces_validation_error_on_the_response() {
    let sdk = MockLlmSdk::new(vec![]);
    let runtime = start_runtime(sdk).await;

    let response = runtime
        .bus
        .request(request("image_messages_request", json!({"image_id": Uuid::now_v7()})), Duration::from_secs(1))
        .await
        .expect("image_messages_response");
    assert!(response.data.get("error").is_some());
}
