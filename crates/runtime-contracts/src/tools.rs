// Tool call/result types exchanged between the engine and the LLM SDK
// adapter during a turn.

use serde::{Deserialize, Serialize};

/// Tool call emitted by the LLM during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of executing a tool call, fed back to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_round_trips_through_json() {
        let json = r#"{"id": "call_1", "name": "read_file", "arguments": {"path": "a.txt"}}"#;
        let call: ToolCall = serde_json::from_str(json).unwrap();
        assert_eq!(call.name, "read_file");
        assert_eq!(call.arguments["path"], "a.txt");
    }

    #[test]
    fn tool_result_error_variant_has_no_result() {
        let result = ToolResult {
            tool_call_id: "call_1".into(),
            result: None,
            error: Some("not found".into()),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value["result"].is_null());
        assert_eq!(value["error"], "not found");
    }
}
