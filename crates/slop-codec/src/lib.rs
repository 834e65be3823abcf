// SPDX-License-Identifier: Apache-2.0
//! Pure, stateless translation between a stored [`Message`]'s raw provider
//! payload and the orchestrator's structural view of it: the tool calls a
//! model asked for, and the text a user should actually see.
//!
//! Nothing here talks to a network or a database; it only reshapes JSON
//! already sitting in a message row.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use slop_store::{CoreError, CoreResult, Message};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

const STRATEGY_OPENAI: &str = "openai";
const STRATEGY_GEMINI: &str = "gemini";
const STRATEGY_GEMINI_GCA: &str = "gemini_gca";

/// Extracts the tool calls a `tool_call`-status message carries. A message
/// in any other status has none, by construction — text-only turns are
/// never tagged `tool_call`.
pub fn extract_tool_calls(msg: &Message) -> CoreResult<Vec<ToolCall>> {
    if msg.status != "tool_call" {
        return Ok(Vec::new());
    }
    let parsed: Value = serde_json::from_str(&msg.content)
        .map_err(|e| CoreError::internal(format!("failed to parse tool_call content: {e}")))?;

    match msg.parsing_strategy.as_deref() {
        Some(STRATEGY_OPENAI) => extract_openai_tool_calls(&parsed),
        Some(STRATEGY_GEMINI) | Some(STRATEGY_GEMINI_GCA) => Ok(vec![extract_gemini_tool_call(&parsed, msg)]),
        _ => Ok(extract_fallback_tool_calls(&parsed)),
    }
}

fn extract_openai_tool_calls(parsed: &Value) -> CoreResult<Vec<ToolCall>> {
    let calls = parsed
        .get("tool_calls")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::with_capacity(calls.len());
    for call in &calls {
        let id = call
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::internal("tool_calls entry missing id"))?
            .to_string();
        let function = call
            .get("function")
            .ok_or_else(|| CoreError::internal("tool_calls entry missing function"))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::internal("tool_calls entry missing function.name"))?
            .to_string();
        let args_str = function
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or("{}");
        let args: Value = serde_json::from_str(args_str)
            .map_err(|e| CoreError::internal(format!("invalid tool arguments JSON: {e}")))?;
        out.push(ToolCall { id, name, args });
    }
    Ok(out)
}

fn extract_gemini_tool_call(parsed: &Value, msg: &Message) -> ToolCall {
    let function_call = parsed.get("functionCall");
    let name = function_call
        .and_then(|f| f.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| msg.tool_call_id.clone())
        .unwrap_or_default();
    let args = function_call
        .and_then(|f| f.get("args"))
        .cloned()
        .unwrap_or(Value::Object(Default::default()));
    ToolCall {
        id: msg.tool_call_id.clone().unwrap_or_default(),
        name,
        args,
    }
}

fn extract_fallback_tool_calls(parsed: &Value) -> Vec<ToolCall> {
    let Some(calls) = parsed.get("functionCalls").and_then(Value::as_array) else {
        return Vec::new();
    };
    calls
        .iter()
        .map(|call| {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = call.get("args").cloned().unwrap_or(Value::Object(Default::default()));
            ToolCall {
                id: name.clone(),
                name,
                args,
            }
        })
        .collect()
}

/// Text meant for human eyes in a turn: the assistant's prose, even when it
/// rode alongside a tool call.
pub fn extract_assistant_text(msg: &Message) -> String {
    if msg.status == "tool_call" {
        if let Ok(parsed) = serde_json::from_str::<Value>(&msg.content) {
            if let Some(text) = parsed.get("content").and_then(Value::as_str) {
                return text.to_string();
            }
        }
        return String::new();
    }
    msg.content.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str, status: &str, strategy: Option<&str>, tool_call_id: Option<&str>) -> Message {
        Message {
            id: 1,
            session_id: "s1".to_string(),
            role: "assistant".to_string(),
            content: content.to_string(),
            tool_call_id: tool_call_id.map(str::to_string),
            status: status.to_string(),
            created_at: "now".to_string(),
            group_id: None,
            parsing_strategy: strategy.map(str::to_string),
            tokens: 0,
        }
    }

    #[test]
    fn non_tool_call_status_yields_no_calls() {
        let m = msg("hello", "completed", Some("openai"), None);
        assert!(extract_tool_calls(&m).unwrap().is_empty());
    }

    #[test]
    fn openai_extracts_calls() {
        let content = serde_json::json!({
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "read_file", "arguments": "{\"path\":\"a.txt\"}"}
            }]
        })
        .to_string();
        let m = msg(&content, "tool_call", Some("openai"), Some("call_1|read_file"));
        let calls = extract_tool_calls(&m).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].args, serde_json::json!({"path": "a.txt"}));
    }

    #[test]
    fn openai_invalid_json_is_internal_error() {
        let m = msg("not json", "tool_call", Some("openai"), None);
        let err = extract_tool_calls(&m).unwrap_err();
        assert_eq!(err.kind, slop_store::ErrorKind::Internal);
    }

    #[test]
    fn gemini_reads_function_call_name_and_args() {
        let content = serde_json::json!({
            "functionCall": {"name": "list_directory", "args": {"path": "."}}
        })
        .to_string();
        let m = msg(&content, "tool_call", Some("gemini"), Some("list_directory"));
        let calls = extract_tool_calls(&m).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_directory");
        assert_eq!(calls[0].id, "list_directory");
    }

    #[test]
    fn gemini_falls_back_to_tool_call_id_for_name() {
        let content = serde_json::json!({"functionCall": {"args": {}}}).to_string();
        let m = msg(&content, "tool_call", Some("gemini_gca"), Some("grep_tool"));
        let calls = extract_tool_calls(&m).unwrap();
        assert_eq!(calls[0].name, "grep_tool");
    }

    #[test]
    fn fallback_strategy_iterates_function_calls_array() {
        let content = serde_json::json!({
            "functionCalls": [{"name": "describe_db", "args": {}}]
        })
        .to_string();
        let m = msg(&content, "tool_call", None, None);
        let calls = extract_tool_calls(&m).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "describe_db");
    }

    #[test]
    fn assistant_text_passes_through_for_completed_status() {
        let m = msg("plain prose", "completed", Some("openai"), None);
        assert_eq!(extract_assistant_text(&m), "plain prose");
    }

    #[test]
    fn assistant_text_alongside_tool_call_is_extracted_from_content_field() {
        let content = serde_json::json!({"content": "Checking the file now.", "tool_calls": []}).to_string();
        let m = msg(&content, "tool_call", Some("openai"), None);
        assert_eq!(extract_assistant_text(&m), "Checking the file now.");
    }

    #[test]
    fn assistant_text_empty_when_tool_call_has_no_content_field() {
        let content = serde_json::json!({"functionCall": {"name": "x", "args": {}}}).to_string();
        let m = msg(&content, "tool_call", Some("gemini"), None);
        assert_eq!(extract_assistant_text(&m), "");
    }
}
