// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{json, Value};
use slop_store::{CoreError, CoreResult, Message, Store};

use crate::{ModelInfo, Strategy};

/// OpenAI-shaped chat-completions wire format.
pub struct ChatCompletionsStrategy {
    model: String,
    base_url: String,
    strip_reasoning: bool,
}

impl ChatCompletionsStrategy {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>, strip_reasoning: bool) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into(),
            strip_reasoning,
        }
    }
}

fn tool_call_id_parts(tool_call_id: &str) -> (&str, &str) {
    match tool_call_id.split_once('|') {
        Some((id, name)) => (id, name),
        None => (tool_call_id, ""),
    }
}

#[async_trait]
impl Strategy for ChatCompletionsStrategy {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn assemble_payload(
        &self,
        store: &Store,
        system_instruction: &str,
        history: &[Message],
    ) -> CoreResult<Value> {
        let mut messages = Vec::new();
        if !system_instruction.is_empty() {
            messages.push(json!({"role": "system", "content": system_instruction}));
        }

        let enabled_tools = store.get_enabled_tools()?;
        let enabled_names: HashSet<&str> = enabled_tools.iter().map(|t| t.name.as_str()).collect();

        for (i, msg) in history.iter().enumerate() {
            if msg.role == "system" {
                continue;
            }
            let mut display_content = msg.content.clone();
            if i == 0 {
                display_content = format!("## Begin Conversation History\n{display_content}");
            }
            if i == history.len() - 1 && msg.role == "user" && i > 0 {
                display_content = format!("## End of History\n\n### CURRENT REQUEST\n{display_content}");
            }

            let msg_obj = if msg.status == "tool_call" {
                match serde_json::from_str::<Value>(&msg.content) {
                    Ok(parsed) => {
                        let mut valid = true;
                        if let Some(calls) = parsed.get("tool_calls").and_then(Value::as_array) {
                            for call in calls {
                                let name = call
                                    .get("function")
                                    .and_then(|f| f.get("name"))
                                    .and_then(Value::as_str)
                                    .unwrap_or("");
                                if !enabled_names.contains(name) {
                                    tracing::warn!(tool = name, "filtering out invalid tool call");
                                    valid = false;
                                    break;
                                }
                            }
                        }
                        if valid {
                            parsed
                        } else {
                            json!({"role": "assistant", "content": "[Invalid tool call suppressed]"})
                        }
                    }
                    Err(_) => json!({"role": msg.role, "content": display_content}),
                }
            } else if msg.role == "tool" {
                let tool_call_id = msg.tool_call_id.as_deref().unwrap_or("");
                let (id_part, name_part) = tool_call_id_parts(tool_call_id);
                if enabled_names.contains(name_part) {
                    json!({"role": "tool", "tool_call_id": id_part, "content": msg.content})
                } else {
                    tracing::warn!(tool = name_part, "filtering out invalid tool response");
                    json!({"role": "user", "content": "[Invalid tool response suppressed]"})
                }
            } else {
                json!({"role": msg.role, "content": display_content})
            };

            match messages.last_mut() {
                Some(last)
                    if last["role"] == Value::String(msg.role.clone())
                        && msg.role == "user"
                        && msg_obj["role"] == Value::String("user".to_string()) =>
                {
                    let merged = format!(
                        "{}\n{}",
                        last["content"].as_str().unwrap_or(""),
                        msg_obj["content"].as_str().unwrap_or("")
                    );
                    last["content"] = Value::String(merged);
                }
                _ => messages.push(msg_obj),
            }
        }

        let mut payload = json!({"model": self.model, "messages": messages});

        let mut tools = Vec::new();
        for t in &enabled_tools {
            if let Ok(schema) = serde_json::from_str::<Value>(&t.json_schema) {
                tools.push(json!({
                    "type": "function",
                    "function": {"name": t.name, "description": t.description, "parameters": schema},
                }));
            }
        }
        if !tools.is_empty() {
            payload["tools"] = Value::Array(tools);
        }

        if self.strip_reasoning {
            payload["transforms"] = json!(["strip_reasoning"]);
        }

        Ok(payload)
    }

    fn process_response(
        &self,
        store: &Store,
        session_id: &str,
        response_json: &str,
        group_id: &str,
    ) -> CoreResult<i64> {
        let j: Value = serde_json::from_str(response_json)
            .map_err(|e| CoreError::internal(format!("failed to parse LLM response: {e}")))?;

        let mut total_tokens: i64 = 0;
        if let Some(usage) = j.get("usage") {
            let prompt = usage.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0);
            let completion = usage.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0);
            total_tokens = prompt + completion;
            store.record_usage(session_id, &self.model, prompt, completion)?;
        }

        let choices = j
            .get("choices")
            .and_then(Value::as_array)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CoreError::internal("No choices in response"))?;
        let message = choices[0]
            .get("message")
            .ok_or_else(|| CoreError::internal("OpenAI response choice missing 'message'"))?;

        let tool_calls = message.get("tool_calls").and_then(Value::as_array).filter(|c| !c.is_empty());
        if let Some(calls) = tool_calls {
            let first = &calls[0];
            let id = first.get("id").and_then(Value::as_str).unwrap_or("");
            let name = first
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("");
            store.append_message(
                session_id,
                "assistant",
                &message.to_string(),
                Some(&format!("{id}|{name}")),
                "tool_call",
                Some(group_id),
                Some(self.name()),
                total_tokens,
            )?;
        } else if let Some(text) = message.get("content").and_then(Value::as_str) {
            store.append_message(
                session_id,
                "assistant",
                text,
                None,
                "completed",
                Some(group_id),
                Some(self.name()),
                total_tokens,
            )?;
            if let Some(state) = crate::extract_state(text) {
                let _ = store.set_session_state(session_id, &state);
            }
        }

        Ok(total_tokens)
    }

    async fn get_models(&self, http: &reqwest::Client, api_key: &str) -> CoreResult<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let resp = http
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| CoreError::unavailable(format!("request failed: {e}")))?
            .text()
            .await
            .map_err(|e| CoreError::internal(format!("failed to read response body: {e}")))?;

        let j: Value = serde_json::from_str(&resp)
            .map_err(|e| CoreError::internal(format!("failed to parse models response: {e}")))?;

        let mut models = Vec::new();
        if let Some(data) = j.get("data").and_then(Value::as_array) {
            for m in data {
                if let Some(id) = m.get("id").and_then(Value::as_str) {
                    models.push(ModelInfo { id: id.to_string(), name: id.to_string() });
                }
            }
        }
        Ok(models)
    }

    async fn get_quota(&self, _http: &reqwest::Client, _token: &str) -> CoreResult<Value> {
        Err(CoreError::unimplemented("Quota check not implemented for OpenAI Strategy yet"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slop_store::Store;
    use tempfile::NamedTempFile;

    fn store() -> Store {
        let f = NamedTempFile::new().unwrap();
        Store::init(f.path()).unwrap()
    }

    fn msg(role: &str, content: &str, status: &str, tool_call_id: Option<&str>) -> Message {
        Message {
            id: 1,
            session_id: "s1".into(),
            role: role.into(),
            content: content.into(),
            tool_call_id: tool_call_id.map(str::to_string),
            status: status.into(),
            created_at: "now".into(),
            group_id: None,
            parsing_strategy: Some("openai".into()),
            tokens: 0,
        }
    }

    #[test]
    fn first_and_last_user_message_get_bracketing_markers() {
        let db = store();
        let strat = ChatCompletionsStrategy::new("gpt", "https://api", false);
        let history = vec![
            msg("user", "hi there", "completed", None),
            msg("user", "second ask", "completed", None),
        ];
        let payload = strat.assemble_payload(&db, "", &history).unwrap();
        let messages = payload["messages"].as_array().unwrap();
        // consecutive user messages merge into one
        assert_eq!(messages.len(), 1);
        let content = messages[0]["content"].as_str().unwrap();
        assert!(content.starts_with("## Begin Conversation History\nhi there"));
        assert!(content.contains("## End of History"));
    }

    #[test]
    fn invalid_tool_call_is_suppressed() {
        let db = store();
        let strat = ChatCompletionsStrategy::new("gpt", "https://api", false);
        let content = serde_json::json!({
            "tool_calls": [{"id": "c1", "function": {"name": "not_a_real_tool"}}]
        })
        .to_string();
        let history = vec![msg("assistant", &content, "tool_call", None)];
        let payload = strat.assemble_payload(&db, "", &history).unwrap();
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages[0]["content"], "[Invalid tool call suppressed]");
    }

    #[test]
    fn tool_response_demoted_when_name_not_enabled() {
        let db = store();
        let strat = ChatCompletionsStrategy::new("gpt", "https://api", false);
        let history = vec![msg("tool", "body", "completed", Some("call1|nonexistent_tool"))];
        let payload = strat.assemble_payload(&db, "", &history).unwrap();
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "[Invalid tool response suppressed]");
    }

    #[test]
    fn tool_response_passes_through_for_enabled_tool() {
        let db = store();
        let strat = ChatCompletionsStrategy::new("gpt", "https://api", false);
        let history = vec![msg("tool", "body", "completed", Some("call1|read_file"))];
        let payload = strat.assemble_payload(&db, "", &history).unwrap();
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "tool");
        assert_eq!(messages[0]["tool_call_id"], "call1");
        assert_eq!(messages[0]["content"], "body");
    }

    #[test]
    fn process_response_with_tool_calls_persists_tool_call_row() {
        let db = store();
        db.append_message("s1", "user", "hi", None, "completed", Some("g1"), None, 0)
            .unwrap();
        let strat = ChatCompletionsStrategy::new("gpt", "https://api", false);
        let response = serde_json::json!({
            "choices": [{"message": {"tool_calls": [{"id": "c1", "function": {"name": "read_file", "arguments": "{}"}}]}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        })
        .to_string();
        let tokens = strat.process_response(&db, "s1", &response, "g1").unwrap();
        assert_eq!(tokens, 15);
        let history = db.get_conversation_history("s1", false, 0).unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.status, "tool_call");
        assert_eq!(last.tool_call_id.as_deref(), Some("c1|read_file"));
    }

    #[test]
    fn process_response_text_extracts_state() {
        let db = store();
        db.append_message("s1", "user", "hi", None, "completed", Some("g1"), None, 0)
            .unwrap();
        let strat = ChatCompletionsStrategy::new("gpt", "https://api", false);
        let response = serde_json::json!({
            "choices": [{"message": {"content": "done\n### STATE\nGoal: ship it"}}]
        })
        .to_string();
        strat.process_response(&db, "s1", &response, "g1").unwrap();
        assert_eq!(db.get_session_state("s1").unwrap(), "### STATE\nGoal: ship it");
    }
}
