// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{json, Value};
use slop_store::{CoreError, CoreResult, Message, Store};

use crate::{smarter_truncate, ModelInfo, Strategy, MAX_STALE_TOOL_RESULT_CONTEXT, MAX_TOOL_RESULT_CONTEXT};

/// Gemini-shaped generative-content wire format.
pub struct GenerativeContentStrategy {
    model: String,
    base_url: String,
}

impl GenerativeContentStrategy {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self { model: model.into(), base_url: base_url.into() }
    }

    fn role_for(role: &str) -> &str {
        match role {
            "assistant" => "model",
            "tool" => "function",
            other => other,
        }
    }

    /// Index (within `history`) of the last tool-role message; it alone gets
    /// the generous truncation budget.
    fn last_tool_index(history: &[Message]) -> Option<usize> {
        history.iter().rposition(|m| m.role == "tool")
    }

    pub(crate) fn assemble_contents(
        &self,
        enabled_names: &HashSet<&str>,
        history: &[Message],
    ) -> Vec<Value> {
        let last_tool_idx = Self::last_tool_index(history);
        let mut contents: Vec<Value> = Vec::new();

        for (i, msg) in history.iter().enumerate() {
            if msg.role == "system" {
                continue;
            }
            let mut display_content = msg.content.clone();
            if i == 0 {
                display_content = format!("--- BEGIN CONVERSATION HISTORY ---\n{display_content}");
            }
            if i == history.len() - 1 && msg.role == "user" && i > 0 {
                display_content = format!("--- END OF HISTORY ---\n\n### CURRENT REQUEST\n{display_content}");
            }

            let role = Self::role_for(&msg.role).to_string();
            let part = if msg.status == "tool_call" {
                match serde_json::from_str::<Value>(&msg.content) {
                    Ok(parsed) => {
                        let name = parsed
                            .get("functionCall")
                            .and_then(|f| f.get("name"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if enabled_names.contains(name) {
                            parsed
                        } else {
                            tracing::warn!(tool = name, "filtering out invalid tool call");
                            json!({"text": "[Invalid tool call suppressed]"})
                        }
                    }
                    Err(_) => json!({"text": display_content}),
                }
            } else if msg.role == "tool" {
                let tool_call_id = msg.tool_call_id.as_deref().unwrap_or("");
                let name = match tool_call_id.split_once('|') {
                    Some((_, n)) => n,
                    None => tool_call_id,
                };
                if enabled_names.contains(name) {
                    let budget = if Some(i) == last_tool_idx {
                        MAX_TOOL_RESULT_CONTEXT
                    } else {
                        MAX_STALE_TOOL_RESULT_CONTEXT
                    };
                    json!({
                        "functionResponse": {
                            "name": name,
                            "response": {"content": smarter_truncate(&msg.content, budget)},
                        }
                    })
                } else {
                    tracing::warn!(tool = name, "filtering out invalid tool response");
                    json!({"text": "[Invalid tool response suppressed]"})
                }
            } else {
                json!({"text": display_content})
            };

            match contents.last_mut() {
                Some(last) if last["role"] == Value::String(role.clone()) => {
                    last["parts"].as_array_mut().unwrap().push(part);
                }
                _ => contents.push(json!({"role": role, "parts": [part]})),
            }
        }

        // Drop any leading orphan `function` entry (no preceding `model` turn).
        let mut valid = Vec::with_capacity(contents.len());
        for c in contents {
            if c["role"] == "function" && valid.last().map(|v: &Value| v["role"] != "model").unwrap_or(true) {
                continue;
            }
            valid.push(c);
        }
        valid
    }

    fn build_payload(&self, store: &Store, system_instruction: &str, history: &[Message]) -> CoreResult<Value> {
        let enabled_tools = store.get_enabled_tools()?;
        let enabled_names: HashSet<&str> = enabled_tools.iter().map(|t| t.name.as_str()).collect();

        let contents = self.assemble_contents(&enabled_names, history);
        let mut payload = json!({"contents": contents});
        if !system_instruction.is_empty() {
            payload["system_instruction"] = json!({"parts": [{"text": system_instruction}]});
        }

        let mut declarations = Vec::new();
        for t in &enabled_tools {
            if let Ok(schema) = serde_json::from_str::<Value>(&t.json_schema) {
                declarations.push(json!({"name": t.name, "description": t.description, "parameters": schema}));
            }
        }
        if !declarations.is_empty() {
            payload["tools"] = json!([{"function_declarations": declarations}]);
        }

        Ok(payload)
    }

    pub(crate) fn process_response_body(
        &self,
        store: &Store,
        session_id: &str,
        body: &Value,
        group_id: &str,
        strategy_name: &str,
    ) -> CoreResult<i64> {
        let target = body.get("response").filter(|r| r.is_object()).unwrap_or(body);

        let mut total_tokens: i64 = 0;
        if let Some(usage) = target.get("usageMetadata") {
            let prompt = usage.get("promptTokenCount").and_then(Value::as_i64).unwrap_or(0);
            let completion = usage.get("candidatesTokenCount").and_then(Value::as_i64).unwrap_or(0);
            total_tokens = prompt + completion;
            store.record_usage(session_id, &self.model, prompt, completion)?;
        }

        let candidates = target
            .get("candidates")
            .and_then(Value::as_array)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CoreError::internal("No candidates in response"))?;
        let parts = candidates[0]
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for part in &parts {
            if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or("");
                store.append_message(
                    session_id,
                    "assistant",
                    &part.to_string(),
                    Some(name),
                    "tool_call",
                    Some(group_id),
                    Some(strategy_name),
                    total_tokens,
                )?;
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                store.append_message(
                    session_id,
                    "assistant",
                    text,
                    None,
                    "completed",
                    Some(group_id),
                    Some(strategy_name),
                    total_tokens,
                )?;
                if let Some(state) = crate::extract_state(text) {
                    let _ = store.set_session_state(session_id, &state);
                }
            }
        }

        Ok(total_tokens)
    }
}

#[async_trait]
impl Strategy for GenerativeContentStrategy {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn assemble_payload(&self, store: &Store, system_instruction: &str, history: &[Message]) -> CoreResult<Value> {
        self.build_payload(store, system_instruction, history)
    }

    fn process_response(&self, store: &Store, session_id: &str, response_json: &str, group_id: &str) -> CoreResult<i64> {
        let j: Value = serde_json::from_str(response_json)
            .map_err(|e| CoreError::internal(format!("failed to parse LLM response: {e}")))?;
        self.process_response_body(store, session_id, &j, group_id, self.name())
    }

    fn parse_tool_calls(&self, msg: &Message) -> CoreResult<Vec<slop_codec::ToolCall>> {
        slop_codec::extract_tool_calls(msg)
    }

    async fn get_models(&self, http: &reqwest::Client, api_key: &str) -> CoreResult<Vec<ModelInfo>> {
        let url = format!("{}/models?key={}", self.base_url, api_key);
        let resp = http
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::unavailable(format!("request failed: {e}")))?
            .text()
            .await
            .map_err(|e| CoreError::internal(format!("failed to read response body: {e}")))?;
        let j: Value = serde_json::from_str(&resp)
            .map_err(|e| CoreError::internal(format!("failed to parse models response: {e}")))?;

        let mut models = Vec::new();
        if let Some(list) = j.get("models").and_then(Value::as_array) {
            for m in list {
                let id = m.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                let name = m.get("displayName").and_then(Value::as_str).unwrap_or("").to_string();
                models.push(ModelInfo { id, name });
            }
        }
        Ok(models)
    }

    async fn get_quota(&self, _http: &reqwest::Client, _token: &str) -> CoreResult<Value> {
        Err(CoreError::unimplemented("Quota check not implemented for Gemini Strategy yet"))
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
            parsing_strategy: Some("gemini".into()),
            tokens: 0,
        }
    }

    #[test]
    fn roles_translate_and_merge_adjacent_entries() {
        let db = store();
        let strat = GenerativeContentStrategy::new("gemini-pro", "https://generativelanguage.googleapis.com/v1");
        let history = vec![
            msg("user", "hello", "completed", None),
            msg("assistant", "hi there", "completed", None),
        ];
        let payload = strat.assemble_payload(&db, "", &history).unwrap();
        let contents = payload["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn orphan_function_entry_at_head_is_dropped() {
        let db = store();
        let strat = GenerativeContentStrategy::new("gemini-pro", "https://x");
        let history = vec![msg("tool", "stray", "completed", Some("read_file"))];
        let payload = strat.assemble_payload(&db, "", &history).unwrap();
        assert_eq!(payload["contents"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn tool_result_is_truncated_per_recency() {
        let db = store();
        let strat = GenerativeContentStrategy::new("gemini-pro", "https://x");
        let long = "x".repeat(10_000);
        let history = vec![
            msg("assistant", &serde_json::json!({"functionCall": {"name": "read_file", "args": {}}}).to_string(), "tool_call", None),
            msg("tool", &long, "completed", Some("read_file")),
        ];
        let payload = strat.assemble_payload(&db, "", &history).unwrap();
        let contents = payload["contents"].as_array().unwrap();
        let function_entry = contents.iter().find(|c| c["role"] == "function").unwrap();
        let content = function_entry["parts"][0]["functionResponse"]["response"]["content"].as_str().unwrap();
        assert!(content.len() < long.len());
    }

    #[test]
    fn process_response_extracts_function_call_and_text() {
        let db = store();
        db.append_message("s1", "user", "hi", None, "completed", Some("g1"), None, 0).unwrap();
        let strat = GenerativeContentStrategy::new("gemini-pro", "https://x");
        let response = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "done\n### STATE\nGoal: y"}]}}],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2}
        })
        .to_string();
        let tokens = strat.process_response(&db, "s1", &response, "g1").unwrap();
        assert_eq!(tokens, 5);
        assert_eq!(db.get_session_state("s1").unwrap(), "### STATE\nGoal: y");
    }
}
