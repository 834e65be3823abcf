// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use slop_dispatch::CancellationToken;
use slop_store::{ErrorKind, Store};
use tracing::debug;

use crate::args;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct RetrieveMemosTool {
    store: Arc<Store>,
}

impl RetrieveMemosTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for RetrieveMemosTool {
    fn name(&self) -> &str {
        "retrieve_memos"
    }

    fn description(&self) -> &str {
        "Retrieve previously saved memos matching any of the given tags."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "tags": { "type": "array", "items": { "type": "string" } } },
            "required": ["tags"]
        })
    }

    async fn execute(&self, call: &ToolCall, _cancellation: &CancellationToken) -> ToolOutput {
        let tags: Vec<String> = match args::required_array(&call.args, &call.id, "tags") {
            Ok(arr) => arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            Err(out) => return out,
        };

        debug!(tags = ?tags, "retrieve_memos tool");

        let memos = match self.store.get_memos_by_tags(&tags) {
            Ok(m) => m,
            Err(e) => return ToolOutput::err(&call.id, e.kind, e.message),
        };

        let out: Vec<Value> = memos
            .into_iter()
            .map(|m| {
                let tags: Value = serde_json::from_str(&m.semantic_tags).unwrap_or_else(|_| json!([]));
                json!({
                    "id": m.id,
                    "content": m.content,
                    "tags": tags,
                    "created_at": m.created_at,
                })
            })
            .collect();

        match serde_json::to_string_pretty(&out) {
            Ok(s) => ToolOutput::ok(&call.id, s),
            Err(e) => ToolOutput::err(&call.id, ErrorKind::Internal, format!("failed to serialize memos: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::ToolCall;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "retrieve_memos".into(), args }
    }

    fn store() -> Arc<Store> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        Arc::new(Store::init(path).unwrap())
    }

    #[tokio::test]
    async fn retrieves_memos_matching_a_tag() {
        let store = store();
        store.add_memo("remember this", r#"["rust","design"]"#).unwrap();
        let tool = RetrieveMemosTool::new(store);
        let out = tool.execute(&call(json!({"tags": ["rust"]})), &CancellationToken::new()).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("remember this"));
    }

    #[tokio::test]
    async fn no_matches_returns_empty_array() {
        let tool = RetrieveMemosTool::new(store());
        let out = tool.execute(&call(json!({"tags": ["nonexistent"]})), &CancellationToken::new()).await;
        assert!(!out.is_error);
        assert_eq!(out.content.trim(), "[]");
    }

    #[tokio::test]
    async fn missing_tags_is_error() {
        let tool = RetrieveMemosTool::new(store());
        let out = tool.execute(&call(json!({})), &CancellationToken::new()).await;
        assert!(out.is_error);
    }
}
