// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use slop_dispatch::CancellationToken;
use slop_store::Store;
use tracing::debug;

use crate::args;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct SaveMemoTool {
    store: Arc<Store>,
}

impl SaveMemoTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SaveMemoTool {
    fn name(&self) -> &str {
        "save_memo"
    }

    fn description(&self) -> &str {
        "Save a memo with semantic tags for later retrieval across sessions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["content", "tags"]
        })
    }

    async fn execute(&self, call: &ToolCall, _cancellation: &CancellationToken) -> ToolOutput {
        let content = match args::required_str(&call.args, &call.id, "content") {
            Ok(c) => c,
            Err(out) => return out,
        };
        let tags = call.args.get("tags").cloned().unwrap_or_else(|| json!([]));

        debug!(content_len = content.len(), "save_memo tool");

        match self.store.add_memo(content, &tags.to_string()) {
            Ok(()) => ToolOutput::ok(&call.id, "Memo saved successfully."),
            Err(e) => ToolOutput::err(&call.id, e.kind, e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::ToolCall;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "save_memo".into(), args }
    }

    fn store() -> Arc<Store> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        Arc::new(Store::init(path).unwrap())
    }

    #[tokio::test]
    async fn saves_a_memo_with_tags() {
        let tool = SaveMemoTool::new(store());
        let out = tool
            .execute(&call(json!({"content": "remember this", "tags": ["rust", "design"]})), &CancellationToken::new())
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(out.content, "Memo saved successfully.");
    }

    #[tokio::test]
    async fn missing_content_is_error() {
        let tool = SaveMemoTool::new(store());
        let out = tool.execute(&call(json!({"tags": []})), &CancellationToken::new()).await;
        assert!(out.is_error);
    }
}
