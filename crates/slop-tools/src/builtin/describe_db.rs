// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use slop_dispatch::CancellationToken;
use slop_store::Store;
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct DescribeDbTool {
    store: Arc<Store>,
}

impl DescribeDbTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for DescribeDbTool {
    fn name(&self) -> &str {
        "describe_db"
    }

    fn description(&self) -> &str {
        "Describe the conversation database schema: table names and their CREATE TABLE statements."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, call: &ToolCall, _cancellation: &CancellationToken) -> ToolOutput {
        debug!("describe_db tool");

        match self.store.query("SELECT name, sql FROM sqlite_master WHERE type='table'", &[]) {
            Ok(rows) => ToolOutput::ok(&call.id, rows),
            Err(e) => ToolOutput::err(&call.id, e.kind, e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::ToolCall;

    fn call() -> ToolCall {
        ToolCall { id: "1".into(), name: "describe_db".into(), args: json!({}) }
    }

    fn store() -> Arc<Store> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        Arc::new(Store::init(path).unwrap())
    }

    #[tokio::test]
    async fn describes_known_tables() {
        let tool = DescribeDbTool::new(store());
        let out = tool.execute(&call(), &CancellationToken::new()).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("messages"));
        assert!(out.content.contains("llm_memos"));
    }
}
