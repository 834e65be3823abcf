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
use crate::session::SessionId;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct ManageScratchpadTool {
    store: Arc<Store>,
    session_id: SessionId,
}

impl ManageScratchpadTool {
    pub fn new(store: Arc<Store>, session_id: SessionId) -> Self {
        Self { store, session_id }
    }
}

#[async_trait]
impl Tool for ManageScratchpadTool {
    fn name(&self) -> &str {
        "manage_scratchpad"
    }

    fn description(&self) -> &str {
        "Read, overwrite, or append to the current session's scratchpad — free-form working memory \
         that persists across turns."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["read", "update", "append"] },
                "content": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, call: &ToolCall, _cancellation: &CancellationToken) -> ToolOutput {
        let session = self.session_id.get();
        if session.is_empty() {
            return ToolOutput::err(&call.id, ErrorKind::FailedPrecondition, "No active session");
        }
        let action = match args::required_str(&call.args, &call.id, "action") {
            Ok(a) => a,
            Err(out) => return out,
        };

        debug!(action, "manage_scratchpad tool");

        match action {
            "read" => match self.store.get_scratchpad(&session) {
                Ok(content) if content.is_empty() => ToolOutput::ok(&call.id, "Scratchpad is empty."),
                Ok(content) => ToolOutput::ok(&call.id, content),
                Err(e) => ToolOutput::err(&call.id, e.kind, e.message),
            },
            "update" => {
                let content = match args::required_str(&call.args, &call.id, "content") {
                    Ok(c) => c,
                    Err(out) => return out,
                };
                match self.store.update_scratchpad(&session, content) {
                    Ok(()) => ToolOutput::ok(&call.id, "Scratchpad updated."),
                    Err(e) => ToolOutput::err(&call.id, e.kind, e.message),
                }
            }
            "append" => {
                let content = match args::required_str(&call.args, &call.id, "content") {
                    Ok(c) => c,
                    Err(out) => return out,
                };
                let existing = self.store.get_scratchpad(&session).unwrap_or_default();
                let combined = format!("{existing}{content}");
                match self.store.update_scratchpad(&session, &combined) {
                    Ok(()) => ToolOutput::ok(&call.id, "Content appended to scratchpad."),
                    Err(e) => ToolOutput::err(&call.id, e.kind, e.message),
                }
            }
            other => ToolOutput::err(&call.id, ErrorKind::InvalidArgument, format!("unknown action: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::ToolCall;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "manage_scratchpad".into(), args }
    }

    fn store() -> Arc<Store> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        Arc::new(Store::init(path).unwrap())
    }

    #[tokio::test]
    async fn read_without_session_is_error() {
        let tool = ManageScratchpadTool::new(store(), SessionId::new());
        let out = tool.execute(&call(json!({"action": "read"})), &CancellationToken::new()).await;
        assert!(out.is_error);
        assert!(out.content.contains("No active session"));
    }

    #[tokio::test]
    async fn reads_empty_scratchpad() {
        let session_id = SessionId::new();
        session_id.set("s1");
        let tool = ManageScratchpadTool::new(store(), session_id);
        let out = tool.execute(&call(json!({"action": "read"})), &CancellationToken::new()).await;
        assert_eq!(out.content, "Scratchpad is empty.");
    }

    #[tokio::test]
    async fn update_then_read_round_trips() {
        let session_id = SessionId::new();
        session_id.set("s1");
        let tool = ManageScratchpadTool::new(store(), session_id);
        let out = tool
            .execute(&call(json!({"action": "update", "content": "hello"})), &CancellationToken::new())
            .await;
        assert_eq!(out.content, "Scratchpad updated.");
        let out = tool.execute(&call(json!({"action": "read"})), &CancellationToken::new()).await;
        assert_eq!(out.content, "hello");
    }

    #[tokio::test]
    async fn append_concatenates_with_no_separator() {
        let session_id = SessionId::new();
        session_id.set("s1");
        let tool = ManageScratchpadTool::new(store(), session_id);
        tool.execute(&call(json!({"action": "update", "content": "foo"})), &CancellationToken::new()).await;
        let out = tool
            .execute(&call(json!({"action": "append", "content": "bar"})), &CancellationToken::new())
            .await;
        assert_eq!(out.content, "Content appended to scratchpad.");
        let out = tool.execute(&call(json!({"action": "read"})), &CancellationToken::new()).await;
        assert_eq!(out.content, "foobar");
    }

    #[tokio::test]
    async fn unknown_action_is_error() {
        let session_id = SessionId::new();
        session_id.set("s1");
        let tool = ManageScratchpadTool::new(store(), session_id);
        let out = tool.execute(&call(json!({"action": "delete"})), &CancellationToken::new()).await;
        assert!(out.is_error);
    }
}
