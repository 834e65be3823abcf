// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use slop_dispatch::CancellationToken;
use slop_store::ErrorKind;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// The plain-text result of executing a tool. `is_error` marks a
/// non-fatal failure whose message is still meant to be read by the
/// model — only catastrophic cancellation is surfaced any other way.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
    /// Set alongside `is_error`; `None` for a successful result.
    pub kind: Option<ErrorKind>,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), is_error: false, kind: None }
    }

    pub fn err(call_id: impl Into<String>, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: msg.into(), is_error: true, kind: Some(kind) }
    }
}

/// Trait every built-in tool implements. Tools that touch long-running
/// subprocesses or large I/O should poll `cancellation` at coarse
/// intervals and abort promptly once it trips.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> Value;
    /// Execute the tool. Errors should be wrapped in [`ToolOutput::err`];
    /// only a cancelled call should ever resolve any other way.
    async fn execute(&self, call: &ToolCall, cancellation: &CancellationToken) -> ToolOutput;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall, _cancellation: &CancellationToken) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[tokio::test]
    async fn ok_and_err_set_is_error_correctly() {
        assert!(!ToolOutput::ok("1", "fine").is_error);
        let err = ToolOutput::err("1", ErrorKind::Internal, "bad");
        assert!(err.is_error);
        assert_eq!(err.kind, Some(ErrorKind::Internal));
    }

    #[tokio::test]
    async fn minimal_tool_executes() {
        let call = ToolCall { id: "1".into(), name: "minimal".into(), args: json!({}) };
        let out = MinimalTool.execute(&call, &CancellationToken::new()).await;
        assert_eq!(out.content, "ok");
    }
}
