// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wraps [`ToolRegistry`] with the conversation envelope every tool result
//! is returned to the model in, plus bookkeeping (call counts, session id)
//! shared across tools.
use std::sync::Arc;

use slop_dispatch::CancellationToken;
use slop_store::Store;
use tracing::warn;

use crate::builtin::apply_patch::ApplyPatchTool;
use crate::builtin::describe_db::DescribeDbTool;
use crate::builtin::execute_bash::ExecuteBashTool;
use crate::builtin::grep::{GitGrepTool, GrepTool, SearchCodeTool};
use crate::builtin::list_directory::ListDirectoryTool;
use crate::builtin::manage_scratchpad::ManageScratchpadTool;
use crate::builtin::query_db::QueryDbTool;
use crate::builtin::read_file::ReadFileTool;
use crate::builtin::retrieve_memos::RetrieveMemosTool;
use crate::builtin::save_memo::SaveMemoTool;
use crate::builtin::use_skill::UseSkillTool;
use crate::builtin::write_file::WriteFileTool;
use crate::registry::{ToolRegistry, ToolSchema};
use crate::session::SessionId;
use crate::tool::ToolCall;

/// Runs tool calls through the registry and wraps every result in the
/// `### TOOL_RESULT: <name>` envelope the model is trained to expect,
/// bumping the store's per-tool call count on success.
pub struct ToolExecutor {
    registry: ToolRegistry,
    store: Arc<Store>,
    session_id: SessionId,
}

impl ToolExecutor {
    pub fn new(store: Arc<Store>) -> Self {
        let session_id = SessionId::new();
        let mut registry = ToolRegistry::new();

        registry.register(ReadFileTool);
        registry.register(WriteFileTool);
        registry.register(ExecuteBashTool);
        registry.register(GrepTool);
        registry.register(GitGrepTool);
        registry.register(QueryDbTool::new(store.clone()));
        registry.register(ApplyPatchTool);
        registry.register(SaveMemoTool::new(store.clone()));
        registry.register(RetrieveMemosTool::new(store.clone()));
        registry.register(ListDirectoryTool);
        registry.register(ManageScratchpadTool::new(store.clone(), session_id.clone()));
        registry.register(DescribeDbTool::new(store.clone()));
        registry.register(UseSkillTool::new(store.clone(), session_id.clone()));
        registry.register(SearchCodeTool);

        Self { registry, store, session_id }
    }

    /// Sets the session id consulted by session-scoped tools
    /// (`manage_scratchpad`, `use_skill`).
    pub fn set_session_id(&self, id: impl Into<String>) {
        self.session_id.set(id);
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Executes `call`, wraps the result in the `### TOOL_RESULT:` envelope,
    /// and increments the call count on success. Cancellation still yields a
    /// wrapped error — only the outer loop decides whether cancellation ends
    /// the turn.
    pub async fn execute(&self, call: &ToolCall, cancellation: &CancellationToken) -> String {
        let output = self.registry.execute(call, cancellation).await;

        if !output.is_error {
            if let Err(e) = self.store.increment_tool_call_count(&call.name) {
                warn!(tool = %call.name, error = %e, "failed to record tool call count");
            }
        }

        let content = if output.is_error {
            let kind = output.kind.map(|k| k.as_str()).unwrap_or(slop_store::ErrorKind::Internal.as_str());
            format!("Error: {kind}: {}", output.content)
        } else {
            output.content
        };

        format!("### TOOL_RESULT: {}\n{}\n\n---", call.name, content)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> Arc<Store> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        Arc::new(Store::init(path).unwrap())
    }

    #[tokio::test]
    async fn wraps_successful_result_in_envelope() {
        let executor = ToolExecutor::new(store());
        let call = ToolCall { id: "1".into(), name: "execute_bash".into(), args: json!({"command": "echo hi"}) };
        let out = executor.execute(&call, &CancellationToken::new()).await;
        assert!(out.starts_with("### TOOL_RESULT: execute_bash\n"));
        assert!(out.trim_end().ends_with("---"));
        assert!(out.contains("hi"));
    }

    #[tokio::test]
    async fn wraps_error_result_with_error_prefix() {
        let executor = ToolExecutor::new(store());
        let call = ToolCall { id: "1".into(), name: "execute_bash".into(), args: json!({}) };
        let out = executor.execute(&call, &CancellationToken::new()).await;
        assert!(out.contains("Error: invalid_argument: Missing mandatory field: 'command'"), "{out}");
    }

    #[tokio::test]
    async fn registers_all_fourteen_default_tools() {
        let executor = ToolExecutor::new(store());
        assert_eq!(executor.names().len(), 14);
    }

    #[tokio::test]
    async fn session_scoped_tool_sees_set_session_id() {
        let executor = ToolExecutor::new(store());
        executor.set_session_id("s1");
        let call = ToolCall {
            id: "1".into(),
            name: "manage_scratchpad".into(),
            args: json!({"action": "update", "content": "x"}),
        };
        let out = executor.execute(&call, &CancellationToken::new()).await;
        assert!(!out.contains("Error:"), "{out}");
    }

    #[tokio::test]
    async fn successful_call_increments_the_store_count() {
        let store = store();
        let executor = ToolExecutor::new(store.clone());
        let call = ToolCall { id: "1".into(), name: "execute_bash".into(), args: json!({"command": "echo hi"}) };
        executor.execute(&call, &CancellationToken::new()).await;
        let rows = store.query("SELECT call_count FROM tools WHERE name = 'execute_bash'", &[]).unwrap();
        assert!(rows.contains("1"), "{rows}");
    }
}
