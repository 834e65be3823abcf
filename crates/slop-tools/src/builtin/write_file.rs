// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use slop_dispatch::CancellationToken;
use slop_store::ErrorKind;
use tracing::debug;

use crate::args;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the local filesystem."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, call: &ToolCall, _cancellation: &CancellationToken) -> ToolOutput {
        let path = match args::required_str(&call.args, &call.id, "path") {
            Ok(p) => p,
            Err(out) => return out,
        };
        let content = match args::required_str(&call.args, &call.id, "content") {
            Ok(c) => c,
            Err(out) => return out,
        };

        debug!(path, "write_file tool");

        match write_file(path, content).await {
            Ok(summary) => ToolOutput::ok(&call.id, summary),
            Err(e) => ToolOutput::err(&call.id, ErrorKind::NotFound, e),
        }
    }
}

pub(crate) async fn write_file(path: &str, content: &str) -> Result<String, String> {
    tokio::fs::write(path, content)
        .await
        .map_err(|e| format!("Could not open file for writing: {path} ({e})"))?;

    let preview: String = content.lines().take(3).map(|l| format!("{l}\n")).collect();

    Ok(format!(
        "File written successfully:\nPath: {path}\nBytes written: {}\nPreview:\n{preview}",
        content.len()
    ))
}
