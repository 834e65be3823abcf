// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use slop_dispatch::CancellationToken;
use slop_store::ErrorKind;
use tracing::debug;

use crate::args;
use crate::builtin::write_file::write_file;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct ApplyPatchTool;

struct Patch {
    find: String,
    replace: String,
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Applies partial changes to a file by matching a specific block of text and replacing it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "patches": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "find": { "type": "string" },
                            "replace": { "type": "string" }
                        },
                        "required": ["find", "replace"]
                    }
                }
            },
            "required": ["path", "patches"]
        })
    }

    async fn execute(&self, call: &ToolCall, _cancellation: &CancellationToken) -> ToolOutput {
        let path = match args::required_str(&call.args, &call.id, "path") {
            Ok(p) => p,
            Err(out) => return out,
        };
        let patches = match parse_patches(&call.args, &call.id) {
            Ok(p) => p,
            Err(out) => return out,
        };

        debug!(path, count = patches.len(), "apply_patch tool");

        match apply_patch(path, &patches).await {
            Ok(summary) => ToolOutput::ok(&call.id, summary),
            Err((kind, msg)) => ToolOutput::err(&call.id, kind, msg),
        }
    }
}

fn parse_patches(call_args: &Value, call_id: &str) -> Result<Vec<Patch>, ToolOutput> {
    let items = args::required_array(call_args, call_id, "patches")?;
    items
        .iter()
        .map(|p| {
            let find = args::required_str(p, call_id, "find")?;
            let replace = args::required_str(p, call_id, "replace")?;
            Ok(Patch { find: find.to_string(), replace: replace.to_string() })
        })
        .collect()
}

async fn apply_patch(path: &str, patches: &[Patch]) -> Result<String, (ErrorKind, String)> {
    let mut content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| (ErrorKind::NotFound, format!("Could not open file: {path} ({e})")))?;

    for patch in patches {
        if patch.find.is_empty() {
            return Err((ErrorKind::InvalidArgument, "Patch 'find' string cannot be empty".to_string()));
        }

        let first = content
            .find(&patch.find)
            .ok_or_else(|| (ErrorKind::FailedPrecondition, format!("Could not find exact match for: {}", patch.find)))?;
        if content[first + patch.find.len()..].find(&patch.find).is_some() {
            return Err((ErrorKind::FailedPrecondition, format!("Ambiguous match for: {}", patch.find)));
        }

        content.replace_range(first..first + patch.find.len(), &patch.replace);
    }

    write_file(path, &content).await.map_err(|e| (ErrorKind::NotFound, e))
}
