// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use slop_dispatch::CancellationToken;
use slop_store::ErrorKind;
use tracing::debug;

use crate::args;
use crate::shell_util::run_command;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct ExecuteBashTool;

#[async_trait]
impl Tool for ExecuteBashTool {
    fn name(&self) -> &str {
        "execute_bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command on the local system."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"]
        })
    }

    async fn execute(&self, call: &ToolCall, cancellation: &CancellationToken) -> ToolOutput {
        let command = match args::required_str(&call.args, &call.id, "command") {
            Ok(c) => c,
            Err(out) => return out,
        };

        debug!(command, "execute_bash tool");

        let out = match run_command(command, cancellation).await {
            Ok(out) => out,
            Err(e) => return ToolOutput::err(&call.id, e.kind, e.message),
        };

        let mut output = out.stdout;
        if !out.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str("### STDERR\n");
            output.push_str(&out.stderr);
        }

        if out.exit_code != 0 {
            ToolOutput::err(&call.id, ErrorKind::Internal, format!("Command failed with status {}: {output}", out.exit_code))
        } else {
            ToolOutput::ok(&call.id, output)
        }
    }
}
