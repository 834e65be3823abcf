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

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the content of a file from the local filesystem."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "start_line": { "type": "integer" },
                "end_line": { "type": "integer" },
                "add_line_numbers": { "type": "boolean" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, call: &ToolCall, _cancellation: &CancellationToken) -> ToolOutput {
        let path = match args::required_str(&call.args, &call.id, "path") {
            Ok(p) => p,
            Err(out) => return out,
        };
        let start_line = match args::optional_u64(&call.args, &call.id, "start_line") {
            Ok(v) => v.map(|n| n as usize),
            Err(out) => return out,
        };
        let end_line = match args::optional_u64(&call.args, &call.id, "end_line") {
            Ok(v) => v.map(|n| n as usize),
            Err(out) => return out,
        };
        let add_line_numbers = match args::optional_bool(&call.args, &call.id, "add_line_numbers", false) {
            Ok(v) => v,
            Err(out) => return out,
        };

        if let (Some(s), Some(e)) = (start_line, end_line) {
            if s > e {
                return ToolOutput::err(
                    &call.id,
                    ErrorKind::InvalidArgument,
                    "start_line must be less than or equal to end_line",
                );
            }
        }

        debug!(path, ?start_line, ?end_line, "read_file tool");

        match read_file(path, start_line, end_line, add_line_numbers).await {
            Ok(content) => ToolOutput::ok(&call.id, content),
            Err(e) => ToolOutput::err(&call.id, ErrorKind::NotFound, e),
        }
    }
}

async fn read_file(
    path: &str,
    start_line: Option<usize>,
    end_line: Option<usize>,
    add_line_numbers: bool,
) -> Result<String, String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Could not open file: {path} ({e})"))?;

    let lines: Vec<&str> = text.lines().collect();
    let total_lines = lines.len();

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let current_line = i + 1;
        if start_line.is_some_and(|s| current_line < s) {
            continue;
        }
        if let Some(e) = end_line {
            if current_line > e {
                break;
            }
        }
        if add_line_numbers {
            out.push_str(&format!("{current_line}: {line}\n"));
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    let s = start_line.unwrap_or(1);
    let e = end_line.unwrap_or(total_lines);
    let header = format!("### FILE: {path} | TOTAL_LINES: {total_lines} | RANGE: {s}-{e}\n");

    if e < total_lines {
        out.push_str(&format!("\n... [Truncated. Use 'read_file' with start_line={} to see more] ...", e + 1));
    }

    Ok(header + &out)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::ToolCall;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "read_file".into(), args }
    }

    fn tmp_path(suffix: &str) -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static CTR: AtomicU32 = AtomicU32::new(0);
        let n = CTR.fetch_add(1, Ordering::Relaxed);
        format!("/tmp/slop_read_test_{}_{n}{suffix}", std::process::id())
    }

    #[tokio::test]
    async fn reads_whole_file_with_header() {
        let path = tmp_path(".txt");
        std::fs::write(&path, "a\nb\nc\n").unwrap();
        let out = ReadFileTool.execute(&call(json!({"path": path})), &CancellationToken::new()).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("TOTAL_LINES: 3"));
        assert!(out.content.contains("RANGE: 1-3"));
        assert!(out.content.contains("a\nb\nc\n"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn range_read_adds_truncation_hint() {
        let path = tmp_path(".txt");
        std::fs::write(&path, "a\nb\nc\nd\ne\n").unwrap();
        let out = ReadFileTool
            .execute(&call(json!({"path": path, "start_line": 2, "end_line": 3})), &CancellationToken::new())
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("RANGE: 2-3"));
        assert!(out.content.contains("b\nc\n"));
        assert!(!out.content.contains("\nd\n"));
        assert!(out.content.contains("start_line=4"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn add_line_numbers_prefixes_each_line() {
        let path = tmp_path(".txt");
        std::fs::write(&path, "x\ny\n").unwrap();
        let out = ReadFileTool
            .execute(&call(json!({"path": path, "add_line_numbers": true})), &CancellationToken::new())
            .await;
        assert!(out.content.contains("1: x"));
        assert!(out.content.contains("2: y"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn start_after_end_is_invalid() {
        let out = ReadFileTool
            .execute(&call(json!({"path": "/tmp/whatever", "start_line": 5, "end_line": 2})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("start_line must be less than or equal to end_line"));
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let out = ReadFileTool
            .execute(&call(json!({"path": "/tmp/slop_missing_xyz_does_not_exist"})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn missing_path_carries_mandated_message() {
        let out = ReadFileTool.execute(&call(json!({})), &CancellationToken::new()).await;
        assert!(out.is_error);
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgument));
        assert!(out.content.contains("Missing mandatory field"));
    }

    #[tokio::test]
    async fn string_start_line_is_rejected_as_invalid_argument() {
        let out = ReadFileTool
            .execute(&call(json!({"path": "/tmp/whatever", "start_line": "3"})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgument));
        assert!(out.content.contains("must be an integer"));
    }
}
