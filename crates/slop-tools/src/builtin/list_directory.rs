// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use slop_dispatch::CancellationToken;
use slop_store::ErrorKind;
use tracing::debug;

use crate::args;
use crate::shell_util::run_command_in;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and directories under a path, up to a given depth. With git_only, lists only \
         files git tracks or would track (respecting .gitignore)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "depth": { "type": "integer" },
                "git_only": { "type": "boolean" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, call: &ToolCall, cancellation: &CancellationToken) -> ToolOutput {
        let path = match args::required_str(&call.args, &call.id, "path") {
            Ok(p) => p,
            Err(out) => return out,
        };
        let max_depth = match args::optional_u64(&call.args, &call.id, "depth") {
            Ok(v) => v.unwrap_or(1) as usize,
            Err(out) => return out,
        };
        let git_only = match args::optional_bool(&call.args, &call.id, "git_only", false) {
            Ok(v) => v,
            Err(out) => return out,
        };

        debug!(path, max_depth, git_only, "list_directory tool");

        if git_only {
            let inside_work_tree = run_command_in("git rev-parse --is-inside-work-tree", Some(path), cancellation)
                .await
                .map(|o| o.stdout.contains("true"))
                .unwrap_or(false);
            if inside_work_tree {
                let cmd = "git ls-files --cached --others --exclude-standard";
                return match run_command_in(cmd, Some(path), cancellation).await {
                    Ok(out) if out.exit_code == 0 => ToolOutput::ok(&call.id, out.stdout),
                    Ok(out) => ToolOutput::err(&call.id, ErrorKind::Internal, format!("git ls-files failed: {}", out.stderr)),
                    Err(e) => ToolOutput::err(&call.id, e.kind, e.message),
                };
            }
        }

        match tokio::fs::metadata(path).await {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return ToolOutput::err(&call.id, ErrorKind::InvalidArgument, format!("not a directory: {path}")),
            Err(_) => return ToolOutput::err(&call.id, ErrorKind::NotFound, format!("Path not found: {path}")),
        }

        let mut output = String::new();
        walk(path, path, max_depth, &mut output).await;
        ToolOutput::ok(&call.id, output)
    }
}

fn relative(base: &str, full: &str) -> String {
    full.strip_prefix(base).map(|s| s.trim_start_matches('/').to_string()).unwrap_or_else(|| full.to_string())
}

fn depth_of(rel: &str) -> usize {
    if rel.is_empty() {
        0
    } else {
        rel.matches('/').count() + 1
    }
}

fn walk<'a>(
    base: &'a str,
    dir: &'a str,
    max_depth: usize,
    out: &'a mut String,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        let mut rd = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(_) => return,
        };

        let mut children: Vec<(String, bool)> = Vec::new();
        while let Ok(Some(entry)) = rd.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            children.push((name, is_dir));
        }
        children.sort();

        for (name, is_dir) in children {
            let full_path = format!("{}/{}", dir.trim_end_matches('/'), name);
            let rel = relative(base, &full_path);
            if depth_of(&rel) > max_depth {
                continue;
            }
            if is_dir {
                out.push_str(&format!("Directory: {rel}/\n"));
                walk(base, &full_path, max_depth, out).await;
            } else {
                out.push_str(&format!("File: {rel}\n"));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::ToolCall;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "list_directory".into(), args }
    }

    fn tmp_dir(suffix: &str) -> std::path::PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static CTR: AtomicU32 = AtomicU32::new(0);
        let n = CTR.fetch_add(1, Ordering::Relaxed);
        std::path::PathBuf::from(format!("/tmp/slop_listdir_{}_{n}{suffix}", std::process::id()))
    }

    #[tokio::test]
    async fn lists_immediate_children_by_default() {
        let dir = tmp_dir("");
        std::fs::create_dir_all(dir.join("subdir/nested")).unwrap();
        std::fs::write(dir.join("top.txt"), "x").unwrap();
        std::fs::write(dir.join("subdir/inner.txt"), "x").unwrap();

        let out = ListDirectoryTool
            .execute(&call(json!({"path": dir.to_str().unwrap()})), &CancellationToken::new())
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("File: top.txt"));
        assert!(out.content.contains("Directory: subdir/"));
        assert!(!out.content.contains("inner.txt"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn depth_extends_recursion() {
        let dir = tmp_dir("_depth");
        std::fs::create_dir_all(dir.join("subdir")).unwrap();
        std::fs::write(dir.join("subdir/inner.txt"), "x").unwrap();

        let out = ListDirectoryTool
            .execute(&call(json!({"path": dir.to_str().unwrap(), "depth": 2})), &CancellationToken::new())
            .await;
        assert!(out.content.contains("File: subdir/inner.txt"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let out = ListDirectoryTool
            .execute(&call(json!({"path": "/tmp/slop_no_such_dir_xyzzy"})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn missing_path_argument_is_error() {
        let out = ListDirectoryTool.execute(&call(json!({})), &CancellationToken::new()).await;
        assert!(out.is_error);
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgument));
        assert!(out.content.contains("Missing mandatory field"));
    }

    #[tokio::test]
    async fn string_depth_is_rejected_as_invalid_argument() {
        let out = ListDirectoryTool
            .execute(&call(json!({"path": "/tmp", "depth": "2"})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgument));
        assert!(out.content.contains("must be an integer"));
    }
}
