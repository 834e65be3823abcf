// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use slop_dispatch::CancellationToken;
use slop_store::ErrorKind;
use tracing::debug;

use crate::args;
use crate::shell_util::{escape_shell_arg, run_command_in};
use crate::tool::{Tool, ToolCall, ToolOutput};

const GREP_LINE_CAP: usize = 50;
const GIT_GREP_LINE_CAP: usize = 500;

fn cwd(call: &ToolCall) -> Option<&str> {
    call.args.get("cwd").and_then(|v| v.as_str())
}

/// `grep_tool`: searches with plain `grep`, delegating to `git_grep_tool`
/// first when the current directory is inside a git work tree.
pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep_tool"
    }

    fn description(&self) -> &str {
        "Search for a pattern in the codebase using grep. Delegates to git_grep_tool if available \
         in a git repository."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" },
                "context": { "type": "integer" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, call: &ToolCall, cancellation: &CancellationToken) -> ToolOutput {
        let pattern = match args::required_str(&call.args, &call.id, "pattern") {
            Ok(p) => p,
            Err(out) => return out,
        };
        let path = match args::optional_str(&call.args, &call.id, "path") {
            Ok(p) => p.unwrap_or("."),
            Err(out) => return out,
        };
        let context = match args::optional_u64(&call.args, &call.id, "context") {
            Ok(v) => v.unwrap_or(0) as usize,
            Err(out) => return out,
        };
        let dir = cwd(call);

        debug!(pattern, path, context, "grep_tool");

        let inside_work_tree = run_command_in("git rev-parse --is-inside-work-tree", dir, cancellation)
            .await
            .map(|o| o.stdout.contains("true"))
            .unwrap_or(false);

        if inside_work_tree {
            let git_cmd = build_git_grep_command(pattern, Some(path), context, GitGrepFlags::default());
            if let Ok(git_output) = run_and_format(&git_cmd, dir, GIT_GREP_LINE_CAP, cancellation).await {
                if !git_output.is_empty() && !git_output.contains("Error:") {
                    return ToolOutput::ok(&call.id, git_output);
                }
            }
            return match grep(pattern, path, context, dir, cancellation).await {
                Ok(out) => ToolOutput::ok(&call.id, out),
                Err((kind, msg)) => ToolOutput::err(&call.id, kind, msg),
            };
        }

        match grep(pattern, path, context, dir, cancellation).await {
            Ok(out) => ToolOutput::ok(
                &call.id,
                format!(
                    "Notice: Not a git repository. Consider running 'git init' for better search \
                     performance and feature support.\n\n{out}"
                ),
            ),
            Err((kind, msg)) => ToolOutput::err(&call.id, kind, msg),
        }
    }
}

/// `search_code`: a thin, always-plain-grep convenience wrapper rooted at `.`.
pub struct SearchCodeTool;

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }

    fn description(&self) -> &str {
        "Search the codebase for a query string. Convenience wrapper around grep_tool rooted at '.'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    async fn execute(&self, call: &ToolCall, cancellation: &CancellationToken) -> ToolOutput {
        let query = match args::required_str(&call.args, &call.id, "query") {
            Ok(q) => q,
            Err(out) => return out,
        };

        debug!(query, "search_code tool");

        match grep(query, ".", 0, cwd(call), cancellation).await {
            Ok(out) => ToolOutput::ok(&call.id, out),
            Err((kind, msg)) => ToolOutput::err(&call.id, kind, msg),
        }
    }
}

async fn grep(
    pattern: &str,
    path: &str,
    context: usize,
    dir: Option<&str>,
    cancellation: &CancellationToken,
) -> Result<String, (ErrorKind, String)> {
    let lookup_path = match dir {
        Some(d) if path == "." => d.to_string(),
        Some(d) => format!("{d}/{path}"),
        None => path.to_string(),
    };
    let mut cmd = "grep -n".to_string();
    if tokio::fs::metadata(&lookup_path).await.map(|m| m.is_dir()).unwrap_or(false) {
        cmd.push('r');
    }
    if context > 0 {
        cmd.push_str(&format!(" -C {context}"));
    }
    cmd.push_str(&format!(" -e {} {}", escape_shell_arg(pattern), escape_shell_arg(path)));

    run_and_format(&cmd, dir, GREP_LINE_CAP, cancellation).await
}

#[derive(Default)]
struct GitGrepFlags {
    case_insensitive: bool,
    word_regexp: bool,
    line_number: bool,
    count: bool,
    before: Option<u64>,
    after: Option<u64>,
    files_with_matches: bool,
    all_match: bool,
    pcre: bool,
    show_function: bool,
    function_context: bool,
    cached: bool,
    branch: Option<String>,
}

fn build_git_grep_command(pattern: &str, path: Option<&str>, context: usize, flags: GitGrepFlags) -> String {
    let mut cmd = "git grep".to_string();

    if flags.line_number {
        cmd.push_str(" -n");
    }
    if flags.case_insensitive {
        cmd.push_str(" -i");
    }
    if flags.count {
        cmd.push_str(" -c");
    }
    if flags.show_function {
        cmd.push_str(" -p");
    }
    if flags.function_context {
        cmd.push_str(" -W");
    }
    if flags.files_with_matches {
        cmd.push_str(" -l");
    }
    if flags.word_regexp {
        cmd.push_str(" -w");
    }
    if flags.pcre {
        cmd.push_str(" -P");
    }
    if flags.cached {
        cmd.push_str(" --cached");
    }
    if flags.all_match {
        cmd.push_str(" --all-match");
    }

    if context > 0 {
        cmd.push_str(&format!(" -C {context}"));
    } else {
        if let Some(b) = flags.before {
            cmd.push_str(&format!(" -B {b}"));
        }
        if let Some(a) = flags.after {
            cmd.push_str(&format!(" -A {a}"));
        }
    }

    if let Some(branch) = flags.branch.as_deref() {
        cmd.push_str(&format!(" {}", escape_shell_arg(branch)));
    }

    cmd.push_str(&format!(" -e {}", escape_shell_arg(pattern)));

    if let Some(p) = path {
        if p != "." {
            cmd.push_str(&format!(" -- {}", escape_shell_arg(p)));
        }
    }

    cmd
}

async fn run_and_format(
    cmd: &str,
    dir: Option<&str>,
    line_cap: usize,
    cancellation: &CancellationToken,
) -> Result<String, (ErrorKind, String)> {
    let res = run_command_in(cmd, dir, cancellation).await.map_err(|e| (e.kind, e.message))?;
    if res.exit_code != 0 && res.exit_code != 1 {
        let mut err = res.stdout;
        if !res.stderr.is_empty() {
            if !err.is_empty() && !err.ends_with('\n') {
                err.push('\n');
            }
            err.push_str("### STDERR\n");
            err.push_str(&res.stderr);
        }
        return Err((ErrorKind::Internal, format!("Command failed with status {}: {err}", res.exit_code)));
    }

    let mut lines = res.stdout.lines();
    let mut output = String::new();
    let mut count = 0;
    for line in lines.by_ref() {
        if count >= line_cap {
            break;
        }
        output.push_str(line);
        output.push('\n');
        count += 1;
    }
    if lines.next().is_some() {
        output.push_str("\n[TRUNCATED: Use a more specific pattern or path to narrow results]\n");
    }

    if line_cap == GIT_GREP_LINE_CAP
        && count > 20
        && !cmd.contains(" -c")
        && !cmd.contains(" -l")
        && !cmd.contains(" -L")
    {
        let count_cmd = format!("{cmd} -c");
        if let Ok(count_res) = run_command_in(&count_cmd, dir, cancellation).await {
            if count_res.exit_code == 0 {
                output = format!("### SEARCH_SUMMARY:\n{}---\n{output}", count_res.stdout);
            }
        }
    }

    Ok(output)
}

/// `git_grep_tool`: the full-featured search over a git work tree.
pub struct GitGrepTool;

#[async_trait]
impl Tool for GitGrepTool {
    fn name(&self) -> &str {
        "git_grep_tool"
    }

    fn description(&self) -> &str {
        "Comprehensive search using git grep. Optimized for git repositories, honors .gitignore, \
         and can search history."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" },
                "case_insensitive": { "type": "boolean" },
                "word_regexp": { "type": "boolean" },
                "line_number": { "type": "boolean", "default": true },
                "count": { "type": "boolean" },
                "before": { "type": "integer" },
                "after": { "type": "integer" },
                "context": { "type": "integer" },
                "files_with_matches": { "type": "boolean" },
                "all_match": { "type": "boolean" },
                "pcre": { "type": "boolean" },
                "show_function": { "type": "boolean" },
                "function_context": { "type": "boolean" },
                "cached": { "type": "boolean" },
                "branch": { "type": "string" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, call: &ToolCall, cancellation: &CancellationToken) -> ToolOutput {
        let pattern = match args::required_str(&call.args, &call.id, "pattern") {
            Ok(p) => p,
            Err(out) => return out,
        };
        let call_args = &call.args;
        let b = |k: &str| call_args.get(k).and_then(|v| v.as_bool()).unwrap_or(false);
        let u = |k: &str| call_args.get(k).and_then(|v| v.as_u64());
        let dir = cwd(call);

        debug!(pattern, "git_grep_tool");

        let git_check = run_command_in("git --version", dir, cancellation).await;
        match git_check {
            Ok(out) if out.stdout.contains("git version") => {}
            _ => {
                return ToolOutput::ok(&call.id, "Error: git is not available on this system. git_grep_tool is not supported.");
            }
        }
        let repo_check = run_command_in("git rev-parse --is-inside-work-tree", dir, cancellation).await;
        match repo_check {
            Ok(out) if out.stdout.contains("true") => {}
            _ => {
                return ToolOutput::ok(&call.id, "Error: not a git repository. git_grep_tool is not supported.");
            }
        }

        let flags = GitGrepFlags {
            case_insensitive: b("case_insensitive"),
            word_regexp: b("word_regexp"),
            line_number: call_args.get("line_number").and_then(|v| v.as_bool()).unwrap_or(true),
            count: b("count"),
            before: u("before"),
            after: u("after"),
            files_with_matches: b("files_with_matches"),
            all_match: b("all_match"),
            pcre: b("pcre"),
            show_function: b("show_function"),
            function_context: b("function_context"),
            cached: b("cached"),
            branch: call_args.get("branch").and_then(|v| v.as_str()).map(str::to_string),
        };
        let context = u("context").unwrap_or(0) as usize;
        let path = call_args.get("path").and_then(|v| v.as_str());

        let cmd = build_git_grep_command(pattern, path, context, flags);

        match run_and_format(&cmd, dir, GIT_GREP_LINE_CAP, cancellation).await {
            Ok(out) => ToolOutput::ok(&call.id, out),
            Err((kind, msg)) => ToolOutput::err(&call.id, kind, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::ToolCall;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: name.into(), args }
    }

    fn git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::process::Command::new("git").arg("init").arg("-q").current_dir(dir.path()).status().unwrap();
        std::fs::write(dir.path().join("a.txt"), "needle here\nhaystack\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn search_code_finds_match_in_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "findme\nnope\n").unwrap();
        let args = json!({"query": "findme", "cwd": dir.path().to_str().unwrap()});
        let out = SearchCodeTool.execute(&call("search_code", args), &CancellationToken::new()).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("findme"));
    }

    #[tokio::test]
    async fn grep_tool_uses_git_grep_inside_a_repo() {
        let dir = git_repo();
        let args = json!({"pattern": "needle", "cwd": dir.path().to_str().unwrap()});
        let out = GrepTool.execute(&call("grep_tool", args), &CancellationToken::new()).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("needle"));
        assert!(!out.content.contains("Notice: Not a git repository"));
    }

    #[tokio::test]
    async fn grep_tool_adds_notice_outside_a_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "needle\n").unwrap();
        let args = json!({"pattern": "needle", "cwd": dir.path().to_str().unwrap()});
        let out = GrepTool.execute(&call("grep_tool", args), &CancellationToken::new()).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("Notice: Not a git repository"));
    }

    #[tokio::test]
    async fn git_grep_tool_rejects_outside_a_repo() {
        let dir = tempfile::tempdir().unwrap();
        let args = json!({"pattern": "x", "cwd": dir.path().to_str().unwrap()});
        let out = GitGrepTool.execute(&call("git_grep_tool", args), &CancellationToken::new()).await;
        assert!(!out.is_error);
        assert!(out.content.contains("not a git repository"));
    }

    #[test]
    fn git_grep_command_orders_flags_per_algorithm() {
        let flags = GitGrepFlags { line_number: true, case_insensitive: true, ..Default::default() };
        let cmd = build_git_grep_command("pat", Some("src"), 0, flags);
        assert_eq!(cmd, "git grep -n -i -e 'pat' -- 'src'");
    }

    #[test]
    fn missing_pattern_argument_is_error_schema_path() {
        assert!(GrepTool.parameters_schema()["required"].as_array().unwrap().iter().any(|v| v == "pattern"));
    }

    #[tokio::test]
    async fn missing_pattern_carries_mandated_message() {
        let out = GrepTool.execute(&call("grep_tool", json!({})), &CancellationToken::new()).await;
        assert!(out.is_error);
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgument));
        assert!(out.content.contains("Missing mandatory field"));
    }

    #[tokio::test]
    async fn non_integer_context_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x\n").unwrap();
        let args = json!({"pattern": "x", "context": "2", "cwd": dir.path().to_str().unwrap()});
        let out = GrepTool.execute(&call("grep_tool", args), &CancellationToken::new()).await;
        assert!(out.is_error);
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgument));
        assert!(out.content.contains("must be an integer"));
    }
}
