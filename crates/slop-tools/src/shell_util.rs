// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Subprocess execution shared by every tool that shells out (`execute_bash`,
//! `grep_tool`, `git_grep_tool`).
use std::process::Stdio;
use std::time::Duration;

use slop_dispatch::CancellationToken;
use slop_store::{CoreError, CoreResult};
use tokio::process::Command;

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs `command` through `bash -c`, isolated from the controlling terminal.
/// Polls `cancellation` every 100ms; a trip kills the child (via
/// `kill_on_drop`) and returns a cancelled error.
pub async fn run_command(command: &str, cancellation: &CancellationToken) -> CoreResult<CommandOutput> {
    run_command_in(command, None, cancellation).await
}

/// Like [`run_command`], but runs with `workdir` as the child's current
/// directory instead of inheriting the process-wide one.
pub async fn run_command_in(
    command: &str,
    workdir: Option<&str>,
    cancellation: &CancellationToken,
) -> CoreResult<CommandOutput> {
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|e| CoreError::internal(format!("spawn error: {e}")))?;

    tokio::select! {
        result = child.wait_with_output() => {
            let output = result.map_err(|e| CoreError::internal(format!("command error: {e}")))?;
            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
            })
        }
        _ = poll_cancelled(cancellation) => {
            Err(CoreError::cancelled("command cancelled"))
        }
    }
}

async fn poll_cancelled(cancellation: &CancellationToken) {
    loop {
        if cancellation.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Wraps `s` in single quotes for safe interpolation into a shell command,
/// escaping any embedded single quote.
pub fn escape_shell_arg(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
