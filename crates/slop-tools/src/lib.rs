// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The fourteen built-in tools an agent loop can call, a registry to look
//! them up by name, and an executor that wraps results in the conversation
//! envelope and records call counts.
pub mod args;
pub mod builtin;
pub mod executor;
pub mod registry;
pub mod session;
pub mod shell_util;
pub mod tool;

pub use executor::ToolExecutor;
pub use registry::{ToolRegistry, ToolSchema};
pub use session::SessionId;
pub use tool::{Tool, ToolCall, ToolOutput};

pub use builtin::apply_patch::ApplyPatchTool;
pub use builtin::describe_db::DescribeDbTool;
pub use builtin::execute_bash::ExecuteBashTool;
pub use builtin::grep::{GitGrepTool, GrepTool, SearchCodeTool};
pub use builtin::list_directory::ListDirectoryTool;
pub use builtin::manage_scratchpad::ManageScratchpadTool;
pub use builtin::query_db::QueryDbTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::retrieve_memos::RetrieveMemosTool;
pub use builtin::save_memo::SaveMemoTool;
pub use builtin::use_skill::UseSkillTool;
pub use builtin::write_file::WriteFileTool;
