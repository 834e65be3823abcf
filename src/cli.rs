// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser, Debug)]
#[command(
    name = "slop",
    about = "A terminal agent that mediates multi-turn LLM conversations with a local tool-calling loop",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file (overrides the standard search path).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database file (overrides config).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive conversation, reading turns from stdin.
    ///
    /// Each line is sent as one user turn; the loop drives the provider
    /// round trip and any tool calls it triggers before prompting again.
    /// Type `/exit` to quit.
    Chat {
        /// Session id to use (created if it doesn't exist yet).
        #[arg(long, short = 's', default_value = "default")]
        session: String,
        /// Skills to activate for this session (repeatable).
        #[arg(long = "skill")]
        skills: Vec<String>,
    },

    /// Run one turn non-interactively: read a prompt from `--prompt` or
    /// stdin, print the final assistant text, and exit with a status code
    /// reflecting success (0) or a fatal transport error (1).
    ServeCi {
        /// Session id to use (created if it doesn't exist yet).
        #[arg(long, short = 's', default_value = "ci")]
        session: String,
        /// The prompt text. If omitted, the prompt is read from stdin.
        #[arg(long, short = 'p')]
        prompt: Option<String>,
        /// Skills to activate for this session (repeatable).
        #[arg(long = "skill")]
        skills: Vec<String>,
    },

    /// Print the effective configuration and exit.
    ShowConfig,

    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Inspect and manage the tool catalogue.
    Tools {
        #[command(subcommand)]
        command: ToolsCommands,
    },

    /// Save and search memos.
    Memo {
        #[command(subcommand)]
        command: MemoCommands,
    },

    /// List and activate skills.
    Skill {
        #[command(subcommand)]
        command: SkillCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ToolsCommands {
    /// List every registered tool and its call count.
    List,
}

#[derive(Subcommand, Debug)]
pub enum MemoCommands {
    /// Save a memo with a comma-separated tag list.
    Add {
        content: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Search memos by tag.
    Search {
        #[arg(value_delimiter = ',')]
        tags: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SkillCommands {
    /// List every registered skill.
    List,
    /// Activate or deactivate a skill for a session.
    Use {
        name: String,
        #[arg(long, short = 's', default_value = "default")]
        session: String,
        #[arg(long)]
        deactivate: bool,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "slop", &mut std::io::stdout());
}
