// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Top-level configuration for the agent orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Which provider family to speak to, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Openai,
    Gemini,
}

impl Default for Provider {
    fn default() -> Self {
        Provider::Openai
    }
}

fn default_provider() -> Provider {
    Provider::Openai
}
fn default_model_name() -> String {
    "gpt-4o".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_gca_base_url() -> String {
    "https://cloudcode-pa.googleapis.com".to_string()
}
fn default_throttle_seconds() -> u64 {
    0
}
fn default_worker_count() -> usize {
    4
}
fn default_context_window() -> i64 {
    2
}
fn default_recent_tool_result_budget() -> usize {
    5000
}
fn default_older_tool_result_budget() -> usize {
    300
}
fn default_self_repair_window() -> usize {
    10
}
fn default_db_path() -> String {
    "slop.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// When talking to the cloud-IDE-wrapped generateContent endpoint rather
    /// than the public Gemini API directly.
    #[serde(default)]
    pub gca_mode: bool,
    #[serde(default = "default_gca_base_url")]
    pub gca_base_url: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Request `transforms: ["strip_reasoning"]` on chat-completions payloads.
    #[serde(default)]
    pub strip_reasoning: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            name: default_model_name(),
            // api_key_env stays None by default: we never assume an env var
            // name, since a wrong guess would silently read the wrong secret.
            api_key_env: None,
            api_key: None,
            base_url: default_base_url(),
            gca_mode: false,
            gca_base_url: default_gca_base_url(),
            project_id: None,
            strip_reasoning: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_throttle_seconds")]
    pub throttle_seconds: u64,
    #[serde(default = "default_context_window")]
    pub default_context_window: i64,
    #[serde(default = "default_self_repair_window")]
    pub self_repair_window: usize,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            throttle_seconds: default_throttle_seconds(),
            default_context_window: default_context_window(),
            self_repair_window: default_self_repair_window(),
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_recent_tool_result_budget")]
    pub recent_tool_result_budget: usize,
    #[serde(default = "default_older_tool_result_budget")]
    pub older_tool_result_budget: usize,
    #[serde(default)]
    pub shell_timeout_secs: Option<u64>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            recent_tool_result_budget: default_recent_tool_result_budget(),
            older_tool_result_budget: default_older_tool_result_budget(),
            shell_timeout_secs: None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
