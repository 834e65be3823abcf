// SPDX-License-Identifier: Apache-2.0
//! Ties a session's stored history to a provider [`Strategy`], assembling
//! the system instruction and the relevant window of messages into one
//! request payload, and feeding a provider's response back into the store.

use std::sync::Mutex;

use serde_json::{json, Value};
use slop_store::{CoreResult, Message, Store};
use slop_strategy::{
    ChatCompletionsStrategy, GenerativeContentStrategy, GenerativeContentWrappedStrategy, ModelInfo, Strategy,
};

const HISTORY_INSTRUCTIONS: &str = "\n## Conversation History Guidelines\n\
1. The following messages are sequential and chronological.\n\
2. Every response MUST include a ### STATE block at the end to summarize technical progress.\n\
3. Use the ### STATE block from the history as the authoritative source for project goals and technical anchors.\n\
\n\
### State Format\n\
### STATE\n\
Goal: [Short description of current task]\n\
Context: [Active files/classes being edited]\n\
Resolved: [List of things finished this session]\n\
Technical Anchors: [Ports, IPs, constant values]\n";

/// The bundled base prompt. Lines up to and including the first `#patch:`/
/// `#purpose:` directive are development-time notes and are stripped;
/// everything after the directive is the actual instruction kept verbatim.
const BUILTIN_SYSTEM_PROMPT: &str = "\
#purpose: default agent persona
You are a careful coding agent working inside a local repository.
You read before you write, you verify commands before trusting their
output, and you never claim a change is done without having made it.
";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful coding assistant.";

/// Immutable per-instance configuration. Any change to `provider`,
/// `gca_mode`, or `base_url` requires building a new [`Orchestrator`] since
/// those three together select the concrete [`Strategy`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub provider: String,
    pub model: String,
    pub gca_mode: bool,
    pub project_id: String,
    pub base_url: String,
    pub throttle_seconds: u64,
    pub strip_reasoning: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: String::new(),
            gca_mode: false,
            project_id: String::new(),
            base_url: String::new(),
            throttle_seconds: 0,
            strip_reasoning: false,
        }
    }
}

fn select_strategy(config: &OrchestratorConfig) -> Box<dyn Strategy> {
    if config.provider == "gemini" && config.gca_mode {
        Box::new(GenerativeContentWrappedStrategy::new(
            config.model.clone(),
            config.base_url.clone(),
            config.project_id.clone(),
        ))
    } else if config.provider == "gemini" {
        Box::new(GenerativeContentStrategy::new(config.model.clone(), config.base_url.clone()))
    } else {
        Box::new(ChatCompletionsStrategy::new(
            config.model.clone(),
            config.base_url.clone(),
            config.strip_reasoning,
        ))
    }
}

pub struct Orchestrator {
    strategy: Box<dyn Strategy>,
    config: OrchestratorConfig,
    last_selected_groups: Mutex<Vec<String>>,
}

#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.config.provider = provider.into();
        self
    }
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }
    pub fn with_gca_mode(mut self, gca_mode: bool) -> Self {
        self.config.gca_mode = gca_mode;
        self
    }
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.config.project_id = project_id.into();
        self
    }
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }
    pub fn with_throttle(mut self, seconds: u64) -> Self {
        self.config.throttle_seconds = seconds;
        self
    }
    pub fn with_strip_reasoning(mut self, strip: bool) -> Self {
        self.config.strip_reasoning = strip;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator::from_config(self.config)
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    fn from_config(config: OrchestratorConfig) -> Self {
        let strategy = select_strategy(&config);
        Self { strategy, config, last_selected_groups: Mutex::new(Vec::new()) }
    }

    /// Rebuilds the active [`Strategy`] from a changed config — used when
    /// `provider`, `gca_mode`, or `base_url` changes mid-session.
    pub fn reconfigure(&mut self, config: OrchestratorConfig) {
        self.strategy = select_strategy(&config);
        self.config = config;
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn last_selected_groups(&self) -> Vec<String> {
        self.last_selected_groups.lock().unwrap().clone()
    }

    pub fn assemble_prompt(&self, store: &Store, session_id: &str, active_skills: &[String]) -> CoreResult<Value> {
        let settings = store.get_context_settings(session_id)?;
        if settings.size == -1 {
            *self.last_selected_groups.lock().unwrap() = Vec::new();
            return Ok(json!({"contents": []}));
        }

        let history = self.relevant_history(store, session_id, settings.size)?;
        let mut system_instruction = self.build_system_instructions(store, session_id, active_skills)?;
        self.inject_relevant_memos(store, &history, &mut system_instruction)?;
        self.strategy.assemble_payload(store, &system_instruction, &history)
    }

    pub fn process_response(
        &self,
        store: &Store,
        session_id: &str,
        response_json: &str,
        group_id: &str,
    ) -> CoreResult<i64> {
        self.strategy.process_response(store, session_id, response_json, group_id)
    }

    pub fn count_tokens(&self, prompt: &Value) -> i64 {
        self.strategy.count_tokens(prompt)
    }

    /// Re-derives `session_state` from the current window's history: scans
    /// every assistant message chronologically and keeps overwriting with
    /// each `### STATE` block found, so the most recent one wins. Used
    /// after an undo, a session switch, or on explicit command.
    pub fn rebuild_context(&self, store: &Store, session_id: &str) -> CoreResult<()> {
        let settings = store.get_context_settings(session_id)?;
        let window = if settings.size < 0 { 0 } else { settings.size };
        let history = self.relevant_history(store, session_id, window)?;
        for msg in &history {
            if msg.role == "assistant" {
                if let Some(state) = slop_strategy::extract_state(&msg.content) {
                    let _ = store.set_session_state(session_id, &state);
                }
            }
        }
        Ok(())
    }

    fn relevant_history(&self, store: &Store, session_id: &str, window_size: i64) -> CoreResult<Vec<Message>> {
        let raw = store.get_conversation_history(session_id, false, window_size)?;
        let current_strategy = self.strategy.name();

        let mut history = Vec::with_capacity(raw.len());
        let mut group_ids = std::collections::BTreeSet::new();

        for msg in raw {
            let is_tool_related = msg.role == "tool" || msg.status == "tool_call";
            let strategy_matches = match msg.parsing_strategy.as_deref() {
                None | Some("") => true,
                Some(ps) => {
                    ps == current_strategy
                        || (current_strategy == "gemini_gca" && ps == "gemini")
                        || (current_strategy == "gemini" && ps == "gemini_gca")
                }
            };

            if !is_tool_related || strategy_matches {
                if let Some(gid) = &msg.group_id {
                    if !gid.is_empty() {
                        group_ids.insert(gid.clone());
                    }
                }
                history.push(msg);
            }
        }

        *self.last_selected_groups.lock().unwrap() = group_ids.into_iter().collect();
        Ok(history)
    }

    fn build_system_instructions(
        &self,
        store: &Store,
        session_id: &str,
        active_skills: &[String],
    ) -> CoreResult<String> {
        let mut instruction = strip_directive(BUILTIN_SYSTEM_PROMPT);
        if !instruction.ends_with('\n') {
            instruction.push('\n');
        }

        let enabled_tools = store.get_enabled_tools()?;
        if !enabled_tools.is_empty() {
            instruction.push_str(
                "\n## Available Tools\nYou have access to the following tools. Use them to fulfill the user's request.\n",
            );
            for t in &enabled_tools {
                instruction.push_str(&format!("- {}: {}\n", t.name, t.description));
            }
        }

        if !active_skills.is_empty() {
            let all_skills = store.get_skills()?;
            instruction.push_str("\n## Active Personas & Skills\n");
            for skill in &all_skills {
                if active_skills.iter().any(|name| name == &skill.name) {
                    instruction.push_str(&format!("### Skill: {}\n{}\n", skill.name, skill.system_prompt_patch));
                }
            }
        }

        instruction.push_str(HISTORY_INSTRUCTIONS);
        instruction.push('\n');

        let state = store.get_session_state(session_id).unwrap_or_default();
        if !state.is_empty() {
            instruction.push_str(&format!("## Global State (Anchor)\n{state}\n"));
        }

        Ok(instruction)
    }

    fn inject_relevant_memos(&self, store: &Store, history: &[Message], system_instruction: &mut String) -> CoreResult<()> {
        if history.is_empty() {
            return Ok(());
        }
        let Some(last_user_text) = history.iter().rev().find(|m| m.role == "user").map(|m| m.content.clone()) else {
            return Ok(());
        };
        if last_user_text.is_empty() {
            return Ok(());
        }

        let tags = slop_store::extract_tags(&last_user_text);
        if tags.is_empty() {
            return Ok(());
        }

        let memos = store.get_memos_by_tags(&tags)?;
        if memos.is_empty() {
            return Ok(());
        }

        system_instruction.push_str(
            "\n## Relevant Memos\nThe following memos were automatically retrieved as they might be relevant to the current context:\n",
        );
        for memo in memos.iter().take(5) {
            system_instruction.push_str(&format!("- [{}] {}\n", memo.semantic_tags, memo.content));
        }
        Ok(())
    }

    pub async fn get_models(&self, http: &reqwest::Client, api_key: &str) -> CoreResult<Vec<ModelInfo>> {
        self.strategy.get_models(http, api_key).await
    }

    pub async fn get_quota(&self, http: &reqwest::Client, token: &str) -> CoreResult<Value> {
        self.strategy.get_quota(http, token).await
    }
}

/// Strips development-time notes from the builtin prompt resource, keeping
/// only what follows the first `#patch:`/`#purpose:` directive line. Falls
/// back to a generic instruction if no directive is present or nothing
/// survives it.
fn strip_directive(resource: &str) -> String {
    let mut kept = String::new();
    let mut in_patch = false;
    for line in resource.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#patch:")
            || trimmed.starts_with("#purpose:")
            || trimmed.starts_with("# patch:")
            || trimmed.starts_with("# purpose:")
        {
            in_patch = true;
            continue;
        }
        if in_patch {
            kept.push_str(line);
            kept.push('\n');
        }
    }
    if kept.is_empty() {
        DEFAULT_SYSTEM_PROMPT.to_string()
    } else {
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn store() -> Store {
        let f = NamedTempFile::new().unwrap();
        Store::init(f.path()).unwrap()
    }

    #[test]
    fn select_strategy_picks_gca_wrapped_variant() {
        let config = OrchestratorConfig {
            provider: "gemini".into(),
            gca_mode: true,
            ..Default::default()
        };
        let orch = Orchestrator::from_config(config);
        assert_eq!(orch.strategy_name(), "gemini_gca");
    }

    #[test]
    fn select_strategy_defaults_to_chat_completions() {
        let orch = Orchestrator::builder().with_provider("openai").build();
        assert_eq!(orch.strategy_name(), "openai");
    }

    #[test]
    fn context_size_negative_one_hides_history() {
        let db = store();
        db.set_context_window("s1", -1).unwrap();
        let orch = Orchestrator::builder().with_provider("openai").build();
        let payload = orch.assemble_prompt(&db, "s1", &[]).unwrap();
        assert_eq!(payload["contents"], json!([]));
        assert!(orch.last_selected_groups().is_empty());
    }

    #[test]
    fn system_instructions_include_tools_and_skills_and_history_guidelines() {
        let db = store();
        let orch = Orchestrator::builder().with_provider("openai").build();
        let instructions = orch
            .build_system_instructions(&db, "s1", &["planner".to_string()])
            .unwrap();
        assert!(instructions.contains("careful coding agent"));
        assert!(instructions.contains("## Available Tools"));
        assert!(instructions.contains("- read_file:"));
        assert!(instructions.contains("### Skill: planner"));
        assert!(instructions.contains("## Conversation History Guidelines"));
        assert!(instructions.contains("### STATE"));
    }

    #[test]
    fn global_state_anchor_appended_when_session_state_present() {
        let db = store();
        db.set_session_state("s1", "### STATE\nGoal: ship it").unwrap();
        let orch = Orchestrator::builder().with_provider("openai").build();
        let instructions = orch.build_system_instructions(&db, "s1", &[]).unwrap();
        assert!(instructions.contains("## Global State (Anchor)\n### STATE\nGoal: ship it\n"));
    }

    #[test]
    fn relevant_history_keeps_non_tool_messages_regardless_of_strategy() {
        let db = store();
        db.append_message("s1", "user", "hello", None, "completed", Some("g1"), Some("gemini"), 0)
            .unwrap();
        db.append_message("s1", "assistant", "hi", None, "completed", Some("g1"), Some("gemini"), 0)
            .unwrap();
        let orch = Orchestrator::builder().with_provider("openai").build();
        let history = orch.relevant_history(&db, "s1", 0).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn relevant_history_filters_incompatible_tool_related_messages() {
        let db = store();
        db.append_message("s1", "user", "hello", None, "completed", Some("g1"), Some("gemini"), 0)
            .unwrap();
        db.append_message(
            "s1",
            "assistant",
            "{}",
            Some("read_file"),
            "tool_call",
            Some("g1"),
            Some("gemini"),
            0,
        )
        .unwrap();
        let orch = Orchestrator::builder().with_provider("openai").build();
        let history = orch.relevant_history(&db, "s1", 0).unwrap();
        // the user message is kept; the gemini-tagged tool_call is dropped
        // under the openai strategy since it isn't the cross-variant sibling.
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, "user");
    }

    #[test]
    fn relevant_history_keeps_cross_variant_gemini_siblings() {
        let db = store();
        db.append_message("s1", "user", "hello", None, "completed", Some("g1"), Some("gemini"), 0)
            .unwrap();
        db.append_message(
            "s1",
            "assistant",
            "{}",
            Some("read_file"),
            "tool_call",
            Some("g1"),
            Some("gemini"),
            0,
        )
        .unwrap();
        let orch = Orchestrator::builder().with_provider("gemini").with_gca_mode(true).build();
        let history = orch.relevant_history(&db, "s1", 0).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn inject_relevant_memos_appends_top_five_hits_after_last_user_message() {
        let db = store();
        db.add_memo("remember the sqlite schema", r#"["sqlite","schema"]"#).unwrap();
        let orch = Orchestrator::builder().with_provider("openai").build();
        let history = vec![Message {
            id: 1,
            session_id: "s1".into(),
            role: "user".into(),
            content: "what about sqlite schema design".into(),
            tool_call_id: None,
            status: "completed".into(),
            created_at: "now".into(),
            group_id: None,
            parsing_strategy: None,
            tokens: 0,
        }];
        let mut instruction = String::new();
        orch.inject_relevant_memos(&db, &history, &mut instruction).unwrap();
        assert!(instruction.contains("## Relevant Memos"));
        assert!(instruction.contains("remember the sqlite schema"));
    }

    #[test]
    fn rebuild_context_keeps_the_last_state_block_found() {
        let db = store();
        db.append_message(
            "s1",
            "assistant",
            "### STATE\nGoal: first",
            None,
            "completed",
            Some("g1"),
            None,
            0,
        )
        .unwrap();
        db.append_message(
            "s1",
            "assistant",
            "### STATE\nGoal: second",
            None,
            "completed",
            Some("g1"),
            None,
            0,
        )
        .unwrap();
        let orch = Orchestrator::builder().with_provider("openai").build();
        orch.rebuild_context(&db, "s1").unwrap();
        assert_eq!(db.get_session_state("s1").unwrap(), "### STATE\nGoal: second");
    }
}
