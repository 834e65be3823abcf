// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use slop_dispatch::CancellationToken;
use slop_store::{ErrorKind, Store};
use tracing::debug;

use crate::args;
use crate::session::SessionId;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct UseSkillTool {
    store: Arc<Store>,
    session_id: SessionId,
}

impl UseSkillTool {
    pub fn new(store: Arc<Store>, session_id: SessionId) -> Self {
        Self { store, session_id }
    }
}

#[async_trait]
impl Tool for UseSkillTool {
    fn name(&self) -> &str {
        "use_skill"
    }

    fn description(&self) -> &str {
        "Activate or deactivate a named skill for the current session, patching the system prompt \
         while it is active."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["activate", "deactivate"] },
                "name": { "type": "string" }
            },
            "required": ["action", "name"]
        })
    }

    async fn execute(&self, call: &ToolCall, _cancellation: &CancellationToken) -> ToolOutput {
        let session = self.session_id.get();
        if session.is_empty() {
            return ToolOutput::err(&call.id, ErrorKind::FailedPrecondition, "No active session");
        }
        let action = match args::required_str(&call.args, &call.id, "action") {
            Ok(a) => a,
            Err(out) => return out,
        };
        let name = match args::required_str(&call.args, &call.id, "name") {
            Ok(n) => n,
            Err(out) => return out,
        };

        debug!(action, name, "use_skill tool");

        match action {
            "activate" => self.activate(&call.id, &session, name),
            "deactivate" => self.deactivate(&call.id, &session, name),
            other => ToolOutput::err(&call.id, ErrorKind::InvalidArgument, format!("unknown action: {other}")),
        }
    }
}

impl UseSkillTool {
    fn activate(&self, call_id: &str, session: &str, name: &str) -> ToolOutput {
        if let Err(e) = self.store.increment_skill_activation_count(name) {
            return ToolOutput::err(call_id, e.kind, e.message);
        }

        let mut active = self.store.get_active_skills(session).unwrap_or_default();
        if !active.iter().any(|s| s == name) {
            active.push(name.to_string());
            if let Err(e) = self.store.set_active_skills(session, &active) {
                return ToolOutput::err(call_id, e.kind, e.message);
            }
        }

        let skills = match self.store.get_skills() {
            Ok(s) => s,
            Err(e) => return ToolOutput::err(call_id, e.kind, e.message),
        };
        match skills.into_iter().find(|s| s.name == name) {
            Some(skill) => ToolOutput::ok(call_id, format!("Skill '{name}' activated.\n\n{}", skill.system_prompt_patch)),
            None => ToolOutput::err(call_id, ErrorKind::NotFound, format!("Skill not found: {name}")),
        }
    }

    fn deactivate(&self, call_id: &str, session: &str, name: &str) -> ToolOutput {
        let active = self.store.get_active_skills(session).unwrap_or_default();
        if !active.iter().any(|s| s == name) {
            return ToolOutput::ok(call_id, format!("Skill '{name}' was not active."));
        }
        let remaining: Vec<String> = active.into_iter().filter(|s| s != name).collect();
        match self.store.set_active_skills(session, &remaining) {
            Ok(()) => ToolOutput::ok(call_id, format!("Skill '{name}' deactivated.")),
            Err(e) => ToolOutput::err(call_id, e.kind, e.message),
        }
    }
}
