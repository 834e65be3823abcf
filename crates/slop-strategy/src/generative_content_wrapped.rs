// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use slop_store::{CoreError, CoreResult, Message, Store};

use crate::generative_content::GenerativeContentStrategy;
use crate::{ModelInfo, Strategy};

/// Cloud-IDE wrapped flavor of [`GenerativeContentStrategy`]: same history
/// translation, but the request is boxed inside an envelope carrying the
/// project and a per-prompt id, and responses may arrive nested under a
/// `response` field.
pub struct GenerativeContentWrappedStrategy {
    inner: GenerativeContentStrategy,
    model: String,
    base_url: String,
    project_id: String,
}

impl GenerativeContentWrappedStrategy {
    pub fn new(
        model: impl Into<String>,
        base_url: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        let model = model.into();
        let base_url = base_url.into();
        Self {
            inner: GenerativeContentStrategy::new(model.clone(), base_url.clone()),
            model,
            base_url,
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl Strategy for GenerativeContentWrappedStrategy {
    fn name(&self) -> &'static str {
        "gemini_gca"
    }

    fn assemble_payload(&self, store: &Store, system_instruction: &str, history: &[Message]) -> CoreResult<Value> {
        let inner_request = self.inner.assemble_payload(store, system_instruction, history)?;
        let session_id = history
            .iter()
            .find(|m| m.role == "user")
            .map(|m| m.session_id.clone())
            .unwrap_or_default();
        let mut inner_request = inner_request;
        inner_request["session_id"] = json!(session_id);

        Ok(json!({
            "model": self.model,
            "project": self.project_id,
            "user_prompt_id": nanos_since_epoch_string(),
            "request": inner_request,
        }))
    }

    fn process_response(&self, store: &Store, session_id: &str, response_json: &str, group_id: &str) -> CoreResult<i64> {
        let j: Value = serde_json::from_str(response_json)
            .map_err(|e| CoreError::internal(format!("failed to parse LLM response: {e}")))?;
        self.inner.process_response_body(store, session_id, &j, group_id, self.name())
    }

    async fn get_models(&self, _http: &reqwest::Client, _api_key: &str) -> CoreResult<Vec<ModelInfo>> {
        Err(CoreError::unimplemented("Model listing not implemented for Gemini OAuth logins yet"))
    }

    async fn get_quota(&self, http: &reqwest::Client, token: &str) -> CoreResult<Value> {
        if self.project_id.is_empty() {
            return Err(CoreError::failed_precondition("Project ID is not set."));
        }
        let url = format!("{}:retrieveUserQuota", self.base_url);
        let resp = http
            .post(&url)
            .bearer_auth(token)
            .json(&json!({"project": self.project_id}))
            .send()
            .await
            .map_err(|e| CoreError::unavailable(format!("request failed: {e}")))?
            .text()
            .await
            .map_err(|e| CoreError::internal(format!("failed to read response body: {e}")))?;
        serde_json::from_str(&resp).map_err(|e| CoreError::internal(format!("failed to parse quota response: {e}")))
    }
}

/// The orchestrator's per-process monotonic clock is injected by the caller
/// in production; tests pin this via the `user_prompt_id` field directly.
fn nanos_since_epoch_string() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
