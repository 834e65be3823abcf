// SPDX-License-Identifier: Apache-2.0
//! Provider-specific wire formats for the LLM round trip: turning a
//! conversation window into a request body, and a provider's response back
//! into rows appended to the [`Store`](slop_store::Store).
//!
//! Three concrete strategies share one shape (chat-completions, generative
//! content, and a cloud-IDE-wrapped generative content), selected by the
//! orchestrator and otherwise interchangeable from the caller's point of
//! view.

mod chat_completions;
mod generative_content;
mod generative_content_wrapped;

pub use chat_completions::ChatCompletionsStrategy;
pub use generative_content::GenerativeContentStrategy;
pub use generative_content_wrapped::GenerativeContentWrappedStrategy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slop_codec::ToolCall;
use slop_store::{CoreResult, Message, Store};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

/// Byte budget applied to a tool result before it is folded into a prompt.
/// The most recent tool message in a window gets the generous budget; every
/// earlier one is squeezed harder so old command output doesn't crowd out
/// the live turn.
pub const MAX_TOOL_RESULT_CONTEXT: usize = 5000;
pub const MAX_STALE_TOOL_RESULT_CONTEXT: usize = 300;

/// Truncates `content` to at most `limit` bytes, backing up to the nearest
/// UTF-8 character boundary so a multi-byte code point is never split.
pub fn smarter_truncate(content: &str, limit: usize) -> String {
    if content.len() <= limit {
        return content.to_string();
    }
    let mut boundary = limit;
    while boundary > 0 && !content.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let kept = &content[..boundary];
    format!(
        "{kept}\n... [TRUNCATED: Showing {boundary}/{total} characters. Use the tool again with an offset to read more.] ...",
        total = content.len()
    )
}

/// One provider's request/response dialect.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Builds the provider-specific request body from an already-filtered
    /// history window and an assembled system instruction.
    fn assemble_payload(
        &self,
        store: &Store,
        system_instruction: &str,
        history: &[Message],
    ) -> CoreResult<Value>;

    /// Parses a provider response, appends 0..N new messages to `session_id`
    /// tagged with `group_id`, records usage, and returns the turn's total
    /// token count.
    fn process_response(
        &self,
        store: &Store,
        session_id: &str,
        response_json: &str,
        group_id: &str,
    ) -> CoreResult<i64>;

    fn parse_tool_calls(&self, msg: &Message) -> CoreResult<Vec<ToolCall>> {
        slop_codec::extract_tool_calls(msg)
    }

    async fn get_models(&self, http: &reqwest::Client, api_key: &str) -> CoreResult<Vec<ModelInfo>>;

    async fn get_quota(&self, http: &reqwest::Client, token: &str) -> CoreResult<Value>;

    /// `len(dump)/4` heuristic, shared by every variant.
    fn count_tokens(&self, prompt: &Value) -> i64 {
        (prompt.to_string().len() / 4) as i64
    }
}

/// Extracts the `### STATE` block (header through boundary) from assistant
/// text, or `None` if no `### STATE` header is present.
pub fn extract_state(text: &str) -> Option<String> {
    let start = text.find("### STATE")?;
    let rest = &text[start..];
    let end = find_boundary(rest, "\n#").or_else(|| find_boundary(rest, "\n---"));
    let block = match end {
        Some(e) => &rest[..e],
        None => rest,
    };
    let trimmed = block.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn find_boundary(haystack: &str, needle: &str) -> Option<usize> {
    haystack.match_indices(needle).map(|(i, _)| i).find(|&i| i > 0)
}
