// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The `HttpPoster`/`HttpGetter`/`TokenProvider` capability boundary (spec
//! §6.1) and a `reqwest`-backed implementation of it. The orchestrator and
//! strategies never touch the network directly — they hand back a JSON
//! payload and expect a JSON response body, and the interaction loop is the
//! only caller that owns an actual HTTP client.

use async_trait::async_trait;
use slop_store::{CoreError, CoreResult, ErrorKind};

/// Posts a JSON request body to `url` with the given headers and returns the
/// raw response body, or a classified [`CoreError`].
#[async_trait]
pub trait HttpPoster: Send + Sync {
    async fn post(&self, url: &str, body: &str, headers: &[(String, String)]) -> CoreResult<String>;
}

/// `GET` counterpart of [`HttpPoster`], used for model listing and quota checks.
#[async_trait]
pub trait HttpGetter: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> CoreResult<String>;
}

/// Supplies a live OAuth access token for the cloud-IDE (`gemini_gca`) auth
/// path. The acquisition flow itself is out of scope (spec §1) — this trait
/// is the seam a real credential manager would be wired in behind.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_valid_token(&self) -> CoreResult<String>;
    async fn get_project_id(&self) -> CoreResult<String>;
    fn is_enabled(&self) -> bool;
}

/// A `TokenProvider` that is never enabled — used whenever the operator
/// hasn't configured cloud-IDE credentials. Any attempt to refresh through
/// it is a programming error since callers must check `is_enabled` first.
pub struct NullTokenProvider;

#[async_trait]
impl TokenProvider for NullTokenProvider {
    async fn get_valid_token(&self) -> CoreResult<String> {
        Err(CoreError::failed_precondition("no TokenProvider configured"))
    }
    async fn get_project_id(&self) -> CoreResult<String> {
        Err(CoreError::failed_precondition("no TokenProvider configured"))
    }
    fn is_enabled(&self) -> bool {
        false
    }
}

/// The only concrete `HttpPoster`/`HttpGetter` this binary ships: a thin
/// `reqwest::Client` wrapper that classifies transport failures and 4xx/5xx
/// status codes into the closed `ErrorKind` taxonomy (spec §6.1/§7).
pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for ReqwestHttp {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_status(status: reqwest::StatusCode) -> ErrorKind {
    match status.as_u16() {
        401 => ErrorKind::Unauthenticated,
        403 => ErrorKind::PermissionDenied,
        429 => ErrorKind::ResourceExhausted,
        400..=499 => ErrorKind::InvalidArgument,
        500..=599 => ErrorKind::Unavailable,
        _ => ErrorKind::Internal,
    }
}

fn classify_transport_error(e: &reqwest::Error) -> ErrorKind {
    if e.is_timeout() || e.is_connect() {
        ErrorKind::Unavailable
    } else {
        ErrorKind::Internal
    }
}

#[async_trait]
impl HttpPoster for ReqwestHttp {
    async fn post(&self, url: &str, body: &str, headers: &[(String, String)]) -> CoreResult<String> {
        let mut req = self.client.post(url).header("Content-Type", "application/json").body(body.to_string());
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req.send().await.map_err(|e| CoreError::new(classify_transport_error(&e), format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CoreError::internal(format!("failed to read response body from {url}: {e}")))?;

        if !status.is_success() {
            return Err(CoreError::new(classify_status(status), format!("{url} returned HTTP {}: {}", status.as_u16(), first_line(&text))));
        }
        Ok(text)
    }
}

#[async_trait]
impl HttpGetter for ReqwestHttp {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> CoreResult<String> {
        let mut req = self.client.get(url);
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req.send().await.map_err(|e| CoreError::new(classify_transport_error(&e), format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CoreError::internal(format!("failed to read response body from {url}: {e}")))?;

        if !status.is_success() {
            return Err(CoreError::new(classify_status(status), format!("{url} returned HTTP {}: {}", status.as_u16(), first_line(&text))));
        }
        Ok(text)
    }
}

/// User-visible failures are single-line where feasible (spec §7): truncate
/// a multi-line body to its first line plus a marker.
fn first_line(text: &str) -> String {
    let capped: String = text.chars().take(200).collect();
    match capped.split_once('\n') {
        Some((first, _)) => format!("{first} (multi-line)..."),
        None => capped,
    }
}
