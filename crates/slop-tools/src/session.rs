// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

/// The session id a tool call is running against, shared between the
/// executor and the handful of tools (`manage_scratchpad`, `use_skill`)
/// that are session-scoped. Cloning shares the same underlying cell.
#[derive(Clone, Default)]
pub struct SessionId(Arc<Mutex<String>>);

impl SessionId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: impl Into<String>) {
        *self.0.lock().unwrap() = id.into();
    }

    pub fn get(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}
