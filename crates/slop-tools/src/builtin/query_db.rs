// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use slop_dispatch::CancellationToken;
use slop_store::Store;
use tracing::debug;

use crate::args;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct QueryDbTool {
    store: Arc<Store>,
}

impl QueryDbTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for QueryDbTool {
    fn name(&self) -> &str {
        "query_db"
    }

    fn description(&self) -> &str {
        "Run a read-only SQL query against the conversation database and return the rows as JSON."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "sql": { "type": "string" } },
            "required": ["sql"]
        })
    }

    async fn execute(&self, call: &ToolCall, _cancellation: &CancellationToken) -> ToolOutput {
        let sql = match args::required_str(&call.args, &call.id, "sql") {
            Ok(s) => s,
            Err(out) => return out,
        };

        debug!(sql, "query_db tool");

        match self.store.query(sql, &[]) {
            Ok(rows) => ToolOutput::ok(&call.id, rows),
            Err(e) => ToolOutput::err(&call.id, e.kind, e.message),
        }
    }
}
