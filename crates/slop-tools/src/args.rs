// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Typed extraction helpers for tool arguments. Every builtin parses its
//! `serde_json::Value` args through these so that a wrong JSON type and a
//! missing field are reported distinctly, both as `invalid_argument`.
use serde_json::Value;
use slop_store::ErrorKind;

use crate::tool::ToolOutput;

fn missing(call_id: &str, field: &str) -> ToolOutput {
    ToolOutput::err(call_id, ErrorKind::InvalidArgument, format!("Missing mandatory field: '{field}'"))
}

fn wrong_type(call_id: &str, field: &str, expected: &str) -> ToolOutput {
    ToolOutput::err(call_id, ErrorKind::InvalidArgument, format!("'{field}' must be {expected}"))
}

/// A required string field.
pub fn required_str<'a>(args: &'a Value, call_id: &str, field: &str) -> Result<&'a str, ToolOutput> {
    match args.get(field) {
        None | Some(Value::Null) => Err(missing(call_id, field)),
        Some(v) => v.as_str().ok_or_else(|| wrong_type(call_id, field, "a string")),
    }
}

/// An optional string field; absent yields `None`, present-but-wrong-type is still rejected.
pub fn optional_str<'a>(args: &'a Value, call_id: &str, field: &str) -> Result<Option<&'a str>, ToolOutput> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or_else(|| wrong_type(call_id, field, "a string")),
    }
}

/// An optional unsigned integer field.
pub fn optional_u64(args: &Value, call_id: &str, field: &str) -> Result<Option<u64>, ToolOutput> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| wrong_type(call_id, field, "an integer")),
    }
}

/// An optional boolean field, defaulting to `default` when absent.
pub fn optional_bool(args: &Value, call_id: &str, field: &str, default: bool) -> Result<bool, ToolOutput> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| wrong_type(call_id, field, "a boolean")),
    }
}

/// A required array field (element typing is left to the caller).
pub fn required_array<'a>(args: &'a Value, call_id: &str, field: &str) -> Result<&'a Vec<Value>, ToolOutput> {
    match args.get(field) {
        None | Some(Value::Null) => Err(missing(call_id, field)),
        Some(v) => v.as_array().ok_or_else(|| wrong_type(call_id, field, "an array")),
    }
}
