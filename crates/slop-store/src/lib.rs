// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Durable conversation, tool, skill, memo, session-state and usage
//! persistence. All operations are serialized under a single mutex guarding
//! the underlying SQLite connection.

mod error;
mod tags;
mod types;

pub use error::{CoreError, CoreResult, ErrorKind};
pub use tags::{extract_tags, is_stopword};
pub use types::{ContextSettings, Memo, Message, Skill, ToolRow, TotalUsage};

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT,
    role TEXT CHECK(role IN ('system', 'user', 'assistant', 'tool')),
    content TEXT,
    tool_call_id TEXT,
    status TEXT DEFAULT 'completed',
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    group_id TEXT,
    parsing_strategy TEXT,
    tokens INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tools (
    name TEXT PRIMARY KEY,
    description TEXT,
    json_schema TEXT,
    is_enabled INTEGER DEFAULT 1,
    call_count INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS skills (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE,
    description TEXT,
    system_prompt_patch TEXT,
    activation_count INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    context_size INTEGER DEFAULT 2,
    scratchpad TEXT,
    active_skills TEXT
);

CREATE TABLE IF NOT EXISTS usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT,
    model TEXT,
    prompt_tokens INTEGER,
    completion_tokens INTEGER,
    total_tokens INTEGER,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS session_state (
    session_id TEXT PRIMARY KEY,
    state_blob TEXT
);

CREATE TABLE IF NOT EXISTS llm_memos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    semantic_tags TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// The Store is the single shared mutable resource in the core. Every
/// operation acquires the same mutex; readers observe an arbitrary serial
/// order and writers never interleave.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path`; apply schema; idempotently add
    /// late-added columns; register the built-in tool and skill catalogues.
    /// Calling `init` twice on the same path is permitted and reconciling.
    pub fn init(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "initializing store");
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        // Idempotent column migrations: ignore "duplicate column" failures.
        for stmt in [
            "ALTER TABLE messages ADD COLUMN tokens INTEGER DEFAULT 0",
            "ALTER TABLE skills ADD COLUMN activation_count INTEGER DEFAULT 0",
            "ALTER TABLE sessions ADD COLUMN active_skills TEXT",
            "ALTER TABLE tools ADD COLUMN call_count INTEGER DEFAULT 0",
        ] {
            let _ = conn.execute(stmt, []);
        }

        let store = Store {
            conn: Mutex::new(conn),
        };
        store.register_default_tools()?;
        store.register_default_skills()?;
        Ok(store)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    /// Generic escape hatch for a small set of introspection commands.
    /// Parameters are always bound, never interpolated.
    pub fn execute(&self, sql: &str, params: &[&str]) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(())
    }

    /// Runs `sql` and returns a JSON array of objects — one per row.
    pub fn query(&self, sql: &str, params: &[&str]) -> CoreResult<String> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let col_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut obj = serde_json::Map::new();
            for (i, name) in col_names.iter().enumerate() {
                let value: serde_json::Value = match row.get_ref(i)? {
                    rusqlite::types::ValueRef::Null => serde_json::Value::Null,
                    rusqlite::types::ValueRef::Integer(n) => serde_json::Value::from(n),
                    rusqlite::types::ValueRef::Real(f) => serde_json::Value::from(f),
                    rusqlite::types::ValueRef::Text(t) => {
                        serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
                    }
                    rusqlite::types::ValueRef::Blob(_) => serde_json::Value::Null,
                };
                obj.insert(name.clone(), value);
            }
            out.push(serde_json::Value::Object(obj));
        }
        Ok(serde_json::Value::Array(out).to_string())
    }

    fn ensure_session(conn: &Connection, session_id: &str) -> CoreResult<()> {
        conn.execute(
            "INSERT OR IGNORE INTO sessions (id) VALUES (?1)",
            [session_id],
        )?;
        Ok(())
    }

    pub fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        tool_call_id: Option<&str>,
        status: &str,
        group_id: Option<&str>,
        parsing_strategy: Option<&str>,
        tokens: i64,
    ) -> CoreResult<()> {
        let conn = self.conn();
        Self::ensure_session(&conn, session_id)?;
        conn.execute(
            "INSERT INTO messages (session_id, role, content, tool_call_id, status, group_id, parsing_strategy, tokens) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                session_id,
                role,
                content,
                tool_call_id,
                status,
                group_id,
                parsing_strategy,
                tokens
            ],
        )?;
        Ok(())
    }

    pub fn update_message_status(&self, id: i64, status: &str) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            rusqlite::params![status, id],
        )?;
        Ok(())
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        Ok(Message {
            id: row.get(0)?,
            session_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            tool_call_id: row.get(4)?,
            status: row.get(5)?,
            created_at: row.get(6)?,
            group_id: row.get(7)?,
            parsing_strategy: row.get(8)?,
            tokens: row.get(9)?,
        })
    }

    const MESSAGE_COLUMNS: &'static str =
        "id, session_id, role, content, tool_call_id, status, created_at, group_id, parsing_strategy, tokens";

    /// Turn-group-integrity windowed history read. See spec §4.1.
    pub fn get_conversation_history(
        &self,
        session_id: &str,
        include_dropped: bool,
        window_size: i64,
    ) -> CoreResult<Vec<Message>> {
        let drop_filter = if include_dropped {
            ""
        } else {
            "AND status != 'dropped'"
        };
        let conn = self.conn();
        let (sql, params): (String, Vec<Box<dyn rusqlite::ToSql>>) = if window_size > 0 {
            (
                format!(
                    "SELECT {cols} FROM messages WHERE session_id = ?1 {filter} \
                     AND (group_id IS NULL OR group_id IN \
                     (SELECT DISTINCT group_id FROM messages WHERE session_id = ?2 AND group_id IS NOT NULL {filter} \
                      ORDER BY created_at DESC, id DESC LIMIT ?3)) \
                     ORDER BY created_at ASC, id ASC",
                    cols = Self::MESSAGE_COLUMNS,
                    filter = drop_filter,
                ),
                vec![
                    Box::new(session_id.to_string()),
                    Box::new(session_id.to_string()),
                    Box::new(window_size),
                ],
            )
        } else {
            (
                format!(
                    "SELECT {cols} FROM messages WHERE session_id = ?1 {filter} ORDER BY created_at ASC, id ASC",
                    cols = Self::MESSAGE_COLUMNS,
                    filter = drop_filter,
                ),
                vec![Box::new(session_id.to_string())],
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_message)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_messages_by_groups(&self, group_ids: &[String]) -> CoreResult<Vec<Message>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=group_ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {cols} FROM messages WHERE group_id IN ({ph}) ORDER BY created_at ASC, id ASC",
            cols = Self::MESSAGE_COLUMNS,
            ph = placeholders.join(", ")
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            group_ids.iter().map(|g| g as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), Self::row_to_message)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_last_group_id(&self, session_id: &str) -> CoreResult<String> {
        let conn = self.conn();
        conn.query_row(
            "SELECT group_id FROM messages WHERE session_id = ?1 AND group_id IS NOT NULL \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            [session_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .ok_or_else(|| CoreError::not_found("No group found"))
    }

    pub fn record_usage(
        &self,
        session_id: &str,
        model: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
    ) -> CoreResult<()> {
        let conn = self.conn();
        Self::ensure_session(&conn, session_id)?;
        conn.execute(
            "INSERT INTO usage (session_id, model, prompt_tokens, completion_tokens, total_tokens) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                session_id,
                model,
                prompt_tokens,
                completion_tokens,
                prompt_tokens + completion_tokens
            ],
        )?;
        Ok(())
    }

    pub fn get_total_usage(&self, session_id: Option<&str>) -> CoreResult<TotalUsage> {
        let conn = self.conn();
        let sql = if session_id.is_some() {
            "SELECT SUM(prompt_tokens), SUM(completion_tokens), SUM(total_tokens) FROM usage WHERE session_id = ?1"
        } else {
            "SELECT SUM(prompt_tokens), SUM(completion_tokens), SUM(total_tokens) FROM usage"
        };
        let mut stmt = conn.prepare(sql)?;
        let mapper = |row: &rusqlite::Row| -> rusqlite::Result<TotalUsage> {
            Ok(TotalUsage {
                prompt_tokens: row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                completion_tokens: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                total_tokens: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            })
        };
        let usage = if let Some(sid) = session_id {
            stmt.query_row([sid], mapper)?
        } else {
            stmt.query_row([], mapper)?
        };
        Ok(usage)
    }

    pub fn register_tool(
        &self,
        name: &str,
        description: &str,
        json_schema: &str,
        is_enabled: bool,
        call_count: i64,
    ) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tools (name, description, json_schema, is_enabled, call_count) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(name) DO UPDATE SET description=excluded.description, json_schema=excluded.json_schema, \
             is_enabled=excluded.is_enabled",
            rusqlite::params![name, description, json_schema, is_enabled as i64, call_count],
        )?;
        Ok(())
    }

    pub fn get_enabled_tools(&self) -> CoreResult<Vec<ToolRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name, description, json_schema, is_enabled, call_count FROM tools WHERE is_enabled = 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ToolRow {
                name: row.get(0)?,
                description: row.get(1)?,
                json_schema: row.get(2)?,
                is_enabled: row.get::<_, i64>(3)? != 0,
                call_count: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn register_skill(
        &self,
        name: &str,
        description: &str,
        system_prompt_patch: &str,
    ) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO skills (name, description, system_prompt_patch, activation_count) \
             VALUES (?1, ?2, ?3, 0)",
            rusqlite::params![name, description, system_prompt_patch],
        )?;
        Ok(())
    }

    pub fn update_skill(
        &self,
        name: &str,
        description: &str,
        system_prompt_patch: &str,
        activation_count: i64,
    ) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE skills SET description = ?1, system_prompt_patch = ?2, activation_count = ?3 WHERE name = ?4",
            rusqlite::params![description, system_prompt_patch, activation_count, name],
        )?;
        Ok(())
    }

    pub fn delete_skill(&self, name_or_id: &str) -> CoreResult<()> {
        let conn = self.conn();
        if let Ok(id) = name_or_id.parse::<i64>() {
            conn.execute(
                "DELETE FROM skills WHERE name = ?1 OR id = ?2",
                rusqlite::params![name_or_id, id],
            )?;
        } else {
            conn.execute("DELETE FROM skills WHERE name = ?1", [name_or_id])?;
        }
        Ok(())
    }

    pub fn get_skills(&self) -> CoreResult<Vec<Skill>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name, description, system_prompt_patch, activation_count FROM skills")?;
        let rows = stmt.query_map([], |row| {
            Ok(Skill {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                system_prompt_patch: row.get(3)?,
                activation_count: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Bumps the activation count unconditionally, even if `name_or_id`
    /// refers to no row — a keyed `UPDATE` against zero rows is a harmless
    /// no-op. This matches the predecessor's ordering (see DESIGN.md).
    pub fn increment_skill_activation_count(&self, name_or_id: &str) -> CoreResult<()> {
        let conn = self.conn();
        if let Ok(id) = name_or_id.parse::<i64>() {
            conn.execute(
                "UPDATE skills SET activation_count = activation_count + 1 WHERE name = ?1 OR id = ?2",
                rusqlite::params![name_or_id, id],
            )?;
        } else {
            conn.execute(
                "UPDATE skills SET activation_count = activation_count + 1 WHERE name = ?1",
                [name_or_id],
            )?;
        }
        Ok(())
    }

    pub fn increment_tool_call_count(&self, name: &str) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE tools SET call_count = call_count + 1 WHERE name = ?1",
            [name],
        )?;
        Ok(())
    }

    pub fn set_active_skills(&self, session_id: &str, skills: &[String]) -> CoreResult<()> {
        let conn = self.conn();
        Self::ensure_session(&conn, session_id)?;
        let json = serde_json::to_string(skills).map_err(|e| CoreError::internal(e.to_string()))?;
        conn.execute(
            "UPDATE sessions SET active_skills = ?1 WHERE id = ?2",
            rusqlite::params![json, session_id],
        )?;
        Ok(())
    }

    pub fn get_active_skills(&self, session_id: &str) -> CoreResult<Vec<String>> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT active_skills FROM sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        match raw {
            Some(s) if !s.is_empty() => Ok(serde_json::from_str(&s).unwrap_or_default()),
            _ => Ok(Vec::new()),
        }
    }

    pub fn set_context_window(&self, session_id: &str, size: i64) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (id, context_size) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET context_size=excluded.context_size",
            rusqlite::params![session_id, size],
        )?;
        Ok(())
    }

    pub fn get_context_settings(&self, session_id: &str) -> CoreResult<ContextSettings> {
        let conn = self.conn();
        let size: Option<i64> = conn
            .query_row(
                "SELECT context_size FROM sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ContextSettings {
            size: size.unwrap_or(2),
        })
    }

    pub fn set_session_state(&self, session_id: &str, state_blob: &str) -> CoreResult<()> {
        let conn = self.conn();
        Self::ensure_session(&conn, session_id)?;
        conn.execute(
            "INSERT INTO session_state (session_id, state_blob) VALUES (?1, ?2) \
             ON CONFLICT(session_id) DO UPDATE SET state_blob=excluded.state_blob",
            rusqlite::params![session_id, state_blob],
        )?;
        Ok(())
    }

    pub fn get_session_state(&self, session_id: &str) -> CoreResult<String> {
        let conn = self.conn();
        conn.query_row(
            "SELECT state_blob FROM session_state WHERE session_id = ?1",
            [session_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .ok_or_else(|| CoreError::not_found("Session state not found"))
    }

    pub fn delete_session(&self, session_id: &str) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM messages WHERE session_id = ?1", [session_id])?;
        conn.execute("DELETE FROM usage WHERE session_id = ?1", [session_id])?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;
        conn.execute(
            "DELETE FROM session_state WHERE session_id = ?1",
            [session_id],
        )?;
        Ok(())
    }

    pub fn clone_session(&self, source_id: &str, target_id: &str) -> CoreResult<()> {
        let mut conn = self.conn();
        let source_exists: bool = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?1",
                [source_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !source_exists {
            return Err(CoreError::not_found(format!(
                "Source session '{source_id}' not found."
            )));
        }
        let target_exists: bool = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?1",
                [target_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if target_exists {
            return Err(CoreError::already_exists(format!(
                "Target session '{target_id}' already exists."
            )));
        }

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO sessions (id, context_size, scratchpad, active_skills) \
             SELECT ?1, context_size, scratchpad, active_skills FROM sessions WHERE id = ?2",
            rusqlite::params![target_id, source_id],
        )?;
        tx.execute(
            "INSERT INTO messages (session_id, role, content, tool_call_id, status, created_at, group_id, parsing_strategy, tokens) \
             SELECT ?1, role, content, tool_call_id, status, created_at, group_id, parsing_strategy, tokens FROM messages WHERE session_id = ?2",
            rusqlite::params![target_id, source_id],
        )?;
        tx.execute(
            "INSERT INTO usage (session_id, model, prompt_tokens, completion_tokens, total_tokens, created_at) \
             SELECT ?1, model, prompt_tokens, completion_tokens, total_tokens, created_at FROM usage WHERE session_id = ?2",
            rusqlite::params![target_id, source_id],
        )?;
        tx.execute(
            "INSERT INTO session_state (session_id, state_blob) \
             SELECT ?1, state_blob FROM session_state WHERE session_id = ?2",
            rusqlite::params![target_id, source_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn add_memo(&self, content: &str, tags_json: &str) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO llm_memos (content, semantic_tags) VALUES (?1, ?2)",
            rusqlite::params![content, tags_json],
        )?;
        Ok(())
    }

    pub fn update_memo(&self, id: i64, content: &str, tags_json: &str) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE llm_memos SET content = ?1, semantic_tags = ?2 WHERE id = ?3",
            rusqlite::params![content, tags_json, id],
        )?;
        Ok(())
    }

    pub fn delete_memo(&self, id: i64) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM llm_memos WHERE id = ?1", [id])?;
        Ok(())
    }

    fn row_to_memo(row: &rusqlite::Row) -> rusqlite::Result<Memo> {
        Ok(Memo {
            id: row.get(0)?,
            content: row.get(1)?,
            semantic_tags: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    pub fn get_memo(&self, id: i64) -> CoreResult<Memo> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, content, semantic_tags, created_at FROM llm_memos WHERE id = ?1",
            [id],
            Self::row_to_memo,
        )
        .optional()?
        .ok_or_else(|| CoreError::not_found(format!("Memo {id} not found")))
    }

    pub fn get_all_memos(&self) -> CoreResult<Vec<Memo>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, content, semantic_tags, created_at FROM llm_memos")?;
        let rows = stmt.query_map([], Self::row_to_memo)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// For each extracted tag, matches `semantic_tags` (a JSON array) four
    /// ways: exact, prefix (`tag-%`), suffix (`%-tag`), interior (`%-tag-%`).
    pub fn get_memos_by_tags(&self, tags_input: &[String]) -> CoreResult<Vec<Memo>> {
        if tags_input.is_empty() {
            return Ok(Vec::new());
        }
        let mut unique_tags = std::collections::BTreeSet::new();
        for t in tags_input {
            for extracted in extract_tags(t) {
                unique_tags.insert(extracted);
            }
            let lower = t.trim().to_lowercase();
            if lower.len() > 2 && !is_stopword(&lower) {
                unique_tags.insert(lower);
            }
        }
        if unique_tags.is_empty() {
            return Ok(Vec::new());
        }
        let tags: Vec<String> = unique_tags.into_iter().collect();

        let mut clauses = Vec::new();
        let mut bound: Vec<String> = Vec::new();
        for tag in &tags {
            clauses.push("(j.value = ? OR j.value LIKE ? OR j.value LIKE ? OR j.value LIKE ?)".to_string());
            bound.push(tag.clone());
            bound.push(format!("{tag}-%"));
            bound.push(format!("%-{tag}"));
            bound.push(format!("%-{tag}-%"));
        }
        let sql = format!(
            "SELECT DISTINCT m.id, m.content, m.semantic_tags, m.created_at \
             FROM llm_memos m, json_each(m.semantic_tags) j WHERE {}",
            clauses.join(" OR ")
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            bound.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), Self::row_to_memo)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn update_scratchpad(&self, session_id: &str, scratchpad: &str) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (id, scratchpad) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET scratchpad=excluded.scratchpad",
            rusqlite::params![session_id, scratchpad],
        )?;
        Ok(())
    }

    pub fn get_scratchpad(&self, session_id: &str) -> CoreResult<String> {
        let conn = self.conn();
        let value: Option<String> = conn
            .query_row(
                "SELECT scratchpad FROM sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(value.unwrap_or_default())
    }

    fn register_default_tools(&self) -> CoreResult<()> {
        const TOOLS: &[(&str, &str, &str)] = &[
            ("read_file", "Read the content of a file from the local filesystem.",
             r#"{"type":"object","properties":{"path":{"type":"string"},"start_line":{"type":"integer"},"end_line":{"type":"integer"},"add_line_numbers":{"type":"boolean"}},"required":["path"]}"#),
            ("write_file", "Write content to a file in the local filesystem.",
             r#"{"type":"object","properties":{"path":{"type":"string"},"content":{"type":"string"}},"required":["path","content"]}"#),
            ("execute_bash", "Execute a bash command on the local system.",
             r#"{"type":"object","properties":{"command":{"type":"string"}},"required":["command"]}"#),
            ("grep_tool", "Search for a pattern in the codebase using grep. Delegates to git_grep_tool if available in a git repository.",
             r#"{"type":"object","properties":{"pattern":{"type":"string"},"path":{"type":"string"},"context":{"type":"integer"}},"required":["pattern"]}"#),
            ("git_grep_tool", "Comprehensive search using git grep. Optimized for git repositories, honors .gitignore, and can search history.",
             r#"{"type":"object","properties":{"pattern":{"type":"string"},"path":{"type":"string"},"case_insensitive":{"type":"boolean"},"word_regexp":{"type":"boolean"},"line_number":{"type":"boolean","default":true},"count":{"type":"boolean"},"before":{"type":"integer"},"after":{"type":"integer"},"context":{"type":"integer"},"files_with_matches":{"type":"boolean"},"all_match":{"type":"boolean"},"pcre":{"type":"boolean"},"show_function":{"type":"boolean"},"function_context":{"type":"boolean"},"cached":{"type":"boolean"},"branch":{"type":"string"}},"required":["pattern"]}"#),
            ("query_db", "Query the local SQLite database using SQL.",
             r#"{"type":"object","properties":{"sql":{"type":"string"}},"required":["sql"]}"#),
            ("apply_patch", "Applies partial changes to a file by matching a specific block of text and replacing it.",
             r#"{"type":"object","properties":{"path":{"type":"string"},"patches":{"type":"array","items":{"type":"object","properties":{"find":{"type":"string"},"replace":{"type":"string"}},"required":["find","replace"]}}},"required":["path","patches"]}"#),
            ("save_memo", "Save a memo with semantic tags for later retrieval.",
             r#"{"type":"object","properties":{"content":{"type":"string"},"tags":{"type":"array","items":{"type":"string"}}},"required":["content","tags"]}"#),
            ("retrieve_memos", "Retrieve memos based on semantic tags.",
             r#"{"type":"object","properties":{"tags":{"type":"array","items":{"type":"string"}}},"required":["tags"]}"#),
            ("list_directory", "List files and directories with optional depth and git awareness.",
             r#"{"type":"object","properties":{"path":{"type":"string"},"depth":{"type":"integer"},"git_only":{"type":"boolean"}},"required":[]}"#),
            ("manage_scratchpad", "Manage a persistent markdown scratchpad for the current session.",
             r#"{"type":"object","properties":{"action":{"type":"string","enum":["read","update","append"]},"content":{"type":"string"}},"required":["action"]}"#),
            ("describe_db", "Describe the database schema and tables.", r#"{"type":"object","properties":{}}"#),
            ("use_skill", "Activate or deactivate a specialized skill/persona.",
             r#"{"type":"object","properties":{"name":{"type":"string"},"action":{"type":"string","enum":["activate","deactivate"],"default":"activate"}},"required":["name"]}"#),
            ("search_code", "Search the codebase for a query string. Convenience wrapper around grep_tool rooted at '.'.",
             r#"{"type":"object","properties":{"query":{"type":"string"}},"required":["query"]}"#),
        ];
        for (name, description, schema) in TOOLS {
            self.register_tool(name, description, schema, true, 0)?;
        }
        Ok(())
    }

    fn register_default_skills(&self) -> CoreResult<()> {
        const SKILLS: &[(&str, &str, &str)] = &[
            (
                "planner",
                "Strategic Tech Lead specialized in architectural decomposition and iterative feature delivery.",
                "You only plan. You _do_ _not_ implement anything, and do not write or modify any files. You give me ideas to plan ONLY!",
            ),
            (
                "dba",
                "Database Administrator specializing in SQLite schema design, optimization, and data integrity.",
                "As a DBA, you are the steward of the project's data. You focus on efficient schema design, precise query construction, and maintaining data integrity. When interacting with the database: 1. Always verify schema before operations. 2. Use transactions for complex updates. 3. Provide clear explanations for schema changes. 4. Optimize for performance while ensuring clarity.",
            ),
            (
                "rust_expert",
                "Enforces strict adherence to idiomatic Rust: explicit error handling, no panics in library code, clippy-clean.",
                "You are a Rust expert working on this codebase.\nYou MUST adhere to these constraints in every code change:\n- Error handling: propagate `Result` with `?`; never `unwrap()`/`expect()` outside tests.\n- Ownership: prefer borrowing over cloning; avoid `Rc`/`Arc` unless shared ownership is genuinely required.\n- Concurrency: prefer message passing and the existing async primitives over ad-hoc locks.\n- Style: keep functions small and `clippy`-clean; run `cargo clippy` and `cargo test` before calling anything done.",
            ),
            (
                "code_reviewer",
                "Multilingual code reviewer enforcing language-specific standards and project conventions.",
                "You are a strict code reviewer. Your goal is to review code changes against industry-standard style guides and project conventions.\nYou do NOT implement changes. You ONLY provide an annotated set of required changes or comments. Only after explicit user approval can you proceed with addressing the issues identified. Focus on style, safety, and readability. Always list the files reviewed in your summary.",
            ),
        ];
        for (name, description, patch) in SKILLS {
            self.register_skill(name, description, patch)?;
        }
        Ok(())
    }
}
