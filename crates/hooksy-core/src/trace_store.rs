//! Persistent per-session event log.
//!
//! Single-file embedded relational store (SQLite via `rusqlite`) with
//! write-ahead journaling and a five-second busy timeout, guarded by a
//! process-local read-write lock per the spec's concurrency model — the
//! dashboard daemon (out of scope here) reads concurrently with this
//! process's writes, so the lock discipline matters even though this
//! crate never runs the dashboard itself.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use crate::errors::TraceStoreError;

const FIVE_SECOND_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A session row.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub cwd: String,
    pub transcript_path: String,
}

/// A persisted event row.
#[derive(Debug, Clone)]
pub struct TracedEvent {
    pub id: Option<i64>,
    pub session_id: String,
    pub tool_use_id: Option<String>,
    pub event_type: String,
    pub tool_name: Option<String>,
    pub tool_input: Value,
    pub tool_response: Value,
    pub timestamp: DateTime<Utc>,
    pub decision: Option<String>,
    pub rule_matched: Option<String>,
}

/// File-backed trace store.
pub struct TraceStore {
    conn: RwLock<Connection>,
    session_ttl: Duration,
    max_events_per_session: u64,
    cleanup_probability: f64,
}

impl TraceStore {
    /// Open (creating if absent) the store file at `path`.
    pub fn open(
        path: &Path,
        session_ttl: Duration,
        max_events_per_session: u64,
        cleanup_probability: f64,
    ) -> Result<Self, TraceStoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(|e| TraceStoreError::Open {
            path: path.display().to_string(),
            source: e,
        })?;
        conn.busy_timeout(FIVE_SECOND_BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS sessions (
                 session_id TEXT PRIMARY KEY,
                 created_at TEXT NOT NULL,
                 last_seen_at TEXT NOT NULL,
                 cwd TEXT NOT NULL DEFAULT '',
                 transcript_path TEXT NOT NULL DEFAULT ''
             );
             CREATE TABLE IF NOT EXISTS events (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
                 tool_use_id TEXT,
                 event_type TEXT NOT NULL,
                 tool_name TEXT,
                 tool_input TEXT NOT NULL DEFAULT '{}',
                 tool_response TEXT NOT NULL DEFAULT '{}',
                 timestamp TEXT NOT NULL,
                 decision TEXT,
                 rule_matched TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_events_session_ts ON events(session_id, timestamp);
             CREATE INDEX IF NOT EXISTS idx_events_tool_use_id ON events(tool_use_id);",
        )?;

        Ok(Self {
            conn: RwLock::new(conn),
            session_ttl,
            max_events_per_session,
            cleanup_probability,
        })
    }

    /// Open the default store path, creating parent directories on first
    /// use. `session_ttl_hours`, `max_events_per_session`, and
    /// `cleanup_probability` come from `Settings::trace`; a zero in any of
    /// them means "not set" (the same ambiguity the config merge logic
    /// lives with per spec.md's merge rules), so this substitutes the
    /// operational default for that field instead.
    pub fn open_default(
        storage_path: &str,
        session_ttl_hours: u64,
        max_events_per_session: u64,
        cleanup_probability: f64,
    ) -> Result<Self, TraceStoreError> {
        let path: PathBuf = if storage_path.is_empty() {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".hooksy")
                .join("traces")
                .join("sessions.db")
        } else {
            PathBuf::from(storage_path)
        };
        let session_ttl_hours = if session_ttl_hours == 0 { 24 } else { session_ttl_hours };
        let max_events_per_session = if max_events_per_session == 0 { 10_000 } else { max_events_per_session };
        let cleanup_probability = if cleanup_probability == 0.0 { 0.1 } else { cleanup_probability };
        Self::open(
            &path,
            Duration::from_secs(session_ttl_hours * 3600),
            max_events_per_session,
            cleanup_probability,
        )
    }

    /// Get the session row, creating it if absent; bumps `last_seen_at` otherwise.
    pub fn get_or_create_session(
        &self,
        session_id: &str,
        cwd: &str,
        transcript_path: &str,
    ) -> Result<Session, TraceStoreError> {
        let conn = self.conn.write().unwrap();
        let now = Utc::now();
        let existing: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT created_at, last_seen_at, cwd, transcript_path FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        if let Some((created_at, _last_seen, _cwd, _transcript)) = existing {
            conn.execute(
                "UPDATE sessions SET last_seen_at = ?1, cwd = ?2, transcript_path = ?3 WHERE session_id = ?4",
                params![now.to_rfc3339(), cwd, transcript_path, session_id],
            )?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or(now);
            Ok(Session {
                session_id: session_id.to_string(),
                created_at,
                last_seen_at: now,
                cwd: cwd.to_string(),
                transcript_path: transcript_path.to_string(),
            })
        } else {
            conn.execute(
                "INSERT INTO sessions (session_id, created_at, last_seen_at, cwd, transcript_path)
                 VALUES (?1, ?2, ?2, ?3, ?4)",
                params![session_id, now.to_rfc3339(), cwd, transcript_path],
            )?;
            Ok(Session {
                session_id: session_id.to_string(),
                created_at: now,
                last_seen_at: now,
                cwd: cwd.to_string(),
                transcript_path: transcript_path.to_string(),
            })
        }
    }

    /// Store an event, populating its `id` on success.
    pub fn store_event(&self, event: &mut TracedEvent) -> Result<(), TraceStoreError> {
        let conn = self.conn.write().unwrap();
        let tool_input = serde_json::to_string(&event.tool_input)?;
        let tool_response = serde_json::to_string(&event.tool_response)?;
        conn.execute(
            "INSERT INTO events
                (session_id, tool_use_id, event_type, tool_name, tool_input, tool_response, timestamp, decision, rule_matched)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.session_id,
                event.tool_use_id,
                event.event_type,
                event.tool_name,
                tool_input,
                tool_response,
                event.timestamp.to_rfc3339(),
                event.decision,
                event.rule_matched,
            ],
        )?;
        event.id = Some(conn.last_insert_rowid());
        drop(conn);

        if self.cleanup_probability > 0.0 {
            let roll: f64 = rand::thread_rng().gen_range(0.0..1.0);
            if roll < self.cleanup_probability {
                if let Err(e) = self.cleanup_old_sessions(self.session_ttl) {
                    debug!(error = %e, "automatic trace cleanup failed");
                }
                if let Err(e) = self.cleanup_excess_events(&event.session_id, self.max_events_per_session) {
                    debug!(error = %e, "automatic event cap cleanup failed");
                }
            }
        }

        Ok(())
    }

    /// Events for a session since `since`, ascending by timestamp.
    pub fn get_session_events_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TracedEvent>, TraceStoreError> {
        let conn = self.conn.read().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, tool_use_id, event_type, tool_name, tool_input, tool_response, timestamp, decision, rule_matched
             FROM events WHERE session_id = ?1 AND timestamp >= ?2 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![session_id, since.to_rfc3339()], row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// The oldest event matching `tool_use_id` within a session (the pre side of a pair).
    pub fn get_event_by_tool_use_id(
        &self,
        session_id: &str,
        tool_use_id: &str,
    ) -> Result<Option<TracedEvent>, TraceStoreError> {
        let conn = self.conn.read().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, tool_use_id, event_type, tool_name, tool_input, tool_response, timestamp, decision, rule_matched
             FROM events WHERE session_id = ?1 AND tool_use_id = ?2 ORDER BY timestamp ASC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![session_id, tool_use_id], row_to_event)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// N newest events for a session, returned chronologically ascending.
    pub fn get_recent_events(
        &self,
        session_id: &str,
        n: u64,
    ) -> Result<Vec<TracedEvent>, TraceStoreError> {
        let conn = self.conn.read().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, tool_use_id, event_type, tool_name, tool_input, tool_response, timestamp, decision, rule_matched
             FROM events WHERE session_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, n as i64], row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        events.reverse();
        Ok(events)
    }

    /// Delete events then sessions whose `last_seen_at` is older than `ttl`.
    pub fn cleanup_old_sessions(&self, ttl: Duration) -> Result<usize, TraceStoreError> {
        let conn = self.conn.write().unwrap();
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        conn.execute(
            "DELETE FROM events WHERE session_id IN (SELECT session_id FROM sessions WHERE last_seen_at < ?1)",
            params![cutoff.to_rfc3339()],
        )?;
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE last_seen_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }

    /// Delete the oldest events for a session until it has at most `cap` events.
    pub fn cleanup_excess_events(&self, session_id: &str, cap: u64) -> Result<usize, TraceStoreError> {
        let conn = self.conn.write().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        let excess = count - cap as i64;
        if excess <= 0 {
            return Ok(0);
        }
        conn.execute(
            "DELETE FROM events WHERE id IN (
                SELECT id FROM events WHERE session_id = ?1 ORDER BY timestamp ASC LIMIT ?2
             )",
            params![session_id, excess],
        )?;
        Ok(excess as usize)
    }

    /// All sessions, ordered by `last_seen_at` descending.
    pub fn list_sessions(&self) -> Result<Vec<Session>, TraceStoreError> {
        let conn = self.conn.read().unwrap();
        let mut stmt = conn.prepare(
            "SELECT session_id, created_at, last_seen_at, cwd, transcript_path FROM sessions ORDER BY last_seen_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let created_at: String = row.get(1)?;
            let last_seen_at: String = row.get(2)?;
            Ok(Session {
                session_id: row.get(0)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                last_seen_at: DateTime::parse_from_rfc3339(&last_seen_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                cwd: row.get(3)?,
                transcript_path: row.get(4)?,
            })
        })?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Transactional delete of a session's events then the session itself.
    pub fn delete_session(&self, session_id: &str) -> Result<(), TraceStoreError> {
        let mut conn = self.conn.write().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM events WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
        tx.commit()?;
        Ok(())
    }
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<TracedEvent> {
    let tool_input_text: String = row.get(5)?;
    let tool_response_text: String = row.get(6)?;
    let timestamp: String = row.get(7)?;
    Ok(TracedEvent {
        id: Some(row.get(0)?),
        session_id: row.get(1)?,
        tool_use_id: row.get(2)?,
        event_type: row.get(3)?,
        tool_name: row.get(4)?,
        tool_input: serde_json::from_str(&tool_input_text).unwrap_or(Value::Null),
        tool_response: serde_json::from_str(&tool_response_text).unwrap_or(Value::Null),
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        decision: row.get(8)?,
        rule_matched: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn store() -> (TraceStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let store = TraceStore::open(&path, Duration::from_secs(3600), 1000, 0.0).unwrap();
        (store, dir)
    }

    #[test]
    fn get_or_create_session_creates_then_updates() {
        let (store, _dir) = store();
        let s1 = store.get_or_create_session("sess1", "/tmp", "/tmp/t.jsonl").unwrap();
        let s2 = store.get_or_create_session("sess1", "/tmp", "/tmp/t.jsonl").unwrap();
        assert_eq!(s1.created_at, s2.created_at);
        assert!(s2.last_seen_at >= s1.last_seen_at);
    }

    #[test]
    fn stored_event_is_retrievable_within_window() {
        let (store, _dir) = store();
        store.get_or_create_session("sess1", "/tmp", "").unwrap();
        let mut event = TracedEvent {
            id: None,
            session_id: "sess1".to_string(),
            tool_use_id: Some("t1".to_string()),
            event_type: "PreToolUse".to_string(),
            tool_name: Some("Read".to_string()),
            tool_input: json!({"file_path": "/etc/passwd"}),
            tool_response: json!({}),
            timestamp: Utc::now(),
            decision: Some("allow".to_string()),
            rule_matched: None,
        };
        store.store_event(&mut event).unwrap();
        assert!(event.id.is_some());

        let since = Utc::now() - chrono::Duration::minutes(5);
        let events = store.get_session_events_since("sess1", since).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tool_use_id.as_deref(), Some("t1"));

        let by_tool_use = store.get_event_by_tool_use_id("sess1", "t1").unwrap().unwrap();
        assert_eq!(by_tool_use.tool_name.as_deref(), Some("Read"));
    }

    #[test]
    fn cleanup_excess_events_trims_oldest_first() {
        let (store, _dir) = store();
        store.get_or_create_session("sess1", "/tmp", "").unwrap();
        for i in 0..5 {
            let mut event = TracedEvent {
                id: None,
                session_id: "sess1".to_string(),
                tool_use_id: None,
                event_type: "PreToolUse".to_string(),
                tool_name: Some(format!("Tool{i}")),
                tool_input: json!({}),
                tool_response: json!({}),
                timestamp: Utc::now() + chrono::Duration::seconds(i),
                decision: None,
                rule_matched: None,
            };
            store.store_event(&mut event).unwrap();
        }
        let deleted = store.cleanup_excess_events("sess1", 2).unwrap();
        assert_eq!(deleted, 3);
        let remaining = store.get_recent_events("sess1", 10).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].tool_name.as_deref(), Some("Tool3"));
        assert_eq!(remaining[1].tool_name.as_deref(), Some("Tool4"));
    }

    #[test]
    fn delete_session_removes_events_atomically() {
        let (store, _dir) = store();
        store.get_or_create_session("sess1", "/tmp", "").unwrap();
        let mut event = TracedEvent {
            id: None,
            session_id: "sess1".to_string(),
            tool_use_id: None,
            event_type: "PreToolUse".to_string(),
            tool_name: None,
            tool_input: json!({}),
            tool_response: json!({}),
            timestamp: Utc::now(),
            decision: None,
            rule_matched: None,
        };
        store.store_event(&mut event).unwrap();
        store.delete_session("sess1").unwrap();
        let since = Utc::now() - chrono::Duration::minutes(5);
        assert!(store.get_session_events_since("sess1", since).unwrap().is_empty());
        assert!(store.list_sessions().unwrap().is_empty());
    }
}
