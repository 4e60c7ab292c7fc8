//! SQLite-backed queue store

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use super::EventStore;
use crate::error::Result;
use crate::types::{EventKind, QueuedEvent, TrackedEvent};

/// Durable, capacity-bounded event store over a single SQLite connection.
///
/// The connection mutex is the single point of mutual exclusion for all
/// queue mutations; the capacity check and the insert happen under one
/// guard.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
    max_queued_events: u64,
}

impl SqliteEventStore {
    /// Open or create a queue database at the given path
    pub fn open(path: &Path, max_queued_events: u64) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode keeps commits crash-safe without blocking readers
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            max_queued_events,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory queue (for testing)
    pub fn open_in_memory(max_queued_events: u64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let store = Self {
            conn: Mutex::new(conn),
            max_queued_events,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Read a durable state value
    pub fn state_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM tracker_state WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write a durable state value
    pub fn state_put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO tracker_state (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl EventStore for SqliteEventStore {
    fn enqueue(&self, event: &TrackedEvent) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let count: u64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        if count >= self.max_queued_events {
            return Ok(false);
        }

        conn.execute(
            r#"
            INSERT INTO events (created_at, visitor_id, session_id, new_visit, kind, params)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.created_at.to_rfc3339(),
                event.visitor_id,
                event.session_id,
                event.new_visit,
                event.kind.as_str(),
                serde_json::to_string(&event.params)?,
            ],
        )?;
        Ok(true)
    }

    fn peek_batch(&self, limit: usize) -> Result<Vec<QueuedEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT seq, created_at, visitor_id, session_id, new_visit, kind, params
            FROM events ORDER BY seq ASC LIMIT ?1
            "#,
        )?;

        let rows: Vec<(i64, String, String, String, bool, String, String)> = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut batch = Vec::with_capacity(rows.len());
        for (seq, created_at, visitor_id, session_id, new_visit, kind, params) in rows {
            batch.push(QueuedEvent {
                seq,
                event: TrackedEvent {
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    visitor_id,
                    session_id,
                    new_visit,
                    kind: EventKind::from_str(&kind)
                        .map_err(crate::error::Error::Config)?,
                    params: serde_json::from_str(&params)?,
                },
            });
        }
        Ok(batch)
    }

    fn remove_batch(&self, seqs: &[i64]) -> Result<usize> {
        if seqs.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; seqs.len()].join(",");
        let sql = format!("DELETE FROM events WHERE seq IN ({})", placeholders);
        let removed = conn.execute(&sql, rusqlite::params_from_iter(seqs.iter()))?;
        Ok(removed)
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM events", [])?;
        Ok(removed)
    }

    fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(count)
    }
}
