//! SQLite event store
//!
//! One append-only `events` table. Duplicates are stored as-is: the API
//! records whatever the monitor (or anyone else) posts.

use anyhow::Context;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS events (
        id     INTEGER PRIMARY KEY AUTOINCREMENT,
        time   TEXT NOT NULL,
        status TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS events_time_idx ON events (time);
";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub time: String,
    pub status: String,
}

pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA).context("failed to create events schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Append one event, returning its row id
    pub fn insert_event(&self, time: &str, status: &str) -> anyhow::Result<i64> {
        let conn = self.conn.lock();
        conn.execute("INSERT INTO events (time, status) VALUES (?1, ?2)", params![time, status])?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent events first
    pub fn recent_events(&self, limit: usize) -> anyhow::Result<Vec<StoredEvent>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, time, status FROM events ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(StoredEvent { id: row.get(0)?, time: row.get(1)?, status: row.get(2)? })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn count(&self) -> anyhow::Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}
