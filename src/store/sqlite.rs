//! Embedded SQLite store. Monitors and notifications are persisted as JSON
//! documents in keyed rows; history lives in its own indexed table.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    Monitor, MonitorHistoryEntry, MonitorStatus, Notification, State, Store, StoreError,
    HISTORY_CAP,
};

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS monitors (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS monitor_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                monitor_id TEXT NOT NULL,
                status TEXT NOT NULL,
                checked_at TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_history_monitor_id_checked_at
                ON monitor_history(monitor_id, checked_at DESC);",
        )?;
        Ok(())
    }

    fn load_documents<T: serde::de::DeserializeOwned>(conn: &Connection, table: &str) -> Vec<T> {
        let query = format!("SELECT data FROM {table}");
        let mut stmt = match conn.prepare(&query) {
            Ok(stmt) => stmt,
            Err(err) => {
                tracing::warn!(table, error = %err, "store read failed");
                return Vec::new();
            }
        };
        let rows = stmt.query_map([], |row| row.get::<_, String>(0));
        let mut out = Vec::new();
        if let Ok(rows) = rows {
            for data in rows.flatten() {
                match serde_json::from_str(&data) {
                    Ok(v) => out.push(v),
                    Err(err) => tracing::warn!(table, error = %err, "skipping malformed record"),
                }
            }
        }
        out
    }
}

impl Store for SqliteStore {
    fn get_state(&self) -> State {
        let conn = self.conn.lock().unwrap();
        State {
            monitors: Self::load_documents(&conn, "monitors"),
            notifications: Self::load_documents(&conn, "notifications"),
        }
    }

    fn upsert_monitor(&self, mut m: Monitor) -> Result<Monitor, StoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();

        let existing_created: Option<String> = conn
            .query_row(
                "SELECT created_at FROM monitors WHERE id = ?1",
                params![m.id],
                |row| row.get(0),
            )
            .optional()?;
        m.created_at = existing_created
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);
        m.updated_at = now;

        let data = serde_json::to_string(&m)?;
        conn.execute(
            "INSERT INTO monitors (id, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET data=excluded.data, updated_at=excluded.updated_at",
            params![m.id, data, m.created_at.to_rfc3339(), m.updated_at.to_rfc3339()],
        )?;
        Ok(m)
    }

    fn delete_monitor(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM monitors WHERE id = ?1", params![id])?;
        conn.execute(
            "DELETE FROM monitor_history WHERE monitor_id = ?1",
            params![id],
        )?;
        Ok(())
    }

    fn get_notifications(&self) -> Vec<Notification> {
        let conn = self.conn.lock().unwrap();
        Self::load_documents(&conn, "notifications")
    }

    fn upsert_notification(&self, mut n: Notification) -> Result<Notification, StoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();

        let existing_created: Option<String> = conn
            .query_row(
                "SELECT created_at FROM notifications WHERE id = ?1",
                params![n.id],
                |row| row.get(0),
            )
            .optional()?;
        n.created_at = existing_created
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);
        n.updated_at = now;

        let data = serde_json::to_string(&n)?;
        conn.execute(
            "INSERT INTO notifications (id, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET data=excluded.data, updated_at=excluded.updated_at",
            params![n.id, data, n.created_at.to_rfc3339(), n.updated_at.to_rfc3339()],
        )?;
        Ok(n)
    }

    fn delete_notification(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM notifications WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn add_history(&self, id: &str, entry: MonitorHistoryEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO monitor_history (monitor_id, status, checked_at, latency_ms, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                entry.status.to_string(),
                entry.checked_at.to_rfc3339(),
                entry.latency_ms,
                entry.message,
            ],
        )?;
        Ok(())
    }

    fn get_history(&self, id: &str) -> Result<Vec<MonitorHistoryEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT status, checked_at, latency_ms, message FROM monitor_history
             WHERE monitor_id = ?1 ORDER BY checked_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![id, HISTORY_CAP as i64], |row| {
            let status: String = row.get(0)?;
            let checked_at: String = row.get(1)?;
            let latency_ms: i64 = row.get(2)?;
            let message: Option<String> = row.get(3)?;
            Ok((status, checked_at, latency_ms, message))
        })?;

        let mut history = Vec::new();
        for row in rows.flatten() {
            let (status, checked_at, latency_ms, message) = row;
            let Ok(checked_at) = DateTime::parse_from_rfc3339(&checked_at) else {
                continue;
            };
            history.push(MonitorHistoryEntry {
                status: MonitorStatus::parse(&status),
                checked_at: checked_at.with_timezone(&Utc),
                latency_ms,
                message: message.unwrap_or_default(),
            });
        }
        Ok(history)
    }

    fn prune_history(&self, id: &str, days: i64) -> Result<(), StoreError> {
        if days <= 0 {
            return Ok(());
        }
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM monitor_history WHERE monitor_id = ?1 AND checked_at < ?2",
            params![id, cutoff.to_rfc3339()],
        )?;
        Ok(())
    }
}
