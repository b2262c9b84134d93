//! Persistent store for monitors, notification channels and probe history.
//!
//! Two implementations share the [`Store`] trait: a JSON file store with
//! atomic writes and an embedded SQLite store. The engine only ever reads
//! snapshots and appends history; all mutation goes through the API layer.

mod json;
mod models;
mod sqlite;

pub use json::JsonStore;
pub use models::*;
pub use sqlite::SqliteStore;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Capacity of a monitor's history ring.
pub const HISTORY_CAP: usize = 50;

pub trait Store: Send + Sync {
    /// A consistent copy of all monitors and notifications.
    fn get_state(&self) -> State;

    fn upsert_monitor(&self, m: Monitor) -> Result<Monitor, StoreError>;
    fn delete_monitor(&self, id: &str) -> Result<(), StoreError>;

    fn get_notifications(&self) -> Vec<Notification>;
    fn upsert_notification(&self, n: Notification) -> Result<Notification, StoreError>;
    fn delete_notification(&self, id: &str) -> Result<(), StoreError>;

    /// Append a probe result for a monitor, newest first.
    fn add_history(&self, id: &str, entry: MonitorHistoryEntry) -> Result<(), StoreError>;
    /// The most recent entries for a monitor, newest first, at most
    /// [`HISTORY_CAP`]. Never null: unknown monitors yield an empty list.
    fn get_history(&self, id: &str) -> Result<Vec<MonitorHistoryEntry>, StoreError>;
    /// Drop history entries older than `days` days.
    fn prune_history(&self, id: &str, days: i64) -> Result<(), StoreError>;
}

/// Open the store matching the data file's extension.
pub fn open(path: &str) -> Result<Arc<dyn Store>, StoreError> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "db" | "sqlite" | "sqlite3" => Ok(Arc::new(SqliteStore::open(path)?)),
        _ => Ok(Arc::new(JsonStore::open(path)?)),
    }
}

/// Prepend an entry and keep the ring bounded.
pub(crate) fn push_capped(history: &mut Vec<MonitorHistoryEntry>, entry: MonitorHistoryEntry) {
    history.insert(0, entry);
    history.truncate(HISTORY_CAP);
}
