//! File-backed JSON store with atomic tmp-and-rename persistence.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Utc;

use super::{
    push_capped, Monitor, MonitorHistoryEntry, Notification, State, Store, StoreError,
};

pub struct JsonStore {
    file_path: PathBuf,
    inner: RwLock<Inner>,
}

struct Inner {
    state: State,
    // Probe history is kept in memory only; it is cheap to rebuild.
    history: HashMap<String, Vec<MonitorHistoryEntry>>,
}

impl JsonStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file_path = path.into();
        let (state, fresh) = match fs::read(&file_path) {
            Ok(bytes) => (serde_json::from_slice(&bytes)?, false),
            Err(err) if err.kind() == ErrorKind::NotFound => (State::default(), true),
            Err(err) => return Err(err.into()),
        };
        let store = Self {
            file_path,
            inner: RwLock::new(Inner {
                state,
                history: HashMap::new(),
            }),
        };
        if fresh {
            let inner = store.inner.read().unwrap();
            store.persist(&inner.state)?;
        }
        Ok(store)
    }

    fn persist(&self, state: &State) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.file_path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.file_path)?;
        Ok(())
    }
}

impl Store for JsonStore {
    fn get_state(&self) -> State {
        self.inner.read().unwrap().state.clone()
    }

    fn upsert_monitor(&self, mut m: Monitor) -> Result<Monitor, StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.write().unwrap();

        match inner.state.monitors.iter().position(|existing| existing.id == m.id) {
            Some(i) => {
                m.created_at = inner.state.monitors[i].created_at;
                m.updated_at = now;
                inner.state.monitors[i] = m.clone();
            }
            None => {
                m.created_at = now;
                m.updated_at = now;
                inner.state.monitors.push(m.clone());
            }
        }

        self.persist(&inner.state)?;
        Ok(m)
    }

    fn delete_monitor(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.state.monitors.retain(|m| m.id != id);
        self.persist(&inner.state)
    }

    fn get_notifications(&self) -> Vec<Notification> {
        self.inner.read().unwrap().state.notifications.clone()
    }

    fn upsert_notification(&self, mut n: Notification) -> Result<Notification, StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.write().unwrap();

        match inner
            .state
            .notifications
            .iter()
            .position(|existing| existing.id == n.id)
        {
            Some(i) => {
                n.created_at = inner.state.notifications[i].created_at;
                n.updated_at = now;
                inner.state.notifications[i] = n.clone();
            }
            None => {
                n.created_at = now;
                n.updated_at = now;
                inner.state.notifications.push(n.clone());
            }
        }

        self.persist(&inner.state)?;
        Ok(n)
    }

    fn delete_notification(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.state.notifications.retain(|n| n.id != id);
        self.persist(&inner.state)
    }

    fn add_history(&self, id: &str, entry: MonitorHistoryEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let history = inner.history.entry(id.to_string()).or_default();
        push_capped(history, entry);
        Ok(())
    }

    fn get_history(&self, id: &str) -> Result<Vec<MonitorHistoryEntry>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.history.get(id).cloned().unwrap_or_default())
    }

    fn prune_history(&self, id: &str, days: i64) -> Result<(), StoreError> {
        if days <= 0 {
            return Ok(());
        }
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut inner = self.inner.write().unwrap();
        if let Some(history) = inner.history.get_mut(id) {
            history.retain(|e| e.checked_at >= cutoff);
        }
        Ok(())
    }
}
