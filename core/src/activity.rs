use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub tool_id: String,
    pub title: String,
    pub ts: DateTime<Utc>,
    pub payload: Value,
    pub result: Value,
    pub ok: bool,
}

/// Bounded, newest-first log. Cloning shares the same underlying log.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    capacity: usize,
    entries: Arc<RwLock<VecDeque<ActivityEntry>>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    pub fn push(&self, tool_id: &str, title: &str, payload: Value, result: Value, ok: bool) {
        let entry = ActivityEntry {
            id: Uuid::new_v4(),
            tool_id: tool_id.to_string(),
            title: title.to_string(),
            ts: Utc::now(),
            payload,
            result,
            ok,
        };
        // A poisoned lock only means a writer panicked mid-push; the deque is still usable.
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    pub fn list(&self) -> Vec<ActivityEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(200)
    }
}
