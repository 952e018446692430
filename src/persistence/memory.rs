//! In-memory persistence backend

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PersistenceBridge, PersistenceError};
use crate::history::HistoryEntry;

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<HistoryEntry>,
    failing: bool,
}

/// Keeps entries in a vector. Used for `--ephemeral` runs and tests; it can be
/// switched into a failing mode to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back
    pub async fn set_failing(&self, failing: bool) {
        self.inner.lock().await.failing = failing;
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn check(inner: &Inner) -> Result<(), PersistenceError> {
    if inner.failing {
        Err(PersistenceError::Io(std::io::Error::other(
            "memory store is failing",
        )))
    } else {
        Ok(())
    }
}

#[async_trait]
impl PersistenceBridge for MemoryStore {
    async fn save(&self, entry: &HistoryEntry) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().await;
        check(&inner)?;
        inner.entries.retain(|e| e.id() != entry.id());
        inner.entries.push(entry.clone());
        Ok(())
    }

    async fn update(&self, entry: &HistoryEntry) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().await;
        check(&inner)?;
        let stored = inner
            .entries
            .iter_mut()
            .find(|e| e.id() == entry.id())
            .ok_or(PersistenceError::NotFound(entry.id()))?;
        *stored = entry.clone();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().await;
        check(&inner)?;
        inner.entries.retain(|e| e.id() != id);
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().await;
        check(&inner)?;
        inner.entries.clear();
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let inner = self.inner.lock().await;
        check(&inner)?;
        // Saved oldest-first; the stable sort keeps later saves ahead on ties.
        let mut entries: Vec<HistoryEntry> = inner.entries.iter().rev().cloned().collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
