//! Best-effort mirroring of history mutations to durable storage
//!
//! The in-memory [`HistoryStore`](crate::history::HistoryStore) is
//! authoritative. Each mutation is queued on an unbounded channel as a
//! [`PersistOp`] and applied by a background worker, so a slow or failing
//! backend never stalls a clipboard tick. Failures are logged and counted; a
//! caller that needs durability asks for it with [`PersistenceMirror::flush`].

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::history::HistoryEntry;

pub use memory::MemoryStore;

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Entry could not be serialized
    #[error("Failed to encode entry: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Stored payload could not be deserialized
    #[error("Failed to decode entry: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// IO error (compression, directories)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored column holds a value that cannot be interpreted
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    /// Update of an entry the backend does not know
    #[error("Entry not found: {0}")]
    NotFound(Uuid),

    /// The background worker has exited
    #[error("Persistence worker is not running")]
    WorkerStopped,

    /// Mirror operations failed since the previous flush
    #[error("{failed} persistence operation(s) failed, last error: {last}")]
    MirrorFailed { failed: usize, last: String },
}

/// Storage contract the engine needs.
#[async_trait]
pub trait PersistenceBridge: Send + Sync {
    /// Store a new entry
    async fn save(&self, entry: &HistoryEntry) -> Result<(), PersistenceError>;

    /// Overwrite the stored copy of an existing entry
    async fn update(&self, entry: &HistoryEntry) -> Result<(), PersistenceError>;

    /// Remove one entry; removing an unknown id is not an error
    async fn delete(&self, id: Uuid) -> Result<(), PersistenceError>;

    /// Remove every entry
    async fn delete_all(&self) -> Result<(), PersistenceError>;

    /// Every stored entry, newest first
    async fn fetch_all(&self) -> Result<Vec<HistoryEntry>, PersistenceError>;

    /// Backend name, for logs
    fn name(&self) -> &str;
}

/// A queued mirror operation
#[derive(Debug)]
pub enum PersistOp {
    Save(HistoryEntry),
    Update(HistoryEntry),
    Delete(Uuid),
    DeleteAll,
    /// Barrier: answered once every earlier operation has been applied
    Flush(oneshot::Sender<Result<(), PersistenceError>>),
}

impl PersistOp {
    fn describe(&self) -> String {
        match self {
            PersistOp::Save(entry) => format!("save {}", entry.id()),
            PersistOp::Update(entry) => format!("update {}", entry.id()),
            PersistOp::Delete(id) => format!("delete {}", id),
            PersistOp::DeleteAll => "delete all".to_string(),
            PersistOp::Flush(_) => "flush".to_string(),
        }
    }
}

/// Sending half of the mirror queue, held by the history store.
///
/// A disabled mirror drops every operation, which is what tests and purely
/// in-memory sessions want.
#[derive(Debug, Clone, Default)]
pub struct PersistenceMirror {
    tx: Option<mpsc::UnboundedSender<PersistOp>>,
}

impl PersistenceMirror {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Mirror whose operations arrive on the returned receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PersistOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn save(&self, entry: &HistoryEntry) {
        self.send(PersistOp::Save(entry.clone()));
    }

    pub fn update(&self, entry: &HistoryEntry) {
        self.send(PersistOp::Update(entry.clone()));
    }

    pub fn delete(&self, id: Uuid) {
        self.send(PersistOp::Delete(id));
    }

    pub fn delete_all(&self) {
        self.send(PersistOp::DeleteAll);
    }

    fn send(&self, op: PersistOp) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.send(op) {
                warn!("Persistence worker gone, dropping {}", e.0.describe());
            }
        }
    }

    /// Queue a flush barrier whose result is delivered on `reply`
    pub fn request_flush(&self, reply: oneshot::Sender<Result<(), PersistenceError>>) {
        match &self.tx {
            Some(tx) => {
                if let Err(e) = tx.send(PersistOp::Flush(reply)) {
                    if let PersistOp::Flush(reply) = e.0 {
                        let _ = reply.send(Err(PersistenceError::WorkerStopped));
                    }
                }
            }
            None => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Wait until everything queued so far is applied.
    ///
    /// Returns an error if any operation failed since the previous flush.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (reply, rx) = oneshot::channel();
        self.request_flush(reply);
        rx.await.map_err(|_| PersistenceError::WorkerStopped)?
    }
}

/// Start the background worker applying mirror operations to `bridge`
pub fn spawn_worker(bridge: Arc<dyn PersistenceBridge>) -> (PersistenceMirror, JoinHandle<()>) {
    let (mirror, rx) = PersistenceMirror::channel();
    let handle = tokio::spawn(run_worker(bridge, rx));
    (mirror, handle)
}

/// Apply operations until every sender is dropped
pub async fn run_worker(
    bridge: Arc<dyn PersistenceBridge>,
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
) {
    info!("Persistence worker started ({})", bridge.name());

    let mut failed = 0usize;
    let mut last_error: Option<String> = None;

    while let Some(op) = rx.recv().await {
        let description = op.describe();
        let result = match op {
            PersistOp::Save(entry) => bridge.save(&entry).await,
            PersistOp::Update(entry) => bridge.update(&entry).await,
            PersistOp::Delete(id) => bridge.delete(id).await,
            PersistOp::DeleteAll => bridge.delete_all().await,
            PersistOp::Flush(reply) => {
                let outcome = match last_error.take() {
                    Some(last) => Err(PersistenceError::MirrorFailed { failed, last }),
                    None => Ok(()),
                };
                failed = 0;
                let _ = reply.send(outcome);
                continue;
            }
        };

        match result {
            Ok(()) => debug!("Persisted {}", description),
            Err(e) => {
                error!("Failed to persist {}: {}", description, e);
                failed += 1;
                last_error = Some(e.to_string());
            }
        }
    }

    info!("Persistence worker stopped");
}

/// Load the stored history, falling back to an empty one on failure
pub async fn fetch_or_empty(bridge: &dyn PersistenceBridge) -> Vec<HistoryEntry> {
    match bridge.fetch_all().await {
        Ok(entries) => {
            info!("Loaded {} history entries from {}", entries.len(), bridge.name());
            entries
        }
        Err(e) => {
            error!("Failed to load history from {}, starting empty: {}", bridge.name(), e);
            Vec::new()
        }
    }
}
