//! Single-owner task driving an [`Engine`]
//!
//! The engine is not `Send` (clipboard backends hold platform handles), so it
//! runs on a `LocalSet` via [`tokio::task::spawn_local`]. The same task owns the
//! poll timer, so ticks and commands never overlap. Other tasks reach it
//! through a cloneable [`EngineHandle`].

use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Engine, EngineError, HistoryEvent, TickOutcome};
use crate::clipboard::ContentPayload;
use crate::history::{HistoryEntry, HistoryFilter};
use crate::persistence::PersistenceError;
use crate::writeback::WriteBackError;

const COMMAND_BUFFER: usize = 32;

type Reply<T> = oneshot::Sender<T>;

/// Requests served by the engine task
#[derive(Debug)]
pub enum EngineCommand {
    Entries {
        filter: Option<HistoryFilter>,
        limit: Option<usize>,
        reply: Reply<Vec<HistoryEntry>>,
    },
    Search {
        query: String,
        limit: Option<usize>,
        reply: Reply<Vec<HistoryEntry>>,
    },
    Get {
        id: Uuid,
        reply: Reply<Option<HistoryEntry>>,
    },
    Resolve {
        prefix: String,
        reply: Reply<Vec<Uuid>>,
    },
    SetPinned {
        id: Uuid,
        pinned: bool,
        reply: Reply<bool>,
    },
    SetTitle {
        id: Uuid,
        title: String,
        reply: Reply<bool>,
    },
    ReplaceContent {
        id: Uuid,
        payload: ContentPayload,
        title: Option<String>,
        reply: Reply<bool>,
    },
    Delete {
        ids: Vec<Uuid>,
        reply: Reply<usize>,
    },
    ClearAll {
        reply: Reply<()>,
    },
    ToggleSelection {
        id: Uuid,
        reply: Reply<bool>,
    },
    ClearSelection,
    Selection {
        reply: Reply<Vec<Uuid>>,
    },
    WriteSingle {
        id: Uuid,
        reply: Reply<Result<ContentPayload, WriteBackError>>,
    },
    WriteMultiple {
        ids: Vec<Uuid>,
        reply: Reply<Result<Uuid, WriteBackError>>,
    },
    WriteSelected {
        reply: Reply<Result<Option<Uuid>, WriteBackError>>,
    },
    /// Run a capture cycle immediately
    Tick {
        reply: Reply<TickOutcome>,
    },
    /// Wait for queued persistence work
    Flush {
        reply: Reply<Result<(), PersistenceError>>,
    },
    Shutdown,
}

/// Cloneable handle to a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<HistoryEvent>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Receive history events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn entries(
        &self,
        filter: Option<HistoryFilter>,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>, EngineError> {
        self.request(|reply| EngineCommand::Entries {
            filter,
            limit,
            reply,
        })
        .await
    }

    pub async fn search(
        &self,
        query: impl Into<String>,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>, EngineError> {
        let query = query.into();
        self.request(|reply| EngineCommand::Search {
            query,
            limit,
            reply,
        })
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<HistoryEntry>, EngineError> {
        self.request(|reply| EngineCommand::Get { id, reply }).await
    }

    /// Ids whose hex form starts with `prefix`
    pub async fn resolve(&self, prefix: impl Into<String>) -> Result<Vec<Uuid>, EngineError> {
        let prefix = prefix.into();
        self.request(|reply| EngineCommand::Resolve { prefix, reply })
            .await
    }

    pub async fn set_pinned(&self, id: Uuid, pinned: bool) -> Result<bool, EngineError> {
        self.request(|reply| EngineCommand::SetPinned { id, pinned, reply })
            .await
    }

    pub async fn set_title(&self, id: Uuid, title: impl Into<String>) -> Result<bool, EngineError> {
        let title = title.into();
        self.request(|reply| EngineCommand::SetTitle { id, title, reply })
            .await
    }

    pub async fn replace_content(
        &self,
        id: Uuid,
        payload: ContentPayload,
        title: Option<String>,
    ) -> Result<bool, EngineError> {
        self.request(|reply| EngineCommand::ReplaceContent {
            id,
            payload,
            title,
            reply,
        })
        .await
    }

    pub async fn delete(&self, ids: Vec<Uuid>) -> Result<usize, EngineError> {
        self.request(|reply| EngineCommand::Delete { ids, reply })
            .await
    }

    pub async fn clear_all(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::ClearAll { reply }).await
    }

    pub async fn toggle_selection(&self, id: Uuid) -> Result<bool, EngineError> {
        self.request(|reply| EngineCommand::ToggleSelection { id, reply })
            .await
    }

    pub async fn clear_selection(&self) -> Result<(), EngineError> {
        self.tx
            .send(EngineCommand::ClearSelection)
            .await
            .map_err(|_| EngineError::Stopped)
    }

    pub async fn selection(&self) -> Result<Vec<Uuid>, EngineError> {
        self.request(|reply| EngineCommand::Selection { reply }).await
    }

    pub async fn write_single(&self, id: Uuid) -> Result<ContentPayload, EngineError> {
        Ok(self
            .request(|reply| EngineCommand::WriteSingle { id, reply })
            .await??)
    }

    pub async fn write_multiple(&self, ids: Vec<Uuid>) -> Result<Uuid, EngineError> {
        Ok(self
            .request(|reply| EngineCommand::WriteMultiple { ids, reply })
            .await??)
    }

    pub async fn write_selected(&self) -> Result<Option<Uuid>, EngineError> {
        Ok(self
            .request(|reply| EngineCommand::WriteSelected { reply })
            .await??)
    }

    pub async fn tick(&self) -> Result<TickOutcome, EngineError> {
        self.request(|reply| EngineCommand::Tick { reply }).await
    }

    /// Wait until every history change made so far is persisted
    pub async fn flush(&self) -> Result<(), EngineError> {
        Ok(self.request(|reply| EngineCommand::Flush { reply }).await??)
    }

    /// Ask the engine task to stop; it returns the engine from its join handle
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.tx
            .send(EngineCommand::Shutdown)
            .await
            .map_err(|_| EngineError::Stopped)
    }
}

/// Start the engine task on the current `LocalSet`.
///
/// The task ends on [`EngineHandle::shutdown`] or once every handle is
/// dropped, and yields the engine back so the caller can flush it.
pub fn spawn(engine: Engine) -> (EngineHandle, JoinHandle<Engine>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let handle = EngineHandle {
        tx,
        events: engine.event_sender(),
    };
    let task = tokio::task::spawn_local(run(engine, rx));
    (handle, task)
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run(mut engine: Engine, mut rx: mpsc::Receiver<EngineCommand>) -> Engine {
    let mut period = engine.poll_interval();
    let mut timer = ticker(period);
    info!("Engine started, polling every {:?}", period);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                if let TickOutcome::Captured(id) = engine.tick() {
                    debug!("Captured entry {}", id);
                }

                let configured = engine.poll_interval();
                if configured != period {
                    info!("Poll interval changed to {:?}", configured);
                    period = configured;
                    timer = ticker(period);
                }
            }
            command = rx.recv() => match command {
                Some(EngineCommand::Shutdown) | None => break,
                Some(command) => handle(&mut engine, command),
            },
        }
    }

    info!("Engine stopped");
    engine
}

fn limited(entries: Vec<&HistoryEntry>, limit: Option<usize>) -> Vec<HistoryEntry> {
    entries
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

fn handle(engine: &mut Engine, command: EngineCommand) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        EngineCommand::Entries {
            filter,
            limit,
            reply,
        } => {
            let _ = reply.send(limited(engine.entries(filter.as_ref()), limit));
        }
        EngineCommand::Search {
            query,
            limit,
            reply,
        } => {
            let _ = reply.send(limited(engine.search(&query), limit));
        }
        EngineCommand::Get { id, reply } => {
            let _ = reply.send(engine.store().get(id).cloned());
        }
        EngineCommand::Resolve { prefix, reply } => {
            let _ = reply.send(engine.store().resolve_prefix(&prefix));
        }
        EngineCommand::SetPinned { id, pinned, reply } => {
            let _ = reply.send(engine.set_pinned(id, pinned));
        }
        EngineCommand::SetTitle { id, title, reply } => {
            let _ = reply.send(engine.set_title(id, &title));
        }
        EngineCommand::ReplaceContent {
            id,
            payload,
            title,
            reply,
        } => {
            let _ = reply.send(engine.replace_content(id, payload, title));
        }
        EngineCommand::Delete { ids, reply } => {
            let _ = reply.send(engine.delete(&ids));
        }
        EngineCommand::ClearAll { reply } => {
            engine.clear_all();
            let _ = reply.send(());
        }
        EngineCommand::ToggleSelection { id, reply } => {
            let _ = reply.send(engine.toggle_selection(id));
        }
        EngineCommand::ClearSelection => engine.clear_selection(),
        EngineCommand::Selection { reply } => {
            let _ = reply.send(engine.store().selected_ids());
        }
        EngineCommand::WriteSingle { id, reply } => {
            let _ = reply.send(engine.write_single(id));
        }
        EngineCommand::WriteMultiple { ids, reply } => {
            let _ = reply.send(engine.write_multiple(&ids));
        }
        EngineCommand::WriteSelected { reply } => {
            let _ = reply.send(engine.write_selected());
        }
        EngineCommand::Tick { reply } => {
            let _ = reply.send(engine.tick());
        }
        EngineCommand::Flush { reply } => engine.store().mirror().request_flush(reply),
        EngineCommand::Shutdown => {}
    }
}
