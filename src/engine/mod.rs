//! The capture engine
//!
//! [`Engine`] owns every piece of mutable state: the change detector, the
//! history store and the clipboard. One call to [`Engine::tick`] runs a whole
//! capture cycle (detect, extract, filter, classify, dedup, insert) to
//! completion. Callers on other tasks talk to a running engine through the
//! [`EngineHandle`] returned by [`actor::spawn`].

pub mod actor;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clipboard::{ClipboardSource, ContentPayload, SourceApp};
use crate::config::{Config, ConfigWatch};
use crate::history::{DeduplicationFilter, HistoryEntry, HistoryFilter, HistoryStore};
use crate::monitor::{CaptureFilter, ChangeDetector, Decision};
use crate::persistence::PersistenceError;
use crate::writeback::{WriteBackComposer, WriteBackError};

pub use actor::{spawn, EngineCommand, EngineHandle};

const EVENT_CAPACITY: usize = 64;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine task has exited
    #[error("Engine is not running")]
    Stopped,

    /// Writing to the clipboard failed
    #[error("Write-back failed: {0}")]
    WriteBack(#[from] WriteBackError),

    /// A durability request failed
    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    /// An ignore pattern does not compile
    #[error("Invalid capture filter: {0}")]
    Filter(#[from] regex::Error),
}

/// History changes, broadcast to observers such as a UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    Inserted(Uuid),
    Updated(Uuid),
    Removed(Vec<Uuid>),
    Cleared,
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Clipboard unchanged
    Idle,
    /// Change caused by our own write
    SelfWrite,
    /// Change made in an excluded application
    Excluded(SourceApp),
    /// Change inside the monitoring interval
    Debounced,
    /// Nothing recognizable on the clipboard
    Empty,
    /// Payload rejected by the capture filters
    Filtered,
    /// Payload duplicates this recent entry
    Duplicate(Uuid),
    /// New entry inserted at the head of history
    Captured(Uuid),
}

pub struct Engine {
    clipboard: Box<dyn ClipboardSource>,
    config: ConfigWatch,
    detector: ChangeDetector,
    store: HistoryStore,
    dedup: DeduplicationFilter,
    filter: CaptureFilter,
    composer: WriteBackComposer,
    events: broadcast::Sender<HistoryEvent>,
}

impl Engine {
    /// Build an engine on the platform's clipboard
    pub fn with_system_clipboard(store: HistoryStore, config: ConfigWatch) -> crate::Result<Self> {
        let clipboard = crate::clipboard::create_source()?;
        Ok(Self::new(clipboard, store, config)?)
    }

    /// Build an engine around `store`.
    ///
    /// The clipboard's current change counter is recorded, so content already
    /// on the clipboard is not captured.
    pub fn new(
        mut clipboard: Box<dyn ClipboardSource>,
        store: HistoryStore,
        config: ConfigWatch,
    ) -> Result<Self, EngineError> {
        let current = config.borrow().clone();
        let filter = CaptureFilter::from_config(&current.capture)?;
        let detector = ChangeDetector::seeded(clipboard.change_counter());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            "Engine ready: {} clipboard, {} entries loaded",
            clipboard.name(),
            store.len()
        );

        let mut engine = Self {
            clipboard,
            config,
            detector,
            store,
            dedup: DeduplicationFilter::new(current.history.dedup_window),
            filter,
            composer: WriteBackComposer::new(current.write_back.text_separator.as_str()),
            events,
        };
        engine.apply_config(&current);
        Ok(engine)
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Receive history events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<HistoryEvent> {
        self.events.clone()
    }

    /// Timer period currently configured
    pub fn poll_interval(&self) -> Duration {
        self.config.borrow().monitor.poll_interval()
    }

    /// Snapshot of the live configuration, applied to the engine's components
    fn refresh_config(&mut self) -> Config {
        let config = self.config.borrow_and_update().clone();
        self.apply_config(&config);
        config
    }

    fn apply_config(&mut self, config: &Config) {
        let evicted = self.store.set_max_size(config.history.max_size);
        self.notify_removed(evicted);

        if self.dedup.window() != config.history.dedup_window {
            self.dedup = DeduplicationFilter::new(config.history.dedup_window);
        }
        self.composer.set_separator(&config.write_back.text_separator);

        if !self.filter.is_current(&config.capture) {
            match CaptureFilter::from_config(&config.capture) {
                Ok(filter) => self.filter = filter,
                Err(e) => warn!("Keeping previous capture filters: {}", e),
            }
        }
    }

    fn notify(&self, event: HistoryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn notify_removed(&self, ids: Vec<Uuid>) {
        if !ids.is_empty() {
            self.notify(HistoryEvent::Removed(ids));
        }
    }

    /// Run one capture cycle now
    pub fn tick(&mut self) -> TickOutcome {
        self.tick_at(Utc::now())
    }

    /// Run one capture cycle as if the wall clock read `now`
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let config = self.refresh_config();
        let counter = self.clipboard.change_counter();

        let clipboard = &self.clipboard;
        let decision = self.detector.evaluate(
            counter,
            || clipboard.frontmost_application(),
            &config.monitor,
            now,
        );

        match decision {
            Decision::Unchanged => TickOutcome::Idle,
            Decision::SelfWrite => TickOutcome::SelfWrite,
            Decision::Excluded(app) => TickOutcome::Excluded(app),
            Decision::Debounced => TickOutcome::Debounced,
            Decision::Accepted { source_app } => self.capture(source_app, now),
        }
    }

    fn capture(&mut self, source_app: Option<SourceApp>, now: DateTime<Utc>) -> TickOutcome {
        let Some(payload) = self.clipboard.read_payload() else {
            debug!("Clipboard changed but holds nothing recognizable");
            return TickOutcome::Empty;
        };
        self.detector.mark_accepted(now);

        if let Err(rejection) = self.filter.check(&payload) {
            debug!("Not capturing {} content: {:?}", payload.kind(), rejection);
            return TickOutcome::Filtered;
        }

        let entry = HistoryEntry::capture(payload, source_app, now);
        if let Some(existing) =
            self.dedup
                .find_duplicate(entry.id(), &entry.payload, self.store.entries())
        {
            debug!("Clipboard content duplicates entry {}", existing.short_id());
            return TickOutcome::Duplicate(existing.id());
        }

        let id = entry.id();
        debug!("Captured {} entry {}", entry.category(), entry.short_id());
        let evicted = self.store.insert(entry);
        self.notify(HistoryEvent::Inserted(id));
        self.notify_removed(evicted);
        TickOutcome::Captured(id)
    }

    /// Put one entry back on the clipboard. Returns what was written.
    pub fn write_single(&mut self, id: Uuid) -> Result<ContentPayload, WriteBackError> {
        self.write_single_at(id, Utc::now())
    }

    pub fn write_single_at(
        &mut self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ContentPayload, WriteBackError> {
        let payload = self
            .store
            .get(id)
            .map(|entry| entry.payload.clone())
            .ok_or(WriteBackError::NotFound(id))?;

        self.composer.write(
            &payload,
            self.clipboard.as_mut(),
            self.detector.guard_mut(),
            now,
        )
    }

    /// Merge entries, write the result and record it as a new entry.
    ///
    /// The recorded entry reflects what the clipboard accepted, which may be
    /// less than the merge if a fallback was needed. It skips duplicate
    /// suppression. Returns the new entry's id.
    pub fn write_multiple(&mut self, ids: &[Uuid]) -> Result<Uuid, WriteBackError> {
        self.write_multiple_at(ids, Utc::now())
    }

    pub fn write_multiple_at(
        &mut self,
        ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Uuid, WriteBackError> {
        self.refresh_config();

        let entries = ids
            .iter()
            .map(|id| self.store.get(*id).ok_or(WriteBackError::NotFound(*id)))
            .collect::<Result<Vec<_>, _>>()?;
        let merged = self
            .composer
            .merge(entries.iter().copied())
            .ok_or(WriteBackError::Empty)?;

        let written = self.composer.write(
            &merged,
            self.clipboard.as_mut(),
            self.detector.guard_mut(),
            now,
        )?;

        let entry = HistoryEntry::capture(written, None, now);
        let id = entry.id();
        info!(
            "Wrote {} entries to the clipboard as {} ({})",
            ids.len(),
            entry.payload.kind(),
            entry.short_id()
        );
        let evicted = self.store.insert(entry);
        self.notify(HistoryEvent::Inserted(id));
        self.notify_removed(evicted);
        Ok(id)
    }

    /// Write the current selection; one selected entry is written as-is
    pub fn write_selected(&mut self) -> Result<Option<Uuid>, WriteBackError> {
        match self.store.selected_ids().as_slice() {
            [] => Err(WriteBackError::Empty),
            [only] => self.write_single(*only).map(|_| None),
            ids => {
                let ids = ids.to_vec();
                let id = self.write_multiple(&ids)?;
                self.store.clear_selection();
                Ok(Some(id))
            }
        }
    }

    pub fn entries(&self, filter: Option<&HistoryFilter>) -> Vec<&HistoryEntry> {
        match filter {
            Some(filter) => self.store.filter(filter),
            None => self.store.entries().iter().collect(),
        }
    }

    pub fn search(&self, query: &str) -> Vec<&HistoryEntry> {
        self.store.search(query)
    }

    pub fn set_pinned(&mut self, id: Uuid, pinned: bool) -> bool {
        let before: Vec<Uuid> = self.store.entries().iter().map(HistoryEntry::id).collect();
        if !self.store.set_pinned(id, pinned) {
            return false;
        }
        self.notify(HistoryEvent::Updated(id));

        // Unpinning can evict
        if self.store.len() < before.len() {
            let remaining: HashSet<Uuid> =
                self.store.entries().iter().map(HistoryEntry::id).collect();
            let evicted = before.into_iter().filter(|id| !remaining.contains(id)).collect();
            self.notify_removed(evicted);
        }
        true
    }

    pub fn set_title(&mut self, id: Uuid, title: &str) -> bool {
        let changed = self.store.set_title(id, title);
        if changed {
            self.notify(HistoryEvent::Updated(id));
        }
        changed
    }

    pub fn replace_content(
        &mut self,
        id: Uuid,
        payload: ContentPayload,
        title: Option<String>,
    ) -> bool {
        let changed = self.store.replace_content(id, payload, title);
        if changed {
            self.notify(HistoryEvent::Updated(id));
        }
        changed
    }

    pub fn delete(&mut self, ids: &[Uuid]) -> usize {
        let present: Vec<Uuid> = ids
            .iter()
            .copied()
            .filter(|id| self.store.get(*id).is_some())
            .collect();
        let removed = self.store.delete(&present);
        self.notify_removed(present);
        removed
    }

    pub fn clear_all(&mut self) {
        self.store.clear_all();
        self.notify(HistoryEvent::Cleared);
    }

    pub fn toggle_selection(&mut self, id: Uuid) -> bool {
        self.store.toggle_selection(id)
    }

    pub fn clear_selection(&mut self) {
        self.store.clear_selection();
    }
}
