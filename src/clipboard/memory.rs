//! In-memory clipboard used by tests and headless runs

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ClipboardSource, ContentPayload, PayloadKind, SourceApp};

#[derive(Debug, Default)]
struct State {
    counter: u64,
    content: Option<ContentPayload>,
    frontmost: Option<SourceApp>,
    rejected: HashSet<PayloadKind>,
    writes: Vec<ContentPayload>,
}

/// Scriptable clipboard. Clones share the same underlying state, so a test can
/// keep one handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    state: Arc<Mutex<State>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-write; the data is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate another application copying `payload`
    pub fn copy_external(&self, payload: ContentPayload) {
        let mut state = self.lock();
        state.counter += 1;
        state.content = Some(payload);
    }

    /// Simulate the clipboard being cleared
    pub fn clear_external(&self) {
        let mut state = self.lock();
        state.counter += 1;
        state.content = None;
    }

    pub fn set_frontmost(&self, app: Option<SourceApp>) {
        self.lock().frontmost = app;
    }

    /// Make writes of the given representation fail
    pub fn reject(&self, kind: PayloadKind) {
        self.lock().rejected.insert(kind);
    }

    pub fn accept_all(&self) {
        self.lock().rejected.clear();
    }

    /// Current clipboard content
    pub fn content(&self) -> Option<ContentPayload> {
        self.lock().content.clone()
    }

    /// Every payload successfully written through [`ClipboardSource::write_payload`]
    pub fn writes(&self) -> Vec<ContentPayload> {
        self.lock().writes.clone()
    }

    pub fn counter(&self) -> u64 {
        self.lock().counter
    }
}

impl ClipboardSource for MemoryClipboard {
    fn change_counter(&mut self) -> u64 {
        self.lock().counter
    }

    fn read_payload(&mut self) -> Option<ContentPayload> {
        self.lock().content.clone()
    }

    fn write_payload(&mut self, payload: &ContentPayload) -> bool {
        let mut state = self.lock();
        if state.rejected.contains(&payload.kind()) {
            return false;
        }
        state.counter += 1;
        state.content = Some(payload.clone());
        state.writes.push(payload.clone());
        true
    }

    fn frontmost_application(&self) -> Option<SourceApp> {
        self.lock().frontmost.clone()
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_copy_bumps_counter() {
        let mut clipboard = MemoryClipboard::new();
        let before = clipboard.change_counter();

        clipboard.copy_external(ContentPayload::text("hello"));

        assert_eq!(clipboard.change_counter(), before + 1);
        assert_eq!(clipboard.read_payload(), Some(ContentPayload::text("hello")));
    }

    #[test]
    fn test_rejected_kind_is_not_written() {
        let mut clipboard = MemoryClipboard::new();
        clipboard.reject(PayloadKind::Text);

        assert!(!clipboard.write_payload(&ContentPayload::text("nope")));
        assert_eq!(clipboard.counter(), 0);
        assert!(clipboard.writes().is_empty());

        clipboard.accept_all();
        assert!(clipboard.write_payload(&ContentPayload::text("yes")));
        assert_eq!(clipboard.writes(), vec![ContentPayload::text("yes")]);
    }

    #[test]
    fn test_clones_share_state() {
        let handle = MemoryClipboard::new();
        let mut owned = handle.clone();

        handle.copy_external(ContentPayload::text("shared"));
        assert_eq!(owned.read_payload(), Some(ContentPayload::text("shared")));
    }
}
