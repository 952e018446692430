//! Authoritative in-memory history with pinned-aware eviction
//!
//! Entries are kept most-recent-first in insertion order. When the store holds
//! more entries than the ceiling, the oldest unpinned entries are evicted;
//! pinned entries never are. Every mutation is mirrored through the
//! [`PersistenceMirror`] and never rolled back if the mirror fails.

use std::collections::HashSet;

use tracing::debug;
use uuid::Uuid;

use super::{HistoryEntry, HistoryFilter};
use crate::clipboard::ContentPayload;
use crate::persistence::PersistenceMirror;

/// Ordered clipboard history
#[derive(Debug)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
    max_size: usize,
    selection: HashSet<Uuid>,
    mirror: PersistenceMirror,
}

impl HistoryStore {
    /// Empty store with an eviction ceiling of `max_size` entries
    pub fn new(max_size: usize, mirror: PersistenceMirror) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
            selection: HashSet::new(),
            mirror,
        }
    }

    /// Store pre-populated from persistence (entries newest first).
    ///
    /// Loading is not mirrored back, but entries over the ceiling are evicted
    /// and those evictions are.
    pub fn with_entries(
        entries: Vec<HistoryEntry>,
        max_size: usize,
        mirror: PersistenceMirror,
    ) -> Self {
        let mut store = Self::new(max_size, mirror);
        store.entries = entries;
        store.enforce_ceiling();
        store
    }

    pub fn mirror(&self) -> &PersistenceMirror {
        &self.mirror
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Change the ceiling, evicting immediately if it shrank
    pub fn set_max_size(&mut self, max_size: usize) -> Vec<Uuid> {
        if max_size == self.max_size {
            return Vec::new();
        }
        debug!("History ceiling changed from {} to {}", self.max_size, max_size);
        self.max_size = max_size;
        self.enforce_ceiling()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, newest first
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn get(&self, id: Uuid) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    /// Ids of entries whose id starts with `prefix` (hex, case-insensitive)
    pub fn resolve_prefix(&self, prefix: &str) -> Vec<Uuid> {
        let prefix = prefix.trim().to_ascii_lowercase().replace('-', "");
        self.entries
            .iter()
            .map(HistoryEntry::id)
            .filter(|id| id.simple().to_string().starts_with(&prefix))
            .collect()
    }

    /// Prepend an entry and evict as needed. Returns the evicted ids.
    pub fn insert(&mut self, entry: HistoryEntry) -> Vec<Uuid> {
        self.mirror.save(&entry);
        self.entries.insert(0, entry);
        self.enforce_ceiling()
    }

    /// Evict the oldest unpinned entries until the ceiling holds.
    ///
    /// The head entry is never a candidate, so a fresh capture survives even
    /// when pinned entries alone fill the ceiling.
    fn enforce_ceiling(&mut self) -> Vec<Uuid> {
        let mut evicted = Vec::new();

        while self.entries.len() > self.max_size {
            let Some(index) = self
                .entries
                .get(1..)
                .and_then(|tail| tail.iter().rposition(|e| !e.is_pinned))
                .map(|i| i + 1)
            else {
                break;
            };
            let entry = self.entries.remove(index);
            debug!("Evicting history entry {}", entry.id());
            self.mirror.delete(entry.id());
            self.selection.remove(&entry.id());
            evicted.push(entry.id());
        }

        evicted
    }

    /// Remove entries by id. Returns how many were removed.
    pub fn delete(&mut self, ids: &[Uuid]) -> usize {
        let targets: HashSet<Uuid> = ids.iter().copied().collect();
        let before = self.entries.len();

        let mirror = &self.mirror;
        self.entries.retain(|entry| {
            if targets.contains(&entry.id()) {
                mirror.delete(entry.id());
                false
            } else {
                true
            }
        });
        self.selection.retain(|id| !targets.contains(id));

        before - self.entries.len()
    }

    /// Drop everything, pinned entries included
    pub fn clear_all(&mut self) {
        self.entries.clear();
        self.selection.clear();
        self.mirror.delete_all();
    }

    fn update_with(&mut self, id: Uuid, apply: impl FnOnce(&mut HistoryEntry)) -> bool {
        match self.entries.iter_mut().find(|e| e.id() == id) {
            Some(entry) => {
                apply(entry);
                self.mirror.update(entry);
                true
            }
            None => false,
        }
    }

    /// Pin or unpin. Unknown ids are ignored and return `false`.
    pub fn set_pinned(&mut self, id: Uuid, pinned: bool) -> bool {
        let changed = self.update_with(id, |entry| entry.is_pinned = pinned);
        // An unpinned entry becomes an eviction candidate again.
        if changed && !pinned {
            self.enforce_ceiling();
        }
        changed
    }

    /// Set or clear (empty string) the title
    pub fn set_title(&mut self, id: Uuid, title: &str) -> bool {
        let title = title.trim();
        let title = (!title.is_empty()).then(|| title.to_string());
        self.update_with(id, |entry| entry.title = title)
    }

    /// Replace an entry's content in place; the category is kept
    pub fn replace_content(
        &mut self,
        id: Uuid,
        payload: ContentPayload,
        title: Option<String>,
    ) -> bool {
        self.update_with(id, |entry| {
            entry.payload = payload;
            if let Some(title) = title {
                entry.title = Some(title).filter(|t| !t.trim().is_empty());
            }
        })
    }

    /// Case-insensitive substring search over text and file names.
    ///
    /// An empty query returns every entry.
    pub fn search(&self, query: &str) -> Vec<&HistoryEntry> {
        if query.is_empty() {
            return self.entries.iter().collect();
        }

        let needle = query.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry_matches(entry, &needle))
            .collect()
    }

    /// Entries matching `filter`, newest first
    pub fn filter(&self, filter: &HistoryFilter) -> Vec<&HistoryEntry> {
        self.entries.iter().filter(|e| filter.matches(e)).collect()
    }

    /// Add or remove an entry from the selection; returns whether it is now selected
    pub fn toggle_selection(&mut self, id: Uuid) -> bool {
        if self.selection.remove(&id) {
            return false;
        }
        if self.get(id).is_some() {
            self.selection.insert(id);
            true
        } else {
            false
        }
    }

    /// Select an entry; unknown ids are ignored
    pub fn select(&mut self, id: Uuid) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.selection.insert(id);
        true
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn is_selected(&self, id: Uuid) -> bool {
        self.selection.contains(&id)
    }

    /// Selected ids in history order
    pub fn selected_ids(&self) -> Vec<Uuid> {
        self.entries
            .iter()
            .map(HistoryEntry::id)
            .filter(|id| self.selection.contains(id))
            .collect()
    }
}

fn entry_matches(entry: &HistoryEntry, needle: &str) -> bool {
    if let Some(text) = entry.payload.as_text() {
        if text.to_lowercase().contains(needle) {
            return true;
        }
    }

    entry.payload.files().iter().any(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase().contains(needle))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Category;
    use crate::persistence::PersistOp;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn text(s: &str) -> HistoryEntry {
        HistoryEntry::capture(ContentPayload::text(s), None, Utc::now())
    }

    fn texts(store: &HistoryStore) -> Vec<String> {
        store
            .entries()
            .iter()
            .map(|e| e.payload.as_text().unwrap_or_default().to_string())
            .collect()
    }

    fn drain(rx: &mut UnboundedReceiver<PersistOp>) -> Vec<String> {
        let mut ops = Vec::new();
        while let Ok(op) = rx.try_recv() {
            ops.push(match op {
                PersistOp::Save(_) => "save",
                PersistOp::Update(_) => "update",
                PersistOp::Delete(_) => "delete",
                PersistOp::DeleteAll => "delete_all",
                PersistOp::Flush(_) => "flush",
            }
            .to_string());
        }
        ops
    }

    #[test]
    fn test_insert_is_most_recent_first() {
        let mut store = HistoryStore::new(10, PersistenceMirror::disabled());
        store.insert(text("a"));
        store.insert(text("b"));
        store.insert(text("c"));
        assert_eq!(texts(&store), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_eviction_spares_pinned() {
        let mut store = HistoryStore::new(3, PersistenceMirror::disabled());
        let mut ids = Vec::new();
        for i in 1..=5 {
            let entry = text(&format!("#{}", i));
            ids.push(entry.id());
            store.insert(entry);
            if i == 2 {
                store.set_pinned(ids[1], true);
            }
        }

        assert_eq!(store.len(), 3);
        assert_eq!(texts(&store), vec!["#5", "#4", "#2"]);
        assert!(store.get(ids[1]).unwrap().is_pinned);
    }

    #[test]
    fn test_fresh_entry_survives_full_pinned_set() {
        let mut store = HistoryStore::new(2, PersistenceMirror::disabled());
        for s in ["p1", "p2"] {
            let entry = text(s);
            let id = entry.id();
            store.insert(entry);
            store.set_pinned(id, true);
        }

        store.insert(text("fresh"));
        assert_eq!(texts(&store), vec!["fresh", "p2", "p1"]);

        store.insert(text("fresher"));
        assert_eq!(texts(&store), vec!["fresher", "p2", "p1"]);
    }

    #[test]
    fn test_eviction_mirrors_deletes() {
        let (mirror, mut rx) = PersistenceMirror::channel();
        let mut store = HistoryStore::new(1, mirror);

        let first = text("first");
        let first_id = first.id();
        store.insert(first);
        let evicted = store.insert(text("second"));

        assert_eq!(evicted, vec![first_id]);
        assert_eq!(drain(&mut rx), vec!["save", "save", "delete"]);
    }

    #[test]
    fn test_pin_does_not_reorder() {
        let mut store = HistoryStore::new(10, PersistenceMirror::disabled());
        let old = text("old");
        let old_id = old.id();
        store.insert(old);
        store.insert(text("new"));

        assert!(store.set_pinned(old_id, true));
        assert_eq!(texts(&store), vec!["new", "old"]);
    }

    #[test]
    fn test_unpin_reapplies_ceiling() {
        let mut store = HistoryStore::new(1, PersistenceMirror::disabled());
        let pinned = text("pinned");
        let pinned_id = pinned.id();
        store.insert(pinned);
        store.set_pinned(pinned_id, true);
        store.insert(text("newer"));
        assert_eq!(store.len(), 2);

        store.set_pinned(pinned_id, false);
        assert_eq!(texts(&store), vec!["newer"]);
    }

    #[test]
    fn test_mutations_on_unknown_id_are_noops() {
        let (mirror, mut rx) = PersistenceMirror::channel();
        let mut store = HistoryStore::new(10, mirror);
        let missing = Uuid::new_v4();

        assert!(!store.set_pinned(missing, true));
        assert!(!store.set_title(missing, "x"));
        assert!(!store.replace_content(missing, ContentPayload::text("y"), None));
        assert_eq!(store.delete(&[missing]), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_title_and_content_edits_are_mirrored() {
        let (mirror, mut rx) = PersistenceMirror::channel();
        let mut store = HistoryStore::new(10, mirror);
        let entry = text("https://example.com");
        let id = entry.id();
        store.insert(entry);

        assert!(store.set_title(id, "  Example  "));
        assert_eq!(store.get(id).unwrap().title.as_deref(), Some("Example"));
        assert!(store.set_title(id, ""));
        assert_eq!(store.get(id).unwrap().title, None);

        assert!(store.replace_content(id, ContentPayload::text("plain"), Some("Edited".into())));
        let edited = store.get(id).unwrap();
        assert_eq!(edited.payload.as_text(), Some("plain"));
        assert_eq!(edited.title.as_deref(), Some("Edited"));
        // Category is decided once at capture
        assert_eq!(edited.category(), Category::Url);

        assert_eq!(drain(&mut rx), vec!["save", "update", "update", "update"]);
    }

    #[test]
    fn test_delete_prunes_selection() {
        let (mirror, mut rx) = PersistenceMirror::channel();
        let mut store = HistoryStore::new(10, mirror);
        let a = text("a");
        let b = text("b");
        let (a_id, b_id) = (a.id(), b.id());
        store.insert(a);
        store.insert(b);

        assert!(store.toggle_selection(a_id));
        assert!(store.select(b_id));
        assert_eq!(store.selected_ids(), vec![b_id, a_id]);

        assert_eq!(store.delete(&[a_id]), 1);
        assert_eq!(store.selected_ids(), vec![b_id]);
        assert_eq!(drain(&mut rx), vec!["save", "save", "delete"]);
    }

    #[test]
    fn test_clear_all() {
        let (mirror, mut rx) = PersistenceMirror::channel();
        let mut store = HistoryStore::new(10, mirror);
        let entry = text("a");
        let id = entry.id();
        store.insert(entry);
        store.set_pinned(id, true);
        store.toggle_selection(id);

        store.clear_all();
        assert!(store.is_empty());
        assert!(store.selected_ids().is_empty());
        assert_eq!(drain(&mut rx), vec!["save", "update", "delete_all"]);
    }

    #[test]
    fn test_search() {
        let mut store = HistoryStore::new(10, PersistenceMirror::disabled());
        store.insert(text("some foo bar"));
        store.insert(text("unrelated"));
        store.insert(HistoryEntry::capture(
            ContentPayload::file_refs(["/home/foo-dir/Report.PDF", "/tmp/b.txt"]),
            None,
            Utc::now(),
        ));

        assert_eq!(store.search("FOO").len(), 1);
        assert_eq!(store.search("report").len(), 1);
        assert_eq!(store.search("").len(), 3);
        assert!(store.search("zzz").is_empty());
    }

    #[test]
    fn test_with_entries_enforces_ceiling() {
        let (mirror, mut rx) = PersistenceMirror::channel();
        let entries = vec![text("3"), text("2"), text("1")];
        let store = HistoryStore::with_entries(entries, 2, mirror);
        assert_eq!(texts(&store), vec!["3", "2"]);
        assert_eq!(drain(&mut rx), vec!["delete"]);
    }

    #[test]
    fn test_shrinking_ceiling_evicts() {
        let mut store = HistoryStore::new(5, PersistenceMirror::disabled());
        for i in 0..5 {
            store.insert(text(&i.to_string()));
        }
        let evicted = store.set_max_size(2);
        assert_eq!(evicted.len(), 3);
        assert_eq!(texts(&store), vec!["4", "3"]);
    }

    #[test]
    fn test_resolve_prefix() {
        let mut store = HistoryStore::new(5, PersistenceMirror::disabled());
        let entry = text("a");
        let id = entry.id();
        store.insert(entry);

        let prefix = id.simple().to_string()[..6].to_uppercase();
        assert_eq!(store.resolve_prefix(&prefix), vec![id]);
        assert_eq!(store.resolve_prefix(&id.to_string()), vec![id]);
    }
}
