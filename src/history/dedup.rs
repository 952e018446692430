//! Duplicate suppression against the most recent history entries

use std::collections::HashSet;
use std::path::Path;

use uuid::Uuid;

use super::HistoryEntry;
use crate::clipboard::ContentPayload;

/// Pixel tolerance, per axis, under which two single images count as the same
pub const IMAGE_DIMENSION_TOLERANCE: u32 = 1;

/// Compares a candidate against a bounded window of recent entries.
///
/// Only the newest `window` entries are scanned, so the cost of a capture stays
/// constant no matter how long the history is.
#[derive(Debug, Clone, Copy)]
pub struct DeduplicationFilter {
    window: usize,
}

impl DeduplicationFilter {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// The entry in the window the candidate duplicates, if any.
    ///
    /// `recent` must be ordered most-recent-first.
    pub fn find_duplicate<'a>(
        &self,
        candidate_id: Uuid,
        candidate: &ContentPayload,
        recent: &'a [HistoryEntry],
    ) -> Option<&'a HistoryEntry> {
        recent
            .iter()
            .take(self.window)
            .find(|existing| is_duplicate(candidate_id, candidate, existing))
    }
}

/// Pairwise duplicate rules, first match wins
pub fn is_duplicate(candidate_id: Uuid, candidate: &ContentPayload, existing: &HistoryEntry) -> bool {
    if candidate_id == existing.id() {
        return true;
    }

    let other = &existing.payload;

    if let (Some(a), Some(b)) = (candidate.as_text(), other.as_text()) {
        if a == b {
            return true;
        }
    }

    // Dimensions only: two different pictures of the same size collide.
    if let ([a], [b]) = (candidate.images(), other.images()) {
        if a.same_dimensions(b, IMAGE_DIMENSION_TOLERANCE) {
            return true;
        }
    }

    let (a, b) = (candidate.files(), other.files());
    if !a.is_empty() && !b.is_empty() && path_set(a) == path_set(b) {
        return true;
    }

    false
}

fn path_set<P: AsRef<Path>>(paths: &[P]) -> HashSet<&Path> {
    paths.iter().map(AsRef::as_ref).collect()
}
