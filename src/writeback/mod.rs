//! Writing history entries back to the clipboard
//!
//! A single entry is written as-is; several entries are merged into one payload
//! first. When the clipboard refuses a representation the writer falls back to
//! simpler ones instead of giving up, and reports what was actually written.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clipboard::{ClipboardSource, ContentPayload, ImageData, PayloadKind};
use crate::history::HistoryEntry;
use crate::monitor::SelfWriteGuard;

/// Write-back errors
#[derive(Debug, Error)]
pub enum WriteBackError {
    /// Nothing left to write after merging (e.g. every referenced file is gone)
    #[error("Nothing to write to the clipboard")]
    Empty,

    /// The clipboard accepted none of the attempted representations
    #[error("Clipboard rejected every representation of {0} content")]
    Rejected(PayloadKind),

    /// No history entry with this id
    #[error("History entry not found: {0}")]
    NotFound(Uuid),
}

/// Merges entries and writes payloads with fallback
#[derive(Debug, Clone)]
pub struct WriteBackComposer {
    separator: String,
}

impl Default for WriteBackComposer {
    fn default() -> Self {
        Self::new("\n\n")
    }
}

impl WriteBackComposer {
    /// Composer joining merged texts with `separator`
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn set_separator(&mut self, separator: &str) {
        if self.separator != separator {
            self.separator = separator.to_string();
        }
    }

    /// Merge several entries into one payload.
    ///
    /// Texts are joined in order with exact repeats dropped, image sets are
    /// flattened, and file references that no longer exist on disk are left
    /// out. Returns `None` when nothing remains.
    pub fn merge<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a HistoryEntry>,
    ) -> Option<ContentPayload> {
        let mut texts: Vec<&str> = Vec::new();
        let mut images: Vec<ImageData> = Vec::new();
        let mut files: Vec<PathBuf> = Vec::new();

        for entry in entries {
            let payload = &entry.payload;
            if let Some(text) = payload.as_text() {
                if !texts.contains(&text) {
                    texts.push(text);
                }
            }
            images.extend(payload.images().iter().cloned());
            for path in payload.files() {
                if path.exists() {
                    files.push(path.clone());
                } else {
                    debug!("Skipping missing file {}", path.display());
                }
            }
        }

        let text = (!texts.is_empty()).then(|| texts.join(&self.separator));
        ContentPayload::compose(text, images, files)
    }

    /// Write `payload`, falling back to simpler representations.
    ///
    /// The guard is armed immediately before every attempt, since a refused
    /// write may still have bumped the clipboard's change counter. Returns the
    /// payload the clipboard accepted.
    pub fn write(
        &self,
        payload: &ContentPayload,
        clipboard: &mut dyn ClipboardSource,
        guard: &mut SelfWriteGuard,
        now: DateTime<Utc>,
    ) -> Result<ContentPayload, WriteBackError> {
        for candidate in fallback_chain(payload) {
            guard.arm(now);
            if clipboard.write_payload(&candidate) {
                debug!("Wrote {} content to {}", candidate.kind(), clipboard.name());
                return Ok(candidate);
            }
            debug!(
                "{} rejected {} content, trying a simpler representation",
                clipboard.name(),
                candidate.kind()
            );
        }

        warn!("Clipboard rejected every representation of {} content", payload.kind());
        Err(WriteBackError::Rejected(payload.kind()))
    }
}

/// Representations to try, most specific first
fn fallback_chain(payload: &ContentPayload) -> Vec<ContentPayload> {
    let mut chain = vec![payload.clone()];

    match payload {
        ContentPayload::Text(_) | ContentPayload::FileReferences(_) => {}
        ContentPayload::ImageSet(images) => {
            if let [first, _, ..] = images.as_slice() {
                chain.push(ContentPayload::image(first.clone()));
            }
        }
        ContentPayload::Mixed(mixed) => {
            if let Some(text) = mixed.text() {
                chain.push(ContentPayload::text(text));
            }
            match mixed.images() {
                [] => {}
                [only] => chain.push(ContentPayload::image(only.clone())),
                [first, ..] => {
                    chain.push(ContentPayload::ImageSet(mixed.images().to_vec()));
                    chain.push(ContentPayload::image(first.clone()));
                }
            }
            if !mixed.files().is_empty() {
                chain.push(ContentPayload::FileReferences(mixed.files().to_vec()));
            }
        }
    }

    chain
}
