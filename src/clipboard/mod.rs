//! Clipboard abstraction layer
//!
//! This module owns the content model shared by the whole engine
//! ([`ContentPayload`]) and the narrow [`ClipboardSource`] contract the engine
//! needs from a system clipboard, with a platform implementation backed by
//! `arboard` and a scriptable in-memory one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub mod memory;
pub mod platform;
pub mod system;

pub use memory::MemoryClipboard;
pub use system::SystemClipboard;

/// Maximum clipboard content size accepted by default (20MB)
pub const MAX_CLIPBOARD_SIZE: usize = 20 * 1024 * 1024;

/// One raster image as captured from the clipboard (RGBA8, row-major).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, bytes: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bytes,
        }
    }

    /// Whether both dimensions are within `tolerance` pixels of `other`'s.
    pub fn same_dimensions(&self, other: &ImageData, tolerance: u32) -> bool {
        self.width.abs_diff(other.width) <= tolerance
            && self.height.abs_diff(other.height) <= tolerance
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Content carrying more than one representation at once.
///
/// Only [`ContentPayload::compose`] builds this, which guarantees at least two
/// of the three kinds are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedContent {
    text: Option<String>,
    images: Vec<ImageData>,
    files: Vec<PathBuf>,
}

impl MixedContent {
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn images(&self) -> &[ImageData] {
        &self.images
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

/// A captured clipboard payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentPayload {
    Text(String),
    ImageSet(Vec<ImageData>),
    FileReferences(Vec<PathBuf>),
    Mixed(MixedContent),
}

/// The representation a payload would be written as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Text,
    Image,
    ImageSet,
    Files,
    Mixed,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadKind::Text => "text",
            PayloadKind::Image => "image",
            PayloadKind::ImageSet => "image-set",
            PayloadKind::Files => "files",
            PayloadKind::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

impl ContentPayload {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPayload::Text(text.into())
    }

    pub fn image(image: ImageData) -> Self {
        ContentPayload::ImageSet(vec![image])
    }

    pub fn file_refs<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        ContentPayload::FileReferences(paths.into_iter().map(Into::into).collect())
    }

    /// Build a payload from whichever parts are present.
    ///
    /// A single kind collapses into its plain variant; nothing at all yields
    /// `None`. Empty text counts as absent.
    pub fn compose(
        text: Option<String>,
        images: Vec<ImageData>,
        files: Vec<PathBuf>,
    ) -> Option<Self> {
        let text = text.filter(|t| !t.is_empty());
        let kinds = [text.is_some(), !images.is_empty(), !files.is_empty()]
            .iter()
            .filter(|present| **present)
            .count();

        match kinds {
            0 => None,
            1 => Some(if let Some(text) = text {
                ContentPayload::Text(text)
            } else if !images.is_empty() {
                ContentPayload::ImageSet(images)
            } else {
                ContentPayload::FileReferences(files)
            }),
            _ => Some(ContentPayload::Mixed(MixedContent {
                text,
                images,
                files,
            })),
        }
    }

    /// Text carried by this payload, if any
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPayload::Text(text) => Some(text),
            ContentPayload::Mixed(mixed) => mixed.text(),
            _ => None,
        }
    }

    /// Images carried by this payload, in order
    pub fn images(&self) -> &[ImageData] {
        match self {
            ContentPayload::ImageSet(images) => images,
            ContentPayload::Mixed(mixed) => mixed.images(),
            _ => &[],
        }
    }

    /// File references carried by this payload, in order
    pub fn files(&self) -> &[PathBuf] {
        match self {
            ContentPayload::FileReferences(files) => files,
            ContentPayload::Mixed(mixed) => mixed.files(),
            _ => &[],
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            ContentPayload::Text(_) => PayloadKind::Text,
            ContentPayload::ImageSet(images) if images.len() == 1 => PayloadKind::Image,
            ContentPayload::ImageSet(_) => PayloadKind::ImageSet,
            ContentPayload::FileReferences(_) => PayloadKind::Files,
            ContentPayload::Mixed(_) => PayloadKind::Mixed,
        }
    }

    /// Rough in-memory size of the payload in bytes
    pub fn approximate_size(&self) -> usize {
        let text = self.as_text().map_or(0, str::len);
        let images: usize = self.images().iter().map(|i| i.bytes.len()).sum();
        let files: usize = self.files().iter().map(|p| p.as_os_str().len()).sum();
        text + images + files
    }

    /// Single-line human readable summary, at most `max_chars` characters of text
    pub fn preview(&self, max_chars: usize) -> String {
        let mut parts = Vec::new();

        if let Some(text) = self.as_text() {
            let flat: String = text
                .chars()
                .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
                .collect();
            if flat.chars().count() > max_chars {
                let cut: String = flat.chars().take(max_chars).collect();
                parts.push(format!("{}...", cut));
            } else {
                parts.push(flat);
            }
        }

        match self.images() {
            [] => {}
            [image] => parts.push(format!("[image {}x{}]", image.width, image.height)),
            images => parts.push(format!("[{} images]", images.len())),
        }

        match self.files() {
            [] => {}
            [file] => parts.push(format!(
                "[file {}]",
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string())
            )),
            files => parts.push(format!("[{} files]", files.len())),
        }

        parts.join(" ")
    }
}

/// Application that was frontmost when a change was observed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceApp {
    /// Stable identifier (bundle id on macOS, WM_CLASS instance on X11)
    pub identifier: String,
    /// Human readable name
    pub display_name: String,
}

impl SourceApp {
    pub fn new(identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
        }
    }
}

/// What the engine needs from a system clipboard.
///
/// Every method is synchronous: the capture path runs to completion inside a
/// single tick.
pub trait ClipboardSource {
    /// Opaque, monotonically non-decreasing value that changes on every write
    fn change_counter(&mut self) -> u64;

    /// Best-effort extraction of whatever content is present
    fn read_payload(&mut self) -> Option<ContentPayload>;

    /// Write one payload; `true` if the clipboard accepted the representation
    fn write_payload(&mut self, payload: &ContentPayload) -> bool;

    /// Application currently in front, if it can be determined
    fn frontmost_application(&self) -> Option<SourceApp>;

    /// Backend name, for logs
    fn name(&self) -> &str;
}

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform-specific error
    #[error("Platform error: {0}")]
    Platform(String),
}

/// Create the clipboard source for the current platform
pub fn create_source() -> Result<Box<dyn ClipboardSource>, ClipboardError> {
    Ok(Box::new(SystemClipboard::new()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pixel(width: u32, height: u32) -> ImageData {
        ImageData::new(width, height, vec![0; (width * height * 4) as usize])
    }

    #[test]
    fn test_compose_collapses_single_kind() {
        let payload = ContentPayload::compose(Some("hi".into()), vec![], vec![]).unwrap();
        assert_eq!(payload, ContentPayload::Text("hi".into()));

        let payload = ContentPayload::compose(None, vec![pixel(1, 1)], vec![]).unwrap();
        assert_eq!(payload.kind(), PayloadKind::Image);

        let payload =
            ContentPayload::compose(None, vec![], vec![PathBuf::from("/tmp/a.txt")]).unwrap();
        assert_eq!(payload.kind(), PayloadKind::Files);
    }

    #[test]
    fn test_file_refs_accessor() {
        let payload = ContentPayload::file_refs(["/tmp/a.txt", "/tmp/b.txt"]);
        assert_eq!(payload.kind(), PayloadKind::Files);
        assert_eq!(
            payload.files(),
            &[PathBuf::from("/tmp/a.txt"), PathBuf::from("/tmp/b.txt")]
        );
        assert!(ContentPayload::text("a").files().is_empty());
    }

    #[test]
    fn test_compose_rejects_empty() {
        assert!(ContentPayload::compose(None, vec![], vec![]).is_none());
        assert!(ContentPayload::compose(Some(String::new()), vec![], vec![]).is_none());
    }

    #[test]
    fn test_compose_mixed() {
        let payload = ContentPayload::compose(
            Some("caption".into()),
            vec![pixel(2, 2)],
            vec![PathBuf::from("/tmp/a.txt")],
        )
        .unwrap();

        assert_eq!(payload.kind(), PayloadKind::Mixed);
        assert_eq!(payload.as_text(), Some("caption"));
        assert_eq!(payload.images().len(), 1);
        assert_eq!(payload.files(), &[PathBuf::from("/tmp/a.txt")]);
    }

    #[test]
    fn test_image_dimension_tolerance() {
        assert!(pixel(100, 50).same_dimensions(&pixel(101, 49), 1));
        assert!(!pixel(100, 50).same_dimensions(&pixel(102, 50), 1));
    }

    #[test]
    fn test_preview_truncates_and_flattens() {
        let payload = ContentPayload::text("line one\nline two");
        assert_eq!(payload.preview(8), "line one...");
        assert_eq!(payload.preview(80), "line one line two");

        let payload = ContentPayload::file_refs(["/home/me/report.pdf"]);
        assert_eq!(payload.preview(80), "[file report.pdf]");
    }

    #[test]
    fn test_approximate_size() {
        let payload = ContentPayload::compose(Some("abc".into()), vec![pixel(2, 2)], vec![])
            .unwrap();
        assert_eq!(payload.approximate_size(), 3 + 16);
    }
}
