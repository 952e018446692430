//! System clipboard backed by arboard

use std::borrow::Cow;
use std::path::PathBuf;

use tracing::{debug, trace};
use url::Url;

use super::{platform, ClipboardError, ClipboardSource, ContentPayload, ImageData, SourceApp};

/// System clipboard provider
///
/// arboard holds a single representation at a time, so mixed payloads and
/// multi-image sets are rejected and the write-back path falls back to a
/// simpler representation. File references travel as `file://` URI lines.
pub struct SystemClipboard {
    clipboard: arboard::Clipboard,
    counter: FingerprintCounter,
}

/// Change counter derived from content hashes.
///
/// Every observed content change moves the counter once, and so does every
/// successful write, even when the written content hashes the same as what
/// was already there.
#[derive(Debug, Default)]
struct FingerprintCounter {
    count: u64,
    last: Option<md5::Digest>,
}

impl FingerprintCounter {
    fn observe(&mut self, fingerprint: Option<md5::Digest>) -> u64 {
        if fingerprint != self.last {
            self.last = fingerprint;
            self.count += 1;
        }
        self.count
    }

    fn record_write(&mut self, fingerprint: Option<md5::Digest>) {
        self.last = fingerprint;
        self.count += 1;
    }
}

impl SystemClipboard {
    /// Open the system clipboard
    pub fn new() -> Result<Self, ClipboardError> {
        let clipboard = arboard::Clipboard::new()
            .map_err(|e| ClipboardError::Platform(format!("Failed to open clipboard: {}", e)))?;

        Ok(Self {
            clipboard,
            counter: FingerprintCounter::default(),
        })
    }

    /// Hash of the current content, used where no native change counter exists
    fn fingerprint(&mut self) -> Option<md5::Digest> {
        if let Ok(text) = self.clipboard.get_text() {
            return Some(md5::compute(text.as_bytes()));
        }

        if let Ok(image) = self.clipboard.get_image() {
            let mut context = md5::Context::new();
            context.consume((image.width as u64).to_le_bytes());
            context.consume((image.height as u64).to_le_bytes());
            context.consume(&image.bytes);
            return Some(context.compute());
        }

        None
    }

    fn read_image(&mut self) -> Option<ImageData> {
        let image = self.clipboard.get_image().ok()?;
        let width = u32::try_from(image.width).ok()?;
        let height = u32::try_from(image.height).ok()?;
        Some(ImageData::new(width, height, image.bytes.into_owned()))
    }

    fn write_image(&mut self, image: &ImageData) -> bool {
        let data = arboard::ImageData {
            width: image.width as usize,
            height: image.height as usize,
            bytes: Cow::Borrowed(&image.bytes),
        };
        match self.clipboard.set_image(data) {
            Ok(()) => true,
            Err(e) => {
                debug!("Image write rejected: {}", e);
                false
            }
        }
    }

    fn write_text(&mut self, text: &str) -> bool {
        match self.clipboard.set_text(text) {
            Ok(()) => true,
            Err(e) => {
                debug!("Text write rejected: {}", e);
                false
            }
        }
    }
}

impl ClipboardSource for SystemClipboard {
    fn change_counter(&mut self) -> u64 {
        if let Some(count) = platform::native_change_count() {
            return count;
        }

        let fingerprint = self.fingerprint();
        self.counter.observe(fingerprint)
    }

    fn read_payload(&mut self) -> Option<ContentPayload> {
        let text = self.clipboard.get_text().ok().filter(|t| !t.is_empty());
        let images: Vec<ImageData> = self.read_image().into_iter().collect();

        let (text, files) = match text {
            Some(text) => match parse_file_uris(&text) {
                Some(files) => (None, files),
                None => (Some(text), Vec::new()),
            },
            None => (None, Vec::new()),
        };

        let payload = ContentPayload::compose(text, images, files);
        if payload.is_none() {
            trace!("Clipboard holds no recognizable content");
        }
        payload
    }

    fn write_payload(&mut self, payload: &ContentPayload) -> bool {
        let written = match payload {
            ContentPayload::Text(text) => self.write_text(text),
            ContentPayload::ImageSet(images) => match images.as_slice() {
                [image] => self.write_image(image),
                _ => false,
            },
            ContentPayload::FileReferences(files) => self.write_text(&format_file_uris(files)),
            ContentPayload::Mixed(_) => false,
        };

        if written && platform::native_change_count().is_none() {
            let fingerprint = self.fingerprint();
            self.counter.record_write(fingerprint);
        }
        written
    }

    fn frontmost_application(&self) -> Option<SourceApp> {
        platform::frontmost_application()
    }

    fn name(&self) -> &str {
        "system"
    }
}

/// Interpret text made only of `file://` URI lines as file references
fn parse_file_uris(text: &str) -> Option<Vec<PathBuf>> {
    let mut files = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let url = Url::parse(line).ok().filter(|url| url.scheme() == "file")?;
        files.push(url.to_file_path().ok()?);
    }
    if files.is_empty() {
        None
    } else {
        Some(files)
    }
}

fn format_file_uris(files: &[PathBuf]) -> String {
    files
        .iter()
        .filter_map(|path| match Url::from_file_path(path) {
            Ok(url) => Some(String::from(url)),
            Err(()) => {
                debug!("Skipping non-absolute file reference {}", path.display());
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
