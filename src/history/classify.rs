//! Category heuristics

use super::Category;
use crate::clipboard::ContentPayload;

/// Text longer than this many characters is `text` rather than a `snippet`
pub const LONG_TEXT_CHARS: usize = 100;

/// Assign a category to a payload.
///
/// Rules are checked in order and the first match wins: images, URLs, long or
/// multi-line text, short text, file references.
pub fn classify(payload: &ContentPayload) -> Category {
    if !payload.images().is_empty() {
        return Category::Image;
    }

    if let Some(text) = payload.as_text() {
        if text.starts_with("http://") || text.starts_with("https://") {
            return Category::Url;
        }
        if text.contains('\n') || text.chars().count() > LONG_TEXT_CHARS {
            return Category::Text;
        }
        return Category::Snippet;
    }

    if !payload.files().is_empty() {
        return Category::File;
    }

    Category::Other
}
