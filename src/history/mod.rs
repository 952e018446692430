//! Clipboard history: entries, classification, duplicate suppression and the
//! bounded in-memory store

pub mod classify;
pub mod database;
pub mod dedup;
pub mod store;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::clipboard::{ContentPayload, SourceApp};

pub use classify::classify;
pub use database::SqliteStore;
pub use dedup::DeduplicationFilter;
pub use store::HistoryStore;

/// Category assigned to an entry when it is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Text,
    Url,
    Snippet,
    Image,
    File,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Text,
        Category::Url,
        Category::Snippet,
        Category::Image,
        Category::File,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Text => "text",
            Category::Url => "url",
            Category::Snippet => "snippet",
            Category::Image => "image",
            Category::File => "file",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// One captured clipboard state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    id: Uuid,
    category: Category,
    /// Captured content
    pub payload: ContentPayload,
    /// Capture time, or write-back time for entries recorded by a multi copy
    pub timestamp: DateTime<Utc>,
    /// Pinned entries are never evicted
    pub is_pinned: bool,
    /// Optional user-assigned label
    pub title: Option<String>,
    /// Application in front when the content was captured
    pub source_app: Option<SourceApp>,
}

impl HistoryEntry {
    /// New entry with a fresh id, classified from its payload
    pub fn capture(
        payload: ContentPayload,
        source_app: Option<SourceApp>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: classify(&payload),
            payload,
            timestamp,
            is_pinned: false,
            title: None,
            source_app,
        }
    }

    /// Rebuild an entry read back from storage
    pub fn restore(
        id: Uuid,
        payload: ContentPayload,
        timestamp: DateTime<Utc>,
        category: Category,
        is_pinned: bool,
        title: Option<String>,
        source_app: Option<SourceApp>,
    ) -> Self {
        Self {
            id,
            category,
            payload,
            timestamp,
            is_pinned,
            title,
            source_app,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// First eight hex digits of the id, as shown to users
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    /// Title if set, otherwise a preview of the content
    pub fn label(&self, max_chars: usize) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => self.payload.preview(max_chars),
        }
    }
}

/// Non-mutating projections over the history, used for category tabs
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryFilter {
    Pinned,
    Category(Category),
    /// Category compared by name, as typed by a user
    CategoryName(String),
    /// Captured on this local calendar day
    Day(NaiveDate),
    Since(DateTime<Utc>),
    /// Captured while this application identifier was in front
    Application(String),
}

impl HistoryFilter {
    /// Entries captured today, in local time
    pub fn today() -> Self {
        HistoryFilter::Day(Local::now().date_naive())
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        match self {
            HistoryFilter::Pinned => entry.is_pinned,
            HistoryFilter::Category(category) => entry.category == *category,
            HistoryFilter::CategoryName(name) => {
                entry.category.as_str().eq_ignore_ascii_case(name.trim())
            }
            HistoryFilter::Day(day) => entry.timestamp.with_timezone(&Local).date_naive() == *day,
            HistoryFilter::Since(since) => entry.timestamp >= *since,
            HistoryFilter::Application(identifier) => entry
                .source_app
                .as_ref()
                .is_some_and(|app| app.identifier == *identifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_capture_assigns_fresh_ids() {
        let now = Utc::now();
        let a = HistoryEntry::capture(ContentPayload::text("same"), None, now);
        let b = HistoryEntry::capture(ContentPayload::text("same"), None, now);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.category(), Category::Snippet);
        assert!(!a.is_pinned);
        assert_eq!(a.short_id().len(), 8);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("URL".parse::<Category>(), Ok(Category::Url));
        assert_eq!(" image ".parse::<Category>(), Ok(Category::Image));
        assert!("video".parse::<Category>().is_err());
    }

    #[test]
    fn test_filters() {
        let now = Utc::now();
        let mut entry = HistoryEntry::capture(
            ContentPayload::text("https://example.com"),
            Some(SourceApp::new("firefox", "Firefox")),
            now,
        );

        assert!(HistoryFilter::Category(Category::Url).matches(&entry));
        assert!(HistoryFilter::CategoryName("url".into()).matches(&entry));
        assert!(!HistoryFilter::CategoryName("text".into()).matches(&entry));
        assert!(HistoryFilter::Application("firefox".into()).matches(&entry));
        assert!(HistoryFilter::Since(now - Duration::minutes(1)).matches(&entry));
        assert!(!HistoryFilter::Since(now + Duration::minutes(1)).matches(&entry));
        assert!(HistoryFilter::Day(now.with_timezone(&Local).date_naive()).matches(&entry));

        assert!(!HistoryFilter::Pinned.matches(&entry));
        entry.is_pinned = true;
        assert!(HistoryFilter::Pinned.matches(&entry));
    }

    #[test]
    fn test_category_name_filter_ignores_case() {
        let entry = HistoryEntry::capture(ContentPayload::text("https://example.com"), None, Utc::now());

        assert!(HistoryFilter::CategoryName("URL".into()).matches(&entry));
        assert!(HistoryFilter::CategoryName(" Url ".into()).matches(&entry));
        assert_eq!(
            HistoryFilter::CategoryName("Url".into()).matches(&entry),
            "Url".parse::<Category>() == Ok(entry.category())
        );
    }

    #[test]
    fn test_label_prefers_title() {
        let mut entry = HistoryEntry::capture(ContentPayload::text("body text"), None, Utc::now());
        assert_eq!(entry.label(40), "body text");
        entry.title = Some("Greeting".into());
        assert_eq!(entry.label(40), "Greeting");
    }
}
