//! SQLite persistence for clipboard history

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clipboard::{ContentPayload, SourceApp};
use crate::history::{Category, HistoryEntry};
use crate::persistence::{PersistenceBridge, PersistenceError};

const SCHEMA_VERSION: u32 = 1;

/// Payloads at least this large are stored zstd-compressed
const COMPRESSION_THRESHOLD: usize = 4 * 1024;
const COMPRESSION_LEVEL: i32 = 3;

const SELECT_COLUMNS: &str = "SELECT uuid, payload, compressed, category, pinned, title,
        source_app_id, source_app_name, timestamp
 FROM history_entries";

/// SQLite-backed [`PersistenceBridge`].
///
/// Payloads are serialized with bincode and compressed when large; the rest of
/// the entry lives in plain columns so the database stays inspectable.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        initialize(&conn)?;

        info!("Opened history database at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Database file, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of stored entries
    pub async fn count(&self) -> Result<usize, PersistenceError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history_entries", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }
}

fn schema_version(conn: &Connection) -> Result<u32, PersistenceError> {
    let table_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<u32> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn initialize(conn: &Connection) -> Result<(), PersistenceError> {
    match schema_version(conn)? {
        0 => create_schema(conn),
        SCHEMA_VERSION => Ok(()),
        newer => Err(PersistenceError::Corrupt(format!(
            "database schema version {} is newer than supported version {}",
            newer, SCHEMA_VERSION
        ))),
    }
}

fn create_schema(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS history_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            payload BLOB NOT NULL,
            compressed INTEGER NOT NULL DEFAULT 0,
            category TEXT NOT NULL,
            pinned INTEGER NOT NULL DEFAULT 0,
            title TEXT,
            source_app_id TEXT,
            source_app_name TEXT,
            timestamp INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_timestamp ON history_entries(timestamp DESC);
        ",
    )?;

    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        params![SCHEMA_VERSION],
    )?;

    debug!("Created history schema version {}", SCHEMA_VERSION);
    Ok(())
}

/// Serialize a payload, compressing it when large. Returns the bytes and
/// whether they are compressed.
fn encode_payload(payload: &ContentPayload) -> Result<(Vec<u8>, bool), PersistenceError> {
    let bytes = bincode::serde::encode_to_vec(payload, bincode::config::standard())?;
    if bytes.len() < COMPRESSION_THRESHOLD {
        return Ok((bytes, false));
    }
    Ok((zstd::encode_all(bytes.as_slice(), COMPRESSION_LEVEL)?, true))
}

fn decode_payload(bytes: &[u8], compressed: bool) -> Result<ContentPayload, PersistenceError> {
    let (payload, _): (ContentPayload, usize) = if compressed {
        let raw = zstd::decode_all(bytes)?;
        bincode::serde::decode_from_slice(&raw, bincode::config::standard())?
    } else {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())?
    };
    Ok(payload)
}

/// Raw column values of one row
struct StoredRow {
    uuid: String,
    payload: Vec<u8>,
    compressed: bool,
    category: String,
    pinned: bool,
    title: Option<String>,
    source_app_id: Option<String>,
    source_app_name: Option<String>,
    timestamp: i64,
}

impl StoredRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            payload: row.get(1)?,
            compressed: row.get(2)?,
            category: row.get(3)?,
            pinned: row.get(4)?,
            title: row.get(5)?,
            source_app_id: row.get(6)?,
            source_app_name: row.get(7)?,
            timestamp: row.get(8)?,
        })
    }

    fn into_entry(self) -> Result<HistoryEntry, PersistenceError> {
        let id = Uuid::parse_str(&self.uuid)
            .map_err(|e| PersistenceError::Corrupt(format!("uuid {}: {}", self.uuid, e)))?;
        let category: Category = self.category.parse().map_err(PersistenceError::Corrupt)?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(self.timestamp).ok_or_else(|| {
            PersistenceError::Corrupt(format!("timestamp {} out of range", self.timestamp))
        })?;
        let payload = decode_payload(&self.payload, self.compressed)?;

        let source_app = self.source_app_id.map(|identifier| {
            let display_name = self
                .source_app_name
                .unwrap_or_else(|| identifier.clone());
            SourceApp::new(identifier, display_name)
        });

        Ok(HistoryEntry::restore(
            id,
            payload,
            timestamp,
            category,
            self.pinned,
            self.title,
            source_app,
        ))
    }
}

#[async_trait]
impl PersistenceBridge for SqliteStore {
    async fn save(&self, entry: &HistoryEntry) -> Result<(), PersistenceError> {
        let (payload, compressed) = encode_payload(&entry.payload)?;
        let app = entry.source_app.as_ref();

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO history_entries
             (uuid, payload, compressed, category, pinned, title, source_app_id, source_app_name, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(uuid) DO UPDATE SET
                payload = excluded.payload,
                compressed = excluded.compressed,
                pinned = excluded.pinned,
                title = excluded.title",
            params![
                entry.id().to_string(),
                payload,
                compressed,
                entry.category().as_str(),
                entry.is_pinned,
                entry.title,
                app.map(|a| a.identifier.as_str()),
                app.map(|a| a.display_name.as_str()),
                entry.timestamp.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn update(&self, entry: &HistoryEntry) -> Result<(), PersistenceError> {
        let (payload, compressed) = encode_payload(&entry.payload)?;

        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE history_entries
             SET payload = ?, compressed = ?, pinned = ?, title = ?
             WHERE uuid = ?",
            params![
                payload,
                compressed,
                entry.is_pinned,
                entry.title,
                entry.id().to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(PersistenceError::NotFound(entry.id()));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM history_entries WHERE uuid = ?",
            params![id.to_string()],
        )?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM history_entries", [])?;
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY timestamp DESC, id DESC",
            SELECT_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], StoredRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(StoredRow::into_entry).collect()
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::ImageData;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup_test_db() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = SqliteStore::open(&temp_dir.path().join("history.db")).unwrap();
        (db, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_fetch() {
        let (db, _temp_dir) = setup_test_db();

        let mut entry = HistoryEntry::capture(
            ContentPayload::text("https://example.com"),
            Some(SourceApp::new("firefox", "Firefox")),
            Utc::now(),
        );
        entry.title = Some("Example".into());
        db.save(&entry).await.unwrap();

        let entries = db.fetch_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        let stored = &entries[0];
        assert_eq!(stored.id(), entry.id());
        assert_eq!(stored.category(), Category::Url);
        assert_eq!(stored.payload, entry.payload);
        assert_eq!(stored.title.as_deref(), Some("Example"));
        assert_eq!(stored.source_app, entry.source_app);
        assert_eq!(
            stored.timestamp.timestamp_millis(),
            entry.timestamp.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_large_payload_is_compressed() {
        let (db, _temp_dir) = setup_test_db();

        let image = ImageData::new(64, 64, vec![42; 64 * 64 * 4]);
        let entry = HistoryEntry::capture(ContentPayload::image(image), None, Utc::now());
        db.save(&entry).await.unwrap();

        let compressed: bool = {
            let conn = db.conn.lock().await;
            conn.query_row("SELECT compressed FROM history_entries", [], |row| row.get(0))
                .unwrap()
        };
        assert!(compressed);
        assert_eq!(db.fetch_all().await.unwrap()[0].payload, entry.payload);
    }

    #[tokio::test]
    async fn test_fetch_all_is_newest_first() {
        let (db, _temp_dir) = setup_test_db();
        let now = Utc::now();

        for (i, text) in ["oldest", "middle", "newest"].iter().enumerate() {
            let entry = HistoryEntry::capture(
                ContentPayload::text(*text),
                None,
                now + Duration::seconds(i as i64),
            );
            db.save(&entry).await.unwrap();
        }

        let texts: Vec<String> = db
            .fetch_all()
            .await
            .unwrap()
            .iter()
            .map(|e| e.payload.as_text().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["newest", "middle", "oldest"]);
    }

    #[tokio::test]
    async fn test_update_pin_and_title() {
        let (db, _temp_dir) = setup_test_db();
        let mut entry = HistoryEntry::capture(ContentPayload::text("note"), None, Utc::now());
        db.save(&entry).await.unwrap();

        entry.is_pinned = true;
        entry.title = Some("Pinned note".into());
        entry.payload = ContentPayload::text("edited note");
        db.update(&entry).await.unwrap();

        let stored = &db.fetch_all().await.unwrap()[0];
        assert!(stored.is_pinned);
        assert_eq!(stored.title.as_deref(), Some("Pinned note"));
        assert_eq!(stored.payload.as_text(), Some("edited note"));
        // Category is never recomputed
        assert_eq!(stored.category(), Category::Snippet);
    }

    #[tokio::test]
    async fn test_update_unknown_entry() {
        let (db, _temp_dir) = setup_test_db();
        let entry = HistoryEntry::capture(ContentPayload::text("x"), None, Utc::now());
        assert!(matches!(
            db.update(&entry).await,
            Err(PersistenceError::NotFound(id)) if id == entry.id()
        ));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let (db, _temp_dir) = setup_test_db();
        let a = HistoryEntry::capture(ContentPayload::text("a"), None, Utc::now());
        let b = HistoryEntry::capture(ContentPayload::file_refs(["/tmp/b.txt"]), None, Utc::now());
        db.save(&a).await.unwrap();
        db.save(&b).await.unwrap();

        db.delete(a.id()).await.unwrap();
        db.delete(Uuid::new_v4()).await.unwrap();
        assert_eq!(db.count().await.unwrap(), 1);

        db.delete_all().await.unwrap();
        assert_eq!(db.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("history.db");
        let entry = HistoryEntry::capture(ContentPayload::text("persisted"), None, Utc::now());

        {
            let db = SqliteStore::open(&path).unwrap();
            db.save(&entry).await.unwrap();
        }

        let db = SqliteStore::open(&path).unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
        assert_eq!(db.fetch_all().await.unwrap()[0].id(), entry.id());
    }

    #[tokio::test]
    async fn test_corrupt_row_is_reported() {
        let db = SqliteStore::open_in_memory().unwrap();
        {
            let conn = db.conn.lock().await;
            conn.execute(
                "INSERT INTO history_entries (uuid, payload, compressed, category, timestamp)
                 VALUES ('not-a-uuid', x'00', 0, 'text', 0)",
                [],
            )
            .unwrap();
        }
        assert!(matches!(
            db.fetch_all().await,
            Err(PersistenceError::Corrupt(_))
        ));
    }
}
