//! Tests for the engine task and its handle

use clipkeep::clipboard::{ContentPayload, MemoryClipboard};
use clipkeep::config::Config;
use clipkeep::engine::{spawn, EngineError};
use clipkeep::history::{Category, HistoryEntry, HistoryFilter, HistoryStore};
use clipkeep::persistence::{spawn_worker, MemoryStore};
use clipkeep::{Engine, EngineHandle, HistoryEvent};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::LocalSet;
use tokio::time::timeout;

fn fast_config() -> Config {
    let mut config = Config::default();
    config.monitor.poll_interval_ms = 50;
    config.monitor.monitoring_interval_secs = 0.0;
    config
}

fn engine(clipboard: &MemoryClipboard, store: HistoryStore) -> Engine {
    let (_tx, watch) = fast_config().into_watch();
    Engine::new(Box::new(clipboard.clone()), store, watch).unwrap()
}

/// Wait until the history holds `count` entries
async fn wait_for(handle: &EngineHandle, count: usize) -> Vec<HistoryEntry> {
    timeout(Duration::from_secs(5), async {
        loop {
            let entries = handle.entries(None, None).await.unwrap();
            if entries.len() >= count {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("history did not fill in time")
}

#[tokio::test]
async fn test_timer_captures_external_copies() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let clipboard = MemoryClipboard::new();
            let store = HistoryStore::new(50, Default::default());
            let (handle, task) = spawn(engine(&clipboard, store));
            let mut events = handle.subscribe();

            clipboard.copy_external(ContentPayload::text("https://tokio.rs"));
            let entries = wait_for(&handle, 1).await;

            assert_eq!(entries[0].category(), Category::Url);
            assert_eq!(
                events.recv().await.unwrap(),
                HistoryEvent::Inserted(entries[0].id())
            );

            handle.shutdown().await.unwrap();
            let engine = task.await.unwrap();
            assert_eq!(engine.store().len(), 1);
            assert!(!handle.is_running());
        })
        .await;
}

#[tokio::test]
async fn test_handle_edits_and_queries() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let clipboard = MemoryClipboard::new();
            let (handle, task) = spawn(engine(&clipboard, HistoryStore::new(50, Default::default())));

            clipboard.copy_external(ContentPayload::text("alpha"));
            handle.tick().await.unwrap();
            wait_for(&handle, 1).await;
            clipboard.copy_external(ContentPayload::text("beta"));
            handle.tick().await.unwrap();
            let entries = wait_for(&handle, 2).await;
            let (beta, alpha) = (entries[0].id(), entries[1].id());

            assert!(handle.set_pinned(alpha, true).await.unwrap());
            assert!(handle.set_title(beta, "second").await.unwrap());
            assert_eq!(
                handle.entries(Some(HistoryFilter::Pinned), None).await.unwrap()[0].id(),
                alpha
            );
            assert_eq!(handle.search("BET", None).await.unwrap().len(), 1);
            assert_eq!(handle.get(beta).await.unwrap().unwrap().title.as_deref(), Some("second"));
            assert_eq!(handle.entries(None, Some(1)).await.unwrap().len(), 1);

            let prefix = alpha.simple().to_string()[..8].to_string();
            assert_eq!(handle.resolve(prefix).await.unwrap(), vec![alpha]);

            assert!(handle
                .replace_content(beta, ContentPayload::text("edited"), None)
                .await
                .unwrap());
            let edited = handle.get(beta).await.unwrap().unwrap();
            assert_eq!(edited.payload, ContentPayload::text("edited"));

            assert_eq!(handle.delete(vec![beta]).await.unwrap(), 1);
            assert_eq!(handle.get(beta).await.unwrap(), None);

            handle.clear_all().await.unwrap();
            assert!(handle.entries(None, None).await.unwrap().is_empty());

            handle.shutdown().await.unwrap();
            task.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_selection_write_through_handle() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let clipboard = MemoryClipboard::new();
            let (handle, task) = spawn(engine(&clipboard, HistoryStore::new(50, Default::default())));

            for text in ["one", "two"] {
                clipboard.copy_external(ContentPayload::text(text));
                handle.tick().await.unwrap();
            }
            let entries = wait_for(&handle, 2).await;
            for entry in &entries {
                assert!(handle.toggle_selection(entry.id()).await.unwrap());
            }
            assert_eq!(handle.selection().await.unwrap().len(), 2);

            let merged = handle.write_selected().await.unwrap().unwrap();
            assert_eq!(clipboard.content(), Some(ContentPayload::text("two\n\none")));
            assert!(handle.selection().await.unwrap().is_empty());

            // Give the timer a few rounds; the write must not come back as a capture
            tokio::time::sleep(Duration::from_millis(200)).await;
            let entries = handle.entries(None, None).await.unwrap();
            assert_eq!(entries.len(), 3);
            assert_eq!(entries[0].id(), merged);

            let missing = uuid::Uuid::new_v4();
            assert!(matches!(
                handle.write_single(missing).await,
                Err(EngineError::WriteBack(_))
            ));

            handle.shutdown().await.unwrap();
            task.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_flush_persists_through_worker() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let bridge = Arc::new(MemoryStore::new());
            let (mirror, worker) = spawn_worker(bridge.clone());
            let clipboard = MemoryClipboard::new();
            let (handle, task) = spawn(engine(&clipboard, HistoryStore::new(50, mirror)));

            clipboard.copy_external(ContentPayload::text("durable"));
            handle.tick().await.unwrap();
            wait_for(&handle, 1).await;
            handle.flush().await.unwrap();
            assert_eq!(bridge.len().await, 1);

            handle.shutdown().await.unwrap();
            drop(task.await.unwrap());
            worker.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_commands_after_shutdown_fail() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let clipboard = MemoryClipboard::new();
            let (handle, task) = spawn(engine(&clipboard, HistoryStore::new(50, Default::default())));

            handle.shutdown().await.unwrap();
            task.await.unwrap();

            assert!(matches!(handle.tick().await, Err(EngineError::Stopped)));
        })
        .await;
}
