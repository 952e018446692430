use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::LocalSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::{self, Engine, HistoryEvent};
use crate::history::{Category, HistoryEntry, HistoryFilter, HistoryStore, SqliteStore};
use crate::persistence::{self, MemoryStore, PersistenceBridge, PersistenceMirror};

pub mod history_picker;

const PREVIEW_CHARS: usize = 60;

#[derive(Parser)]
#[command(name = "clipkeep")]
#[command(about = "Clipboard history that runs in the background")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Watch the clipboard and record history until interrupted")]
    Run {
        /// Keep history in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    #[command(about = "Show clipboard history")]
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(long)]
        category: Option<Category>,

        #[arg(long)]
        pinned: bool,

        /// Only entries captured today
        #[arg(long)]
        today: bool,

        #[arg(long)]
        json: bool,

        #[arg(short, long)]
        interactive: bool,
    },

    #[command(about = "Search history text and file names")]
    Search {
        query: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    #[command(about = "Pin an entry so it is never evicted")]
    Pin { id: String },

    #[command(about = "Unpin an entry")]
    Unpin { id: String },

    #[command(about = "Set an entry's title, or clear it when no text is given")]
    Title { id: String, text: Option<String> },

    #[command(about = "Delete entries")]
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    #[command(about = "Delete all history, pinned entries included")]
    Clear,

    #[command(about = "Copy one entry, or several merged, back to the clipboard")]
    Copy {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Generate example configuration")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate configuration")]
    Validate,

    #[command(about = "Print the configuration file location")]
    Path,
}

pub struct CliHandler {
    config: Config,
    config_path: Option<PathBuf>,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config =
            Config::load_config(config_path.as_deref()).context("Failed to load configuration")?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn handle_command(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Run { ephemeral } => self.run(ephemeral).await,
            Commands::History {
                limit,
                category,
                pinned,
                today,
                json,
                interactive,
            } => {
                if interactive {
                    self.show_interactive_history().await
                } else {
                    let mut filters = Vec::new();
                    if let Some(category) = category {
                        filters.push(HistoryFilter::Category(category));
                    }
                    if pinned {
                        filters.push(HistoryFilter::Pinned);
                    }
                    if today {
                        filters.push(HistoryFilter::today());
                    }
                    self.show_history(&filters, limit, json).await
                }
            }
            Commands::Search { query, limit } => self.search(&query, limit).await,
            Commands::Pin { id } => self.set_pinned(&id, true).await,
            Commands::Unpin { id } => self.set_pinned(&id, false).await,
            Commands::Title { id, text } => self.set_title(&id, text.as_deref()).await,
            Commands::Delete { ids } => self.delete(&ids).await,
            Commands::Clear => self.clear().await,
            Commands::Copy { ids } => self.copy(&ids).await,
            Commands::Config { action } => self.handle_config_action(action),
        }
    }

    async fn load_entries(&self) -> Result<(Arc<SqliteStore>, Vec<HistoryEntry>)> {
        let path = &self.config.history.database;
        let db = Arc::new(
            SqliteStore::open(path)
                .with_context(|| format!("Failed to open history database {}", path.display()))?,
        );
        let entries = db.fetch_all().await.context("Failed to read history")?;
        Ok((db, entries))
    }

    /// Load the stored history into a store mirroring back to the database
    async fn open_history(&self) -> Result<HistoryStore> {
        let (db, entries) = self.load_entries().await?;
        let (mirror, _worker) = persistence::spawn_worker(db);
        Ok(HistoryStore::with_entries(
            entries,
            self.config.history.max_size,
            mirror,
        ))
    }

    /// Read-only view of the stored history; nothing is evicted or written
    async fn browse_history(&self) -> Result<HistoryStore> {
        let (_db, entries) = self.load_entries().await?;
        let max_size = entries.len().max(self.config.history.max_size);
        Ok(HistoryStore::with_entries(
            entries,
            max_size,
            PersistenceMirror::disabled(),
        ))
    }

    async fn run(&self, ephemeral: bool) -> Result<()> {
        info!("Starting ClipKeep");

        let bridge: Arc<dyn PersistenceBridge> = if ephemeral {
            info!("Running with in-memory history");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(SqliteStore::open(&self.config.history.database).with_context(|| {
                format!(
                    "Failed to open history database {}",
                    self.config.history.database.display()
                )
            })?)
        };

        let entries = persistence::fetch_or_empty(bridge.as_ref()).await;
        let (mirror, worker) = persistence::spawn_worker(bridge);
        let store = HistoryStore::with_entries(entries, self.config.history.max_size, mirror);

        let (config_tx, config_rx) = self.config.clone().into_watch();
        let engine = Engine::with_system_clipboard(store, config_rx)?;

        let local = LocalSet::new();
        local
            .run_until(async move {
                let (handle, task) = engine::spawn(engine);

                let mut events = handle.subscribe();
                tokio::task::spawn_local(async move {
                    while let Ok(event) = events.recv().await {
                        if let HistoryEvent::Inserted(id) = event {
                            info!("Recorded clipboard entry {}", id.simple());
                        }
                    }
                });

                self.wait_for_shutdown(&config_tx).await?;

                handle.shutdown().await?;
                let engine = task.await.context("Engine task failed")?;
                if let Err(e) = engine.store().mirror().flush().await {
                    error!("Some history changes were not saved: {}", e);
                }
                drop(engine);
                Ok::<_, anyhow::Error>(())
            })
            .await?;

        // The worker exits once the engine's mirror is gone.
        worker.await.context("Persistence worker failed")?;
        info!("ClipKeep stopped");
        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_shutdown(&self, config_tx: &watch::Sender<Config>) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for Ctrl-C")?;
                    info!("Received Ctrl-C, shutting down");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                    return Ok(());
                }
                _ = sighup.recv() => self.reload_config(config_tx),
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_shutdown(&self, _config_tx: &watch::Sender<Config>) -> Result<()> {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Received Ctrl-C, shutting down");
        Ok(())
    }

    fn reload_config(&self, config_tx: &watch::Sender<Config>) {
        match Config::load_config(self.config_path.as_deref()) {
            Ok(config) => {
                info!("Configuration reloaded");
                config_tx.send_replace(config);
            }
            Err(e) => warn!("Keeping current configuration: {}", e),
        }
    }

    async fn show_history(&self, filters: &[HistoryFilter], limit: usize, json: bool) -> Result<()> {
        let store = self.browse_history().await?;
        let entries: Vec<&HistoryEntry> = store
            .entries()
            .iter()
            .filter(|entry| filters.iter().all(|f| f.matches(entry)))
            .take(limit)
            .collect();

        if json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        if entries.is_empty() {
            println!("No clipboard history found");
            return Ok(());
        }

        println!("Clipboard History (showing {} entries):", entries.len());
        print_entries(&entries);
        Ok(())
    }

    async fn show_interactive_history(&self) -> Result<()> {
        let mut store = self.open_history().await?;
        if store.is_empty() {
            println!("No clipboard history found");
            return Ok(());
        }

        let chosen = history_picker::HistoryPicker::new(&mut store).show()?;
        match chosen {
            Some(ids) => self.write_back(store, &ids).await,
            None => persist(&store).await,
        }
    }

    async fn search(&self, query: &str, limit: usize) -> Result<()> {
        let store = self.browse_history().await?;
        let results: Vec<&HistoryEntry> = store.search(query).into_iter().take(limit).collect();

        if results.is_empty() {
            println!("No entries match '{}'", query);
        } else {
            print_entries(&results);
        }
        Ok(())
    }

    async fn set_pinned(&self, prefix: &str, pinned: bool) -> Result<()> {
        let mut store = self.open_history().await?;
        let id = resolve(&store, prefix)?;
        store.set_pinned(id, pinned);
        persist(&store).await?;

        println!("{} {}", if pinned { "Pinned" } else { "Unpinned" }, short(id));
        Ok(())
    }

    async fn set_title(&self, prefix: &str, title: Option<&str>) -> Result<()> {
        let mut store = self.open_history().await?;
        let id = resolve(&store, prefix)?;
        store.set_title(id, title.unwrap_or_default());
        persist(&store).await?;

        match store.get(id).and_then(|e| e.title.as_deref()) {
            Some(title) => println!("Titled {} \"{}\"", short(id), title),
            None => println!("Cleared title of {}", short(id)),
        }
        Ok(())
    }

    async fn delete(&self, prefixes: &[String]) -> Result<()> {
        let mut store = self.open_history().await?;
        let ids = prefixes
            .iter()
            .map(|prefix| resolve(&store, prefix))
            .collect::<Result<Vec<_>>>()?;

        let removed = store.delete(&ids);
        persist(&store).await?;
        println!("Deleted {} entries", removed);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut store = self.open_history().await?;
        let count = store.len();
        store.clear_all();
        persist(&store).await?;
        println!("Cleared {} entries", count);
        Ok(())
    }

    async fn copy(&self, prefixes: &[String]) -> Result<()> {
        let store = self.open_history().await?;
        let ids = prefixes
            .iter()
            .map(|prefix| resolve(&store, prefix))
            .collect::<Result<Vec<_>>>()?;
        self.write_back(store, &ids).await
    }

    async fn write_back(&self, store: HistoryStore, ids: &[Uuid]) -> Result<()> {
        let (_config_tx, config_rx) = self.config.clone().into_watch();
        let mut engine = Engine::with_system_clipboard(store, config_rx)?;

        match ids {
            [] => bail!("Nothing selected"),
            [id] => {
                let written = engine.write_single(*id)?;
                println!("Copied {} to the clipboard", written.preview(PREVIEW_CHARS));
            }
            ids => {
                let id = engine.write_multiple(ids)?;
                let label = engine
                    .store()
                    .get(id)
                    .map(|entry| entry.payload.preview(PREVIEW_CHARS))
                    .unwrap_or_default();
                println!("Copied {} entries to the clipboard: {}", ids.len(), label);
            }
        }
        persist(engine.store()).await
    }

    fn handle_config_action(&self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                println!("{}", toml::to_string_pretty(&self.config)?);
            }
            ConfigAction::Init { force } => {
                let path = Config::generate_example_config(force)?;
                println!("Example configuration written to {}", path.display());
            }
            ConfigAction::Validate => {
                // Loading in CliHandler::new() already validated it
                match self.config_path.clone().or_else(Config::find_config_path) {
                    Some(path) => println!("Configuration {} is valid", path.display()),
                    None => println!("No configuration file found, using defaults"),
                }
            }
            ConfigAction::Path => match self.config_path.clone().or_else(Config::default_config_path) {
                Some(path) => println!("{}", path.display()),
                None => bail!("Could not determine the configuration directory"),
            },
        }
        Ok(())
    }
}

/// Wait for the database to catch up with the store's changes
async fn persist(store: &HistoryStore) -> Result<()> {
    store
        .mirror()
        .flush()
        .await
        .context("Failed to save history changes")
}

fn resolve(store: &HistoryStore, prefix: &str) -> Result<Uuid> {
    match store.resolve_prefix(prefix).as_slice() {
        [] => bail!("No history entry matches '{}'", prefix),
        [id] => Ok(*id),
        many => bail!("'{}' is ambiguous: {} entries match", prefix, many.len()),
    }
}

fn short(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn print_entries(entries: &[&HistoryEntry]) {
    for entry in entries {
        println!(
            "{} {} {:<7} {} {}",
            entry.short_id(),
            entry.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            entry.category(),
            if entry.is_pinned { "*" } else { " " },
            entry.label(PREVIEW_CHARS)
        );
    }
}
