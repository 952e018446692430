//! # ClipKeep
//!
//! Background clipboard-history engine for macOS and Linux.
//!
//! ClipKeep watches the system clipboard, records every distinct change as a
//! history entry, classifies and deduplicates it, and can put stored entries
//! (alone or merged) back on the clipboard without recording its own writes
//! a second time.
//!
//! The pieces, leaf first:
//! - [`clipboard`]: content model and the clipboard backends
//! - [`monitor`]: change detection and capture filters
//! - [`history`]: entries, classification, dedup, the bounded store and its
//!   SQLite backend
//! - [`persistence`]: fire-and-forget mirroring of history changes
//! - [`writeback`]: merging and writing entries back with fallback
//! - [`engine`]: the tick loop tying it all together, run as a single-owner task

pub mod cli;
pub mod clipboard;
pub mod config;
pub mod engine;
pub mod history;
pub mod monitor;
pub mod persistence;
pub mod writeback;

pub use clipboard::{ClipboardSource, ContentPayload, SourceApp};
pub use config::Config;
pub use engine::{Engine, EngineHandle, HistoryEvent, TickOutcome};
pub use history::{Category, HistoryEntry, HistoryStore};

/// Result type alias for ClipKeep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from setting up an engine on the real clipboard
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] engine::EngineError),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Target triple and build date, recorded by the build script
pub const BUILD_TARGET: &str = env!("TARGET");
pub const BUILD_DATE: &str = env!("BUILD_DATE");
