//! Configuration management for ClipKeep
//!
//! This module handles loading, validating, and managing configuration
//! for the capture engine. The engine re-reads the active configuration at the
//! start of every tick, so values published through [`ConfigWatch`] take effect
//! immediately.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Receiving side of the live configuration
pub type ConfigWatch = watch::Receiver<Config>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Clipboard monitoring configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// History configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// Capture filters
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Write-back configuration
    #[serde(default)]
    pub write_back: WriteBackConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Clipboard monitoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Timer period between clipboard polls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Minimum time between two accepted clipboard changes, in seconds
    #[serde(default = "default_monitoring_interval_secs")]
    pub monitoring_interval_secs: f64,

    /// Identifiers of applications whose copies are never captured
    #[serde(default)]
    pub excluded_apps: BTreeSet<String>,

    /// How long after its own write the engine ignores a clipboard change
    #[serde(default = "default_self_write_suppression_ms")]
    pub self_write_suppression_ms: u64,

    /// Age after which an unconsumed self-write guard is dropped
    #[serde(default = "default_self_write_timeout_ms")]
    pub self_write_timeout_ms: u64,
}

/// History configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of entries above which the oldest unpinned ones are evicted
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Number of most recent entries checked for duplicates
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,

    /// Path to SQLite database for history
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

/// Capture filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Payloads larger than this are not captured
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Regular expressions; matching text is never captured
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

/// Write-back configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteBackConfig {
    /// Separator placed between texts when several entries are copied at once
    #[serde(default = "default_text_separator")]
    pub text_separator: String,
}

// Default value functions
fn default_poll_interval_ms() -> u64 {
    250
}

fn default_monitoring_interval_secs() -> f64 {
    0.5
}

fn default_self_write_suppression_ms() -> u64 {
    1_000
}

fn default_self_write_timeout_ms() -> u64 {
    5_000
}

fn default_max_size() -> usize {
    200
}

fn default_dedup_window() -> usize {
    10
}

fn default_database() -> PathBuf {
    PathBuf::from("~/.local/share/clipkeep/history.db")
}

fn default_max_payload_bytes() -> usize {
    crate::clipboard::MAX_CLIPBOARD_SIZE
}

fn default_text_separator() -> String {
    "\n\n".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            monitoring_interval_secs: default_monitoring_interval_secs(),
            excluded_apps: BTreeSet::new(),
            self_write_suppression_ms: default_self_write_suppression_ms(),
            self_write_timeout_ms: default_self_write_timeout_ms(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            dedup_window: default_dedup_window(),
            database: default_database(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            text_separator: default_text_separator(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            history: HistoryConfig::default(),
            capture: CaptureConfig::default(),
            write_back: WriteBackConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.monitoring_interval_secs).unwrap_or(Duration::ZERO)
    }

    pub fn self_write_suppression(&self) -> Duration {
        Duration::from_millis(self.self_write_suppression_ms)
    }

    pub fn self_write_timeout(&self) -> Duration {
        Duration::from_millis(self.self_write_timeout_ms)
    }

    pub fn is_excluded(&self, identifier: &str) -> bool {
        self.excluded_apps.contains(identifier)
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Checks in order:
    /// 1. Path from CLIPKEEP_CONFIG environment variable
    /// 2. ~/.config/clipkeep/config.toml
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = Self::find_config_path() {
            Self::load_from_path(&path)
        } else {
            let mut config = Self::default();
            config.expand_paths();
            Ok(config)
        }
    }

    /// Load configuration with optional custom path
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(toml_str)?;
        config.expand_paths();
        config.validate_config()?;
        Ok(config)
    }

    /// Path of the configuration file that [`Config::load`] would read
    pub fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CLIPKEEP_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        Self::default_config_path().filter(|p| p.exists())
    }

    /// ~/.config/clipkeep/config.toml
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("clipkeep").join("config.toml"))
    }

    /// Expand tilde in paths
    fn expand_paths(&mut self) {
        self.history.database = expand_path(&self.history.database);
    }

    /// Validate configuration values
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        let monitor = &self.monitor;
        if !(50..=10_000).contains(&monitor.poll_interval_ms) {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be between 50 and 10000".to_string(),
            ));
        }
        if !monitor.monitoring_interval_secs.is_finite()
            || !(0.0..=60.0).contains(&monitor.monitoring_interval_secs)
        {
            return Err(ConfigError::Validation(
                "monitoring_interval_secs must be between 0 and 60".to_string(),
            ));
        }
        if monitor.self_write_timeout_ms < monitor.self_write_suppression_ms {
            return Err(ConfigError::Validation(
                "self_write_timeout_ms must not be shorter than self_write_suppression_ms"
                    .to_string(),
            ));
        }

        if !(1..=10_000).contains(&self.history.max_size) {
            return Err(ConfigError::Validation(
                "history max_size must be between 1 and 10000".to_string(),
            ));
        }
        if !(1..=100).contains(&self.history.dedup_window) {
            return Err(ConfigError::Validation(
                "dedup_window must be between 1 and 100".to_string(),
            ));
        }

        if self.capture.max_payload_bytes < 1024 {
            return Err(ConfigError::Validation(
                "max_payload_bytes must be at least 1024 bytes (1KB)".to_string(),
            ));
        }
        if let Err(e) = regex::RegexSet::new(&self.capture.ignore_patterns) {
            return Err(ConfigError::Validation(format!(
                "invalid ignore pattern: {}",
                e
            )));
        }

        Ok(())
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let config_path = Self::default_config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not find config directory",
            ))
        })?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Validate configuration file at given path
    pub fn validate(path: &Path) -> Result<(), ConfigError> {
        Self::load_from_path(path).map(|_| ())
    }

    /// Write the commented example configuration to the default location
    pub fn generate_example_config(force: bool) -> Result<PathBuf, ConfigError> {
        let config_path = Self::default_config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not find config directory",
            ))
        })?;

        if !force && config_path.exists() {
            return Err(ConfigError::Validation(
                "Config file already exists. Use --force to overwrite.".to_string(),
            ));
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, Self::generate_example())?;
        Ok(config_path)
    }

    /// Commented example configuration file
    pub fn generate_example() -> String {
        let config = Config::default();

        format!(
            r#"# ClipKeep Configuration File
# Location: ~/.config/clipkeep/config.toml

# Logging level (trace, debug, info, warn, error)
log_level = "{}"

# Clipboard monitoring
[monitor]
# Milliseconds between clipboard polls
poll_interval_ms = {}
# Minimum seconds between two captured changes; faster changes are dropped
monitoring_interval_secs = {}
# Application identifiers to ignore (bundle ids on macOS, WM_CLASS on X11)
excluded_apps = []
# Own writes are ignored when observed within this many milliseconds
self_write_suppression_ms = {}
# A pending self-write guard is dropped after this many milliseconds
self_write_timeout_ms = {}

# History settings
[history]
# Oldest unpinned entries are evicted above this many entries
max_size = {}
# Number of recent entries checked for duplicates
dedup_window = {}
# Path to history database
database = "{}"

# Capture filters
[capture]
# Largest payload captured, in bytes
max_payload_bytes = {}
# Regular expressions; matching text is never captured
ignore_patterns = []

# Copying entries back to the clipboard
[write_back]
# Separator between texts when several entries are copied together
text_separator = {:?}
"#,
            config.log_level,
            config.monitor.poll_interval_ms,
            config.monitor.monitoring_interval_secs,
            config.monitor.self_write_suppression_ms,
            config.monitor.self_write_timeout_ms,
            config.history.max_size,
            config.history.dedup_window,
            config.history.database.display(),
            config.capture.max_payload_bytes,
            config.write_back.text_separator,
        )
    }

    /// Publish this configuration on a watch channel
    pub fn into_watch(self) -> (watch::Sender<Config>, ConfigWatch) {
        watch::channel(self)
    }
}

/// Expand tilde in path
fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(path_str.as_ref());
    PathBuf::from(expanded.into_owned())
}
