//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/crewlog/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/crewlog/` (~/.config/crewlog/)
//! - Data: `$XDG_DATA_HOME/crewlog/` (~/.local/share/crewlog/)
//! - State/Logs: `$XDG_STATE_HOME/crewlog/` (~/.local/state/crewlog/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Where session logs are read from
    #[serde(default)]
    pub source: SourceConfig,

    /// Directory watcher timing
    #[serde(default)]
    pub watch: WatchConfig,

    /// Synchronizer tuning
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session log location
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SourceConfig {
    /// Override for the session root directory
    pub root: Option<PathBuf>,
}

impl SourceConfig {
    /// The configured root, or the runtime's project directory for the current home.
    ///
    /// The runtime stores logs under `~/.claude/projects/<encoded path>`, where the
    /// encoded path is the working directory with `/` replaced by `-`.
    pub fn resolve_root(&self) -> PathBuf {
        if let Some(root) = &self.root {
            return root.clone();
        }
        let home = home_dir();
        let encoded = home.to_string_lossy().replace('/', "-");
        home.join(".claude").join("projects").join(encoded)
    }
}

/// Directory watcher configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    /// Quiet period after the last write before a session is re-synced
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How often pending sessions are checked
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_tick_ms() -> u64 {
    500
}

/// Synchronizer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Rows per insert batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Window in which a session counts as running and an agent as active
    #[serde(default = "default_recency_minutes")]
    pub recency_minutes: i64,

    /// Duration given to synthesized trace spans
    #[serde(default = "default_span_placeholder_ms")]
    pub span_placeholder_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            recency_minutes: default_recency_minutes(),
            span_placeholder_ms: default_span_placeholder_ms(),
        }
    }
}

/// Longest accepted synthesized span (one day)
pub const MAX_SPAN_PLACEHOLDER_MS: i64 = 24 * 60 * 60 * 1000;

impl SyncConfig {
    /// Recency window, or `None` when `recency_minutes` is negative or too large
    pub fn recency_window(&self) -> Option<chrono::Duration> {
        if self.recency_minutes < 0 {
            return None;
        }
        chrono::Duration::try_minutes(self.recency_minutes)
    }

    /// Synthesized span length, or `None` outside `0..=MAX_SPAN_PLACEHOLDER_MS`
    pub fn span_placeholder(&self) -> Option<chrono::Duration> {
        if !(0..=MAX_SPAN_PLACEHOLDER_MS).contains(&self.span_placeholder_ms) {
            return None;
        }
        chrono::Duration::try_milliseconds(self.span_placeholder_ms)
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_recency_minutes() -> i64 {
    5
}

fn default_span_placeholder_ms() -> i64 {
    1000
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the watcher or the synchronizer
    pub fn validate(&self) -> Result<()> {
        if self.sync.batch_size == 0 {
            return Err(Error::Config(
                "sync.batch_size must be at least 1".to_string(),
            ));
        }
        if self.watch.tick_ms == 0 {
            return Err(Error::Config("watch.tick_ms must be at least 1".to_string()));
        }
        if self.watch.debounce_ms == 0 {
            return Err(Error::Config(
                "watch.debounce_ms must be at least 1".to_string(),
            ));
        }
        if self.sync.recency_window().is_none() {
            return Err(Error::Config(format!(
                "sync.recency_minutes out of range: {}",
                self.sync.recency_minutes
            )));
        }
        if self.sync.span_placeholder().is_none() {
            return Err(Error::Config(format!(
                "sync.span_placeholder_ms out of range: {}",
                self.sync.span_placeholder_ms
            )));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/crewlog/config.toml` (~/.config/crewlog/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("crewlog").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/crewlog/` (~/.local/share/crewlog/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("crewlog")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/crewlog/` (~/.local/state/crewlog/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("crewlog")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/crewlog/crewlog.db` (~/.local/share/crewlog/crewlog.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("crewlog.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/crewlog/crewlog.log` (~/.local/state/crewlog/crewlog.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("crewlog.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.source.root.is_none());
        assert_eq!(config.watch.debounce(), Duration::from_secs(2));
        assert_eq!(config.watch.tick(), Duration::from_millis(500));
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.sync.recency_minutes, 5);
        assert_eq!(config.sync.span_placeholder_ms, 1000);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[source]
root = "/tmp/sessions"

[watch]
debounce_ms = 750

[sync]
batch_size = 25

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.source.resolve_root(), PathBuf::from("/tmp/sessions"));
        assert_eq!(config.watch.debounce_ms, 750);
        assert_eq!(config.watch.tick_ms, 500);
        assert_eq!(config.sync.batch_size, 25);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_zero_batch() {
        let config = Config {
            sync: SyncConfig {
                batch_size: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_out_of_range_durations() {
        let mut config = Config::default();
        config.sync.recency_minutes = i64::MAX / 2;
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("recency_minutes")));

        config.sync.recency_minutes = -1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.span_placeholder_ms = MAX_SPAN_PLACEHOLDER_MS + 1;
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("span_placeholder_ms")));

        // a year-long window is unusual but representable
        config.sync.span_placeholder_ms = 1000;
        config.sync.recency_minutes = 525_600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watch]\ntick_ms = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        std::fs::write(&path, "[watch]\ntick_ms = 250\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.watch.tick(), Duration::from_millis(250));
    }

    #[test]
    fn test_default_root_is_under_claude_projects() {
        let root = SourceConfig::default().resolve_root();
        assert!(root.to_string_lossy().contains(".claude/projects"));
    }
}
