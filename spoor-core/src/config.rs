//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/spoor/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/spoor/` (~/.config/spoor/)
//! - Data: `$XDG_DATA_HOME/spoor/` (~/.local/share/spoor/)
//! - State/Logs: `$XDG_STATE_HOME/spoor/` (~/.local/state/spoor/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

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

/// Top-level configuration file contents
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Tracker configuration
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bulk request encoding, selected at tracker construction.
///
/// Two encodings exist for compatibility with different server
/// generations. The choice does not affect single-event requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkEncoding {
    /// `{"requests": ["?k=v&...", ...], "token_auth": ...}`
    #[default]
    Current,
    /// Pre-2.0 servers: `{"events": [{k: v, ...}, ...], "token_auth": ...}`
    Legacy,
}

/// Tracker configuration
///
/// Can be deserialized from the `[tracker]` section of the config file
/// or constructed programmatically via [`TrackerConfig::new`].
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Base URL of the collection server, without the tracking endpoint
    /// path component
    #[serde(default)]
    pub base_url: String,

    /// Site id issued by the collection server for this application
    #[serde(default)]
    pub site_id: String,

    /// Authentication token issued by the collection server. Required
    /// for bulk requests; without it batches fall back to sequential
    /// single-event requests.
    pub authentication_token: Option<String>,

    /// Prefix screen/event/exception/social action paths by type.
    /// Allows logical separation and grouping in the server UI.
    #[serde(default = "default_true")]
    pub prefixing_enabled: bool,

    /// Run the tracker in debug mode: batches are logged instead of
    /// sent, then treated as delivered.
    #[serde(default)]
    pub debug: bool,

    /// Opt out of tracking. No events are queued. Once changed at
    /// runtime the value is persisted and wins over this default.
    #[serde(default)]
    pub opt_out: bool,

    /// The probability, in percent, of an event being queued rather
    /// than discarded. Value 1-100, default 100.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u8,

    /// Stamp host-supplied coordinates on events. The tracker never
    /// reads sensors itself; see `Tracker::update_location`.
    #[serde(default)]
    pub include_location: bool,

    /// Force a new session when the next event is queued (one-shot)
    #[serde(default)]
    pub session_start: bool,

    /// A new session starts when more than this many seconds pass
    /// between events. Default 120.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Dispatch timer interval in seconds. Negative disables the timer
    /// (manual dispatch only), zero dispatches right after each
    /// enqueue, positive runs a periodic timer. Default 120.
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_secs: i64,

    /// Maximum number of queued events. Further events are dropped
    /// until dispatch frees space. Default 500.
    #[serde(default = "default_max_queued_events")]
    pub max_queued_events: u64,

    /// How many events go into each request. Default 20.
    #[serde(default = "default_events_per_request")]
    pub events_per_request: usize,

    /// Cap on batches drained per dispatch cycle; `None` keeps
    /// draining until the queue is empty or a request fails.
    #[serde(default)]
    pub max_batches_per_cycle: Option<u32>,

    /// Bulk request encoding
    #[serde(default)]
    pub bulk_encoding: BulkEncoding,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Application name, sent as custom variable index 2
    pub app_name: Option<String>,

    /// Application version, sent as custom variable index 3
    pub app_version: Option<String>,

    /// Queue database location; defaults to the XDG data dir
    pub database_path: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl TrackerConfig {
    /// Tracker configuration with all defaults for the given server
    pub fn new(base_url: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            site_id: site_id.into(),
            authentication_token: None,
            prefixing_enabled: default_true(),
            debug: false,
            opt_out: false,
            sample_rate: default_sample_rate(),
            include_location: false,
            session_start: false,
            session_timeout_secs: default_session_timeout(),
            dispatch_interval_secs: default_dispatch_interval(),
            max_queued_events: default_max_queued_events(),
            events_per_request: default_events_per_request(),
            max_batches_per_cycle: None,
            bulk_encoding: BulkEncoding::default(),
            request_timeout_secs: default_request_timeout(),
            app_name: None,
            app_version: None,
            database_path: None,
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::Config("base_url is required".to_string()));
        }
        if self.site_id.is_empty() {
            return Err(Error::Config("site_id is required".to_string()));
        }
        if self.sample_rate > 100 {
            return Err(Error::Config(
                "sample_rate must be between 1 and 100".to_string(),
            ));
        }
        if self.events_per_request == 0 {
            return Err(Error::Config(
                "events_per_request must be at least 1".to_string(),
            ));
        }
        if self.max_queued_events == 0 {
            return Err(Error::Config(
                "max_queued_events must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_sample_rate() -> u8 {
    100
}

fn default_session_timeout() -> u64 {
    120
}

fn default_dispatch_interval() -> i64 {
    120
}

fn default_max_queued_events() -> u64 {
    500
}

fn default_events_per_request() -> usize {
    20
}

fn default_request_timeout() -> u64 {
    30
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
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/spoor/config.toml` (~/.config/spoor/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("spoor").join("config.toml")
    }

    /// Returns the data directory path (for the queue database)
    ///
    /// `$XDG_DATA_HOME/spoor/` (~/.local/share/spoor/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("spoor")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/spoor/` (~/.local/state/spoor/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("spoor")
    }

    /// Returns the queue database file path
    ///
    /// `$XDG_DATA_HOME/spoor/queue.db` (~/.local/share/spoor/queue.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("queue.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/spoor/spoor.log` (~/.local/state/spoor/spoor.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("spoor.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_config_defaults() {
        let config = TrackerConfig::new("https://stats.example.com", "7");
        assert!(config.prefixing_enabled);
        assert!(!config.debug);
        assert!(!config.opt_out);
        assert_eq!(config.sample_rate, 100);
        assert_eq!(config.session_timeout_secs, 120);
        assert_eq!(config.dispatch_interval_secs, 120);
        assert_eq!(config.max_queued_events, 500);
        assert_eq!(config.events_per_request, 20);
        assert_eq!(config.bulk_encoding, BulkEncoding::Current);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tracker_config_validation() {
        assert!(TrackerConfig::new("", "7").validate().is_err());
        assert!(TrackerConfig::new("https://stats.example.com", "")
            .validate()
            .is_err());

        let mut config = TrackerConfig::new("https://stats.example.com", "7");
        config.sample_rate = 101;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::new("https://stats.example.com", "7");
        config.events_per_request = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[tracker]
base_url = "https://stats.example.com"
site_id = "42"
authentication_token = "abcdef0123456789"
dispatch_interval_secs = -1
events_per_request = 30
bulk_encoding = "legacy"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.tracker.base_url, "https://stats.example.com");
        assert_eq!(config.tracker.site_id, "42");
        assert_eq!(
            config.tracker.authentication_token.as_deref(),
            Some("abcdef0123456789")
        );
        assert_eq!(config.tracker.dispatch_interval_secs, -1);
        assert_eq!(config.tracker.events_per_request, 30);
        assert_eq!(config.tracker.bulk_encoding, BulkEncoding::Legacy);
        assert_eq!(config.logging.level, "debug");
        assert!(config.tracker.validate().is_ok());
    }

    #[test]
    fn test_config_paths() {
        assert!(Config::database_path().ends_with("spoor/queue.db"));
        assert!(Config::log_path().ends_with("spoor/spoor.log"));
    }
}
