//! Configuration types for chainsaw.
//!
//! [`ChainsawConfig::load`] reads `~/.config/chainsaw/config.toml` (or an explicit
//! path) layered on top of the embedded defaults. [`ChainsawConfig::defaults`]
//! returns the same defaults without touching the filesystem.

use crate::credentials::Credentials;
use crate::error::ConfigError;
use crate::event::DetailLevel;
use crate::receiver::ReceiverOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[discovery]
enabled      = true
auto_connect = []

[timing]
poll_interval_secs  = 5
retry_interval_secs = 10

[sink]
ring_buffer_size = 16384
detail_level     = 4

# [[receivers]]
# name             = "app"
# file_url         = "file:///var/log/app.log"
# log_format       = "TIMESTAMP LEVEL [THREAD] LOGGER - MESSAGE"
# timestamp_format = "yyyy-MM-dd HH:mm:ss,SSS"
# tailing          = true
"#;

pub const DEFAULT_TIMESTAMP_FORMAT: &str = "yyyy-MM-dd HH:mm:ss,SSS";
pub const DEFAULT_LOG_FORMAT: &str = "MESSAGE";

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChainsawConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
}

/// `[discovery]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_enabled")]
    pub enabled: bool,
    /// instance names connected automatically when they are resolved
    #[serde(default)]
    pub auto_connect: Vec<String>,
}

fn default_discovery_enabled() -> bool { true }

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_discovery_enabled(),
            auto_connect: Vec::new(),
        }
    }
}

/// `[timing]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 { 5 }
fn default_retry_interval_secs() -> u64 { 10 }

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

impl TimingConfig {
    /// driver options for a receiver with the given tailing mode
    pub fn receiver_options(&self, tailing: bool) -> ReceiverOptions {
        let options = if tailing {
            ReceiverOptions::tailing()
        } else {
            ReceiverOptions::single_pass()
        };
        options.with_intervals(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.retry_interval_secs),
        )
    }
}

/// `[sink]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_ring_buffer_size")]
    pub ring_buffer_size: usize,
    #[serde(default = "default_detail_level")]
    pub detail_level: DetailLevel,
}

fn default_ring_buffer_size() -> usize { 16384 }
fn default_detail_level() -> DetailLevel { 4 }

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: default_ring_buffer_size(),
            detail_level: default_detail_level(),
        }
    }
}

/// One `[[receivers]]` entry: a named, manually configured connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReceiverConfig {
    pub name: String,
    #[serde(flatten)]
    pub connection: ConnectionConfig,
}

/// Everything a source and its decoder need. Immutable once a source is started.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    #[serde(rename = "file_url", alias = "fileURL", alias = "fileurl", default)]
    pub uri: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    #[serde(default = "default_tailing")]
    pub tailing: bool,
    #[serde(default)]
    pub filter_expression: Option<String>,
    /// auth context handed to the file system; never read from config files
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub prompt_for_user_info: bool,
    #[serde(default)]
    pub append_non_matches: bool,
}

fn default_log_format() -> String { DEFAULT_LOG_FORMAT.to_string() }
fn default_timestamp_format() -> String { DEFAULT_TIMESTAMP_FORMAT.to_string() }
fn default_tailing() -> bool { true }

impl ConnectionConfig {
    pub fn new(uri: impl Into<String>, log_format: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            log_format: log_format.into(),
            timestamp_format: default_timestamp_format(),
            tailing: default_tailing(),
            filter_expression: None,
            credentials: None,
            prompt_for_user_info: false,
            append_non_matches: false,
        }
    }

    pub fn with_timestamp_format(mut self, pattern: impl Into<String>) -> Self {
        self.timestamp_format = pattern.into();
        self
    }

    pub fn with_tailing(mut self, tailing: bool) -> Self {
        self.tailing = tailing;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

impl Default for ChainsawConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ChainsawConfig {
    /// Load configuration layered on top of the built-in defaults.
    ///
    /// With `None`, reads `~/.config/chainsaw/config.toml`, creating it with the
    /// defaults if it does not exist. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));

        let builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => match config_path() {
                Some(path) => {
                    if !path.exists() {
                        write_default_config(&path)?;
                    }
                    builder.add_source(config::File::from(path.as_path()).required(false))
                }
                None => builder,
            },
        };

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            timing: TimingConfig::default(),
            sink: SinkConfig::default(),
            receivers: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chainsaw").join("config.toml"))
}

fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG.trim_start())?;
    log::info!("Wrote default configuration to {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_str(toml: &str) -> ChainsawConfig {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(toml.as_bytes()).unwrap();
        ChainsawConfig::load(Some(file.path())).unwrap()
    }

    #[test]
    fn test_embedded_defaults_match_code_defaults() {
        let parsed: ChainsawConfig = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(parsed, ChainsawConfig::defaults());
    }

    #[test]
    fn test_defaults() {
        let cfg = ChainsawConfig::defaults();
        assert!(cfg.discovery.enabled);
        assert_eq!(cfg.timing.poll_interval_secs, 5);
        assert_eq!(cfg.timing.retry_interval_secs, 10);
        assert_eq!(cfg.sink.detail_level, 4);
        assert!(cfg.receivers.is_empty());
    }

    #[test]
    fn test_receiver_entries() {
        let cfg = load_str(
            r#"
[discovery]
auto_connect = ["billing"]

[[receivers]]
name = "app"
file_url = "file:///var/log/app.log"
log_format = "TIMESTAMP LEVEL - MESSAGE"
tailing = false
append_non_matches = true
"#,
        );
        assert_eq!(cfg.discovery.auto_connect, vec!["billing"]);
        assert_eq!(cfg.receivers.len(), 1);

        let receiver = &cfg.receivers[0];
        assert_eq!(receiver.name, "app");
        assert_eq!(receiver.connection.uri, "file:///var/log/app.log");
        assert_eq!(receiver.connection.log_format, "TIMESTAMP LEVEL - MESSAGE");
        assert_eq!(receiver.connection.timestamp_format, DEFAULT_TIMESTAMP_FORMAT);
        assert!(!receiver.connection.tailing);
        assert!(receiver.connection.append_non_matches);
        assert!(receiver.connection.credentials.is_none());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(ChainsawConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_receiver_options_from_timing() {
        let timing = TimingConfig {
            poll_interval_secs: 1,
            retry_interval_secs: 2,
        };
        let options = timing.receiver_options(false);
        assert!(!options.tailing);
        assert_eq!(options.poll_interval, Duration::from_secs(1));
        assert_eq!(options.retry_interval, Duration::from_secs(2));
    }
}
