//! Configuration structures for dwin.
//!
//! Configuration is loaded from TOML files; the CLI only adds log verbosity on top.
//! Every section is optional; missing fields fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Sliding window configuration
    #[serde(default)]
    pub window: WindowConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Sliding window configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WindowConfig {
    /// Maximum number of unique events buffered at once
    #[serde(default = "default_size")]
    pub size: usize,

    /// Time-to-live of an event, counted from its first arrival
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,

    /// Number of workers running eviction callbacks
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// What submission does when every worker is busy
    #[serde(default)]
    pub dispatch_mode: DispatchMode,
}

impl WindowConfig {
    /// Create a window configuration with defaults.
    pub fn new() -> Self {
        Self {
            size: default_size(),
            duration_ms: default_duration_ms(),
            pool_size: default_pool_size(),
            dispatch_mode: DispatchMode::default(),
        }
    }

    /// Set the maximum number of buffered events.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the event time-to-live.
    ///
    /// Stored in whole milliseconds: sub-millisecond parts are truncated and
    /// durations beyond `u64::MAX` ms saturate, which `validate` rejects.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Use a blocking worker pool of `pool_size` workers.
    pub fn with_block_pool(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self.dispatch_mode = DispatchMode::Block;
        self
    }

    /// Use a non-blocking worker pool of `pool_size` workers.
    ///
    /// Callbacks that find every worker busy are dropped.
    pub fn with_non_block_pool(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self.dispatch_mode = DispatchMode::Drop;
        self
    }

    /// Set the dispatch mode explicitly.
    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    /// Event time-to-live.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Whether submission waits for a free worker.
    pub fn is_blocking(&self) -> bool {
        self.dispatch_mode == DispatchMode::Block
    }

    /// Validate the window configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.size == 0 {
            return Err(crate::Error::Config("Window size must be positive".into()));
        }

        if self.duration_ms == 0 {
            return Err(crate::Error::Config(
                "Window duration must be positive".into(),
            ));
        }

        if self.duration_ms > MAX_DURATION_MS {
            return Err(crate::Error::Config(format!(
                "Window duration {} ms exceeds the maximum of {} ms",
                self.duration_ms, MAX_DURATION_MS
            )));
        }

        if self.pool_size == 0 {
            return Err(crate::Error::Config("Pool size must be positive".into()));
        }

        if self.pool_size > crate::dispatch::MAX_POOL_SIZE {
            return Err(crate::Error::Config(format!(
                "Pool size {} exceeds the maximum of {}",
                self.pool_size,
                crate::dispatch::MAX_POOL_SIZE
            )));
        }

        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Behaviour of callback submission when the worker pool is saturated.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Wait for a free worker (default). Slow callbacks back-pressure producers.
    #[default]
    Block,
    /// Skip the callback and log the failure
    Drop,
    /// Skip the callback and hand the event back on the rejection channel
    Report,
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Plain text format (default)
    #[default]
    Text,
}

/// Longest accepted event time-to-live: one year.
pub const MAX_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

// Default value functions
fn default_size() -> usize {
    300
}
fn default_duration_ms() -> u64 {
    3000
}
fn default_pool_size() -> usize {
    20
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        self.window.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_window_config() {
        let config = WindowConfig::default();
        assert_eq!(config.size, 300);
        assert_eq!(config.duration(), Duration::from_secs(3));
        assert_eq!(config.pool_size, 20);
        assert_eq!(config.dispatch_mode, DispatchMode::Block);
        assert!(config.is_blocking());
    }

    #[test]
    fn test_window_config_builder() {
        let config = WindowConfig::new()
            .with_size(10)
            .with_duration(Duration::from_millis(1500))
            .with_non_block_pool(3);

        assert_eq!(config.size, 10);
        assert_eq!(config.duration_ms, 1500);
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.dispatch_mode, DispatchMode::Drop);
        assert!(!config.is_blocking());

        let config = config.with_block_pool(5);
        assert_eq!(config.pool_size, 5);
        assert!(config.is_blocking());

        let config = config.with_dispatch_mode(DispatchMode::Report);
        assert_eq!(config.dispatch_mode, DispatchMode::Report);
    }

    #[test]
    fn test_config_validation() {
        assert!(WindowConfig::default().validate().is_ok());
        assert!(WindowConfig::new().with_size(0).validate().is_err());
        assert!(WindowConfig::new()
            .with_duration(Duration::ZERO)
            .validate()
            .is_err());
        assert!(WindowConfig::new().with_block_pool(0).validate().is_err());
        assert!(WindowConfig::new()
            .with_block_pool(crate::dispatch::MAX_POOL_SIZE + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_duration_millisecond_granularity() {
        let config = WindowConfig::new().with_duration(Duration::from_micros(1_999));
        assert_eq!(config.duration_ms, 1);
        assert_eq!(config.duration(), Duration::from_millis(1));

        let config = WindowConfig::new().with_duration(Duration::from_micros(999));
        assert_eq!(config.duration_ms, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_duration_saturates() {
        let config = WindowConfig::new().with_duration(Duration::MAX);
        assert_eq!(config.duration_ms, u64::MAX);
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let config = WindowConfig::new().with_duration(Duration::from_millis(MAX_DURATION_MS));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [window]
            size = 50
            dispatch_mode = "report"

            [monitoring]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.size, 50);
        assert_eq!(config.window.duration_ms, 3000);
        assert_eq!(config.window.pool_size, 20);
        assert_eq!(config.window.dispatch_mode, DispatchMode::Report);
        assert_eq!(config.monitoring.log_format, LogFormat::Json);
        assert_eq!(config.monitoring.log_level, LogLevel::Info);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.window, WindowConfig::default());
    }

    #[test]
    fn test_to_toml_round_trip() {
        let mut config = Config::default();
        config.window = config.window.with_size(7).with_non_block_pool(2);

        let text = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.window, config.window);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]\nsize = 0").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/dwin.toml")).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[test]
    fn test_log_variants() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Debug.as_directive(), "debug");
        assert_eq!(LogFormat::default(), LogFormat::Text);
        assert_ne!(LogFormat::Json, LogFormat::Text);
    }
}
