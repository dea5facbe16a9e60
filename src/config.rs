//! Streaming configuration management.
//!
//! The daemon reads an optional TOML file (see `--config`); every field has
//! a default so a missing file or a partial file is never fatal.
//!
//! ```toml
//! [server]
//! port = 9850
//!
//! [reconnection]
//! grace_period_secs = 300
//! max_missed_events = 500
//! ```

use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Hard cap on events held in one client's pending batch
pub const DEFAULT_MAX_BATCH_SIZE: usize = 20;

/// Payloads below this size are never compressed
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Compressed form is used only when it is at most this fraction of the raw size
pub const DEFAULT_COMPRESSION_RATIO: f64 = 0.8;

/// Stream-engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamingConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Batching settings
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Compression settings
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Grace period and missed-event retention
    #[serde(default)]
    pub reconnection: ReconnectionConfig,

    /// Rate-limit window
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9850
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Pending events that force an immediate flush
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

/// Compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_threshold_bytes")]
    pub threshold_bytes: usize,
    #[serde(default = "default_max_ratio")]
    pub max_ratio: f64,
}

fn default_threshold_bytes() -> usize {
    DEFAULT_COMPRESSION_THRESHOLD
}

fn default_max_ratio() -> f64 {
    DEFAULT_COMPRESSION_RATIO
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: default_threshold_bytes(),
            max_ratio: default_max_ratio(),
        }
    }
}

/// Reconnection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    /// How long a disconnected session is retained
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Missed-event buffer cap per session (oldest dropped)
    #[serde(default = "default_max_missed_events")]
    pub max_missed_events: usize,
    /// How often expired sessions are swept
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_grace_period_secs() -> u64 {
    300
}

fn default_max_missed_events() -> usize {
    500
}

fn default_purge_interval_secs() -> u64 {
    30
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            max_missed_events: default_max_missed_events(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

impl ReconnectionConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

/// Rate-limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sliding window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_window_ms() -> u64 {
    1000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl StreamingConfig {
    /// Load configuration from a specific path.
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| StreamError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batching.max_batch_size == 0 {
            return Err(StreamError::Config {
                message: "batching.max_batch_size must be at least 1".to_string(),
            });
        }
        if !(self.compression.max_ratio > 0.0 && self.compression.max_ratio <= 1.0) {
            return Err(StreamError::Config {
                message: format!(
                    "compression.max_ratio must be in (0, 1], got {}",
                    self.compression.max_ratio
                ),
            });
        }
        if self.reconnection.grace_period_secs == 0 {
            return Err(StreamError::Config {
                message: "reconnection.grace_period_secs must be positive".to_string(),
            });
        }
        if self.rate_limit.window_ms == 0 {
            return Err(StreamError::Config {
                message: "rate_limit.window_ms must be positive".to_string(),
            });
        }
        Ok(())
    }
}
