//! Configuration management for bus nodes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryConfig;
use crate::error::{Error, Result};
use crate::protocol::ModuleFlags;
use crate::session::NodeConfig;
use crate::transport::{BackoffConfig, BusConfig};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node identity.
    #[serde(default)]
    pub node: NodeConfig,

    /// Line timing.
    #[serde(default)]
    pub bus: BusConfig,

    /// Listen-before-talk backoff.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Acknowledged delivery.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node.address == self.node.controller {
            return Err(Error::InvalidConfig(format!(
                "Node address {} is the controller address",
                self.node.address
            )));
        }

        if self.bus.baud_rate == 0 {
            return Err(Error::InvalidConfig("Baud rate must be positive".into()));
        }

        if self.bus.settle_time < self.bus.frame_time() {
            return Err(Error::InvalidConfig(format!(
                "Settle time {:?} is shorter than one byte at {} baud",
                self.bus.settle_time, self.bus.baud_rate
            )));
        }

        if self.backoff.min_delay > self.backoff.max_delay {
            return Err(Error::InvalidConfig(
                "Backoff min_delay exceeds max_delay".into(),
            ));
        }

        if self.backoff.max_busy_polls == 0 {
            return Err(Error::InvalidConfig(
                "Backoff max_busy_polls must be positive".into(),
            ));
        }

        if self.delivery.retry_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "Retry interval must be positive".into(),
            ));
        }

        if self.delivery.queue_depth == 0 {
            return Err(Error::InvalidConfig("Queue depth must be positive".into()));
        }

        if self.delivery.max_attempts == Some(0) {
            return Err(Error::InvalidConfig(
                "max_attempts must allow at least one transmission".into(),
            ));
        }

        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "ktane", "ktane-bus").map_or_else(
            || PathBuf::from("ktane-bus.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        let mut flags = ModuleFlags::NONE;
        flags.set(ModuleFlags::TRIGGER);

        Self {
            node: NodeConfig {
                flags,
                ..Default::default()
            },
            delivery: DeliveryConfig {
                max_attempts: Some(20),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
