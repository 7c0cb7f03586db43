//! YAML configuration shared by the server and the client.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::time::Duration;

use crate::error::ConfigError;
use crate::task::{TaskPolicy, DEFAULT_MAX_DURATION, HEALTH_INTERVAL, SPINNER_INTERVAL};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listener address. The section name is what existing config files use.
    #[serde(default)]
    pub grpc: ListenConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    50051
}

/// Task timing, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
    #[serde(default = "default_spinner_interval_ms")]
    pub spinner_interval_ms: u64,
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
    #[serde(default = "default_exit_delay_ms")]
    pub exit_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: default_max_duration_ms(),
            spinner_interval_ms: default_spinner_interval_ms(),
            health_interval_ms: default_health_interval_ms(),
            exit_delay_ms: default_exit_delay_ms(),
        }
    }
}

fn default_max_duration_ms() -> u64 {
    DEFAULT_MAX_DURATION.as_millis() as u64
}

fn default_spinner_interval_ms() -> u64 {
    SPINNER_INTERVAL.as_millis() as u64
}

fn default_health_interval_ms() -> u64 {
    HEALTH_INTERVAL.as_millis() as u64
}

fn default_exit_delay_ms() -> u64 {
    200
}

impl SessionConfig {
    pub fn spinner_policy(&self) -> TaskPolicy {
        TaskPolicy {
            max_duration: Duration::from_millis(self.max_duration_ms),
            tick_interval: Duration::from_millis(self.spinner_interval_ms),
        }
    }

    pub fn health_policy(&self) -> TaskPolicy {
        TaskPolicy {
            max_duration: Duration::from_millis(self.max_duration_ms),
            tick_interval: Duration::from_millis(self.health_interval_ms),
        }
    }

    pub fn exit_delay(&self) -> Duration {
        Duration::from_millis(self.exit_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error, off. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file is a valid "all defaults" config.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grpc.host.trim().is_empty() {
            return Err(ConfigError::Invalid("grpc.host is empty".into()));
        }
        if self.session.spinner_interval_ms == 0 || self.session.health_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick intervals must be at least 1ms".into(),
            ));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.grpc.host, self.grpc.port)
    }
}

/// `--config` wins, then `FLEET_CONFIG`, then `config.yaml`.
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    cli.or_else(|| std::env::var_os("FLEET_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
