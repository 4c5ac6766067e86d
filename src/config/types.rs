//! Core configuration types and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session limits and idle cleanup.
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Dispatch pacing and retry defaults.
    #[serde(default)]
    pub messages: MessagesConfig,
    /// Media upload limits.
    #[serde(default)]
    pub uploads: UploadsConfig,
    /// Messaging client backend.
    #[serde(default)]
    pub client: ClientConfig,
    /// Log level and format.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    ///
    /// Only used for the implicit default path: an explicitly named file
    /// that does not exist is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(path.as_ref()) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP API binds to (default: 127.0.0.1:3000).
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Prometheus metrics HTTP port. Absent or 0 disables the listener.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_port: None,
        }
    }
}

/// Session limits and idle cleanup.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Maximum number of live (non-destroyed) sessions (default: 50).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Minutes between idle sweeps (default: 15).
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u64,
    /// Minutes of inactivity before a session is destroyed (default: 60).
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    /// Seconds allowed for closing a client handle (default: 10).
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
    /// Seconds allowed for opening a client connection (default: 120).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl SessionsConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes * 60)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
            timeout_minutes: default_timeout_minutes(),
            close_timeout_secs: default_close_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Dispatch pacing and retry defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    /// Pause between recipients when a request gives no delay (default: 8000).
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,
    /// Retries per recipient after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds before a single send attempt counts as failed (default: 30).
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Largest recipient list accepted in one job (default: 1000).
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,
}

impl MessagesConfig {
    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            max_retries: default_max_retries(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            max_recipients: default_max_recipients(),
        }
    }
}

/// Media upload limits.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadsConfig {
    /// Largest accepted attachment in bytes (default: 10 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    /// Accepted attachment MIME types.
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
}

impl UploadsConfig {
    pub fn allows(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mime_type))
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            allowed_mime_types: default_allowed_mime_types(),
        }
    }
}

/// Available messaging client backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientBackend {
    /// In-process loopback client.
    #[default]
    Loopback,
}

/// Messaging client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub backend: ClientBackend,
    /// Seconds before a loopback connection pairs by itself. 0 = never.
    #[serde(default = "default_auto_pair_secs")]
    pub auto_pair_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: ClientBackend::default(),
            auto_pair_secs: default_auto_pair_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "simple" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Logging configuration. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
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
