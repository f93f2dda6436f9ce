//! Client configuration.
//!
//! The configuration is stored in TOML format and defines:
//! - Server settings (host, port, database index, password)
//! - Client identity (hostname and program name forming the origin)
//! - Retry settings for transient connection failures

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "SMAX_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    ValidationError(String),

    #[error("Path does not exist: {0}")]
    PathNotFound(PathBuf),
}

/// Connection settings for the SMA-X server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Database index on the server.
    #[serde(default)]
    pub db: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    6379
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db: 0,
            password: None,
        }
    }
}

/// Identity and local resource settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Host part of the origin; detected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Program part of the origin; the executable name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_name: Option<String>,

    /// Bounded queue size between a callback worker's listener and dispatcher.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

const fn default_channel_capacity() -> usize {
    256
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            program_name: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Backoff settings for retries and reconnects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

const fn default_max_attempts() -> usize {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    8000
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// The policy these settings describe.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SmaxConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl SmaxConfig {
    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::PathNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: SmaxConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("server.host is empty".into()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError("server.port must be non-zero".into()));
        }
        if self.server.db < 0 {
            return Err(ConfigError::ValidationError("server.db must not be negative".into()));
        }
        if self.client.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "client.channel_capacity must be at least 1".into(),
            ));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be at least 1.0".into(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    /// Locate and load the configuration for this process.
    ///
    /// Uses `$SMAX_CONFIG` if set, then `<config dir>/smax/config.toml`, then
    /// defaults, and finally applies the `SMAX_HOST`, `SMAX_PORT` and `SMAX_DB`
    /// environment overrides.
    pub fn discover() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let user = directories::ProjectDirs::from("edu", "sma", "smax")
            .map(|dirs| dirs.config_dir().join("config.toml"));
        let mut config = match Self::resolve_config_path(explicit, user) {
            Some(path) => {
                info!("Loading SMA-X configuration from {}", path.display());
                Self::load(&path)?
            }
            None => {
                debug!("No SMA-X configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Pick the configuration file to load (pure function).
    ///
    /// An explicit path always wins, even if missing, so that a typo surfaces
    /// as [`ConfigError::PathNotFound`]. The user path is used only if it exists.
    #[must_use]
    pub fn resolve_config_path(explicit: Option<PathBuf>, user: Option<PathBuf>) -> Option<PathBuf> {
        explicit.or_else(|| user.filter(|p| p.exists()))
    }

    /// Apply `SMAX_HOST`, `SMAX_PORT` and `SMAX_DB` through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SMAX_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SMAX_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("SMAX_PORT '{port}' is not a port")))?;
        }
        if let Some(db) = lookup("SMAX_DB") {
            self.server.db = db
                .trim()
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("SMAX_DB '{db}' is not an index")))?;
        }
        self.validate()
    }

    /// Connection URL for the configured server.
    #[must_use]
    pub fn redis_url(&self) -> String {
        let auth = self
            .server
            .password
            .as_ref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();
        format!(
            "redis://{auth}{}:{}/{}",
            self.server.host, self.server.port, self.server.db
        )
    }

    /// Writer identity `host:program` stamped on every shared value.
    #[must_use]
    pub fn origin(&self) -> String {
        let executable = std::env::current_exe().ok();
        self.resolve_origin(std::env::var("HOSTNAME").ok(), executable.as_deref())
    }

    /// Build the origin from explicit inputs (pure function).
    #[must_use]
    pub fn resolve_origin(&self, env_hostname: Option<String>, executable: Option<&Path>) -> String {
        let host = self
            .client
            .hostname
            .clone()
            .or(env_hostname)
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        let program = self.client.program_name.clone().or_else(|| {
            executable
                .and_then(Path::file_stem)
                .map(|stem| stem.to_string_lossy().into_owned())
        });
        match program {
            Some(program) if !program.is_empty() => format!("{host}:{program}"),
            _ => host,
        }
    }
}
