//! Connection configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then environment variables.
//!
//! ```toml
//! # ~/.config/boss/config.toml
//! socket_path = "/run/boss/boss.sock"
//! request_timeout_ms = 10000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default daemon socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/boss.sock";

/// Environment variable overriding the daemon socket path
pub const SOCKET_ENV: &str = "BOSS_SOCKET";

/// Environment variable overriding the request timeout, in milliseconds
pub const REQUEST_TIMEOUT_ENV: &str = "BOSS_REQUEST_TIMEOUT_MS";

/// Configuration for a daemon connection.
///
/// # Example
///
/// ```rust
/// use boss_client::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig {
///     socket_path: std::path::PathBuf::from("/tmp/my-boss.sock"),
///     request_timeout: Duration::from_secs(5),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Path to the Unix socket where the daemon listens.
    pub socket_path: PathBuf,

    /// Bound on connecting to the daemon or to a process control socket.
    pub connect_timeout: Duration,

    /// Bound on a single daemon API call.
    pub request_timeout: Duration,

    /// Capacity of the event channels; slower subscribers lag.
    pub event_buffer: usize,

    /// How often the registry is reconciled against a fresh process list.
    pub reconcile_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            event_buffer: 256,
            reconcile_interval: Duration::from_secs(10),
        }
    }
}

/// On-disk form. Every field is optional; absent fields keep the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    event_buffer: Option<usize>,
    reconcile_interval_ms: Option<u64>,
}

/// Errors loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
}

impl ConnectionConfig {
    /// Default location of the config file, `$XDG_CONFIG_HOME/boss/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("boss").join("config.toml"))
    }

    /// Loads the layered configuration.
    ///
    /// With `path` set, the file must exist. Without it, the default path is
    /// used if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or an
    /// environment override is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match path {
            Some(path) => config.apply_file(path)?,
            None => {
                if let Some(path) = Self::default_path().filter(|p| p.exists()) {
                    config.apply_file(&path)?;
                }
            }
        }

        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Parses TOML text and applies its fields over `self`.
    pub fn apply_toml(&mut self, text: &str, origin: &Path) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;

        if let Some(socket_path) = file.socket_path {
            self.socket_path = socket_path;
        }
        if let Some(ms) = file.connect_timeout_ms {
            self.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(buffer) = file.event_buffer {
            self.event_buffer = buffer.max(1);
        }
        if let Some(ms) = file.reconcile_interval_ms {
            self.reconcile_interval = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded config file");
        self.apply_toml(&text, path)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(socket) = lookup(SOCKET_ENV).filter(|s| !s.is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }

        if let Some(raw) = lookup(REQUEST_TIMEOUT_ENV) {
            let ms = raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
                var: REQUEST_TIMEOUT_ENV.to_string(),
                value: raw.clone(),
            })?;
            self.request_timeout = Duration::from_millis(ms);
        }

        Ok(())
    }
}
