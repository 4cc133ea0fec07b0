//! # Link Configuration
//!
//! Settings are read from an optional TOML file named by `BRIDGE_CONFIG`, then
//! overridden by `BRIDGE_DEBUG` and `BRIDGE_LOG`. Every field has a default, so an
//! absent file is the same as an empty one.
//!
//! ```toml
//! debug = true
//! log_file = "bridge-debug.log"
//! default_executor = "render"
//! watchdog_poll_ms = 100
//! ```

use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::executor::Executor;

pub const CONFIG_ENV: &str = "BRIDGE_CONFIG";
pub const DEBUG_ENV: &str = "BRIDGE_DEBUG";
pub const LOG_ENV: &str = "BRIDGE_LOG";

#[derive(Debug, Clone)]
pub enum Error {
    Io { path: PathBuf, details: String },
    Parse { path: PathBuf, details: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, details } => write!(f, "could not read {}: {}", path.display(), details),
            Self::Parse { path, details } => write!(f, "could not parse {}: {}", path.display(), details),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

fn default_log_file() -> PathBuf {
    PathBuf::from("bridge-debug.log")
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_executor() -> Executor {
    Executor::Script
}

fn default_watchdog_poll_ms() -> u64 {
    250
}

fn default_exit_ack_timeout_ms() -> u64 {
    5_000
}

fn default_unknown_reply_threshold() -> u64 {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Send diagnostics to `log_file` and echo every line read from the host.
    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Executor for calls that resolve no other.
    #[serde(default = "default_executor")]
    pub default_executor: Executor,

    /// How often the watchdog checks whether the script's main thread is alive.
    #[serde(default = "default_watchdog_poll_ms")]
    pub watchdog_poll_ms: u64,

    /// How long to wait for the host to acknowledge `exit!` before closing anyway.
    #[serde(default = "default_exit_ack_timeout_ms")]
    pub exit_ack_timeout_ms: u64,

    /// Consecutive replies for unknown call ids tolerated before the link reports
    /// itself as desynchronized. Zero disables the report.
    #[serde(default = "default_unknown_reply_threshold")]
    pub unknown_reply_threshold: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_file: default_log_file(),
            log_filter: default_log_filter(),
            default_executor: default_executor(),
            watchdog_poll_ms: default_watchdog_poll_ms(),
            exit_ack_timeout_ms: default_exit_ack_timeout_ms(),
            unknown_reply_threshold: default_unknown_reply_threshold(),
        }
    }
}

impl LinkConfig {
    /// Parses a TOML document.
    pub fn from_toml(path: &Path, content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
    }

    /// Reads a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        let config = Self::from_toml(path, &content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reads the file named by `BRIDGE_CONFIG` (if set) and applies env overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        if let Ok(flag) = std::env::var(DEBUG_ENV) {
            config.debug = parse_flag(&flag);
        }
        if let Ok(filter) = std::env::var(LOG_ENV) {
            config.log_filter = filter;
        }
        Ok(config)
    }

    pub fn watchdog_poll(&self) -> Duration {
        Duration::from_millis(self.watchdog_poll_ms.max(1))
    }

    pub fn exit_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_ack_timeout_ms)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
