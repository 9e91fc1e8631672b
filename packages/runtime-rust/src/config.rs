//! Process configuration for the runtime and the `stagehand` binary.
//!
//! Sources, lowest precedence first: built-in defaults, a JSON file, then
//! command-line flags (each also readable from a `STAGEHAND_*` variable).

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagehand_core::JsonConfig;
use uuid::Uuid;

/// Errors raised while loading [`RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identifier for this process in logs. Generated when empty.
    pub node_id: String,
    pub log: LogConfig,
    /// How long shutdown waits for `stop_all` and `destroy_all` in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Application configuration tree served to managed objects.
    pub settings: Value,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            log: LogConfig::default(),
            shutdown_grace_ms: 10_000,
            settings: Value::Object(serde_json::Map::new()),
        }
    }
}

impl RuntimeConfig {
    /// Reads a JSON config file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolves the effective configuration from `args`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `args` names a config file that cannot be
    /// loaded.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(node_id) = &args.node_id {
            config.node_id.clone_from(node_id);
        }
        if let Some(filter) = &args.log {
            config.log.filter.clone_from(filter);
        }
        if let Some(format) = args.log_format {
            config.log.format = format;
        }
        if config.node_id.is_empty() {
            config.node_id = Uuid::new_v4().to_string();
        }
        Ok(config)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// The settings tree as a lookup source for injection.
    #[must_use]
    pub fn source(&self) -> JsonConfig {
        JsonConfig::new(self.settings.clone())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info,stagehand_runtime=debug`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Command-line arguments of the `stagehand` binary.
#[derive(Debug, Default, Parser)]
#[command(name = "stagehand", version, about = "Runs managed background services")]
pub struct Args {
    /// Path to a JSON configuration file.
    #[arg(long, env = "STAGEHAND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter directives; overrides the config file.
    #[arg(long, env = "STAGEHAND_LOG")]
    pub log: Option<String>,

    /// Log output format; overrides the config file.
    #[arg(long, env = "STAGEHAND_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,

    /// Node identifier; overrides the config file.
    #[arg(long)]
    pub node_id: Option<String>,
}
