//! Configuration management for Stowage

pub mod schema;

pub use schema::Config;

use crate::error::{StowageError, StowageResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Environment variable overriding the add-history default
pub const HISTORY_ENV: &str = "STOWAGE_HISTORY";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stowage")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stowage")
    }

    /// Get the builder records directory path
    pub fn builders_dir() -> PathBuf {
        Self::state_dir().join("builders")
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> StowageResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> StowageResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StowageError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| StowageError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        parse_duration(&config.pull.retry_delay).map_err(|e| StowageError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(config)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the add-history default, letting `STOWAGE_HISTORY` override it
pub fn history_default(config: &Config) -> bool {
    match std::env::var(HISTORY_ENV) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                debug!("Ignoring unrecognized {}={:?}", HISTORY_ENV, other);
                config.history.add_history
            }
        },
        Err(_) => config.history.add_history,
    }
}

/// Parse a duration such as "2s", "500ms" or "1m30s"
///
/// Units: ns, us, ms, s, m, h. A bare "0" is accepted.
pub fn parse_duration(value: &str) -> StowageResult<Duration> {
    let invalid = |reason: &str| StowageError::InvalidRetryDelay {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let mut rest = value.trim();
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| invalid("missing unit"))?;
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("invalid number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_len..];

        total += Duration::try_from_secs_f64(number * scale).map_err(|_| invalid("out of range"))?;
    }

    Ok(total)
}
