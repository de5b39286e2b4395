//! Configuration schema for Stowage
//!
//! Configuration is stored at `~/.config/stowage/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Image pull settings for `--from` sources
    pub pull: PullConfig,

    /// History annotation settings
    pub history: HistoryConfig,

    /// Store backend settings
    pub store: StoreConfig,
}

/// Pull retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    /// Number of pull attempts before giving up
    pub retry: u32,

    /// Delay between attempts, e.g. "2s" or "500ms"
    pub retry_delay: String,

    /// Require HTTPS and verify certificates
    pub tls_verify: bool,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            retry: 3,
            retry_delay: "2s".to_string(),
            tls_verify: true,
        }
    }
}

/// History settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Append an entry to the image history for each ADD/COPY
    pub add_history: bool,
}

/// Store backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Podman binary to invoke
    pub podman: String,

    /// Directory for builder records (defaults to the state dir)
    pub state_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            podman: "podman".to_string(),
            state_dir: None,
        }
    }
}
