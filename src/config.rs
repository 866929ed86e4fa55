//! Configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then
//! `DIRMIRROR_*` environment variables (`__` separates nested keys, e.g.
//! `DIRMIRROR_WATCH__QUIET_MS=50`).

mod loader;

pub use loader::ConfigLoader;

use crate::logging::LoggingConfig;
use crate::watch::WatchConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Directory to mirror
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Address the WebSocket server binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Shared token observers must present; None accepts everyone
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            listen: default_listen(),
            auth_token: None,
            watch: WatchConfig::default(),
            delivery: DeliveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Per-observer delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Minimum spacing between pushes to one view, unless the observer overrides it
    pub min_interval_ms: u64,
    /// Outbound queue depth per observer before deliveries are dropped
    pub channel_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 250,
            channel_capacity: 64,
        }
    }
}

impl DeliveryConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}
