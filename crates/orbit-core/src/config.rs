//! Configuration loading
//!
//! Adapter settings are consumed from an external JSON file; a missing
//! file or missing fields mean defaults, never errors.

use crate::error::Result;
use crate::types::ProviderSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Relay socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySettings {
    #[serde(default = "default_client_addr")]
    pub client_addr: String,
    #[serde(default = "default_anchor_addr")]
    pub anchor_addr: String,
    /// How long a targeted frame waits for a late subscriber
    #[serde(default = "default_park_ttl_ms")]
    pub park_ttl_ms: u64,
}

fn default_client_addr() -> String {
    "127.0.0.1:8710".to_string()
}

fn default_anchor_addr() -> String {
    "127.0.0.1:8711".to_string()
}

fn default_park_ttl_ms() -> u64 {
    2000
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            client_addr: default_client_addr(),
            anchor_addr: default_anchor_addr(),
            park_ttl_ms: default_park_ttl_ms(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrbitConfig {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
    #[serde(default)]
    pub relay: RelaySettings,
}

impl OrbitConfig {
    /// Default config location under the user's config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("orbit").join("config.json"))
    }

    /// Load from an explicit path, falling back to the default location.
    /// An absent file yields the default configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => {
                    debug!("No config directory available, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            debug!("Config file {:?} absent, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        let config: OrbitConfig = serde_json::from_str(&contents)?;
        info!(
            "Loaded config from {:?} ({} providers)",
            path,
            config.providers.len()
        );
        Ok(config)
    }

    /// Settings for one provider; unknown ids get defaults
    pub fn provider(&self, id: &str) -> ProviderSettings {
        self.providers.get(id).cloned().unwrap_or_default()
    }
}
