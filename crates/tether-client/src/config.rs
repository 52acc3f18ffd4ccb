// crates/tether-client/src/config.rs
// Client configuration: gateway address, credentials, cadence preset

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Client configuration loaded from ~/.tether/config.json
///
/// This is the configuration provider for the sync core: it supplies the
/// gateway address, the optional bearer token, and the cadence preset. A
/// missing file yields defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Gateway base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token, if the gateway requires one
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Timing preset for reconnect backoff and reconciliation debounce
    #[serde(default)]
    pub cadence: Cadence,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            cadence: Cadence::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from ~/.tether/config.json
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| "Failed to parse config file")?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to ~/.tether/config.json
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self)
            .with_context(|| "Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::tether_dir()?.join("config.json"))
    }

    /// Get the ~/.tether directory path
    pub fn tether_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".tether"))
    }
}

/// Named timing preset. Which one applies is purely a configuration choice;
/// the sync core never derives it from runtime conditions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    #[default]
    Standard,
    /// For battery/CPU constrained hosts: slower retries, lazier reconciliation
    Constrained,
}

impl Cadence {
    pub fn profile(self) -> CadenceProfile {
        match self {
            Cadence::Standard => CadenceProfile {
                base_delay_ms: 1_000,
                max_delay_ms: 10_000,
                reconciliation_debounce_ms: 350,
            },
            Cadence::Constrained => CadenceProfile {
                base_delay_ms: 2_000,
                max_delay_ms: 30_000,
                reconciliation_debounce_ms: 1_200,
            },
        }
    }
}

impl std::str::FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Cadence::Standard),
            "constrained" => Ok(Cadence::Constrained),
            other => Err(format!("unknown cadence '{}' (expected standard or constrained)", other)),
        }
    }
}

/// Timing constants consumed by the sync controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CadenceProfile {
    /// First reconnect delay; doubles per consecutive failure
    pub base_delay_ms: u64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
    /// Quiet window between a pushed message and its reconciliation fetch
    pub reconciliation_debounce_ms: u64,
}
