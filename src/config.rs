//! Agent configuration.
//!
//! Loaded once at startup from a TOML file. Every field has a default, so an
//! empty file (or [`AgentConfig::default`]) yields a working configuration.
//!
//! ```toml
//! mount_dir = "/var/lib/volagent/mounts"
//! driver = "nimble"
//!
//! [provider]
//! endpoint = "http://127.0.0.1:8080"
//!
//! [conflict]
//! mount_delay_secs = 30
//! delete_delay_secs = 150
//!
//! [defaults]
//! filesystem = "xfs"
//!
//! [driver_defaults.nimble]
//! perfPolicy = "default"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory under which volumes are mounted as `<mount_dir>/<name>`.
    pub mount_dir: PathBuf,
    /// Name of this plugin instance; selects the per-driver defaults.
    pub driver: String,
    /// Scope reported to the runtime and forwarded to the provider.
    pub scope: String,
    /// Restrict host network interfaces to the request's `initiators` option.
    pub cloud_mode: bool,
    pub log_level: String,
    pub provider: ProviderConfig,
    pub conflict: ConflictConfig,
    pub admission: AdmissionConfig,
    pub host: HostConfig,
    /// Global default options.
    pub defaults: HashMap<String, Value>,
    /// Default options per driver name.
    pub driver_defaults: HashMap<String, HashMap<String, Value>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mount_dir: PathBuf::from("/var/lib/volagent/mounts"),
            driver: "nimble".to_string(),
            scope: "global".to_string(),
            cloud_mode: false,
            log_level: "info".to_string(),
            provider: ProviderConfig::default(),
            conflict: ConflictConfig::default(),
            admission: AdmissionConfig::default(),
            host: HostConfig::default(),
            defaults: HashMap::new(),
            driver_defaults: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub endpoint: String,
    /// Caller identity forwarded with every provider request.
    pub user: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            user: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    pub mount_delay_secs: u64,
    pub delete_delay_secs: u64,
    pub tick_secs: u64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            mount_delay_secs: 30,
            delete_delay_secs: 150,
            tick_secs: 5,
        }
    }
}

impl ConflictConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }
}

/// Maximum concurrently admitted workflows per operation class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub mount: usize,
    pub unmount: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            mount: 30,
            unmount: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub cache_ttl_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 600,
        }
    }
}

impl AgentConfig {
    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&content)?;
        info!("loaded agent config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AgentError> {
        toml::from_str(content).map_err(|e| AgentError::Config(format!("parse config: {e}")))
    }

    /// Default options configured for this plugin instance's driver.
    pub fn driver_defaults(&self) -> &HashMap<String, Value> {
        static EMPTY: once_cell::sync::Lazy<HashMap<String, Value>> =
            once_cell::sync::Lazy::new(HashMap::new);
        self.driver_defaults.get(&self.driver).unwrap_or(&EMPTY)
    }

    pub fn mountpoint_for(&self, volume: &str) -> PathBuf {
        self.mount_dir.join(volume)
    }
}
