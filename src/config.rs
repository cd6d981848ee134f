//! Engine configuration
//!
//! ```toml
//! [broker]
//! host = "localhost"
//! port = 1883
//!
//! [topics]
//! mountpoint = "lwm2m"
//!
//! [engine]
//! timeout_secs = 60
//! max_subscriptions = 500
//!
//! [watch]
//! endpoints = ["urn:imei:123456789012345"]
//! ```
//!
//! Every table and field is optional. The file lives at
//! `~/.config/lwm2m-mqtt/config.toml` unless a path is given.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::mqtt::config::BrokerConfig;
use crate::mqtt::topics::Topics;

pub const CONFIG_DIR: &str = ".config/lwm2m-mqtt";
pub const CONFIG_FILE: &str = "config.toml";

pub const ENV_HOST: &str = "LWM2M_MQTT_HOST";
pub const ENV_PORT: &str = "LWM2M_MQTT_PORT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Correlation settings, the `[engine]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Default time to wait for a response
    pub timeout_secs: f64,
    /// Limit of distinct endpoint subscriptions, unlimited when absent
    pub max_subscriptions: Option<usize>,
    pub req_id_min: i64,
    pub req_id_max: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60.0,
            max_subscriptions: None,
            req_id_min: 0,
            req_id_max: 10_000,
        }
    }
}

impl EngineSettings {
    /// Saturates at [`Duration::MAX`] for values too large to represent
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::MAX)
    }
}

/// Endpoints the binary wiretaps, the `[watch]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub broker: BrokerConfig,
    pub topics: Topics,
    pub engine: EngineSettings,
    pub watch: WatchConfig,
}

impl EngineConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| {
            warn!("Could not determine home directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads `path` or the default location, then applies env overrides
    ///
    /// A missing file yields the defaults; an unreadable or malformed one is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut config = if path.exists() {
            info!("Loading configuration from {:?}", path);
            Self::from_file(&path)?
        } else {
            info!("No configuration at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(path, content).map_err(write_error)?;
        debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Host and port overrides, looked up through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(host) = var(ENV_HOST) {
            debug!("{} overrides broker host with {}", ENV_HOST, host);
            self.broker.host = host;
        }
        if let Some(port) = var(ENV_PORT) {
            self.broker.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{}={:?} is not a port", ENV_PORT, port)))?;
            debug!("{} overrides broker port with {}", ENV_PORT, self.broker.port);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.validate()?;
        self.topics.validate()?;
        let engine = &self.engine;
        if engine.timeout_secs <= 0.0 || Duration::try_from_secs_f64(engine.timeout_secs).is_err() {
            return Err(ConfigError::Invalid(format!(
                "timeout_secs {} must be a positive, representable number of seconds",
                engine.timeout_secs
            )));
        }
        if engine.req_id_min < 0 || engine.req_id_min > engine.req_id_max {
            return Err(ConfigError::Invalid(format!(
                "request ID range {}..={} is empty or negative",
                engine.req_id_min, engine.req_id_max
            )));
        }
        Ok(())
    }
}
