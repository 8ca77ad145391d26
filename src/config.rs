//! # Relay Configuration
//!
//! All tunables of the relay live in one TOML file. Every section and key is
//! optional; missing values fall back to the defaults below, which match the
//! historical hardcoded values.
//!
//! ```toml
//! [listener]
//! address = "127.0.0.1:9009"
//!
//! [destination]
//! host = "127.0.0.1"
//! port = 9010
//!
//! [pipeline]
//! inversion_threshold_deg = 170.0
//! correction_scope = "all_axes"   # or "flipped_axes"
//! ingest_capacity = 10000
//! forward_capacity = 10000
//! forward_overflow = "block"      # or "drop_newest"
//!
//! [emitter]
//! policy = "non_zero"             # or "presence"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## Lookup Order
//! 1. Path given as the first command line argument
//! 2. `$TRACKER_RELAY_CONFIG`
//! 3. `<config dir>/tracker-relay/config.toml`, created with defaults if missing

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, Level};

use crate::forward::EmitPolicy;
use crate::pipeline::{ForwardOverflow, PipelineSettings, DEFAULT_QUEUE_CAPACITY};
use crate::tracking::store::{CorrectionScope, DEFAULT_INVERSION_THRESHOLD_DEG};
use crate::tracking::InversionSettings;

pub const CONFIG_ENV_VAR: &str = "TRACKER_RELAY_CONFIG";
const CONFIG_DIR: &str = "tracker-relay";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Queue capacity for {0} must be greater than zero")]
    ZeroCapacity(&'static str),

    #[error("Inversion threshold must be in (0, 360], got {0}")]
    InvalidThreshold(f32),

    #[error("Destination host must not be empty")]
    EmptyHost,

    #[error("Unknown log level: {0}")]
    InvalidLogLevel(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Local address the OSC listener binds to
    pub address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9009".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DestinationConfig {
    pub host: String,
    pub port: u16,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9010,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub inversion_threshold_deg: f32,
    pub correction_scope: CorrectionScope,
    pub ingest_capacity: usize,
    pub forward_capacity: usize,
    pub forward_overflow: ForwardOverflow,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inversion_threshold_deg: DEFAULT_INVERSION_THRESHOLD_DEG,
            correction_scope: CorrectionScope::AllAxes,
            ingest_capacity: DEFAULT_QUEUE_CAPACITY,
            forward_capacity: DEFAULT_QUEUE_CAPACITY,
            forward_overflow: ForwardOverflow::Block,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct EmitterConfig {
    pub policy: EmitPolicy,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub listener: ListenerConfig,
    pub destination: DestinationConfig,
    pub pipeline: PipelineConfig,
    pub emitter: EmitterConfig,
    pub logging: LoggingConfig,
}

impl RelayConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RelayConfig =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)
            .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Writes the default config to `path` if no file exists there yet
    pub async fn ensure_default(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&RelayConfig::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write default config file: {}", e))?;
        info!("Wrote default config to {}", path.display());
        Ok(())
    }

    /// Resolves the config path and loads it, creating the default file when
    /// no explicit path was given
    pub async fn resolve(cli_path: Option<PathBuf>) -> Result<Self> {
        let explicit = cli_path.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        let path = match explicit {
            Some(path) => path,
            None => {
                let path = default_config_path()?;
                Self::ensure_default(&path).await?;
                path
            }
        };

        Self::load(&path).await
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.ingest_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("ingestion queue"));
        }
        if self.pipeline.forward_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("forwarding queue"));
        }

        let threshold = self.pipeline.inversion_threshold_deg;
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 360.0 {
            return Err(ConfigError::InvalidThreshold(threshold));
        }

        if self.destination.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        Level::from_str(self.logging.level.trim())
            .map_err(|_| ConfigError::InvalidLogLevel(self.logging.level.clone()))
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            inversion: InversionSettings {
                threshold_deg: self.pipeline.inversion_threshold_deg,
                scope: self.pipeline.correction_scope,
            },
            ingest_capacity: self.pipeline.ingest_capacity,
            forward_capacity: self.pipeline.forward_capacity,
            overflow: self.pipeline.forward_overflow,
            emit_policy: self.emitter.policy,
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory available"))?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Ok(path)
}
