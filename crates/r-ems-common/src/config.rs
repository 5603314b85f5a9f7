//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Gateway configuration loading and validation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_name() -> String {
    "tase2".to_owned()
}

fn default_protocol_stack_path() -> PathBuf {
    PathBuf::from("protocol_stack.json")
}

fn default_model_path() -> PathBuf {
    PathBuf::from("model_conf.json")
}

fn default_exchanged_data_path() -> PathBuf {
    PathBuf::from("exchanged_data.json")
}

fn default_sweep_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_file() -> bool {
    true
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

/// Primary configuration object for the TASE.2 gateway daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where a [`GatewayConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedGatewayConfig {
    pub config: GatewayConfig,
    pub source: PathBuf,
}

impl LoadedGatewayConfig {
    /// Resolve a document path relative to the directory holding the configuration file.
    pub fn resolve_document(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.source.parent() {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }
}

impl GatewayConfig {
    pub const ENV_CONFIG_PATH: &str = "R_EMS_TASE2_CONFIG";

    /// Load configuration from disk, respecting the `R_EMS_TASE2_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedGatewayConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedGatewayConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedGatewayConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<GatewayConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("gateway name must not be empty"));
        }
        if self.tracker.sweep_interval.is_zero() {
            return Err(anyhow!("tracker.sweep_interval_ms must be greater than zero"));
        }
        self.documents.validate()?;
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            documents: DocumentsConfig::default(),
            tracker: TrackerConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for GatewayConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: GatewayConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Locations of the JSON documents compiled into the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    #[serde(default = "default_protocol_stack_path")]
    pub protocol_stack: PathBuf,
    #[serde(default = "default_model_path")]
    pub model: PathBuf,
    #[serde(default = "default_exchanged_data_path")]
    pub exchanged_data: PathBuf,
    #[serde(default)]
    pub tls: Option<PathBuf>,
}

impl DocumentsConfig {
    fn validate(&self) -> Result<()> {
        for (key, path) in [
            ("protocol_stack", &self.protocol_stack),
            ("model", &self.model),
            ("exchanged_data", &self.exchanged_data),
        ] {
            if path.as_os_str().is_empty() {
                return Err(anyhow!("documents.{} must not be empty", key));
            }
        }
        Ok(())
    }
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            protocol_stack: default_protocol_stack_path(),
            model: default_model_path(),
            exchanged_data: default_exchanged_data_path(),
            tls: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(rename = "sweep_interval_ms", default = "default_sweep_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sweep_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_file")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file: default_log_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
