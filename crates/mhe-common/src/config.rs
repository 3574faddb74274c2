//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Gateway configuration loading and validation."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use mhe_versioning::BuildVersion;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1337))
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_enforce_client_version() -> bool {
    true
}

fn default_certificate_organization() -> String {
    "MHE Gateway".to_owned()
}

fn default_schema_version() -> u32 {
    1
}

/// Primary configuration object for the gateway daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "MHE_CONFIG";

    /// Load configuration from disk, respecting the `MHE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
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

    /// Read, parse and validate a single configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;
        self.simulation.validate()?;
        if self.api.enabled && self.metrics.enabled && self.api.listen == self.metrics.listen {
            return Err(anyhow!(
                "api and metrics listeners both bind {}",
                self.api.listen
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
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
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
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

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
    /// How long in-flight requests may take to drain on shutdown.
    #[serde(default = "default_shutdown_grace")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub shutdown_grace: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// Lifecycle policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Pin the build version the gateway reports, e.g. for staged rollouts.
    #[serde(default)]
    pub version_override: Option<String>,
    /// Reject create requests whose declared version differs from the gateway's.
    #[serde(default = "default_enforce_client_version")]
    pub enforce_client_version: bool,
    /// Organization written into generated server certificates.
    #[serde(default = "default_certificate_organization")]
    pub certificate_organization: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version_override: None,
            enforce_client_version: default_enforce_client_version(),
            certificate_organization: default_certificate_organization(),
        }
    }
}

impl GatewayConfig {
    /// Parsed form of [`GatewayConfig::version_override`].
    pub fn version_override(&self) -> Result<Option<BuildVersion>> {
        self.version_override
            .as_deref()
            .map(|raw| {
                raw.parse::<BuildVersion>()
                    .with_context(|| format!("invalid gateway.version_override {raw:?}"))
            })
            .transpose()
    }

    pub fn validate(&self) -> Result<()> {
        self.version_override()?;
        if self.certificate_organization.trim().is_empty() {
            return Err(anyhow!("gateway.certificate_organization cannot be empty"));
        }
        Ok(())
    }
}

/// Seed data for the in-memory simulated platform.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SimulationConfig {
    /// Infrastructure endpoints the simulated validator accepts, keyed by host.
    #[serde(default)]
    pub hosts: IndexMap<String, SimulatedHostConfig>,
    /// Entities present at startup.
    #[serde(default)]
    pub entities: Vec<SimulatedEntityConfig>,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.id.as_str()) {
                return Err(anyhow!("duplicate simulated entity id '{}'", entity.id));
            }
            let host = self.hosts.get(&entity.host).ok_or_else(|| {
                anyhow!(
                    "simulated entity '{}' references unknown host '{}'",
                    entity.id,
                    entity.host
                )
            })?;
            if !host.compute_resources.contains(&entity.compute_resource) {
                return Err(anyhow!(
                    "simulated entity '{}' references unknown compute resource '{}' on host '{}'",
                    entity.id,
                    entity.compute_resource,
                    entity.host
                ));
            }
            if entity.schema_version == 0 {
                return Err(anyhow!(
                    "simulated entity '{}' has schema_version 0; schemas start at 1",
                    entity.id
                ));
            }
        }
        for (host, cfg) in &self.hosts {
            if cfg.compute_resources.is_empty() {
                return Err(anyhow!(
                    "simulated host '{}' must declare at least one compute resource",
                    host
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedHostConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub thumbprint: Option<String>,
    #[serde(default)]
    pub datacenters: Vec<String>,
    pub compute_resources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedEntityConfig {
    pub id: String,
    pub name: String,
    pub host: String,
    pub compute_resource: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub update_in_progress: bool,
}
