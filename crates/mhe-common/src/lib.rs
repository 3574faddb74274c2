//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Shared primitives for gateway processes."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
//! Shared configuration loading, tracing bootstrap, and version metadata
//! re-exports consumed across the gateway workspace.

pub mod config;
pub mod logging;

pub use config::{
    ApiConfig, AppConfig, GatewayConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    SimulatedEntityConfig, SimulatedHostConfig, SimulationConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use mhe_versioning::VersionInfo;
