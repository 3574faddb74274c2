//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "binary"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Binary entrypoint for the MHE gateway daemon."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use mhe_api::{spawn_api_server, ApiServer, ApiState, Translator};
use mhe_common::{init_tracing, AppConfig, VersionInfo};
use mhe_lifecycle::{Orchestrator, SimulatedPlatform};
use mhe_metrics::{new_registry, spawn_http_server, DaemonMetrics, LifecycleMetrics};
use mhe_security::{fingerprint_pem, CertificateAuthority};
use tokio::signal;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = env!("CARGO_PKG_VERSION"),
    about = "MHE lifecycle gateway daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/gateway.toml"));
    candidates.push(PathBuf::from("configs/gateway.example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    let load_duration = load_started.elapsed();

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();

    init_tracing("mhe-gatewayd", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    let local_version = match config.gateway.version_override()? {
        Some(pinned) => {
            warn!(version = %pinned, "gateway version pinned by configuration");
            pinned
        }
        None => version.build_version(),
    };
    daemon_metrics.set_build_info(&local_version.to_string(), &version.git_sha);
    info!(banner = %version.banner(), version = %local_version, "starting gateway");

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let platform = Arc::new(SimulatedPlatform::from_config(&config.simulation));
    let lifecycle_metrics = LifecycleMetrics::new(&registry)?;
    let orchestrator = Orchestrator::new(
        platform.clone(),
        platform,
        local_version.clone(),
        lifecycle_metrics,
    );

    let authority = CertificateAuthority::generate("MHE Gateway CA")
        .context("failed to generate certificate authority")?;
    if let Some(fingerprint) = fingerprint_pem(authority.authority_pem()) {
        info!(fingerprint = %fingerprint, "certificate authority ready");
    }
    let translator = Translator::new(local_version, Arc::new(authority))
        .enforce_client_version(config.gateway.enforce_client_version)
        .organization(config.gateway.certificate_organization.clone());

    let mut api_server: Option<ApiServer> = None;
    if config.api.enabled {
        let state = Arc::new(ApiState::new(Arc::new(orchestrator), translator));
        match spawn_api_server(state, config.api.listen) {
            Ok(server) => {
                info!(address = %server.addr(), "api server listening");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!("gateway running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = api_server {
        match timeout(config.api.shutdown_grace, server.shutdown()).await {
            Ok(result) => result?,
            Err(_) => warn!(
                grace_seconds = config.api.shutdown_grace.as_secs(),
                "api server did not drain before the grace period"
            ),
        }
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}
