//! ---
//! mhe_section: "03-logging"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Metrics collection and export utilities."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the gateway.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;
    let addr = listener.local_addr().unwrap_or(addr);

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder
        .encode(&families, &mut buffer)
        .map(|()| String::from_utf8_lossy(&buffer).into_owned())
    {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT))],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "mhe_gatewayd_starts_total",
            "Total number of times the gateway daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "mhe_gatewayd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "mhe_gatewayd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "git_sha"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str) {
        self.build_info
            .with_label_values(&[version, git_sha])
            .set(1.0);
    }
}

/// Counters and latencies for lifecycle orchestration.
#[derive(Clone, Debug)]
pub struct LifecycleMetrics {
    operations: IntCounterVec,
    operation_seconds: HistogramVec,
    lock_conflicts: IntCounter,
    release_failures: IntCounter,
}

impl LifecycleMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "mhe_lifecycle_operations_total",
                "Lifecycle operations by action and terminal outcome",
            ),
            &["action", "outcome"],
        )?;
        registry.register(Box::new(operations.clone()))?;

        let buckets = prometheus::exponential_buckets(0.005, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let operation_seconds = HistogramVec::new(
            HistogramOpts::new(
                "mhe_lifecycle_operation_seconds",
                "Wall time spent orchestrating a lifecycle operation",
            )
            .buckets(buckets),
            &["action"],
        )?;
        registry.register(Box::new(operation_seconds.clone()))?;

        let lock_conflicts = IntCounter::with_opts(Opts::new(
            "mhe_lifecycle_lock_conflicts_total",
            "Requests rejected because another operation held the entity update flag",
        ))?;
        registry.register(Box::new(lock_conflicts.clone()))?;

        let release_failures = IntCounter::with_opts(Opts::new(
            "mhe_lifecycle_lock_release_failures_total",
            "Update flag resets that failed and may need operator intervention",
        ))?;
        registry.register(Box::new(release_failures.clone()))?;

        Ok(Self {
            operations,
            operation_seconds,
            lock_conflicts,
            release_failures,
        })
    }

    pub fn record_operation(&self, action: &str, outcome: &str, seconds: f64) {
        self.operations.with_label_values(&[action, outcome]).inc();
        self.operation_seconds
            .with_label_values(&[action])
            .observe(seconds);
    }

    pub fn inc_lock_conflict(&self) {
        self.lock_conflicts.inc();
    }

    pub fn inc_release_failure(&self) {
        self.release_failures.inc();
    }

    pub fn operations(&self, action: &str, outcome: &str) -> u64 {
        self.operations.with_label_values(&[action, outcome]).get()
    }

    pub fn lock_conflicts(&self) -> u64 {
        self.lock_conflicts.get()
    }

    pub fn release_failures(&self) -> u64 {
        self.release_failures.get()
    }
}

pub use prometheus;
