//! ---
//! mhe_section: "15-testing-qa-runbook"
//! mhe_subsection: "integration-tests"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Integration tests running the shipped configuration end to end."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use mhe_common::AppConfig;
use mhe_lifecycle::{
    Action, ConfigDelta, Credentials, EntityId, ErrorKind, LifecycleRequest, Orchestrator,
    SimulatedPlatform, Target, CURRENT_SCHEMA,
};
use mhe_metrics::prometheus::Registry;
use mhe_metrics::LifecycleMetrics;
use mhe_versioning::BuildVersion;

const HOST: &str = "vc.example.test";
const LOCAL: &str = "v0.1.0-1-abcdef0";

fn example_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../configs/gateway.example.toml")
}

fn target() -> Target {
    Target::new(
        HOST,
        Credentials::new("administrator@vsphere.local", "changeme"),
    )
    .with_thumbprint("ab:cd:ef:01:23:45:67:89")
}

fn gateway(config: &AppConfig) -> (Arc<SimulatedPlatform>, Orchestrator) {
    let platform = Arc::new(SimulatedPlatform::from_config(&config.simulation));
    let local: BuildVersion = LOCAL.parse().unwrap();
    let metrics = LifecycleMetrics::new(&Registry::new()).unwrap();
    let orchestrator = Orchestrator::new(platform.clone(), platform.clone(), local, metrics);
    (platform, orchestrator)
}

#[test]
fn example_config_is_valid() {
    let config = AppConfig::from_path(&example_config_path()).expect("example config parses");
    assert!(config.api.enabled);
    assert_eq!(config.simulation.entities.len(), 2);
    assert!(config.gateway.version_override().unwrap().is_none());
}

#[test]
fn config_loaded_from_first_existing_candidate() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[api]\nlisten = \"127.0.0.1:18080\"\n[metrics]\nenabled = false"
    )
    .unwrap();
    let loaded = AppConfig::load_with_source(&[
        PathBuf::from("/nonexistent/gateway.toml"),
        file.path().to_path_buf(),
    ])
    .unwrap();
    assert_eq!(loaded.source, file.path());
    assert_eq!(loaded.config.api.listen.port(), 18080);
    assert!(!loaded.config.metrics.enabled);
}

#[tokio::test]
async fn legacy_entity_upgrades_through_the_example_config() {
    let config = AppConfig::from_path(&example_config_path()).unwrap();
    let (platform, orchestrator) = gateway(&config);
    let legacy = EntityId::new("vm-101");

    let before = orchestrator.inspect(&target(), &legacy).await.unwrap();
    assert_eq!(before.schema_version, CURRENT_SCHEMA);
    assert_eq!(before.upgrade_status, format!("Upgradeable to {LOCAL}"));

    let outcome = orchestrator
        .execute(LifecycleRequest::for_entity(
            target(),
            legacy.clone(),
            Action::Upgrade(ConfigDelta::default()),
        ))
        .await
        .unwrap();
    assert!(outcome.task().is_some());
    assert_eq!(platform.update_flag(&legacy), Some(false));

    let (_, upgraded, _) = platform.last_reconfigure().unwrap();
    assert_eq!(upgraded.compute.resource_path, "/dc1/host/cluster1");
    assert_eq!(upgraded.version.as_deref(), Some(LOCAL));
}

#[tokio::test]
async fn stuck_entity_refuses_work_until_unlocked() {
    let config = AppConfig::from_path(&example_config_path()).unwrap();
    let (platform, orchestrator) = gateway(&config);
    let stuck = EntityId::new("vm-102");

    let listed = orchestrator.list(&target()).await.unwrap();
    let summary = listed.iter().find(|s| s.id == stuck).unwrap();
    assert_eq!(summary.upgrade_status, "Upgrade in progress");

    let upgrade = || {
        LifecycleRequest::for_entity(
            target(),
            stuck.clone(),
            Action::Upgrade(ConfigDelta::default()),
        )
    };
    let err = orchestrator.execute(upgrade()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(platform.last_reconfigure().is_none());

    orchestrator.unlock(&target(), &stuck).await.unwrap();
    assert!(orchestrator.execute(upgrade()).await.is_ok());
}
