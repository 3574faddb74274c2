//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "tests"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Lifecycle orchestration behaviour against the simulated platform."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use mhe_lifecycle::{
    Action, ComputeConfig, ConfigDelta, Credentials, DeleteScope, EntityConfig, EntityId,
    ErrorKind, InfraError, LifecycleError, LifecycleRequest, MigrationError, MigrationStep,
    OrchestratorState, Outcome, PersistedConfig, ReconfigureMode, SimulatedFault, SimulatedHost,
    SimulatedOp, SimulatedPlatform, StorageConfig, Target, TaskStatus, CURRENT_SCHEMA,
};
use mhe_lifecycle::Orchestrator;
use mhe_metrics::prometheus::Registry;
use mhe_metrics::LifecycleMetrics;
use mhe_versioning::BuildVersion;
use serde_json::json;

const HOST: &str = "vc.example.test";
const POOL: &str = "/dc1/host/cluster1";
const LOCAL: &str = "v1.4.0-300-abcdef0";
const OLDER: &str = "v1.3.0-250-1234567";
const NEWER: &str = "v1.5.0-10-7654321";

fn target() -> Target {
    Target::new(HOST, Credentials::new("admin", "secret"))
}

fn platform() -> Arc<SimulatedPlatform> {
    let platform = SimulatedPlatform::new();
    platform.add_host(
        HOST,
        SimulatedHost {
            credentials: Credentials::new("admin", "secret"),
            thumbprint: None,
            datacenters: vec!["dc1".into()],
            compute_resources: vec![POOL.into()],
        },
    );
    Arc::new(platform)
}

fn orchestrator(platform: &Arc<SimulatedPlatform>) -> Orchestrator {
    let local: BuildVersion = LOCAL.parse().unwrap();
    let metrics = LifecycleMetrics::new(&Registry::new()).unwrap();
    Orchestrator::new(platform.clone(), platform.clone(), local, metrics)
}

fn schema_one(version: &str) -> PersistedConfig {
    PersistedConfig {
        schema_version: 1,
        update_in_progress: false,
        document: json!({
            "name": "mhe-one",
            "version": version,
            "resource_pool": POOL,
            "cpu_mhz": 1000,
            "volume_stores": { "default": "ds://datastore1/volumes" },
            "public_network": "VM Network",
            "image_stores": ["ds://datastore1/images"]
        }),
    }
}

fn current(name: &str, version: Option<&str>) -> PersistedConfig {
    PersistedConfig::from_current(&desired(name, version)).unwrap()
}

fn desired(name: &str, version: Option<&str>) -> EntityConfig {
    EntityConfig {
        name: name.into(),
        version: version.map(str::to_owned),
        compute: ComputeConfig {
            resource_path: POOL.into(),
            ..Default::default()
        },
        storage: StorageConfig {
            image_stores: vec!["ds://datastore1/images".into()],
            ..Default::default()
        },
        ..Default::default()
    }
}

fn seed(platform: &SimulatedPlatform, id: &str, persisted: PersistedConfig) -> EntityId {
    platform.insert_entity(HOST, POOL, id, id, persisted)
}

fn upgrade(id: &EntityId, delta: ConfigDelta) -> LifecycleRequest {
    LifecycleRequest::for_entity(target(), id.clone(), Action::Upgrade(delta))
}

fn rollback(id: &EntityId) -> LifecycleRequest {
    LifecycleRequest::for_entity(target(), id.clone(), Action::Rollback(ConfigDelta::default()))
}

fn delete(id: &EntityId, scope: DeleteScope) -> LifecycleRequest {
    LifecycleRequest::for_entity(target(), id.clone(), Action::Delete(scope))
}

fn mutated(platform: &SimulatedPlatform) -> bool {
    platform.calls().iter().any(|op| op.is_mutation())
}

#[tokio::test]
async fn upgrade_migrates_merges_and_releases() {
    let platform = platform();
    let id = seed(&platform, "vm-1", schema_one(OLDER));
    let orchestrator = orchestrator(&platform);

    let delta = ConfigDelta {
        memory_limit_mb: Some(4096),
        ..Default::default()
    };
    let run = orchestrator.execute_traced(upgrade(&id, delta)).await;

    let outcome = run.result.as_ref().expect("upgrade accepted");
    let task = outcome.task().expect("upgrade is deferred").clone();
    assert_eq!(
        run.states,
        vec![
            OrchestratorState::Idle,
            OrchestratorState::Resolving,
            OrchestratorState::Locked,
            OrchestratorState::Validating,
            OrchestratorState::Executing,
            OrchestratorState::Releasing,
            OrchestratorState::Done,
        ]
    );

    let (entity, config, mode) = platform.last_reconfigure().expect("reconfigure called");
    assert_eq!(entity, id);
    assert_eq!(mode, ReconfigureMode::Upgrade);
    assert_eq!(config.compute.cpu_limit_mhz, Some(1000));
    assert_eq!(config.compute.memory_limit_mb, Some(4096));
    assert_eq!(config.storage.volume_stores[0].label, "default");
    assert_eq!(config.version.as_deref(), Some(LOCAL));

    assert_eq!(platform.update_flag(&id), Some(false));
    assert_eq!(platform.persisted(&id).unwrap().schema_version, CURRENT_SCHEMA);
    assert_eq!(
        orchestrator.task_status(&target(), &task).await.unwrap(),
        TaskStatus::Success
    );
    assert_eq!(orchestrator.metrics().operations("upgrade", "accepted"), 1);
}

#[tokio::test]
async fn held_flag_is_a_conflict_without_mutation() {
    for platform in [
        platform(),
        Arc::new(
            Arc::try_unwrap(platform())
                .unwrap()
                .without_atomic_swap(),
        ),
    ] {
        let id = seed(&platform, "vm-1", current("vm-1", Some(LOCAL)));
        platform.force_update_flag(&id, true);
        let orchestrator = orchestrator(&platform);

        for request in [
            upgrade(&id, ConfigDelta::default()),
            rollback(&id),
            delete(&id, DeleteScope::default()),
            LifecycleRequest::for_entity(target(), id.clone(), Action::Debug),
        ] {
            let run = orchestrator.execute_traced(request).await;
            let err = run.result.as_ref().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Conflict);
            assert!(!run.reached(OrchestratorState::Executing));
            assert!(!run.reached(OrchestratorState::Releasing));
        }
        assert!(!mutated(&platform));
        assert_eq!(platform.update_flag(&id), Some(true));
        assert_eq!(orchestrator.metrics().lock_conflicts(), 4);
    }
}

#[tokio::test]
async fn upgrade_refuses_newer_entity() {
    let platform = platform();
    let id = seed(&platform, "vm-1", current("vm-1", Some(NEWER)));
    let orchestrator = orchestrator(&platform);

    let run = orchestrator
        .execute_traced(upgrade(&id, ConfigDelta::default()))
        .await;
    assert!(matches!(
        run.result,
        Err(LifecycleError::IncompatibleVersion { .. })
    ));
    assert!(!run.reached(OrchestratorState::Executing));
    assert!(run.reached(OrchestratorState::Releasing));
    assert!(!mutated(&platform));
    assert_eq!(platform.update_flag(&id), Some(false));
}

#[tokio::test]
async fn upgrade_refuses_unknown_version() {
    let platform = platform();
    let id = seed(&platform, "vm-1", current("vm-1", None));
    let orchestrator = orchestrator(&platform);

    let err = orchestrator
        .execute(upgrade(&id, ConfigDelta::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert!(err.to_string().contains("version compatibility"));
    assert_eq!(platform.update_flag(&id), Some(false));
}

#[tokio::test]
async fn rollback_bypasses_version_gate() {
    let platform = platform();
    let id = seed(&platform, "vm-1", current("vm-1", Some(NEWER)));
    let orchestrator = orchestrator(&platform);

    let run = orchestrator.execute_traced(rollback(&id)).await;
    assert!(matches!(run.result, Ok(Outcome::Deferred(_))));
    assert!(run.reached(OrchestratorState::Executing));

    let (_, config, mode) = platform.last_reconfigure().unwrap();
    assert_eq!(mode, ReconfigureMode::Rollback);
    assert_eq!(config.version.as_deref(), Some(NEWER));
    assert_eq!(platform.update_flag(&id), Some(false));
}

#[tokio::test]
async fn delete_tolerates_version_mismatch() {
    let platform = platform();
    let orchestrator = orchestrator(&platform);
    let scope = DeleteScope {
        remove_containers: true,
        remove_volume_stores: false,
    };

    for (name, version) in [("vm-old", Some(OLDER)), ("vm-new", Some(NEWER)), ("vm-none", None)] {
        let id = seed(&platform, name, current(name, version));
        let outcome = orchestrator.execute(delete(&id, scope)).await.unwrap();
        assert_eq!(outcome, Outcome::Immediate);
        assert!(!platform.contains(&id));
        assert_eq!(platform.last_delete(), Some((id, scope)));
    }
}

#[tokio::test]
async fn successful_delete_does_not_touch_the_flag_afterwards() {
    let platform = platform();
    let id = seed(&platform, "vm-1", current("vm-1", Some(LOCAL)));
    let orchestrator = orchestrator(&platform);

    let run = orchestrator
        .execute_traced(delete(&id, DeleteScope::default()))
        .await;
    assert!(run.result.is_ok());
    assert!(!run.reached(OrchestratorState::Releasing));
    assert!(!platform.called(SimulatedOp::SetUpdateFlag));
}

#[tokio::test]
async fn flag_is_released_on_every_failure_point() {
    let faults = [
        (SimulatedOp::ReadConfig, ErrorKind::InfrastructureError),
        (SimulatedOp::ValidateCompute, ErrorKind::ValidationFailed),
        (SimulatedOp::ValidateStorage, ErrorKind::ValidationFailed),
        (SimulatedOp::Reconfigure, ErrorKind::InfrastructureError),
    ];
    for (op, expected) in faults {
        for action in [
            Action::Upgrade(ConfigDelta::default()),
            Action::Rollback(ConfigDelta::default()),
        ] {
            let platform = platform();
            let id = seed(&platform, "vm-1", schema_one(OLDER));
            let fault = match expected {
                ErrorKind::ValidationFailed => {
                    SimulatedFault::Error(InfraError::Rejected("datastore full".into()))
                }
                _ => SimulatedFault::Error(InfraError::Remote("connection reset".into())),
            };
            platform.fail_next(op, fault);
            let orchestrator = orchestrator(&platform);

            let request = LifecycleRequest::for_entity(target(), id.clone(), action);
            let err = orchestrator.execute(request).await.unwrap_err();
            assert_eq!(err.kind(), expected, "fault on {op}");
            assert_eq!(platform.update_flag(&id), Some(false), "fault on {op}");
        }
    }

    let platform = platform();
    let id = seed(&platform, "vm-1", current("vm-1", Some(LOCAL)));
    platform.fail_next_with(SimulatedOp::Delete, "task failed");
    let err = orchestrator(&platform)
        .execute(delete(&id, DeleteScope::default()))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("delete: "));
    assert!(platform.contains(&id));
    assert_eq!(platform.update_flag(&id), Some(false));
}

#[tokio::test]
async fn migration_failure_releases_without_executing() {
    let platform = platform();
    let mut persisted = schema_one(OLDER);
    persisted.schema_version = CURRENT_SCHEMA + 2;
    let id = seed(&platform, "vm-1", persisted);
    let orchestrator = orchestrator(&platform);

    for request in [
        upgrade(&id, ConfigDelta::default()),
        rollback(&id),
        delete(&id, DeleteScope::default()),
    ] {
        let run = orchestrator.execute_traced(request).await;
        assert_eq!(run.result.as_ref().unwrap_err().kind(), ErrorKind::MigrationFailed);
        assert!(!run.reached(OrchestratorState::Executing));
        assert_eq!(platform.update_flag(&id), Some(false));
    }
    assert!(!mutated(&platform));
}

#[tokio::test]
async fn missing_migration_step_fails_the_upgrade() {
    let platform = platform();
    let mut stale = current("vm-1", Some(OLDER));
    stale.schema_version = 2;
    let stale_id = seed(&platform, "vm-1", stale);
    let current_id = seed(&platform, "vm-2", current("vm-2", Some(OLDER)));
    let mut steps: BTreeMap<u32, MigrationStep> = BTreeMap::new();
    steps.insert(1, |_| Ok(()));
    let orchestrator = orchestrator(&platform).with_migration_steps(steps);

    let run = orchestrator
        .execute_traced(upgrade(&stale_id, ConfigDelta::default()))
        .await;
    assert!(matches!(
        run.result,
        Err(LifecycleError::MigrationFailed(MigrationError::Gap { from: 2, current: 3 }))
    ));
    assert!(run.reached(OrchestratorState::Validating));
    assert!(!run.reached(OrchestratorState::Executing));
    assert!(run.reached(OrchestratorState::Releasing));
    assert_eq!(platform.update_flag(&stale_id), Some(false));
    assert!(!mutated(&platform));

    let run = orchestrator
        .execute_traced(upgrade(&current_id, ConfigDelta::default()))
        .await;
    assert!(run.result.is_ok());
    assert!(run.reached(OrchestratorState::Executing));
}

#[tokio::test]
async fn debug_is_not_implemented_but_still_locks() {
    let platform = platform();
    let id = seed(&platform, "vm-1", current("vm-1", Some(LOCAL)));
    let orchestrator = orchestrator(&platform);

    let run = orchestrator
        .execute_traced(LifecycleRequest::for_entity(target(), id.clone(), Action::Debug))
        .await;
    assert_eq!(run.result.as_ref().unwrap_err().kind(), ErrorKind::NotImplemented);
    assert!(run.reached(OrchestratorState::Locked));
    assert!(run.reached(OrchestratorState::Releasing));
    assert!(!run.reached(OrchestratorState::Validating));
    assert!(platform.called(SimulatedOp::SwapUpdateFlag));
    assert!(platform.called(SimulatedOp::SetUpdateFlag));
    assert_eq!(platform.update_flag(&id), Some(false));
}

#[tokio::test]
async fn release_failure_does_not_override_outcome() {
    let platform = platform();
    let id = seed(&platform, "vm-1", current("vm-1", Some(OLDER)));
    platform.fail_next_with(SimulatedOp::SetUpdateFlag, "session expired");
    let orchestrator = orchestrator(&platform);

    let outcome = orchestrator
        .execute(upgrade(&id, ConfigDelta::default()))
        .await
        .unwrap();
    assert!(outcome.task().is_some());
    assert_eq!(platform.update_flag(&id), Some(true));
    assert_eq!(orchestrator.metrics().release_failures(), 1);

    orchestrator.unlock(&target(), &id).await.unwrap();
    assert_eq!(platform.update_flag(&id), Some(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panic_during_dispatch_still_releases() {
    let platform = platform();
    let id = seed(&platform, "vm-1", current("vm-1", Some(OLDER)));
    platform.fail_next(
        SimulatedOp::Reconfigure,
        SimulatedFault::Panic("driver bug".into()),
    );
    let orchestrator = Arc::new(orchestrator(&platform));

    let request = upgrade(&id, ConfigDelta::default());
    let handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.execute(request).await }
    });
    let err = handle.await.unwrap_err();
    assert!(err.is_panic());
    assert_eq!(platform.update_flag(&id), Some(false));
}

#[tokio::test]
async fn optimistic_lock_path_reads_then_writes() {
    let platform = Arc::new(SimulatedPlatform::new().without_atomic_swap());
    platform.add_host(
        HOST,
        SimulatedHost {
            credentials: Credentials::new("admin", "secret"),
            thumbprint: None,
            datacenters: Vec::new(),
            compute_resources: vec![POOL.into()],
        },
    );
    let id = seed(&platform, "vm-1", current("vm-1", Some(OLDER)));
    let orchestrator = orchestrator(&platform);

    orchestrator
        .execute(upgrade(&id, ConfigDelta::default()))
        .await
        .unwrap();
    let calls = platform.calls();
    let read = calls
        .iter()
        .position(|op| *op == SimulatedOp::ReadUpdateFlag)
        .expect("flag read");
    let write = calls
        .iter()
        .position(|op| *op == SimulatedOp::SetUpdateFlag)
        .expect("flag written");
    assert!(read < write);
    assert_eq!(platform.update_flag(&id), Some(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn different_entities_proceed_in_parallel() {
    let platform = platform();
    let a = seed(&platform, "vm-a", current("vm-a", Some(OLDER)));
    let b = seed(&platform, "vm-b", current("vm-b", Some(OLDER)));
    let orchestrator = orchestrator(&platform);

    let (first, second) = tokio::join!(
        orchestrator.execute(upgrade(&a, ConfigDelta::default())),
        orchestrator.execute(upgrade(&b, ConfigDelta::default())),
    );
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(platform.update_flag(&a), Some(false));
    assert_eq!(platform.update_flag(&b), Some(false));
}

#[tokio::test]
async fn create_validates_and_never_locks() {
    let platform = platform();
    let orchestrator = orchestrator(&platform);

    let run = orchestrator
        .execute_traced(LifecycleRequest::create(target(), desired("mhe-new", None)))
        .await;
    assert!(matches!(run.result, Ok(Outcome::Deferred(_))));
    assert!(!run.reached(OrchestratorState::Locked));
    assert!(platform.called(SimulatedOp::ValidateNetwork));
    assert!(!platform.called(SimulatedOp::SwapUpdateFlag));
    assert!(!platform.called(SimulatedOp::SetUpdateFlag));

    let id = platform.find_by_name(HOST, "mhe-new").expect("entity created");
    let stored = platform.persisted(&id).unwrap().decode().unwrap();
    assert_eq!(stored.version.as_deref(), Some(LOCAL));

    let err = orchestrator
        .execute(LifecycleRequest::create(target(), desired("mhe-new", None)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn create_rejects_infeasible_configuration() {
    let platform = platform();
    let orchestrator = orchestrator(&platform);
    let mut config = desired("mhe-new", None);
    config.storage.image_stores.clear();

    let err = orchestrator
        .execute(LifecycleRequest::create(target(), config))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert!(err.to_string().contains("storage"));
    assert!(!platform.called(SimulatedOp::Create));
}

#[tokio::test]
async fn unknown_entities_and_targets_are_reported() {
    let platform = platform();
    let orchestrator = orchestrator(&platform);

    let err = orchestrator
        .execute(upgrade(&EntityId::new("vm-404"), ConfigDelta::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let mut wrong = target();
    wrong.credentials = Credentials::new("admin", "wrong");
    let request = LifecycleRequest::for_entity(wrong, EntityId::new("vm-1"), Action::Debug);
    assert_eq!(
        orchestrator.execute(request).await.unwrap_err().kind(),
        ErrorKind::ValidationFailed
    );
}
