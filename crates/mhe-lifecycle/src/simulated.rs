//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "In-memory platform used by the daemon's simulation mode and tests."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use mhe_common::config::{SimulatedEntityConfig, SimulatedHostConfig, SimulationConfig};
use parking_lot::Mutex;
use serde_json::json;
use strum::{Display, EnumString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EntityConfig, PersistedConfig};
use crate::error::InfraError;
use crate::infra::{InfrastructureClient, SwapOutcome, TargetValidator};
use crate::migrate::ConfigMigrator;
use crate::model::{
    Credentials, DeleteScope, EntityHandle, EntityId, PowerState, ReconfigureMode, Session,
    Target, TaskRef, TaskStatus,
};

/// Operations the simulated platform records and can fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SimulatedOp {
    ValidateTarget,
    ValidateCompute,
    ValidateNetwork,
    ValidateStorage,
    FindEntity,
    ListEntities,
    ReadConfig,
    ReadUpdateFlag,
    SetUpdateFlag,
    SwapUpdateFlag,
    Reconfigure,
    Create,
    Delete,
    TaskStatus,
    PowerState,
}

impl SimulatedOp {
    /// Whether the call changes entity state on the platform.
    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Reconfigure | Self::Create | Self::Delete)
    }
}

/// Injected failure for the next call of an operation.
#[derive(Debug, Clone)]
pub enum SimulatedFault {
    Error(InfraError),
    Panic(String),
}

/// Endpoint the simulated validator accepts.
#[derive(Debug, Clone)]
pub struct SimulatedHost {
    pub credentials: Credentials,
    pub thumbprint: Option<String>,
    pub datacenters: Vec<String>,
    pub compute_resources: Vec<String>,
}

impl From<&SimulatedHostConfig> for SimulatedHost {
    fn from(config: &SimulatedHostConfig) -> Self {
        Self {
            credentials: Credentials::new(&config.username, &config.password),
            thumbprint: config.thumbprint.clone(),
            datacenters: config.datacenters.clone(),
            compute_resources: config.compute_resources.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct SimEntity {
    host: String,
    handle: EntityHandle,
    persisted: PersistedConfig,
    power: PowerState,
}

#[derive(Debug)]
struct State {
    hosts: HashMap<String, SimulatedHost>,
    entities: BTreeMap<String, SimEntity>,
    tasks: HashMap<TaskRef, TaskStatus>,
    faults: HashMap<SimulatedOp, VecDeque<SimulatedFault>>,
    calls: Vec<SimulatedOp>,
    reconfigured: Vec<(EntityId, EntityConfig, ReconfigureMode)>,
    deleted: Vec<(EntityId, DeleteScope)>,
    atomic_swap: bool,
    next_id: u64,
}

/// Platform kept entirely in memory.
///
/// Tasks complete as soon as they are created. Every trait call is recorded so
/// tests can assert which remote operations an orchestration performed.
#[derive(Debug)]
pub struct SimulatedPlatform {
    state: Mutex<State>,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                hosts: HashMap::new(),
                entities: BTreeMap::new(),
                tasks: HashMap::new(),
                faults: HashMap::new(),
                calls: Vec::new(),
                reconfigured: Vec::new(),
                deleted: Vec::new(),
                atomic_swap: true,
                next_id: 1,
            }),
        }
    }

    /// Build a platform seeded from the `[simulation]` configuration section.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let platform = Self::new();
        for (host, host_config) in &config.hosts {
            platform.add_host(host, SimulatedHost::from(host_config));
        }
        for entity in &config.entities {
            let persisted = seed_config(entity);
            let mut state = platform.state.lock();
            state.entities.insert(
                entity.id.clone(),
                SimEntity {
                    host: entity.host.clone(),
                    handle: EntityHandle::new(
                        EntityId::new(&entity.id),
                        &entity.name,
                        &entity.compute_resource,
                    ),
                    persisted: PersistedConfig {
                        update_in_progress: entity.update_in_progress,
                        ..persisted
                    },
                    power: PowerState::PoweredOn,
                },
            );
        }
        info!(
            hosts = config.hosts.len(),
            entities = config.entities.len(),
            "simulated platform seeded"
        );
        platform
    }

    /// Stop offering compare-and-swap so the lock falls back to read-then-write.
    pub fn without_atomic_swap(self) -> Self {
        self.state.lock().atomic_swap = false;
        self
    }

    pub fn add_host(&self, host: impl Into<String>, config: SimulatedHost) {
        self.state.lock().hosts.insert(host.into(), config);
    }

    /// Place an entity on `host` under compute resource `parent`.
    pub fn insert_entity(
        &self,
        host: &str,
        parent: &str,
        id: &str,
        name: &str,
        persisted: PersistedConfig,
    ) -> EntityId {
        let id = EntityId::new(id);
        self.state.lock().entities.insert(
            id.as_str().to_owned(),
            SimEntity {
                host: host.to_owned(),
                handle: EntityHandle::new(id.clone(), name, parent),
                persisted,
                power: PowerState::PoweredOn,
            },
        );
        id
    }

    /// Queue `fault` for the next call of `op`.
    pub fn fail_next(&self, op: SimulatedOp, fault: SimulatedFault) {
        self.state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    /// Queue a remote error for the next call of `op`.
    pub fn fail_next_with(&self, op: SimulatedOp, message: impl Into<String>) {
        self.fail_next(op, SimulatedFault::Error(InfraError::Remote(message.into())));
    }

    pub fn calls(&self) -> Vec<SimulatedOp> {
        self.state.lock().calls.clone()
    }

    pub fn called(&self, op: SimulatedOp) -> bool {
        self.state.lock().calls.contains(&op)
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn update_flag(&self, id: &EntityId) -> Option<bool> {
        self.state
            .lock()
            .entities
            .get(id.as_str())
            .map(|entity| entity.persisted.update_in_progress)
    }

    /// Set the flag directly, bypassing call recording.
    pub fn force_update_flag(&self, id: &EntityId, value: bool) {
        if let Some(entity) = self.state.lock().entities.get_mut(id.as_str()) {
            entity.persisted.update_in_progress = value;
        }
    }

    pub fn persisted(&self, id: &EntityId) -> Option<PersistedConfig> {
        self.state
            .lock()
            .entities
            .get(id.as_str())
            .map(|entity| entity.persisted.clone())
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.state.lock().entities.contains_key(id.as_str())
    }

    pub fn last_reconfigure(&self) -> Option<(EntityId, EntityConfig, ReconfigureMode)> {
        self.state.lock().reconfigured.last().cloned()
    }

    pub fn last_delete(&self) -> Option<(EntityId, DeleteScope)> {
        self.state.lock().deleted.last().cloned()
    }

    /// Id of the entity named `name` on `host`, if any.
    pub fn find_by_name(&self, host: &str, name: &str) -> Option<EntityId> {
        self.state
            .lock()
            .entities
            .values()
            .find(|entity| entity.host == host && entity.handle.name() == name)
            .map(|entity| entity.handle.id().clone())
    }

    /// Record the call and surface any fault queued for it.
    fn enter(&self, op: SimulatedOp) -> Result<(), InfraError> {
        let fault = {
            let mut state = self.state.lock();
            state.calls.push(op);
            state.faults.get_mut(&op).and_then(VecDeque::pop_front)
        };
        match fault {
            None => Ok(()),
            Some(SimulatedFault::Error(err)) => {
                debug!(%op, error = %err, "injected simulated fault");
                Err(err)
            }
            Some(SimulatedFault::Panic(message)) => panic!("simulated {op} panic: {message}"),
        }
    }

    fn new_task(state: &mut State) -> TaskRef {
        let task = TaskRef::new(format!("task-{}", Uuid::new_v4()));
        state.tasks.insert(task.clone(), TaskStatus::Success);
        task
    }

    fn entity<'s>(
        state: &'s mut State,
        handle: &EntityHandle,
    ) -> Result<&'s mut SimEntity, InfraError> {
        state
            .entities
            .get_mut(handle.id().as_str())
            .ok_or_else(|| InfraError::NotFound(format!("entity {}", handle.id())))
    }

    fn host<'s>(state: &'s State, session: &Session) -> Result<&'s SimulatedHost, InfraError> {
        state
            .hosts
            .get(&session.host)
            .ok_or_else(|| InfraError::Rejected(format!("unknown target host {}", session.host)))
    }
}

/// Persisted document for a seeded entity, shaped for its schema version.
fn seed_config(entity: &SimulatedEntityConfig) -> PersistedConfig {
    let mut document = json!({
        "name": entity.name,
        "resource_pool": entity.compute_resource,
        "public_network": "VM Network",
        "image_stores": [format!("ds://datastore1/{}", entity.name)],
        "volume_stores": { "default": format!("ds://datastore1/{}/volumes", entity.name) },
    });
    if let Some(version) = &entity.version {
        document["version"] = json!(version);
    }
    let seed = PersistedConfig {
        schema_version: 1,
        update_in_progress: false,
        document,
    };
    let migrated = match ConfigMigrator::default()
        .up_to(entity.schema_version)
        .migrate(seed.clone())
    {
        Ok(migrated) => migrated,
        Err(err) => {
            warn!(
                entity = %entity.id,
                schema = entity.schema_version,
                error = %err,
                "seeded configuration could not be migrated; keeping schema 1"
            );
            return seed;
        }
    };
    PersistedConfig {
        schema_version: entity.schema_version,
        ..migrated
    }
}

#[async_trait]
impl TargetValidator for SimulatedPlatform {
    async fn validate_target(&self, target: &Target) -> Result<Session, InfraError> {
        self.enter(SimulatedOp::ValidateTarget)?;
        let state = self.state.lock();
        let host = state
            .hosts
            .get(&target.host)
            .ok_or_else(|| InfraError::Rejected(format!("unknown target host {}", target.host)))?;
        if host.credentials != target.credentials {
            return Err(InfraError::Rejected(format!(
                "invalid credentials for {}",
                target.host
            )));
        }
        if let (Some(expected), Some(given)) = (&host.thumbprint, &target.thumbprint) {
            if !expected.eq_ignore_ascii_case(given) {
                return Err(InfraError::Rejected(format!(
                    "thumbprint mismatch for {}",
                    target.host
                )));
            }
        }
        if let Some(datacenter) = &target.datacenter {
            if !host.datacenters.contains(datacenter) {
                return Err(InfraError::NotFound(format!("datacenter {datacenter}")));
            }
        }
        if let Some(resource) = &target.compute_resource {
            if !host.compute_resources.contains(resource) {
                return Err(InfraError::NotFound(format!("compute resource {resource}")));
            }
        }
        Ok(Session {
            host: target.host.clone(),
            datacenter: target.datacenter.clone(),
            compute_resource: target.compute_resource.clone(),
        })
    }

    async fn validate_compute(
        &self,
        session: &Session,
        config: &EntityConfig,
    ) -> Result<(), InfraError> {
        self.enter(SimulatedOp::ValidateCompute)?;
        let state = self.state.lock();
        let host = Self::host(&state, session)?;
        if !host.compute_resources.contains(&config.compute.resource_path) {
            return Err(InfraError::Rejected(format!(
                "compute resource {} does not exist",
                config.compute.resource_path
            )));
        }
        if config.compute.memory_limit_mb == Some(0) {
            return Err(InfraError::Rejected("memory limit must be positive".into()));
        }
        Ok(())
    }

    async fn validate_network(
        &self,
        _session: &Session,
        config: &EntityConfig,
    ) -> Result<(), InfraError> {
        self.enter(SimulatedOp::ValidateNetwork)?;
        let network = &config.network;
        if network.bridge.is_some() && network.bridge == network.public {
            return Err(InfraError::Rejected(
                "bridge network must not be shared with the public network".into(),
            ));
        }
        let mut aliases: Vec<&str> = network
            .container_networks
            .iter()
            .map(|n| n.alias.as_str())
            .collect();
        aliases.sort_unstable();
        if aliases.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(InfraError::Rejected("container network aliases must be unique".into()));
        }
        Ok(())
    }

    async fn validate_storage(
        &self,
        _session: &Session,
        config: &EntityConfig,
    ) -> Result<(), InfraError> {
        self.enter(SimulatedOp::ValidateStorage)?;
        if config.storage.image_stores.is_empty() {
            return Err(InfraError::Rejected("at least one image store is required".into()));
        }
        let mut labels: Vec<&str> = config
            .storage
            .volume_stores
            .iter()
            .map(|s| s.label.as_str())
            .collect();
        labels.sort_unstable();
        if labels.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(InfraError::Rejected("volume store labels must be unique".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl InfrastructureClient for SimulatedPlatform {
    async fn find_entity(
        &self,
        session: &Session,
        id: &EntityId,
    ) -> Result<EntityHandle, InfraError> {
        self.enter(SimulatedOp::FindEntity)?;
        let state = self.state.lock();
        state
            .entities
            .get(id.as_str())
            .filter(|entity| entity.host == session.host)
            .filter(|entity| {
                session
                    .compute_resource
                    .as_deref()
                    .map_or(true, |resource| entity.handle.parent() == resource)
            })
            .map(|entity| entity.handle.clone())
            .ok_or_else(|| InfraError::NotFound(format!("entity {id}")))
    }

    async fn list_entities(&self, session: &Session) -> Result<Vec<EntityHandle>, InfraError> {
        self.enter(SimulatedOp::ListEntities)?;
        let state = self.state.lock();
        Ok(state
            .entities
            .values()
            .filter(|entity| entity.host == session.host)
            .filter(|entity| {
                session
                    .compute_resource
                    .as_deref()
                    .map_or(true, |resource| entity.handle.parent() == resource)
            })
            .map(|entity| entity.handle.clone())
            .collect())
    }

    async fn read_config(&self, handle: &EntityHandle) -> Result<PersistedConfig, InfraError> {
        self.enter(SimulatedOp::ReadConfig)?;
        let mut state = self.state.lock();
        Ok(Self::entity(&mut state, handle)?.persisted.clone())
    }

    async fn read_update_flag(&self, handle: &EntityHandle) -> Result<bool, InfraError> {
        self.enter(SimulatedOp::ReadUpdateFlag)?;
        let mut state = self.state.lock();
        Ok(Self::entity(&mut state, handle)?.persisted.update_in_progress)
    }

    async fn set_update_flag(&self, handle: &EntityHandle, value: bool) -> Result<(), InfraError> {
        self.enter(SimulatedOp::SetUpdateFlag)?;
        let mut state = self.state.lock();
        Self::entity(&mut state, handle)?.persisted.update_in_progress = value;
        Ok(())
    }

    async fn swap_update_flag(
        &self,
        handle: &EntityHandle,
        expected: bool,
        value: bool,
    ) -> Result<SwapOutcome, InfraError> {
        self.enter(SimulatedOp::SwapUpdateFlag)?;
        let mut state = self.state.lock();
        if !state.atomic_swap {
            return Ok(SwapOutcome::Unsupported);
        }
        let entity = Self::entity(&mut state, handle)?;
        if entity.persisted.update_in_progress != expected {
            return Ok(SwapOutcome::Mismatch);
        }
        entity.persisted.update_in_progress = value;
        Ok(SwapOutcome::Swapped)
    }

    async fn reconfigure(
        &self,
        handle: &EntityHandle,
        config: &EntityConfig,
        mode: ReconfigureMode,
    ) -> Result<TaskRef, InfraError> {
        self.enter(SimulatedOp::Reconfigure)?;
        let mut persisted = PersistedConfig::from_current(config)
            .map_err(|err| InfraError::Remote(err.to_string()))?;
        let mut state = self.state.lock();
        let entity = Self::entity(&mut state, handle)?;
        persisted.update_in_progress = entity.persisted.update_in_progress;
        entity.persisted = persisted;
        state
            .reconfigured
            .push((handle.id().clone(), config.clone(), mode));
        Ok(Self::new_task(&mut state))
    }

    async fn create(
        &self,
        session: &Session,
        config: &EntityConfig,
    ) -> Result<TaskRef, InfraError> {
        self.enter(SimulatedOp::Create)?;
        let persisted = PersistedConfig::from_current(config)
            .map_err(|err| InfraError::Remote(err.to_string()))?;
        let mut state = self.state.lock();
        let duplicate = state
            .entities
            .values()
            .any(|entity| entity.host == session.host && entity.handle.name() == config.name);
        if duplicate {
            return Err(InfraError::AlreadyExists(format!("entity named {}", config.name)));
        }
        let id = loop {
            let candidate = format!("vm-{}", state.next_id);
            state.next_id += 1;
            if !state.entities.contains_key(&candidate) {
                break EntityId::new(candidate);
            }
        };
        state.entities.insert(
            id.as_str().to_owned(),
            SimEntity {
                host: session.host.clone(),
                handle: EntityHandle::new(id, &config.name, &config.compute.resource_path),
                persisted,
                power: PowerState::PoweredOn,
            },
        );
        Ok(Self::new_task(&mut state))
    }

    async fn delete(&self, handle: &EntityHandle, scope: DeleteScope) -> Result<(), InfraError> {
        self.enter(SimulatedOp::Delete)?;
        let mut state = self.state.lock();
        state
            .entities
            .remove(handle.id().as_str())
            .ok_or_else(|| InfraError::NotFound(format!("entity {}", handle.id())))?;
        state.deleted.push((handle.id().clone(), scope));
        Ok(())
    }

    async fn task_status(
        &self,
        _session: &Session,
        task: &TaskRef,
    ) -> Result<TaskStatus, InfraError> {
        self.enter(SimulatedOp::TaskStatus)?;
        self.state
            .lock()
            .tasks
            .get(task)
            .cloned()
            .ok_or_else(|| InfraError::NotFound(format!("task {task}")))
    }

    async fn power_state(&self, handle: &EntityHandle) -> Result<PowerState, InfraError> {
        self.enter(SimulatedOp::PowerState)?;
        let mut state = self.state.lock();
        Ok(Self::entity(&mut state, handle)?.power)
    }
}
