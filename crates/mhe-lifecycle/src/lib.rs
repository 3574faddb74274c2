//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Primary orchestration and lifecycle management."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---

//! Lifecycle orchestration for managed host entities.
//!
//! Mutating actions hold the entity's remote update flag for their whole
//! duration, bring its persisted configuration to the current schema, check
//! the entity's build version against this gateway's, and only then call the
//! platform. The flag is reset on every exit path except a successful delete.

pub mod config;
pub mod error;
pub mod infra;
pub mod inventory;
pub mod lock;
pub mod migrate;
pub mod model;
pub mod orchestrator;
pub mod simulated;

pub use config::{
    ComputeConfig, ConfigDelta, ContainerNetwork, EntityConfig, NetworkConfig, PersistedConfig,
    RegistryConfig, SecurityConfig, StorageConfig, VolumeStore,
};
pub use error::{ErrorKind, InfraError, LifecycleError, LockError, MigrationError};
pub use infra::{InfrastructureClient, SwapOutcome, TargetValidator};
pub use inventory::{upgrade_status_message, EntityReport, EntitySummary};
pub use lock::{AcquireMode, UpdateLock};
pub use migrate::{ConfigMigrator, MigrationStep, CURRENT_SCHEMA};
pub use model::{
    Action, ActionKind, Credentials, DeleteScope, EntityHandle, EntityId, LifecycleRequest,
    OrchestratorState, Outcome, PowerState, ReconfigureMode, Session, Target, TaskRef, TaskStatus,
};
pub use orchestrator::{Orchestration, Orchestrator};
pub use simulated::{SimulatedFault, SimulatedHost, SimulatedOp, SimulatedPlatform};
