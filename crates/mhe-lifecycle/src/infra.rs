//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Interfaces to the virtualization platform consumed by the orchestrator."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use async_trait::async_trait;

use crate::config::{EntityConfig, PersistedConfig};
use crate::error::InfraError;
use crate::model::{
    DeleteScope, EntityHandle, EntityId, PowerState, ReconfigureMode, Session, Target, TaskRef,
    TaskStatus,
};

/// Result of a compare-and-swap on the update flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The flag held the expected value and was replaced.
    Swapped,
    /// The flag held a different value and was left untouched.
    Mismatch,
    /// The platform offers no atomic primitive.
    Unsupported,
}

/// Checks that a target and a desired configuration are feasible.
#[async_trait]
pub trait TargetValidator: Send + Sync {
    async fn validate_target(&self, target: &Target) -> Result<Session, InfraError>;

    async fn validate_compute(
        &self,
        session: &Session,
        config: &EntityConfig,
    ) -> Result<(), InfraError>;

    async fn validate_network(
        &self,
        session: &Session,
        config: &EntityConfig,
    ) -> Result<(), InfraError>;

    async fn validate_storage(
        &self,
        session: &Session,
        config: &EntityConfig,
    ) -> Result<(), InfraError>;
}

/// Remote operations against entities on a target.
#[async_trait]
pub trait InfrastructureClient: Send + Sync {
    async fn find_entity(&self, session: &Session, id: &EntityId)
        -> Result<EntityHandle, InfraError>;

    async fn list_entities(&self, session: &Session) -> Result<Vec<EntityHandle>, InfraError>;

    async fn read_config(&self, handle: &EntityHandle) -> Result<PersistedConfig, InfraError>;

    async fn read_update_flag(&self, handle: &EntityHandle) -> Result<bool, InfraError> {
        Ok(self.read_config(handle).await?.update_in_progress)
    }

    async fn set_update_flag(&self, handle: &EntityHandle, value: bool) -> Result<(), InfraError>;

    /// Atomically replace the flag if it currently equals `expected`.
    ///
    /// Platforms without such a primitive keep the default.
    async fn swap_update_flag(
        &self,
        _handle: &EntityHandle,
        _expected: bool,
        _value: bool,
    ) -> Result<SwapOutcome, InfraError> {
        Ok(SwapOutcome::Unsupported)
    }

    async fn reconfigure(
        &self,
        handle: &EntityHandle,
        config: &EntityConfig,
        mode: ReconfigureMode,
    ) -> Result<TaskRef, InfraError>;

    async fn create(&self, session: &Session, config: &EntityConfig)
        -> Result<TaskRef, InfraError>;

    async fn delete(&self, handle: &EntityHandle, scope: DeleteScope) -> Result<(), InfraError>;

    async fn task_status(&self, session: &Session, task: &TaskRef)
        -> Result<TaskStatus, InfraError>;

    async fn power_state(&self, handle: &EntityHandle) -> Result<PowerState, InfraError>;
}
