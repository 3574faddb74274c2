//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Update flag persisted on the entity, used as a cross-process lock."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
//! The flag lives on the remote entity, so it serializes every gateway process
//! that talks to the same platform. When the client offers a compare-and-swap
//! it is used; otherwise acquisition reads then writes, and two callers that
//! interleave between those steps can both succeed.

use mhe_metrics::LifecycleMetrics;
use tracing::{debug, warn};

use crate::error::LockError;
use crate::infra::{InfrastructureClient, SwapOutcome};
use crate::model::EntityHandle;

/// How the flag was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    Atomic,
    Optimistic,
}

pub struct UpdateLock<'a> {
    client: &'a dyn InfrastructureClient,
    metrics: &'a LifecycleMetrics,
}

impl<'a> UpdateLock<'a> {
    pub fn new(client: &'a dyn InfrastructureClient, metrics: &'a LifecycleMetrics) -> Self {
        Self { client, metrics }
    }

    /// Set the flag, failing with [`LockError::Conflict`] if it is already set.
    pub async fn acquire(&self, handle: &EntityHandle) -> Result<AcquireMode, LockError> {
        let mode = match self.client.swap_update_flag(handle, false, true).await? {
            SwapOutcome::Swapped => AcquireMode::Atomic,
            SwapOutcome::Mismatch => return Err(self.conflict(handle)),
            SwapOutcome::Unsupported => {
                if self.client.read_update_flag(handle).await? {
                    return Err(self.conflict(handle));
                }
                self.client.set_update_flag(handle, true).await?;
                AcquireMode::Optimistic
            }
        };
        debug!(entity = %handle.id(), ?mode, "update flag acquired");
        Ok(mode)
    }

    /// Reset the flag once. Failures are counted and logged for the caller to drop.
    pub async fn release(&self, handle: &EntityHandle) -> Result<(), LockError> {
        match self.client.set_update_flag(handle, false).await {
            Ok(()) => {
                debug!(entity = %handle.id(), "update flag released");
                Ok(())
            }
            Err(err) => {
                self.metrics.inc_release_failure();
                warn!(
                    entity = %handle.id(),
                    error = %err,
                    "failed to reset update flag; entity stays locked until cleared by an operator"
                );
                Err(LockError::Infra(err))
            }
        }
    }

    fn conflict(&self, handle: &EntityHandle) -> LockError {
        self.metrics.inc_lock_conflict();
        debug!(entity = %handle.id(), "update flag already set");
        LockError::Conflict
    }
}
