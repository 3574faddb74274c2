//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Read-only inspection and listing of entities."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use futures::future::join_all;
use mhe_versioning::{check, BuildVersion, CompatibilityVerdict};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{LifecycleError, MigrationError};
use crate::model::{EntityHandle, EntityId, PowerState, Target};
use crate::orchestrator::Orchestrator;

/// Detailed view of one entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    pub id: EntityId,
    pub name: String,
    pub parent: String,
    pub version: Option<String>,
    pub schema_version: u32,
    pub power_state: PowerState,
    pub upgrade_status: String,
    /// Configuration with private key material removed. Raw when migration failed.
    pub configuration: Value,
}

/// One row of an entity listing.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub id: EntityId,
    pub name: String,
    pub parent: String,
    pub version: Option<String>,
    pub upgrade_status: String,
}

/// Human readable upgrade status for an entity.
pub fn upgrade_status_message(
    local: &BuildVersion,
    entity_version: Option<&str>,
    update_in_progress: bool,
) -> String {
    let verdict = check(local, entity_version);
    if verdict == CompatibilityVerdict::UpToDate {
        return "Up to date".to_owned();
    }
    if update_in_progress {
        return "Upgrade in progress".to_owned();
    }
    match verdict {
        CompatibilityVerdict::UpToDate => "Up to date".to_owned(),
        CompatibilityVerdict::Upgradeable(to) => format!("Upgradeable to {to}"),
        CompatibilityVerdict::EntityNewer => "Entity has newer version".to_owned(),
        CompatibilityVerdict::Unknown(reason) => format!("Unknown: {reason}"),
    }
}

/// Remove private key material from a raw configuration document.
fn strip_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| !(key.contains("private_key") || key.ends_with("key_pem")));
            map.values_mut().for_each(strip_secrets);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_secrets),
        _ => {}
    }
}

impl Orchestrator {
    /// Describe one entity without taking the update flag.
    pub async fn inspect(
        &self,
        target: &Target,
        id: &EntityId,
    ) -> Result<EntityReport, LifecycleError> {
        let (_, handle) = self.resolve(target, id).await?;
        let persisted = self
            .client()
            .read_config(&handle)
            .await
            .map_err(|err| LifecycleError::from_infra("read config", err))?;
        let power_state = match self.client().power_state(&handle).await {
            Ok(state) => state,
            Err(err) => {
                warn!(entity = %id, error = %err, "power state unavailable");
                PowerState::Unknown
            }
        };

        let migrated = self
            .migrator()
            .migrate(persisted.clone())
            .and_then(|current| current.decode());
        let (schema_version, version, configuration) = match migrated {
            Ok(config) => {
                let configuration = serde_json::to_value(config.without_secrets()).map_err(
                    |err| MigrationError::Decode {
                        schema: self.migrator().current_schema(),
                        reason: err.to_string(),
                    },
                )?;
                (self.migrator().current_schema(), config.version, configuration)
            }
            Err(err) => {
                warn!(
                    entity = %id,
                    error = %err,
                    "presenting unmigrated configuration"
                );
                let mut raw = persisted.document.clone();
                strip_secrets(&mut raw);
                (
                    persisted.schema_version,
                    persisted.recorded_version().map(str::to_owned),
                    raw,
                )
            }
        };

        let upgrade_status = upgrade_status_message(
            self.local_version(),
            version.as_deref(),
            persisted.update_in_progress,
        );
        Ok(EntityReport {
            id: handle.id().clone(),
            name: handle.name().to_owned(),
            parent: handle.parent().to_owned(),
            version,
            schema_version,
            power_state,
            upgrade_status,
            configuration,
        })
    }

    /// List entities under the target. An unreadable entity is reported, not fatal.
    pub async fn list(&self, target: &Target) -> Result<Vec<EntitySummary>, LifecycleError> {
        let session = self.session(target).await?;
        let handles = self
            .client()
            .list_entities(&session)
            .await
            .map_err(|err| LifecycleError::from_infra("list entities", err))?;
        Ok(join_all(handles.into_iter().map(|handle| self.summarize(handle))).await)
    }

    async fn summarize(&self, handle: EntityHandle) -> EntitySummary {
        let (version, upgrade_status) = match self.client().read_config(&handle).await {
            Ok(persisted) => {
                let version = persisted.recorded_version().map(str::to_owned);
                let status = upgrade_status_message(
                    self.local_version(),
                    version.as_deref(),
                    persisted.update_in_progress,
                );
                (version, status)
            }
            Err(err) => {
                warn!(entity = %handle.id(), error = %err, "failed to read entity configuration");
                (None, format!("Unknown: {err}"))
            }
        };
        EntitySummary {
            id: handle.id().clone(),
            name: handle.name().to_owned(),
            parent: handle.parent().to_owned(),
            version,
            upgrade_status,
        }
    }
}
