//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Request, handle, and outcome types for lifecycle orchestration."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

use crate::config::{ConfigDelta, EntityConfig};

/// Username and password presented to the infrastructure endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Infrastructure endpoint a request is addressed to. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub datacenter: Option<String>,
    pub credentials: Credentials,
    pub thumbprint: Option<String>,
    pub compute_resource: Option<String>,
}

impl Target {
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            datacenter: None,
            credentials,
            thumbprint: None,
            compute_resource: None,
        }
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    pub fn with_thumbprint(mut self, thumbprint: impl Into<String>) -> Self {
        self.thumbprint = Some(thumbprint.into());
        self
    }

    pub fn with_compute_resource(mut self, path: impl Into<String>) -> Self {
        self.compute_resource = Some(path.into());
        self
    }
}

/// Validated connection to a target, produced by the target validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub host: String,
    pub datacenter: Option<String>,
    pub compute_resource: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to one remote entity, resolved per call and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHandle {
    id: EntityId,
    name: String,
    parent: String,
}

impl EntityHandle {
    pub fn new(id: EntityId, name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parent: parent.into(),
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inventory path of the compute resource the entity lives under.
    pub fn parent(&self) -> &str {
        &self.parent
    }
}

/// Which parts of an entity's footprint a delete also removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeleteScope {
    pub remove_containers: bool,
    pub remove_volume_stores: bool,
}

/// Requested lifecycle action with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create(Box<EntityConfig>),
    Delete(DeleteScope),
    Debug,
    Upgrade(ConfigDelta),
    Rollback(ConfigDelta),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Create(_) => ActionKind::Create,
            Action::Delete(_) => ActionKind::Delete,
            Action::Debug => ActionKind::Debug,
            Action::Upgrade(_) => ActionKind::Upgrade,
            Action::Rollback(_) => ActionKind::Rollback,
        }
    }
}

/// Payload-free tag of an [`Action`], as named on the wire and in metrics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Create,
    Delete,
    Debug,
    Upgrade,
    Rollback,
}

/// How the platform should apply a reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReconfigureMode {
    /// Apply new intent, replacing the running appliance if needed.
    Upgrade,
    /// Reapply a prior known configuration, taking the non-destructive path.
    Rollback,
}

/// Validated intent for one orchestration call.
#[derive(Debug, Clone)]
pub struct LifecycleRequest {
    pub target: Target,
    pub entity: Option<EntityId>,
    pub action: Action,
}

impl LifecycleRequest {
    pub fn create(target: Target, config: EntityConfig) -> Self {
        Self {
            target,
            entity: None,
            action: Action::Create(Box::new(config)),
        }
    }

    pub fn for_entity(target: Target, entity: EntityId, action: Action) -> Self {
        Self {
            target,
            entity: Some(entity),
            action,
        }
    }
}

/// Handle to an asynchronous remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskRef(String);

impl TaskRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Success,
    Error(String),
}

/// Successful result of an orchestration call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The platform accepted the work; poll the task for completion.
    Deferred(TaskRef),
    /// The work finished before the call returned.
    Immediate,
}

impl Outcome {
    pub fn task(&self) -> Option<&TaskRef> {
        match self {
            Outcome::Deferred(task) => Some(task),
            Outcome::Immediate => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
    Unknown,
}

/// States an orchestration call passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Resolving,
    Locked,
    Validating,
    Executing,
    Releasing,
    Done,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kinds_parse_from_wire_names() {
        assert_eq!("upgrade".parse::<ActionKind>().unwrap(), ActionKind::Upgrade);
        assert_eq!("rollback".parse::<ActionKind>().unwrap(), ActionKind::Rollback);
        assert!("restart".parse::<ActionKind>().is_err());
        assert_eq!(Action::Debug.kind().as_ref(), "debug");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let target = Target::new("vc.example.test", Credentials::new("admin", "hunter2"));
        let rendered = format!("{target:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn task_status_serializes_with_state_tag() {
        let json = serde_json::to_value(TaskStatus::Error("boom".into())).unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(json["error"], "boom");
        assert_eq!(
            serde_json::to_value(TaskStatus::Success).unwrap()["state"],
            "success"
        );
    }
}
