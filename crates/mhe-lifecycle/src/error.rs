//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Error taxonomy for lifecycle orchestration."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Failure reported by an infrastructure collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InfraError {
    /// The addressed object does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// An object with the same identity already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),
    /// The platform refused the request as infeasible.
    #[error("{0}")]
    Rejected(String),
    /// The remote call itself failed.
    #[error("remote call failed: {0}")]
    Remote(String),
}

/// Failure acquiring or releasing the remote update flag.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    /// Another operation already holds the flag.
    #[error("Another upgrade/configure operation is in progress")]
    Conflict,
    /// Reading or writing the flag failed.
    #[error("update flag access failed: {0}")]
    Infra(#[from] InfraError),
}

/// Failure bringing a persisted configuration up to the current schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    /// The persisted schema is newer than anything this build understands.
    #[error("persisted schema {found} is newer than supported schema {current}")]
    UnsupportedSchema { found: u32, current: u32 },
    /// No transformation is registered for a schema on the upgrade path.
    #[error("no migration registered from schema {from} (target schema {current})")]
    Gap { from: u32, current: u32 },
    /// A transformation could not be applied to the document.
    #[error("migration from schema {from} failed: {reason}")]
    Transform { from: u32, reason: String },
    /// The migrated document does not match the current schema shape.
    #[error("schema {schema} document is malformed: {reason}")]
    Decode { schema: u32, reason: String },
}

/// Stable classification of a [`LifecycleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ValidationFailed,
    MigrationFailed,
    IncompatibleVersion,
    InfrastructureError,
    NotImplemented,
}

/// Terminal failure of an orchestration call.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error(transparent)]
    MigrationFailed(#[from] MigrationError),
    #[error("entity version {entity} is newer than gateway version {local}; refusing to modify it")]
    IncompatibleVersion { local: String, entity: String },
    #[error("{context}: {source}")]
    InfrastructureError {
        context: String,
        #[source]
        source: InfraError,
    },
    #[error("{0} not implemented")]
    NotImplemented(String),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::NotFound(_) => ErrorKind::NotFound,
            LifecycleError::Conflict(_) => ErrorKind::Conflict,
            LifecycleError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            LifecycleError::MigrationFailed(_) => ErrorKind::MigrationFailed,
            LifecycleError::IncompatibleVersion { .. } => ErrorKind::IncompatibleVersion,
            LifecycleError::InfrastructureError { .. } => ErrorKind::InfrastructureError,
            LifecycleError::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }

    /// Classify a collaborator failure raised while doing `context`.
    pub fn from_infra(context: impl Into<String>, err: InfraError) -> Self {
        match err {
            InfraError::NotFound(what) => LifecycleError::NotFound(format!("{what} not found")),
            InfraError::AlreadyExists(what) => {
                LifecycleError::Conflict(format!("{what} already exists"))
            }
            InfraError::Rejected(reason) => LifecycleError::ValidationFailed(reason),
            source @ InfraError::Remote(_) => LifecycleError::InfrastructureError {
                context: context.into(),
                source,
            },
        }
    }
}

impl From<LockError> for LifecycleError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Conflict => LifecycleError::Conflict(err.to_string()),
            LockError::Infra(source) => LifecycleError::from_infra("acquire update flag", source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infra_errors_map_onto_taxonomy() {
        let cases = [
            (InfraError::NotFound("entity vm-1".into()), ErrorKind::NotFound),
            (InfraError::AlreadyExists("name mhe".into()), ErrorKind::Conflict),
            (InfraError::Rejected("no such network".into()), ErrorKind::ValidationFailed),
            (InfraError::Remote("timeout".into()), ErrorKind::InfrastructureError),
        ];
        for (err, kind) in cases {
            assert_eq!(LifecycleError::from_infra("upgrade", err).kind(), kind);
        }
    }

    #[test]
    fn infrastructure_errors_carry_context() {
        let err = LifecycleError::from_infra("delete", InfraError::Remote("socket closed".into()));
        assert_eq!(err.to_string(), "delete: remote call failed: socket closed");
    }

    #[test]
    fn lock_conflict_message_is_stable() {
        let err = LifecycleError::from(LockError::Conflict);
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("in progress"));
        assert_eq!(ErrorKind::IncompatibleVersion.as_ref(), "incompatible_version");
    }
}
