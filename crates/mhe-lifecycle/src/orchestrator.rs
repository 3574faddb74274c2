//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Lifecycle state machine driving entities through mutating actions."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use mhe_logging::{
    log_lifecycle_event, mhe_debug, mhe_info, mhe_warn, LifecycleEventOutcome, LogContext,
};
use mhe_metrics::LifecycleMetrics;
use mhe_versioning::{check, BuildVersion, CompatibilityVerdict};

use crate::config::EntityConfig;
use crate::error::{ErrorKind, InfraError, LifecycleError, LockError};
use crate::infra::{InfrastructureClient, TargetValidator};
use crate::lock::UpdateLock;
use crate::migrate::{ConfigMigrator, MigrationStep, CURRENT_SCHEMA};
use crate::model::{
    Action, ActionKind, DeleteScope, EntityHandle, EntityId, LifecycleRequest, OrchestratorState,
    Outcome, ReconfigureMode, Session, Target, TaskRef, TaskStatus,
};

/// Result of one orchestration call with the states it passed through.
#[derive(Debug)]
pub struct Orchestration {
    pub result: Result<Outcome, LifecycleError>,
    pub states: Vec<OrchestratorState>,
}

impl Orchestration {
    pub fn reached(&self, state: OrchestratorState) -> bool {
        self.states.contains(&state)
    }
}

/// Per-call bookkeeping: state trail and logging context.
struct Run<'r> {
    target: &'r str,
    entity: Option<&'r str>,
    action: ActionKind,
    states: Vec<OrchestratorState>,
}

impl<'r> Run<'r> {
    fn new(target: &'r str, entity: Option<&'r str>, action: ActionKind) -> Self {
        Self {
            target,
            entity,
            action,
            states: vec![OrchestratorState::Idle],
        }
    }

    fn context(&self) -> LogContext<'_> {
        let mut ctx = LogContext::new()
            .with_target(self.target)
            .with_action(self.action.as_ref());
        if let Some(entity) = self.entity {
            ctx = ctx.with_entity(entity);
        }
        if let Some(state) = self.states.last() {
            let name: &'static str = (*state).into();
            ctx = ctx.with_state(name);
        }
        ctx
    }

    fn enter(&mut self, state: OrchestratorState) {
        self.states.push(state);
        mhe_debug!(context = self.context(), "entered {state}");
    }
}

/// What the locked phase did, so release can be skipped for a vanished entity.
struct Executed {
    outcome: Outcome,
    entity_removed: bool,
}

/// Sequences resolution, locking, validation, dispatch and release for
/// lifecycle requests against remote entities.
pub struct Orchestrator {
    client: Arc<dyn InfrastructureClient>,
    validator: Arc<dyn TargetValidator>,
    migrator: ConfigMigrator,
    local_version: BuildVersion,
    metrics: LifecycleMetrics,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn InfrastructureClient>,
        validator: Arc<dyn TargetValidator>,
        local_version: BuildVersion,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            client,
            validator,
            migrator: ConfigMigrator::default(),
            local_version,
            metrics,
        }
    }

    /// Replace the migration steps. The target schema stays at [`CURRENT_SCHEMA`],
    /// the only shape the orchestrator decodes.
    pub fn with_migration_steps(mut self, steps: BTreeMap<u32, MigrationStep>) -> Self {
        self.migrator = ConfigMigrator::with_steps(CURRENT_SCHEMA, steps);
        self
    }

    /// Build version stamped onto entities this gateway creates or upgrades.
    pub fn local_version(&self) -> &BuildVersion {
        &self.local_version
    }

    pub fn metrics(&self) -> &LifecycleMetrics {
        &self.metrics
    }

    pub(crate) fn client(&self) -> &dyn InfrastructureClient {
        self.client.as_ref()
    }

    pub(crate) fn migrator(&self) -> &ConfigMigrator {
        &self.migrator
    }

    pub async fn execute(&self, request: LifecycleRequest) -> Result<Outcome, LifecycleError> {
        self.execute_traced(request).await.result
    }

    /// Run `request` and report every state entered along the way.
    pub async fn execute_traced(&self, request: LifecycleRequest) -> Orchestration {
        let started = Instant::now();
        let LifecycleRequest {
            target,
            entity,
            action,
        } = request;
        let kind = action.kind();
        let mut run = Run::new(&target.host, entity.as_ref().map(EntityId::as_str), kind);

        let result = match (action, entity.as_ref()) {
            (Action::Create(config), _) => self.create(&mut run, &target, *config).await,
            (action, Some(id)) => self.mutate(&mut run, &target, id, action).await,
            (_, None) => Err(LifecycleError::ValidationFailed(format!(
                "{kind} requires an entity identifier"
            ))),
        };

        run.enter(if result.is_ok() {
            OrchestratorState::Done
        } else {
            OrchestratorState::Failed
        });
        self.record(&run, &result, started.elapsed());
        Orchestration {
            result,
            states: run.states,
        }
    }

    /// Clear a stuck update flag. Used by operators after an interrupted call.
    pub async fn unlock(&self, target: &Target, id: &EntityId) -> Result<(), LifecycleError> {
        let (_, handle) = self.resolve(target, id).await?;
        UpdateLock::new(self.client(), &self.metrics)
            .release(&handle)
            .await
            .map_err(|err| match err {
                LockError::Infra(source) => LifecycleError::from_infra("reset update flag", source),
                LockError::Conflict => LifecycleError::Conflict(err.to_string()),
            })?;
        let ctx = LogContext::new()
            .with_target(&target.host)
            .with_entity(id.as_str());
        mhe_info!(context = ctx, "update flag cleared by operator");
        Ok(())
    }

    /// Poll a task returned in [`Outcome::Deferred`].
    pub async fn task_status(
        &self,
        target: &Target,
        task: &TaskRef,
    ) -> Result<TaskStatus, LifecycleError> {
        let session = self.session(target).await?;
        self.client
            .task_status(&session, task)
            .await
            .map_err(|err| LifecycleError::from_infra("task status", err))
    }

    pub(crate) async fn session(&self, target: &Target) -> Result<Session, LifecycleError> {
        self.validator
            .validate_target(target)
            .await
            .map_err(|err| LifecycleError::from_infra("validate target", err))
    }

    pub(crate) async fn resolve(
        &self,
        target: &Target,
        id: &EntityId,
    ) -> Result<(Session, EntityHandle), LifecycleError> {
        let session = self.session(target).await?;
        let handle = self
            .client
            .find_entity(&session, id)
            .await
            .map_err(|err| LifecycleError::from_infra("find entity", err))?;
        Ok((session, handle))
    }

    async fn create(
        &self,
        run: &mut Run<'_>,
        target: &Target,
        mut config: EntityConfig,
    ) -> Result<Outcome, LifecycleError> {
        run.enter(OrchestratorState::Validating);
        let session = self.session(target).await?;
        self.check_feasibility(&session, &config).await?;
        config.version = Some(self.local_version.to_string());

        run.enter(OrchestratorState::Executing);
        let task = self
            .client
            .create(&session, &config)
            .await
            .map_err(|err| LifecycleError::from_infra("create", err))?;
        Ok(Outcome::Deferred(task))
    }

    async fn mutate(
        &self,
        run: &mut Run<'_>,
        target: &Target,
        id: &EntityId,
        action: Action,
    ) -> Result<Outcome, LifecycleError> {
        run.enter(OrchestratorState::Resolving);
        let (session, handle) = self.resolve(target, id).await?;

        run.enter(OrchestratorState::Locked);
        let lock = UpdateLock::new(self.client(), &self.metrics);
        lock.acquire(&handle).await?;

        let guarded = AssertUnwindSafe(self.locked(run, &session, &handle, action))
            .catch_unwind()
            .await;
        let executed = match guarded {
            Ok(executed) => executed,
            Err(panic) => {
                run.enter(OrchestratorState::Releasing);
                let _ = lock.release(&handle).await;
                std::panic::resume_unwind(panic);
            }
        };

        match executed {
            Ok(Executed {
                outcome,
                entity_removed: true,
            }) => Ok(outcome),
            other => {
                run.enter(OrchestratorState::Releasing);
                // Release failures are already logged and never replace the primary result.
                let _ = lock.release(&handle).await;
                other.map(|executed| executed.outcome)
            }
        }
    }

    /// Everything that happens while the update flag is held.
    async fn locked(
        &self,
        run: &mut Run<'_>,
        session: &Session,
        handle: &EntityHandle,
        action: Action,
    ) -> Result<Executed, LifecycleError> {
        let (delta, mode) = match action {
            Action::Debug => return Err(LifecycleError::NotImplemented("debug".to_owned())),
            Action::Create(_) => {
                return Err(LifecycleError::ValidationFailed(
                    "create does not operate on an existing entity".to_owned(),
                ))
            }
            Action::Delete(scope) => return self.delete(run, handle, scope).await,
            Action::Upgrade(delta) => (delta, ReconfigureMode::Upgrade),
            Action::Rollback(delta) => (delta, ReconfigureMode::Rollback),
        };

        let (config, verdict) = self.validated_config(run, handle).await?;
        let merged = match mode {
            ReconfigureMode::Upgrade => {
                self.gate_upgrade(&verdict, &config)?;
                let mut merged = delta.apply(config);
                merged.version = Some(self.local_version.to_string());
                merged
            }
            ReconfigureMode::Rollback => {
                mhe_debug!(
                    context = run.context(),
                    "version gate skipped for rollback ({verdict})"
                );
                delta.apply(config)
            }
        };
        self.reconfigure(run, session, handle, merged, mode).await
    }

    async fn delete(
        &self,
        run: &mut Run<'_>,
        handle: &EntityHandle,
        scope: DeleteScope,
    ) -> Result<Executed, LifecycleError> {
        let (_, verdict) = self.validated_config(run, handle).await?;
        if verdict.is_skewed() {
            mhe_warn!(
                context = run.context(),
                "deleting entity despite version mismatch: {verdict}"
            );
        }

        run.enter(OrchestratorState::Executing);
        self.client
            .delete(handle, scope)
            .await
            .map_err(|err| LifecycleError::from_infra("delete", err))?;
        Ok(Executed {
            outcome: Outcome::Immediate,
            entity_removed: true,
        })
    }

    async fn reconfigure(
        &self,
        run: &mut Run<'_>,
        session: &Session,
        handle: &EntityHandle,
        config: EntityConfig,
        mode: ReconfigureMode,
    ) -> Result<Executed, LifecycleError> {
        self.check_feasibility(session, &config).await?;

        run.enter(OrchestratorState::Executing);
        let task = self
            .client
            .reconfigure(handle, &config, mode)
            .await
            .map_err(|err| LifecycleError::from_infra(mode.to_string(), err))?;
        Ok(Executed {
            outcome: Outcome::Deferred(task),
            entity_removed: false,
        })
    }

    /// Fetch, migrate and classify the entity's configuration.
    async fn validated_config(
        &self,
        run: &mut Run<'_>,
        handle: &EntityHandle,
    ) -> Result<(EntityConfig, CompatibilityVerdict), LifecycleError> {
        run.enter(OrchestratorState::Validating);
        let persisted = self
            .client
            .read_config(handle)
            .await
            .map_err(|err| LifecycleError::from_infra("read config", err))?;
        let found = persisted.schema_version;
        let config = self.migrator.migrate(persisted)?.decode()?;
        if found != self.migrator.current_schema() {
            mhe_debug!(
                context = run.context(),
                "migrated configuration from schema {found} to {}",
                self.migrator.current_schema()
            );
        }
        let verdict = check(&self.local_version, config.version.as_deref());
        Ok((config, verdict))
    }

    fn gate_upgrade(
        &self,
        verdict: &CompatibilityVerdict,
        config: &EntityConfig,
    ) -> Result<(), LifecycleError> {
        match verdict {
            CompatibilityVerdict::UpToDate | CompatibilityVerdict::Upgradeable(_) => Ok(()),
            CompatibilityVerdict::EntityNewer => Err(LifecycleError::IncompatibleVersion {
                local: self.local_version.to_string(),
                entity: config.version.clone().unwrap_or_default(),
            }),
            CompatibilityVerdict::Unknown(reason) => Err(LifecycleError::ValidationFailed(
                format!("cannot determine version compatibility: {reason}"),
            )),
        }
    }

    async fn check_feasibility(
        &self,
        session: &Session,
        config: &EntityConfig,
    ) -> Result<(), LifecycleError> {
        self.validator
            .validate_compute(session, config)
            .await
            .map_err(|err| feasibility("compute", err))?;
        self.validator
            .validate_network(session, config)
            .await
            .map_err(|err| feasibility("network", err))?;
        self.validator
            .validate_storage(session, config)
            .await
            .map_err(|err| feasibility("storage", err))?;
        Ok(())
    }

    fn record(&self, run: &Run<'_>, result: &Result<Outcome, LifecycleError>, elapsed: Duration) {
        let action = run.action.as_ref();
        let event = format!("lifecycle.{action}");
        let ctx = run.context();
        match result {
            Ok(outcome) => {
                self.metrics
                    .record_operation(action, "accepted", elapsed.as_secs_f64());
                let message = match outcome.task() {
                    Some(task) => format!("accepted as task {task}"),
                    None => "completed".to_owned(),
                };
                log_lifecycle_event(
                    Some(&ctx),
                    &event,
                    &message,
                    LifecycleEventOutcome::Accepted,
                );
            }
            Err(err) => {
                let kind = err.kind();
                self.metrics
                    .record_operation(action, kind.as_ref(), elapsed.as_secs_f64());
                let outcome = match kind {
                    ErrorKind::MigrationFailed | ErrorKind::InfrastructureError => {
                        LifecycleEventOutcome::Fault
                    }
                    _ => LifecycleEventOutcome::Rejected,
                };
                log_lifecycle_event(Some(&ctx), &event, &err.to_string(), outcome);
            }
        }
    }
}

fn feasibility(stage: &str, err: InfraError) -> LifecycleError {
    match err {
        InfraError::Rejected(reason) => {
            LifecycleError::ValidationFailed(format!("{stage}: {reason}"))
        }
        other => LifecycleError::from_infra(format!("validate {stage}"), other),
    }
}
