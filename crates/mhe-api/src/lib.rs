//! ---
//! mhe_section: "05-networking-external-interfaces"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "REST surface for lifecycle requests."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---

use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mhe_lifecycle::{
    Action, ActionKind, EntityId, EntityReport, LifecycleRequest, Orchestrator, Outcome, Target,
    TaskRef,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub mod auth;
pub mod error;
pub mod translate;
pub mod wire;

pub use auth::BasicCredentials;
pub use error::ApiError;
pub use translate::{TranslateError, Translator};

use wire::{
    ChangeRequest, CreateRequest, DeleteRequest, ListResponse, TaskResponse, TaskStatusResponse,
};

/// Shared API state exposed to handlers.
pub struct ApiState {
    orchestrator: Arc<Orchestrator>,
    translator: Translator,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>, translator: Translator) -> Self {
        Self {
            orchestrator,
            translator,
        }
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("version", self.orchestrator.local_version())
            .field("translator", &self.translator)
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Route table. Every entity route is also served under a datacenter prefix.
pub fn router(state: Arc<ApiState>) -> Router {
    let mut router = Router::new().route("/version", get(get_version));
    for prefix in ["/target/:target", "/target/:target/datacenter/:datacenter"] {
        router = router
            .route(
                &format!("{prefix}/vch"),
                get(list_entities).post(create_entity),
            )
            .route(
                &format!("{prefix}/vch/:id"),
                get(inspect_entity)
                    .post(act_on_entity)
                    .delete(delete_entity),
            )
            .route(&format!("{prefix}/vch/:id/unlock"), post(unlock_entity))
            .route(&format!("{prefix}/task/:task"), get(get_task));
    }
    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Spawn the REST API on `addr`.
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let addr = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %addr, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Default, Deserialize)]
struct TargetQuery {
    #[serde(default)]
    thumbprint: Option<String>,
    #[serde(default, rename = "compute-resource")]
    compute_resource: Option<String>,
    #[serde(default)]
    action: Option<String>,
}

fn target(
    params: &HashMap<String, String>,
    query: &TargetQuery,
    credentials: BasicCredentials,
) -> Result<Target, ApiError> {
    let host = params
        .get("target")
        .filter(|host| !host.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("target is required"))?;
    let mut target = Target::new(host.as_str(), credentials.0);
    if let Some(datacenter) = params.get("datacenter") {
        target = target.with_datacenter(datacenter.as_str());
    }
    if let Some(thumbprint) = query.thumbprint.as_deref().filter(|t| !t.is_empty()) {
        target = target.with_thumbprint(thumbprint);
    }
    if let Some(path) = query.compute_resource.as_deref().filter(|p| !p.is_empty()) {
        target = target.with_compute_resource(path);
    }
    Ok(target)
}

fn path_param<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, ApiError> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ApiError::bad_request(format!("{key} is required")))
}

/// Decode a JSON body that callers may omit entirely.
fn optional_body<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|err| ApiError::bad_request(format!("invalid request body: {err}")))
}

fn accepted(status: StatusCode, outcome: Outcome) -> Response {
    match outcome {
        Outcome::Deferred(task) => (status, Json(TaskResponse { task })).into_response(),
        Outcome::Immediate => status.into_response(),
    }
}

async fn get_version(State(state): State<Arc<ApiState>>) -> Json<String> {
    Json(state.orchestrator.local_version().to_string())
}

async fn list_entities(
    State(state): State<Arc<ApiState>>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<TargetQuery>,
    credentials: BasicCredentials,
) -> Result<Json<ListResponse>, ApiError> {
    let target = target(&params, &query, credentials)?;
    let vchs = state.orchestrator.list(&target).await?;
    Ok(Json(ListResponse { vchs }))
}

async fn create_entity(
    State(state): State<Arc<ApiState>>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<TargetQuery>,
    credentials: BasicCredentials,
    body: Bytes,
) -> Result<Response, ApiError> {
    let target = target(&params, &query, credentials)?;
    let request: CreateRequest = optional_body(&body)?
        .ok_or_else(|| ApiError::bad_request("request body is required"))?;
    let config = state
        .translator
        .create(request, target.compute_resource.as_deref())?;
    info!(target_host = %target.host, name = %config.name, "create requested");
    let outcome = state
        .orchestrator
        .execute(LifecycleRequest::create(target, config))
        .await?;
    Ok(accepted(StatusCode::CREATED, outcome))
}

async fn inspect_entity(
    State(state): State<Arc<ApiState>>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<TargetQuery>,
    credentials: BasicCredentials,
) -> Result<Json<EntityReport>, ApiError> {
    let target = target(&params, &query, credentials)?;
    let id = EntityId::new(path_param(&params, "id")?);
    Ok(Json(state.orchestrator.inspect(&target, &id).await?))
}

async fn act_on_entity(
    State(state): State<Arc<ApiState>>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<TargetQuery>,
    credentials: BasicCredentials,
    body: Bytes,
) -> Result<Response, ApiError> {
    let raw = query
        .action
        .as_deref()
        .ok_or_else(|| ApiError::unprocessable("action query parameter is required"))?;
    let kind = ActionKind::from_str(raw)
        .map_err(|_| ApiError::unprocessable(format!("unknown action {raw:?}")))?;

    let target = target(&params, &query, credentials)?;
    let id = EntityId::new(path_param(&params, "id")?);
    let action = match kind {
        ActionKind::Debug => Action::Debug,
        ActionKind::Upgrade | ActionKind::Rollback => {
            let change: ChangeRequest = optional_body(&body)?.unwrap_or_default();
            let delta = state.translator.change(change)?;
            if kind == ActionKind::Upgrade {
                Action::Upgrade(delta)
            } else {
                Action::Rollback(delta)
            }
        }
        ActionKind::Create | ActionKind::Delete => {
            return Err(ApiError::unprocessable(format!(
                "action {kind} is not accepted on this route"
            )))
        }
    };

    let outcome = state
        .orchestrator
        .execute(LifecycleRequest::for_entity(target, id, action))
        .await?;
    Ok(accepted(StatusCode::ACCEPTED, outcome))
}

async fn delete_entity(
    State(state): State<Arc<ApiState>>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<TargetQuery>,
    credentials: BasicCredentials,
    body: Bytes,
) -> Result<Response, ApiError> {
    let target = target(&params, &query, credentials)?;
    let id = EntityId::new(path_param(&params, "id")?);
    let scope = translate::delete_scope(optional_body::<DeleteRequest>(&body)?);
    let outcome = state
        .orchestrator
        .execute(LifecycleRequest::for_entity(
            target,
            id,
            Action::Delete(scope),
        ))
        .await?;
    Ok(accepted(StatusCode::ACCEPTED, outcome))
}

async fn unlock_entity(
    State(state): State<Arc<ApiState>>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<TargetQuery>,
    credentials: BasicCredentials,
) -> Result<StatusCode, ApiError> {
    let target = target(&params, &query, credentials)?;
    let id = EntityId::new(path_param(&params, "id")?);
    state.orchestrator.unlock(&target, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_task(
    State(state): State<Arc<ApiState>>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<TargetQuery>,
    credentials: BasicCredentials,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let target = target(&params, &query, credentials)?;
    let task = TaskRef::new(path_param(&params, "task")?);
    let status = state.orchestrator.task_status(&target, &task).await?;
    Ok(Json(TaskStatusResponse { task, status }))
}
