//! The control-plane HTTP/WebSocket unit (C7): REST CRUD over `DnsService`
//! and the singleton event-bus session, served with `axum` the same way the
//! teacher's HTTP unit served its zone/policy API.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use dnsctl_api::{
    ForwarderCreate, ForwarderUpdate, RecordCreate, RecordUpdate, RpzRuleCreate, RpzRuleUpdate, ServiceError,
    ZoneCreate, ZoneUpdate,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::center::Center;
use crate::comms::ApplicationCommand;
use crate::events::{self, SessionRegistry};

pub struct HttpServerUnit {
    center: Arc<Center>,
}

struct AppState {
    center: Arc<Center>,
    sessions: Arc<SessionRegistry>,
}

impl HttpServerUnit {
    pub fn new(center: Arc<Center>) -> Self {
        Self { center }
    }

    pub async fn run(
        self,
        mut cmd_rx: mpsc::UnboundedReceiver<ApplicationCommand>,
        ready_tx: oneshot::Sender<()>,
    ) {
        let listener = match TcpListener::bind(self.center.config.listen.as_str()).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("http server failed to bind {}: {err}", self.center.config.listen);
                let _ = ready_tx.send(());
                return;
            }
        };

        let state = Arc::new(AppState {
            center: self.center,
            sessions: Arc::new(SessionRegistry::new()),
        });
        let app = build_router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let _ = ready_tx.send(());
        info!("http server unit ready");

        loop {
            match cmd_rx.recv().await {
                Some(ApplicationCommand::Terminate) | None => {
                    info!("http server unit terminating");
                    let _ = shutdown_tx.send(());
                    break;
                }
                Some(ApplicationCommand::Reconfigure) => info!("http server unit reconfigured"),
            }
        }

        if let Err(err) = serve_task.await {
            error!("http server task panicked: {err}");
        }
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_upgrade))
        .route("/zones", get(list_zones).post(create_zone))
        .route("/zones/{id}", put(update_zone).delete(delete_zone))
        .route("/zones/{id}/toggle", post(toggle_zone))
        .route("/records", post(create_record))
        .route("/records/{id}", put(update_record).delete(delete_record))
        .route("/forwarders", get(list_forwarders).post(create_forwarder))
        .route("/forwarders/{id}", put(update_forwarder).delete(delete_forwarder))
        .route("/forwarders/{id}/toggle", post(toggle_forwarder))
        .route("/rpz/rules", get(list_rpz_rules).post(create_rpz_rule))
        .route("/rpz/rules/{id}", put(update_rpz_rule).delete(delete_rpz_rule))
        .route("/deploy", post(deploy_now))
        .route("/audit/snapshots", get(list_snapshots))
        .route("/audit/rollback/{id}", post(rollback_to_snapshot))
        .with_state(state)
}

/// Maps a `ServiceError` onto an HTTP status the way the teacher's HTTP
/// unit maps its own domain errors onto JSON error bodies.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::Validation(_) | ServiceError::InvariantViolation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Conflict => StatusCode::CONFLICT,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::DeployRejected(_) | ServiceError::DeployFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.0)).into_response()
    }
}

struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
struct StatusView {
    zones: usize,
    forwarders: usize,
    rpz_rules: usize,
}

async fn status(State(state): State<Arc<AppState>>) -> ApiResult<StatusView> {
    let zones = crate::service::list_zones(&state.center).await?;
    let forwarders = crate::service::list_forwarders(&state.center).await?;
    let rpz_rules = crate::service::list_rpz_rules(&state.center).await?;
    Ok(Json(StatusView {
        zones: zones.len(),
        forwarders: forwarders.len(),
        rpz_rules: rpz_rules.len(),
    }))
}

#[derive(Deserialize)]
struct WsAuthQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Resolves the caller's identity from the `?token=` query param against
/// `config.auth_tokens` before ever handing off to [`events::handle_socket`];
/// an unrecognized or missing token still completes the upgrade but the
/// socket is then closed immediately with code 4401 (spec. §4.7, P8).
async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = query
        .token
        .and_then(|token| state.center.config.auth_tokens.get(&token).cloned());
    let center = state.center.clone();
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| events::handle_socket(socket, center, sessions, identity))
}

async fn list_zones(State(state): State<Arc<AppState>>) -> ApiResult<Vec<dnsctl_api::ZoneView>> {
    Ok(Json(crate::service::list_zones(&state.center).await?))
}

async fn create_zone(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ZoneCreate>,
) -> ApiResult<dnsctl_api::ZoneView> {
    Ok(Json(crate::service::create_zone(&state.center, req).await?))
}

async fn update_zone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(mut req): Json<ZoneUpdate>,
) -> ApiResult<dnsctl_api::ZoneView> {
    req.id = id;
    Ok(Json(crate::service::update_zone(&state.center, req).await?))
}

async fn delete_zone(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    crate::service::delete_zone(&state.center, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ToggleBody {
    version: i64,
    active: bool,
}

async fn toggle_zone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<ToggleBody>,
) -> Result<StatusCode, ApiError> {
    crate::service::toggle_zone(&state.center, id, body.version, body.active).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_record(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecordCreate>,
) -> ApiResult<dnsctl_api::RecordView> {
    Ok(Json(crate::service::create_record(&state.center, req).await?))
}

async fn update_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(mut req): Json<RecordUpdate>,
) -> Result<StatusCode, ApiError> {
    req.id = id;
    crate::service::update_record(&state.center, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_record(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    crate::service::delete_record(&state.center, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_forwarders(State(state): State<Arc<AppState>>) -> ApiResult<Vec<dnsctl_api::ForwarderView>> {
    Ok(Json(crate::service::list_forwarders(&state.center).await?))
}

async fn create_forwarder(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForwarderCreate>,
) -> ApiResult<dnsctl_api::ForwarderView> {
    Ok(Json(crate::service::create_forwarder(&state.center, req).await?))
}

async fn update_forwarder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(mut req): Json<ForwarderUpdate>,
) -> Result<StatusCode, ApiError> {
    req.id = id;
    crate::service::update_forwarder(&state.center, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_forwarder(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    crate::service::delete_forwarder(&state.center, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_forwarder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<ToggleBody>,
) -> Result<StatusCode, ApiError> {
    crate::service::toggle_forwarder(&state.center, id, body.version, body.active).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_rpz_rules(State(state): State<Arc<AppState>>) -> ApiResult<Vec<dnsctl_api::RpzRuleView>> {
    Ok(Json(crate::service::list_rpz_rules(&state.center).await?))
}

async fn create_rpz_rule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RpzRuleCreate>,
) -> ApiResult<dnsctl_api::RpzRuleView> {
    Ok(Json(crate::service::create_rpz_rule(&state.center, req).await?))
}

async fn update_rpz_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(mut req): Json<RpzRuleUpdate>,
) -> Result<StatusCode, ApiError> {
    req.id = id;
    crate::service::update_rpz_rule(&state.center, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_rpz_rule(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    crate::service::delete_rpz_rule(&state.center, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deploy_now(State(state): State<Arc<AppState>>) -> StatusCode {
    crate::service::reload_all(&state.center);
    StatusCode::ACCEPTED
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.center.metrics.assemble(&state.center).await {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/openmetrics-text; version=1.0.0; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(err) => {
            error!("failed to render metrics: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Serialize)]
struct SnapshotView {
    id: i64,
    content_hash: String,
    ts: jiff::Timestamp,
    source_action: String,
}

async fn list_snapshots(State(state): State<Arc<AppState>>) -> Result<Json<Vec<SnapshotView>>, AuditError> {
    let rows = crate::audit::list_snapshots(&state.center).await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| SnapshotView {
                id: row.id,
                content_hash: row.content_hash,
                ts: row.ts,
                source_action: row.source_action,
            })
            .collect(),
    ))
}

async fn rollback_to_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AuditError> {
    crate::audit::rollback_to(&state.center, id).await?;
    Ok(StatusCode::ACCEPTED)
}

struct AuditError(crate::audit::RollbackError);

impl From<crate::audit::RollbackError> for AuditError {
    fn from(err: crate::audit::RollbackError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AuditError {
    fn into_response(self) -> Response {
        use crate::audit::RollbackError;
        let status = match &self.0 {
            RollbackError::NotFound => StatusCode::NOT_FOUND,
            RollbackError::Store(_) | RollbackError::Io(_) | RollbackError::Reload(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}
