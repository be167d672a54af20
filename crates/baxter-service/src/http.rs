//! Control-plane HTTP router: the §6 endpoint table, bearer-token auth,
//! request timeouts and a 1 MiB body cap, and the `{code, message}` error
//! envelope built on `baxter_core::Error::code()`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use baxter_core::engine;
use baxter_core::error::Error;
use baxter_core::manifest;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::supervisor::Supervisor;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `TimeoutLayer` covers request read+write as one deadline and
/// `RequestBodyLimitLayer` caps JSON bodies at 1 MiB, per §4.9. A
/// connection-idle timeout and a header-bytes cap are also called for, but
/// `axum::serve`'s `hyper_util` auto-builder (axum 0.7) takes no knob for
/// either — those live one layer down, in the `hyper::server::conn`
/// builder that `serve` constructs internally and doesn't expose. Fronting
/// the daemon with a reverse proxy is the usual way to get them; nothing
/// here papers over their absence.
pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/v1/status", get(status))
        .route("/v1/backup/run", post(backup_run))
        .route("/v1/verify/run", post(verify_run))
        .route("/v1/config/reload", post(config_reload))
        .route("/v1/snapshots", get(snapshots))
        .route("/v1/restore/list", get(restore_list))
        .route("/v1/restore/dry-run", post(restore_dry_run))
        .route("/v1/restore/run", post(restore_run))
        .fallback(not_found)
        .with_state(supervisor.clone())
        .layer(middleware::from_fn_with_state(supervisor, auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}

async fn not_found() -> Response {
    AppError::NotFound.into_response()
}

async fn auth_middleware(State(supervisor): State<Arc<Supervisor>>, req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get("X-Baxter-Token")
        .and_then(|v| v.to_str().ok());
    let tokens = supervisor.config().server.tokens.clone();
    if !auth::token_is_valid(&tokens, token) {
        return AppError::Unauthorized.into_response();
    }
    next.run(req).await
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

enum AppError {
    Lib(Error),
    Unauthorized,
    NotFound,
    ConfigReloadFailed(String),
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        AppError::Lib(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Lib(e) => (status_for_code(e.code()), e.code(), e.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized".to_string()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found", "no such route".to_string()),
            AppError::ConfigReloadFailed(msg) => (StatusCode::BAD_REQUEST, "config_reload_failed", msg),
        };
        (status, Json(ErrorBody { code, message })).into_response()
    }
}

fn status_for_code(code: &str) -> StatusCode {
    match code {
        "invalid_request" | "invalid_restore_target" => StatusCode::BAD_REQUEST,
        "path_lookup_failed" | "snapshot_list_failed" => StatusCode::NOT_FOUND,
        "target_exists" | "backup_running" | "verify_running" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn status(State(supervisor): State<Arc<Supervisor>>) -> impl IntoResponse {
    Json(supervisor.status_snapshot())
}

async fn backup_run(State(supervisor): State<Arc<Supervisor>>) -> Response {
    match supervisor.trigger_backup() {
        Ok(()) => (StatusCode::ACCEPTED, Json(AcceptedBody::default())).into_response(),
        Err(()) => AppError::from(Error::BackupRunning).into_response(),
    }
}

async fn verify_run(State(supervisor): State<Arc<Supervisor>>) -> Response {
    match supervisor.trigger_verify() {
        Ok(()) => (StatusCode::ACCEPTED, Json(AcceptedBody::default())).into_response(),
        Err(()) => AppError::from(Error::VerifyRunning).into_response(),
    }
}

async fn config_reload(State(supervisor): State<Arc<Supervisor>>) -> Response {
    match supervisor.reload_config() {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "reloaded"}))).into_response(),
        Err(message) => AppError::ConfigReloadFailed(message).into_response(),
    }
}

#[derive(Debug, Serialize, Default)]
struct AcceptedBody {
    status: &'static str,
}

impl AcceptedBody {
    fn default() -> Self {
        Self { status: "accepted" }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SnapshotDto {
    id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    entry_count: usize,
}

async fn snapshots(
    State(supervisor): State<Arc<Supervisor>>,
    Query(q): Query<SnapshotsQuery>,
) -> Result<Json<Vec<SnapshotDto>>, AppError> {
    let paths = supervisor.paths();
    let mut records = manifest::snapshot_list(&paths.snapshots_dir())?;
    if let Some(limit) = q.limit {
        records.truncate(limit);
    }
    Ok(Json(
        records
            .into_iter()
            .map(|r| SnapshotDto {
                id: r.id,
                created_at: r.created_at,
                entry_count: r.entry_count,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize, Default)]
struct RestoreListQuery {
    snapshot: Option<String>,
    prefix: Option<String>,
    contains: Option<String>,
}

async fn restore_list(
    State(supervisor): State<Arc<Supervisor>>,
    Query(q): Query<RestoreListQuery>,
) -> Result<Json<Vec<manifest::ManifestEntry>>, AppError> {
    let paths = supervisor.paths();
    let selector = q.snapshot.unwrap_or_default();
    let manifest = manifest::resolve_selector(&paths.manifest_path(), &paths.snapshots_dir(), &selector)?;
    let prefix = q.prefix.unwrap_or_default();
    let contains = q.contains.unwrap_or_default();
    let entries: Vec<manifest::ManifestEntry> = engine::restore::list(&manifest, &prefix, &contains)
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
struct RestoreRequest {
    path: String,
    destination_root: Option<String>,
    overwrite: Option<bool>,
    verify_only: Option<bool>,
    snapshot: Option<String>,
}

async fn restore_dry_run(
    State(supervisor): State<Arc<Supervisor>>,
    Json(body): Json<RestoreRequest>,
) -> Result<Json<engine::restore::RestoreReport>, AppError> {
    let ctx = supervisor.engine_context().await?;
    let selector = body.snapshot.unwrap_or_default();
    let destination_root = body.destination_root.map(PathBuf::from);
    let report = engine::restore::run(&ctx, &selector, &body.path, destination_root.as_deref(), false, true, false)
        .await?;
    Ok(Json(report))
}

async fn restore_run(
    State(supervisor): State<Arc<Supervisor>>,
    Json(body): Json<RestoreRequest>,
) -> Result<Json<engine::restore::RestoreReport>, AppError> {
    let ctx = supervisor.engine_context().await?;
    let selector = body.snapshot.clone().unwrap_or_default();
    let destination_root = body.destination_root.as_ref().map(PathBuf::from);
    let overwrite = body.overwrite.unwrap_or(false);
    let verify_only = body.verify_only.unwrap_or(false);

    let result = engine::restore::run(
        &ctx,
        &selector,
        &body.path,
        destination_root.as_deref(),
        overwrite,
        false,
        verify_only,
    )
    .await;

    match &result {
        Ok(_) => supervisor.record_restore(&body.path, None),
        Err(e) => supervisor.record_restore(&body.path, Some(e.to_string())),
    }
    Ok(Json(result?))
}
