//! Control surface: status page, backup and restore endpoints.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, info, warn};
use world_keeper_core::Error;
use world_keeper_process::{ServerState, SupervisorHandle};
use world_keeper_storage::RecordSummary;

use crate::keeper::Keeper;
use crate::page;

#[derive(Clone)]
pub struct AppState {
    pub keeper: Keeper,
    pub supervisor: SupervisorHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/backups", get(api_backups))
        .route("/backups", post(create_backup))
        .route("/backups/{id}/download", get(download_backup))
        .route("/backups/{id}/restore", post(restore_backup))
        .with_state(state)
}

pub struct HttpError(Error);

impl From<Error> for HttpError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) | Error::ExecutableNotFound { .. } => StatusCode::NOT_FOUND,
            Error::ConnectionFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Busy(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            warn!(error = %self.0, "request rejected");
        }
        let reason = status.canonical_reason().unwrap_or("Error");
        let body = page::error(status.as_u16(), reason, &self.0.to_string());
        (status, Html(body)).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let status = state.supervisor.status();
    let backups = state.keeper.store().list().await;
    Html(page::index(&state.keeper.config().http, &status, &backups))
}

#[derive(Serialize)]
struct StatusBody {
    state: &'static str,
    pid: Option<u32>,
    exit_code: Option<i32>,
    detail: Option<String>,
    executable: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
    recent_output: Vec<String>,
}

async fn api_status(State(state): State<AppState>) -> Json<StatusBody> {
    let status = state.supervisor.status();
    let (pid, exit_code, detail) = match &status.state {
        ServerState::Running { pid } => (Some(*pid), None, None),
        ServerState::Exited { code } => (None, *code, None),
        ServerState::NotFound { attempted } => (
            None,
            None,
            Some(format!(
                "tried {}",
                attempted
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        ),
        ServerState::SpawnFailed { reason } => (None, None, Some(reason.clone())),
        ServerState::Starting => (None, None, None),
    };
    Json(StatusBody {
        state: status.state.label(),
        pid,
        exit_code,
        detail,
        executable: status.executable.map(|p| p.display().to_string()),
        started_at: status.started_at.map(page::timestamp),
        finished_at: status.finished_at.map(page::timestamp),
        recent_output: status.recent_output,
    })
}

#[derive(Serialize)]
struct BackupBody {
    id: String,
    filename: String,
    created_at: String,
    size_bytes: u64,
}

impl From<RecordSummary> for BackupBody {
    fn from(record: RecordSummary) -> Self {
        Self {
            id: record.id,
            filename: record.filename,
            created_at: page::timestamp(record.created_at),
            size_bytes: record.size_bytes,
        }
    }
}

async fn api_backups(State(state): State<AppState>) -> Json<Vec<BackupBody>> {
    let backups = state.keeper.store().list().await;
    Json(backups.into_iter().map(BackupBody::from).collect())
}

async fn create_backup(State(state): State<AppState>) -> Result<Redirect, HttpError> {
    let outcome = state.keeper.backup().await?;
    info!(id = %outcome.id, pruned = outcome.pruned.len(), "backup created from web request");
    Ok(Redirect::to("/"))
}

async fn download_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    let record = state.keeper.store().get(&id).await?;
    let disposition = format!("attachment; filename=\"{}\"", record.filename);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        record.payload,
    )
        .into_response())
}

async fn restore_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Redirect, HttpError> {
    state.keeper.restore(&id, Some(&state.supervisor)).await?;
    Ok(Redirect::to("/"))
}
