//! Backup handlers: scheduled trigger, status, archive listing, actions.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use super::json_body;
use crate::api::dto::{ApiResponse, BackupAction, BackupActionRequest};
use crate::app_state::AppState;
use crate::domain::BackupConfig;
use crate::error::{BackupError, ErrorResponse};
use crate::service::BackupRunOutcome;
use crate::service::backup_service::{ArchiveSummary, BackupStatus};

/// `GET /api/backup/cron` — Scheduled backup trigger.
///
/// # Errors
///
/// Returns [`BackupError`] if the run fails or is already in progress.
#[utoipa::path(
    get,
    path = "/api/backup/cron",
    tag = "Backup",
    summary = "Run a scheduled backup",
    description = "Called by an external scheduler. Runs the full pipeline when automatic backups are enabled; otherwise answers 200 with `success: false`.",
    responses(
        (status = 200, description = "Run finished or skipped", body = ApiResponse<BackupRunOutcome>),
        (status = 409, description = "A backup is already running", body = ErrorResponse),
        (status = 500, description = "Run failed or service not configured", body = ErrorResponse),
    )
)]
pub async fn scheduled_backup(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, BackupError> {
    let body = match state.backup_service.run_scheduled().await? {
        Some(outcome) => to_json(ApiResponse::with_message(
            outcome,
            "automatic backup completed",
        ))?,
        None => to_json(ApiResponse::declined("automatic backup is disabled"))?,
    };
    Ok(Json(body))
}

/// `GET /api/backup/status` — Settings, schedule and archive summary.
#[utoipa::path(
    get,
    path = "/api/backup/status",
    tag = "Backup",
    summary = "Backup status",
    description = "Returns the current settings, the newest snapshot time, the next scheduled run, the archive count and the live record count.",
    responses(
        (status = 200, description = "Status", body = ApiResponse<BackupStatus>),
    )
)]
pub async fn backup_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::data(state.backup_service.status().await))
}

/// `GET /api/backup/archives` — Snapshot archives, newest first.
///
/// # Errors
///
/// Returns [`BackupError`] if the archive is not configured or cannot be
/// listed.
#[utoipa::path(
    get,
    path = "/api/backup/archives",
    tag = "Backup",
    summary = "List snapshot archives",
    description = "Lists `database/` snapshot entries with their parsed timestamps, newest first. Any `path` can be passed to the restore endpoint.",
    responses(
        (status = 200, description = "Archive entries", body = ApiResponse<Vec<ArchiveSummary>>),
        (status = 500, description = "Archive unavailable", body = ErrorResponse),
    )
)]
pub async fn list_archives(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, BackupError> {
    let archives = state.backup_service.list_archives().await?;
    Ok(Json(ApiResponse::data(archives)))
}

/// `POST /api/backup` — Manual run, settings update or toggle.
///
/// # Errors
///
/// Returns [`BackupError`] for a bad action, invalid settings, or a
/// failed run.
#[utoipa::path(
    post,
    path = "/api/backup",
    tag = "Backup",
    summary = "Backup actions",
    description = "`{action: create}` runs the pipeline now, `{action: configure, config}` replaces the settings, `{action: toggle}` flips automatic backups.",
    request_body = BackupActionRequest,
    responses(
        (status = 200, description = "Action applied", body = ApiResponse<BackupConfig>),
        (status = 400, description = "Unknown action or invalid settings", body = ErrorResponse),
        (status = 409, description = "A backup is already running", body = ErrorResponse),
        (status = 500, description = "Run failed or service not configured", body = ErrorResponse),
    )
)]
pub async fn backup_action(
    State(state): State<AppState>,
    payload: Result<Json<BackupActionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, BackupError> {
    let service = &state.backup_service;
    let body = match BackupAction::try_from(json_body(payload)?)? {
        BackupAction::Create => {
            let outcome = service.run_backup().await?;
            to_json(ApiResponse::with_message(outcome, "backup completed"))?
        }
        BackupAction::Configure(config) => {
            let saved = service.configure(config).await?;
            to_json(ApiResponse::with_message(saved, "backup settings saved"))?
        }
        BackupAction::Toggle => {
            let saved = service.toggle().await?;
            let message = if saved.enabled {
                "automatic backup enabled"
            } else {
                "automatic backup disabled"
            };
            to_json(ApiResponse::with_message(saved, message))?
        }
    };
    Ok(Json(body))
}

fn to_json<T: serde::Serialize>(
    response: ApiResponse<T>,
) -> Result<serde_json::Value, BackupError> {
    serde_json::to_value(response)
        .map_err(|e| BackupError::Internal(format!("cannot encode response: {e}")))
}

/// Backup routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/backup", post(backup_action))
        .route("/backup/cron", get(scheduled_backup))
        .route("/backup/status", get(backup_status))
        .route("/backup/archives", get(list_archives))
}
