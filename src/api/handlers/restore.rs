//! Restore handler.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use super::json_body;
use crate::api::dto::ApiResponse;
use crate::app_state::AppState;
use crate::error::{BackupError, ErrorResponse};
use crate::service::{RestoreReport, RestoreRequest};

/// `POST /api/restore` — Apply a snapshot to the database.
///
/// A request without a JSON body restores the newest snapshot with the
/// `merge` strategy.
///
/// # Errors
///
/// Returns [`BackupError`] if the snapshot is missing or malformed, the
/// request is invalid, another operation is running, or the write failed.
#[utoipa::path(
    post,
    path = "/api/restore",
    tag = "Restore",
    summary = "Restore a snapshot",
    description = "Restores `path` (or the newest snapshot) with the `merge` or `replace` strategy, optionally limited to `tables`. A `replace` limited to `tables` must also list every table that references them (for example `users` needs `accounts`, `sessions`, `reservations` and their children); otherwise the request is rejected before anything is deleted. The archive is fully validated before the database is touched, and the write is a single transaction.",
    request_body = RestoreRequest,
    responses(
        (status = 200, description = "Snapshot restored", body = ApiResponse<RestoreReport>),
        (status = 400, description = "Invalid path or table, or a replace filter missing referencing tables", body = ErrorResponse),
        (status = 404, description = "Snapshot not found", body = ErrorResponse),
        (status = 409, description = "Another backup or restore is running", body = ErrorResponse),
        (status = 422, description = "Malformed snapshot", body = ErrorResponse),
        (status = 500, description = "Restore failed and was rolled back", body = ErrorResponse),
    )
)]
pub async fn restore_snapshot(
    State(state): State<AppState>,
    payload: Result<Json<RestoreRequest>, JsonRejection>,
) -> Result<impl IntoResponse, BackupError> {
    let request = match payload {
        Err(JsonRejection::MissingJsonContentType(_)) => RestoreRequest::default(),
        other => json_body(other)?,
    };
    let report = state.backup_service.restore(&request).await?;
    let message = format!("restored {} rows from {}", report.total_rows, report.path);
    Ok(Json(ApiResponse::with_message(report, message)))
}

/// Restore routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/restore", post(restore_snapshot))
}
