//! Email queue handlers: listing and retry/cancel actions.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::json_body;
use crate::api::dto::{ApiResponse, EmailQueueActionRequest, EmailQueueQuery};
use crate::app_state::AppState;
use crate::error::{BackupError, ErrorResponse};
use crate::service::EmailQueueAction;
use crate::service::email_queue::EmailQueueView;

/// `GET /api/email/queue` — Queue items and counters.
///
/// # Errors
///
/// Returns [`BackupError`] for an unknown status or a store failure.
#[utoipa::path(
    get,
    path = "/api/email/queue",
    tag = "Email",
    summary = "List the email queue",
    description = "Returns queue items ordered by priority, schedule and creation time, plus counters over the whole queue.",
    params(EmailQueueQuery),
    responses(
        (status = 200, description = "Queue listing", body = ApiResponse<EmailQueueView>),
        (status = 400, description = "Unknown status", body = ErrorResponse),
        (status = 500, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn list_queue(
    State(state): State<AppState>,
    Query(query): Query<EmailQueueQuery>,
) -> Result<impl IntoResponse, BackupError> {
    let view = state
        .email_queue
        .list(query.status.as_deref(), query.limit)
        .await?;
    Ok(Json(ApiResponse::data(view)))
}

/// `POST /api/email/queue` — Retry or cancel one item.
///
/// # Errors
///
/// Returns [`BackupError`] for a missing id, unknown action or unknown
/// item.
#[utoipa::path(
    post,
    path = "/api/email/queue",
    tag = "Email",
    summary = "Retry or cancel a queued email",
    description = "`retry` puts the item back to pending, increments its retry count and schedules it now. `cancel` marks it cancelled.",
    request_body = EmailQueueActionRequest,
    responses(
        (status = 200, description = "Item updated; `data` is the item id", body = ApiResponse<String>),
        (status = 400, description = "Missing id or unknown action", body = ErrorResponse),
        (status = 404, description = "Unknown item", body = ErrorResponse),
    )
)]
pub async fn queue_action(
    State(state): State<AppState>,
    payload: Result<Json<EmailQueueActionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, BackupError> {
    let request = json_body(payload)?;
    let action: EmailQueueAction = request
        .action
        .as_deref()
        .ok_or_else(|| BackupError::InvalidRequest("action is required".into()))?
        .parse()?;
    let message = state
        .email_queue
        .apply(action, request.queue_id.as_deref())
        .await?;
    Ok(Json(ApiResponse::with_message(
        request.queue_id.unwrap_or_default(),
        message,
    )))
}

/// Email queue routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/email/queue", get(list_queue).post(queue_action))
}
