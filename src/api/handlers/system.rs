//! System endpoints: health check.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Health check response.
///
/// The process answers `ok` even when the database or archive is not
/// configured; those fields say which operations will fail.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `ok` when the server answers.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Server time.
    pub timestamp: DateTime<Utc>,
    /// A database is configured.
    pub database: bool,
    /// Archive description (`github:org/repo@main`), absent when missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    /// The audit writer is subscribed to backup events.
    pub audit: bool,
}

/// `GET /health` — Liveness and configured collaborators.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns the version, server time, and which collaborators (database, archive, audit writer) are configured.",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
        database: state.backup_service.has_store(),
        archive: state.backup_service.destination(),
        audit: state.event_bus.receiver_count() > 0,
    })
}

/// System routes mounted at the root level (not under /api).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
