//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api`; `/health` sits at the root.

pub mod dto;
pub mod handlers;

use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// Upper bound on a single request, long enough for a full backup run.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// OpenAPI document for every endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "grbt8-backup",
        description = "Snapshot, archive, retention and restore service for the grbt8 database"
    ),
    paths(
        handlers::system::health_handler,
        handlers::backup::scheduled_backup,
        handlers::backup::backup_status,
        handlers::backup::list_archives,
        handlers::backup::backup_action,
        handlers::restore::restore_snapshot,
        handlers::email_queue::list_queue,
        handlers::email_queue::queue_action,
    ),
    components(schemas(crate::error::ErrorResponse)),
    tags(
        (name = "System", description = "Health checks"),
        (name = "Backup", description = "Backup runs, status and settings"),
        (name = "Restore", description = "Snapshot restore"),
        (name = "Email", description = "Email queue actions")
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api", handlers::routes())
        .merge(handlers::system::routes())
}

/// Router with state, middleware and, with the `swagger-ui` feature, the
/// documentation UI at `/swagger-ui`.
pub fn app(state: AppState) -> Router {
    let router = build_router();

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(REQUEST_TIMEOUT);

    router
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/backup",
            "/api/backup/cron",
            "/api/backup/status",
            "/api/backup/archives",
            "/api/restore",
            "/api/email/queue",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing from OpenAPI");
        }
    }
}
