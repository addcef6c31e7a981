//! REST endpoint handlers organized by resource.

pub mod backup;
pub mod email_queue;
pub mod restore;
pub mod system;

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;

use crate::app_state::AppState;
use crate::error::BackupError;

/// Composes all resource routes under `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(backup::routes())
        .merge(restore::routes())
        .merge(email_queue::routes())
}

/// Unwraps a JSON body, turning extractor rejections into the standard
/// error envelope.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, BackupError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| BackupError::InvalidRequest(rejection.body_text()))
}
