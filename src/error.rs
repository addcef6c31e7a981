//! Service error types with HTTP status code mapping.
//!
//! [`BackupError`] is the central error type. Each variant maps to a
//! specific HTTP status code and the `{ success: false, ... }` envelope.
//! Display strings never include secrets: store and archive errors render
//! only their operation context, while the underlying source is logged.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::archive::ArchiveError;
use crate::domain::OperationKind;
use crate::persistence::StoreError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "success": false,
///   "error": "no database snapshot found in the archive",
///   "code": 2001
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Human-readable error message.
    pub error: String,
    /// Numeric error code (see code ranges below).
    pub code: u32,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request              |
/// | 2000–2999 | State/Not Found | 404 / 409 / 422              |
/// | 3000–3999 | Server          | 500 Internal Server Error    |
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unsupported `action` discriminator.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Submitted or stored backup settings are invalid.
    #[error("invalid backup config: {0}")]
    InvalidConfig(String),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another operation of the same kind is running.
    #[error("a {0} operation is already running")]
    OperationInProgress(OperationKind),

    /// Archive content does not have the snapshot shape.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// Required setting is absent; names the environment variable.
    #[error("backup service is not configured: {0} is not set")]
    ConfigurationMissing(&'static str),

    /// Reading a table failed under the abort policy.
    #[error("snapshot failed: table {table} could not be read")]
    SnapshotFailed {
        /// Snapshot key of the failing table.
        table: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// Persistence layer failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote archive failure.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BackupError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::UnknownAction(_) => 1002,
            Self::InvalidConfig(_) => 1003,
            Self::NotFound(_) => 2001,
            Self::OperationInProgress(_) => 2002,
            Self::MalformedArchive(_) => 2003,
            Self::Internal(_) => 3000,
            Self::Store(_) => 3001,
            Self::ConfigurationMissing(_) => 3002,
            Self::SnapshotFailed { .. } => 3003,
            Self::Archive(_) => 3004,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::UnknownAction(_) | Self::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::OperationInProgress(_) => StatusCode::CONFLICT,
            Self::MalformedArchive(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ConfigurationMissing(_)
            | Self::SnapshotFailed { .. }
            | Self::Store(_)
            | Self::Archive(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BackupError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = ?self, "request failed");
        } else {
            tracing::debug!(code = self.error_code(), error = %self, "request rejected");
        }
        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            code: self.error_code(),
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
