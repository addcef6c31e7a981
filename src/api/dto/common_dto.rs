//! Shared DTO types used across multiple endpoints.

use serde::Serialize;
use utoipa::ToSchema;

/// Success envelope: `{ success: true, data?, message? }`.
///
/// Handled non-errors (a disabled scheduled run) use the same shape with
/// `success: false` and a message.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    /// `true` unless the request was handled without doing anything.
    pub success: bool,
    /// Payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Short human-readable outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying `data`.
    #[must_use]
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    /// Successful response carrying `data` and a message.
    #[must_use]
    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}

impl ApiResponse<()> {
    /// Handled request that did nothing.
    #[must_use]
    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}
