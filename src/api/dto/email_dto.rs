//! Query and body types for the email queue endpoints.

use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

/// Query of `GET /api/email/queue`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EmailQueueQuery {
    /// Status filter; `all` or absent for every status.
    pub status: Option<String>,
    /// Maximum items returned (default 50).
    pub limit: Option<u32>,
}

/// Body of `POST /api/email/queue`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailQueueActionRequest {
    /// `retry` or `cancel`.
    pub action: Option<String>,
    /// Target item id.
    pub queue_id: Option<String>,
}
