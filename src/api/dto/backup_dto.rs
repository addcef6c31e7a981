//! Request bodies for the backup endpoints.

use serde::Deserialize;
use utoipa::ToSchema;

use crate::domain::BackupConfig;
use crate::error::BackupError;

/// Body of `POST /api/backup`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BackupActionRequest {
    /// `create`, `configure` or `toggle`.
    pub action: Option<String>,
    /// New settings, required by `configure`.
    pub config: Option<BackupConfig>,
}

/// Parsed backup action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupAction {
    /// Run the pipeline now.
    Create,
    /// Replace the settings.
    Configure(BackupConfig),
    /// Flip `enabled`.
    Toggle,
}

impl TryFrom<BackupActionRequest> for BackupAction {
    type Error = BackupError;

    fn try_from(request: BackupActionRequest) -> Result<Self, Self::Error> {
        let action = request
            .action
            .ok_or_else(|| BackupError::InvalidRequest("action is required".into()))?;
        match action.as_str() {
            "create" => Ok(Self::Create),
            "toggle" => Ok(Self::Toggle),
            "configure" => request.config.map(Self::Configure).ok_or_else(|| {
                BackupError::InvalidRequest("configure requires a config object".into())
            }),
            _ => Err(BackupError::UnknownAction(action)),
        }
    }
}
