//! Service layer: business logic orchestration.
//!
//! [`BackupService`] coordinates the snapshot, publish, sweep and restore
//! stages, holds the single-flight guard, and emits events through the
//! [`super::domain::EventBus`]. The stages themselves are plain structs
//! that can be used and tested on their own.

pub mod audit;
pub mod backup_service;
pub mod config_service;
pub mod email_queue;
pub mod restore;
pub mod retention;
pub mod snapshot_builder;
pub mod upload_manifest;

pub use backup_service::{BackupRunOutcome, BackupService, BackupStatus, ComponentReport};
pub use config_service::ConfigService;
pub use email_queue::{EmailQueueAction, EmailQueueService};
pub use restore::{RestoreEngine, RestoreReport, RestoreRequest};
pub use retention::{RetentionSweeper, SweepReport};
pub use snapshot_builder::{PartialReadPolicy, SnapshotBuilder};
pub use upload_manifest::UploadManifest;

use crate::error::BackupError;

/// A collaborator that may be absent because its settings are missing.
///
/// The service starts without a database URL or archive credentials; only
/// the operations that need the missing piece fail, with
/// [`BackupError::ConfigurationMissing`] naming the variable to set.
#[derive(Debug, Clone)]
pub enum Dependency<T> {
    /// Configured and usable.
    Ready(T),
    /// Not configured; holds the environment variable that enables it.
    Missing(&'static str),
}

impl<T: Clone> Dependency<T> {
    /// Returns the collaborator.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::ConfigurationMissing`] if it is not configured.
    pub fn get(&self) -> Result<T, BackupError> {
        match self {
            Self::Ready(value) => Ok(value.clone()),
            Self::Missing(variable) => Err(BackupError::ConfigurationMissing(variable)),
        }
    }

    /// Returns the collaborator if configured.
    #[must_use]
    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Missing(_) => None,
        }
    }
}
