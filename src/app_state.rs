//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventBus;
use crate::service::{BackupService, EmailQueueService};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Backup pipeline, settings and restore.
    pub backup_service: Arc<BackupService>,
    /// Email queue actions.
    pub email_queue: Arc<EmailQueueService>,
    /// Event bus feeding the audit writer.
    pub event_bus: EventBus,
}
