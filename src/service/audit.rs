//! Audit trail: persists every [`BackupEvent`] to the system log table.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::{BackupEvent, EventBus};
use crate::persistence::{AuditEntry, Store};

/// `source` column value for entries written here.
pub const AUDIT_SOURCE: &str = "backup";

/// Builds the log row for `event`.
#[must_use]
pub fn entry_for(event: &BackupEvent) -> AuditEntry {
    AuditEntry {
        id: Uuid::new_v4().to_string(),
        level: event.level(),
        message: event.summary(),
        source: AUDIT_SOURCE.to_owned(),
        metadata: serde_json::to_string(event).unwrap_or_else(|_| "{}".to_owned()),
        timestamp: chrono::Utc::now(),
    }
}

/// Subscribes to `bus` and appends each event to `store` until the bus is
/// dropped. Write failures are logged and never reach the publisher.
pub fn spawn_writer(bus: &EventBus, store: Arc<dyn Store>) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let entry = entry_for(&event);
                    if let Err(e) = store.append_audit(&entry).await {
                        tracing::warn!(
                            event = event.event_type_str(),
                            error = %e,
                            "cannot write audit entry"
                        );
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "audit writer lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("audit writer stopped");
    })
}
