//! Operator actions on the outbound email queue.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Dependency;
use crate::error::BackupError;
use crate::persistence::{EmailQueueFilter, EmailQueueItem, EmailQueueStats, EmailStatus, Store};

/// Items returned when no limit is given.
pub const DEFAULT_QUEUE_LIMIT: u32 = 50;
/// Largest accepted limit.
pub const MAX_QUEUE_LIMIT: u32 = 500;

/// Queue listing plus counters over the whole queue.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EmailQueueView {
    /// Items matching the filter, highest priority first.
    pub queue: Vec<EmailQueueItem>,
    /// Counters over every item.
    pub stats: EmailQueueStats,
}

/// Action on one queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmailQueueAction {
    /// Put a failed item back in the queue.
    Retry,
    /// Remove an item from the queue.
    Cancel,
}

impl std::str::FromStr for EmailQueueAction {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(Self::Retry),
            "cancel" => Ok(Self::Cancel),
            other => Err(BackupError::UnknownAction(other.to_owned())),
        }
    }
}

/// Lists and updates queue items.
#[derive(Debug, Clone)]
pub struct EmailQueueService {
    store: Dependency<Arc<dyn Store>>,
}

impl EmailQueueService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Dependency<Arc<dyn Store>>) -> Self {
        Self { store }
    }

    /// Lists items with `status` (`all` or absent for every status).
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidRequest`] for an unknown status,
    /// [`BackupError::ConfigurationMissing`] without a store, or
    /// [`BackupError::Store`] if a query failed.
    pub async fn list(
        &self,
        status: Option<&str>,
        limit: Option<u32>,
    ) -> Result<EmailQueueView, BackupError> {
        let status = match status.map(str::trim) {
            None | Some("" | "all") => None,
            Some(raw) => Some(raw.parse::<EmailStatus>().map_err(BackupError::InvalidRequest)?),
        };
        let filter = EmailQueueFilter {
            status,
            limit: limit.unwrap_or(DEFAULT_QUEUE_LIMIT).clamp(1, MAX_QUEUE_LIMIT),
        };
        let store = self.store.get()?;
        let queue = store.list_email_queue(&filter).await?;
        let stats = store.email_queue_stats().await?;
        Ok(EmailQueueView { queue, stats })
    }

    /// Applies `action` to the item `queue_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidRequest`] for a missing id,
    /// [`BackupError::NotFound`] for an unknown one, or a store error.
    pub async fn apply(
        &self,
        action: EmailQueueAction,
        queue_id: Option<&str>,
    ) -> Result<&'static str, BackupError> {
        let id = queue_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BackupError::InvalidRequest("queueId is required".into()))?;
        let store = self.store.get()?;
        let (found, message) = match action {
            EmailQueueAction::Retry => (store.retry_email(id).await?, "email requeued"),
            EmailQueueAction::Cancel => (store.cancel_email(id).await?, "email cancelled"),
        };
        if !found {
            return Err(BackupError::NotFound(format!("email queue item {id}")));
        }
        tracing::info!(queue_id = id, ?action, "email queue item updated");
        Ok(message)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::domain::Row;
    use crate::persistence::MemoryStore;

    fn item(id: &str, status: &str, retries: i64) -> Row {
        let value: Value = json!({
            "id": id,
            "recipient": format!("{id}@example.com"),
            "subject": "Hello",
            "status": status,
            "priority": "normal",
            "retryCount": retries,
            "errorMessage": if status == "failed" { json!("smtp timeout") } else { Value::Null },
            "createdAt": "2026-10-18T10:00:00Z",
        });
        value.as_object().cloned().unwrap_or_default()
    }

    async fn service() -> (Arc<MemoryStore>, EmailQueueService) {
        let store = Arc::new(MemoryStore::new());
        store
            .set_rows(
                "emailQueue",
                vec![
                    item("a", "failed", 1),
                    item("b", "failed", 3),
                    item("c", "pending", 0),
                    item("d", "completed", 0),
                ],
            )
            .await;
        let service = EmailQueueService::new(Dependency::Ready(Arc::clone(&store) as Arc<dyn Store>));
        (store, service)
    }

    #[tokio::test]
    async fn stats_count_retry_needed() {
        let (_store, service) = service().await;
        let Ok(view) = service.list(None, None).await else {
            panic!("listing should succeed");
        };
        assert_eq!(view.queue.len(), 4);
        assert_eq!(view.stats.total, 4);
        assert_eq!(view.stats.failed, 2);
        assert_eq!(view.stats.retry_needed, 1);

        let Ok(failed) = service.list(Some("failed"), Some(1)).await else {
            panic!("filtered listing should succeed");
        };
        assert_eq!(failed.queue.len(), 1);
        assert!(matches!(
            service.list(Some("lost"), None).await,
            Err(BackupError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn retry_requeues_the_item() {
        let (store, service) = service().await;
        assert!(service.apply(EmailQueueAction::Retry, Some("a")).await.is_ok());
        let rows = store.rows("emailQueue").await;
        let Some(row) = rows.iter().find(|row| row.get("id") == Some(&json!("a"))) else {
            panic!("item a should still exist");
        };
        assert_eq!(row.get("status"), Some(&json!("pending")));
        assert_eq!(row.get("retryCount"), Some(&json!(2)));
        assert_eq!(row.get("errorMessage"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn id_is_required_and_must_exist() {
        let (_store, service) = service().await;
        assert!(matches!(
            service.apply(EmailQueueAction::Cancel, None).await,
            Err(BackupError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.apply(EmailQueueAction::Cancel, Some("zzz")).await,
            Err(BackupError::NotFound(_))
        ));
        assert!(matches!(
            "resend".parse::<EmailQueueAction>(),
            Err(BackupError::UnknownAction(_))
        ));
    }
}
