//! In-process [`Store`] used by tests and by the service when no database
//! is configured for local experiments.
//!
//! Tables are held per snapshot key. Restores work on a copy of the state
//! and swap it in only when every row succeeded, mirroring a transaction.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use super::models::{
    AppliedCounts, AuditEntry, EmailQueueFilter, EmailQueueItem, EmailQueueStats, RestorePlan,
    RestoreStrategy, TableRead, MAX_EMAIL_RETRIES,
};
use super::{Store, StoreError};
use crate::domain::{BackupConfig, Row, TableSpec};

const EMAIL_QUEUE: &str = "emailQueue";

#[derive(Debug, Default, Clone)]
struct MemoryState {
    tables: BTreeMap<String, Vec<Row>>,
    config: Option<BackupConfig>,
    audit: Vec<AuditEntry>,
    operations: Vec<String>,
}

/// In-memory store with failure injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    failing_reads: RwLock<HashSet<String>>,
    failing_writes: RwLock<HashSet<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the rows of one table.
    pub async fn set_rows(&self, key: &str, rows: Vec<Row>) {
        self.state.write().await.tables.insert(key.to_owned(), rows);
    }

    /// Returns the rows of one table.
    pub async fn rows(&self, key: &str) -> Vec<Row> {
        self.state
            .read()
            .await
            .tables
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes every read of `key` fail.
    pub async fn fail_reads_on(&self, key: &str) {
        self.failing_reads.write().await.insert(key.to_owned());
    }

    /// Makes every write to `key` fail.
    pub async fn fail_writes_on(&self, key: &str) {
        self.failing_writes.write().await.insert(key.to_owned());
    }

    /// Table-level operations in the order they were applied, e.g.
    /// `"delete:users"` or `"insert:campaigns"`.
    pub async fn operations(&self) -> Vec<String> {
        self.state.read().await.operations.clone()
    }

    /// Audit entries appended so far.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit.clone()
    }

    async fn check_write(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_writes.read().await.contains(key) {
            return Err(StoreError::Unavailable {
                table: key.to_owned(),
            });
        }
        Ok(())
    }
}

fn row_id<'a>(row: &'a Row, spec: &TableSpec) -> Option<&'a Value> {
    row.get(spec.primary_key).filter(|value| !value.is_null())
}

fn apply_table(
    state: &mut MemoryState,
    spec: &TableSpec,
    rows: &[Row],
    strategy: RestoreStrategy,
) -> Result<u64, StoreError> {
    let table = state.tables.entry(spec.key.to_owned()).or_default();
    let mut written = 0;
    for (index, row) in rows.iter().enumerate() {
        let Some(id) = row_id(row, spec).cloned() else {
            return Err(StoreError::RowRejected {
                table: spec.key.to_owned(),
                index,
                reason: format!("missing primary key {}", spec.primary_key),
            });
        };
        let existing = table
            .iter_mut()
            .find(|candidate| row_id(candidate, spec) == Some(&id));
        match (existing, strategy) {
            (Some(_), RestoreStrategy::Replace) => {
                return Err(StoreError::RowRejected {
                    table: spec.key.to_owned(),
                    index,
                    reason: "duplicate primary key".to_owned(),
                });
            }
            (Some(current), RestoreStrategy::Merge) => {
                for (column, value) in row {
                    current.insert(column.clone(), value.clone());
                }
            }
            (None, _) => table.push(row.clone()),
        }
        written += 1;
    }
    state.operations.push(format!("insert:{}", spec.key));
    Ok(written)
}

fn string_field(row: &Row, field: &str) -> Option<String> {
    row.get(field).and_then(Value::as_str).map(str::to_owned)
}

fn time_field(row: &Row, field: &str) -> Option<DateTime<Utc>> {
    row.get(field)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}

fn retry_count(row: &Row) -> i32 {
    row.get("retryCount")
        .and_then(Value::as_i64)
        .and_then(|count| i32::try_from(count).ok())
        .unwrap_or_default()
}

fn email_item(row: &Row) -> Option<EmailQueueItem> {
    Some(EmailQueueItem {
        id: string_field(row, "id")?,
        recipient: string_field(row, "recipient").unwrap_or_default(),
        subject: string_field(row, "subject").unwrap_or_default(),
        status: string_field(row, "status").unwrap_or_default(),
        priority: string_field(row, "priority").unwrap_or_else(|| "normal".to_owned()),
        retry_count: retry_count(row),
        error_message: string_field(row, "errorMessage"),
        scheduled_at: time_field(row, "scheduledAt"),
        sent_at: time_field(row, "sentAt"),
        created_at: time_field(row, "createdAt").unwrap_or_default(),
    })
}

fn priority_rank(priority: &str) -> u8 {
    match priority {
        "high" => 0,
        "normal" => 1,
        _ => 2,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read_tables(&self, tables: &[&'static TableSpec]) -> Result<Vec<TableRead>, StoreError> {
        let state = self.state.read().await;
        let failing = self.failing_reads.read().await;
        Ok(tables
            .iter()
            .map(|&spec| {
                let rows = if failing.contains(spec.key) {
                    Err(StoreError::Unavailable {
                        table: spec.key.to_owned(),
                    })
                } else {
                    Ok(state.tables.get(spec.key).cloned().unwrap_or_default())
                };
                TableRead { spec, rows }
            })
            .collect())
    }

    async fn count_rows(&self, table: &TableSpec) -> Result<u64, StoreError> {
        if self.failing_reads.read().await.contains(table.key) {
            return Err(StoreError::Unavailable {
                table: table.key.to_owned(),
            });
        }
        let state = self.state.read().await;
        let count = state.tables.get(table.key).map_or(0, Vec::len);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn apply_restore(&self, plan: &RestorePlan) -> Result<AppliedCounts, StoreError> {
        for (spec, _) in &plan.tables {
            self.check_write(spec.key).await?;
        }

        let mut guard = self.state.write().await;
        let mut working = guard.clone();

        if plan.strategy == RestoreStrategy::Replace {
            for (spec, _) in plan.tables.iter().rev() {
                working.tables.insert(spec.key.to_owned(), Vec::new());
                working.operations.push(format!("delete:{}", spec.key));
            }
        }

        let mut applied = AppliedCounts::new();
        for (spec, rows) in &plan.tables {
            let written = apply_table(&mut working, spec, rows, plan.strategy)?;
            applied.insert(spec.key.to_owned(), written);
        }

        *guard = working;
        Ok(applied)
    }

    async fn load_backup_config(&self) -> Result<Option<BackupConfig>, StoreError> {
        if self.failing_reads.read().await.contains("systemSettings") {
            return Err(StoreError::Unavailable {
                table: "systemSettings".to_owned(),
            });
        }
        Ok(self.state.read().await.config.clone())
    }

    async fn save_backup_config(&self, config: &BackupConfig) -> Result<(), StoreError> {
        self.check_write("systemSettings").await?;
        self.state.write().await.config = Some(config.clone());
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.check_write("systemLogs").await?;
        self.state.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn list_email_queue(
        &self,
        filter: &EmailQueueFilter,
    ) -> Result<Vec<EmailQueueItem>, StoreError> {
        let state = self.state.read().await;
        let mut items: Vec<EmailQueueItem> = state
            .tables
            .get(EMAIL_QUEUE)
            .map(|rows| rows.iter().filter_map(email_item).collect())
            .unwrap_or_default();
        if let Some(status) = filter.status {
            items.retain(|item| item.status == status.as_str());
        }
        items.sort_by(|a, b| {
            priority_rank(&a.priority)
                .cmp(&priority_rank(&b.priority))
                .then_with(|| match (a.scheduled_at, b.scheduled_at) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        items.truncate(usize::try_from(filter.limit).unwrap_or(usize::MAX));
        Ok(items)
    }

    async fn email_queue_stats(&self) -> Result<EmailQueueStats, StoreError> {
        let state = self.state.read().await;
        let mut stats = EmailQueueStats::default();
        for row in state.tables.get(EMAIL_QUEUE).into_iter().flatten() {
            let status = string_field(row, "status").unwrap_or_default();
            let retryable = u64::from(retry_count(row) < MAX_EMAIL_RETRIES);
            stats.add(&status, 1, retryable);
        }
        Ok(stats)
    }

    async fn retry_email(&self, id: &str) -> Result<bool, StoreError> {
        self.check_write(EMAIL_QUEUE).await?;
        let mut state = self.state.write().await;
        let Some(row) = state
            .tables
            .get_mut(EMAIL_QUEUE)
            .and_then(|rows| rows.iter_mut().find(|row| row.get("id") == Some(&Value::from(id))))
        else {
            return Ok(false);
        };
        let retries = retry_count(row).saturating_add(1);
        row.insert("status".to_owned(), Value::from("pending"));
        row.insert("retryCount".to_owned(), Value::from(retries));
        row.insert("errorMessage".to_owned(), Value::Null);
        row.insert("scheduledAt".to_owned(), Value::from(Utc::now().to_rfc3339()));
        Ok(true)
    }

    async fn cancel_email(&self, id: &str) -> Result<bool, StoreError> {
        self.check_write(EMAIL_QUEUE).await?;
        let mut state = self.state.write().await;
        let Some(row) = state
            .tables
            .get_mut(EMAIL_QUEUE)
            .and_then(|rows| rows.iter_mut().find(|row| row.get("id") == Some(&Value::from(id))))
        else {
            return Ok(false);
        };
        row.insert("status".to_owned(), Value::from("cancelled"));
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::table;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    fn spec(key: &str) -> &'static TableSpec {
        let Some(spec) = table::find(key) else {
            panic!("{key} is not in the catalog");
        };
        spec
    }

    #[tokio::test]
    async fn replace_deletes_children_first_and_inserts_parents_first() {
        let store = MemoryStore::new();
        store.set_rows("users", vec![row(json!({"id": "old"}))]).await;
        let plan = RestorePlan {
            strategy: RestoreStrategy::Replace,
            tables: vec![
                (spec("users"), vec![row(json!({"id": "u1"}))]),
                (spec("campaigns"), vec![row(json!({"id": "c1"}))]),
            ],
        };
        let Ok(applied) = store.apply_restore(&plan).await else {
            panic!("restore should succeed");
        };
        assert_eq!(applied.get("users"), Some(&1));
        assert_eq!(
            store.operations().await,
            vec!["delete:campaigns", "delete:users", "insert:users", "insert:campaigns"]
        );
        assert_eq!(store.rows("users").await, vec![row(json!({"id": "u1"}))]);
    }

    #[tokio::test]
    async fn failed_row_leaves_state_untouched() {
        let store = MemoryStore::new();
        store.set_rows("users", vec![row(json!({"id": "keep"}))]).await;
        let plan = RestorePlan {
            strategy: RestoreStrategy::Replace,
            tables: vec![(
                spec("users"),
                vec![row(json!({"id": "u1"})), row(json!({"email": "no-id"}))],
            )],
        };
        assert!(matches!(
            store.apply_restore(&plan).await,
            Err(StoreError::RowRejected { index: 1, .. })
        ));
        assert_eq!(store.rows("users").await, vec![row(json!({"id": "keep"}))]);
        assert!(store.operations().await.is_empty());
    }

    #[tokio::test]
    async fn merge_overwrites_present_columns_only() {
        let store = MemoryStore::new();
        store
            .set_rows("users", vec![row(json!({"id": "u1", "email": "a@x", "name": "A"}))])
            .await;
        let plan = RestorePlan {
            strategy: RestoreStrategy::Merge,
            tables: vec![(spec("users"), vec![row(json!({"id": "u1", "email": "b@x"}))])],
        };
        assert!(store.apply_restore(&plan).await.is_ok());
        assert_eq!(
            store.rows("users").await,
            vec![row(json!({"id": "u1", "email": "b@x", "name": "A"}))]
        );
    }

    #[tokio::test]
    async fn injected_read_failure_is_per_table() {
        let store = MemoryStore::new();
        store.fail_reads_on("payments").await;
        let Ok(reads) = store
            .read_tables(&[spec("users"), spec("payments")])
            .await
        else {
            panic!("outer read should succeed");
        };
        assert!(reads.first().is_some_and(|read| read.rows.is_ok()));
        assert!(reads.get(1).is_some_and(|read| read.rows.is_err()));
    }

    #[tokio::test]
    async fn email_retry_and_cancel() {
        let store = MemoryStore::new();
        store
            .set_rows(
                EMAIL_QUEUE,
                vec![
                    row(json!({"id": "e1", "status": "failed", "retryCount": 1, "priority": "low",
                               "createdAt": "2026-10-19T10:00:00Z", "errorMessage": "smtp"})),
                    row(json!({"id": "e2", "status": "pending", "retryCount": 0, "priority": "high",
                               "createdAt": "2026-10-19T11:00:00Z"})),
                ],
            )
            .await;

        let Ok(stats) = store.email_queue_stats().await else {
            panic!("stats should load");
        };
        assert_eq!(stats.retry_needed, 1);

        assert!(matches!(store.retry_email("e1").await, Ok(true)));
        assert!(matches!(store.cancel_email("e2").await, Ok(true)));
        assert!(matches!(store.cancel_email("missing").await, Ok(false)));

        let filter = EmailQueueFilter {
            status: None,
            limit: 10,
        };
        let Ok(items) = store.list_email_queue(&filter).await else {
            panic!("queue should list");
        };
        let ids: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e1"]);
        let Some(retried) = items.iter().find(|item| item.id == "e1") else {
            panic!("e1 should be listed");
        };
        assert_eq!(retried.status, "pending");
        assert_eq!(retried.retry_count, 2);
        assert_eq!(retried.error_message, None);
    }
}
