//! Persistence layer: the relational store behind every backup operation.
//!
//! Provides the [`Store`] trait for table reads, transactional restores,
//! the backup settings record, the audit log and the email queue. The
//! production implementation uses `sqlx::PgPool`; [`memory::MemoryStore`]
//! is an in-process stand-in with failure injection.

pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use models::{
    AppliedCounts, AuditEntry, EmailQueueFilter, EmailQueueItem, EmailQueueStats, EmailStatus,
    RestorePlan, RestoreStrategy, TableRead,
};
pub use postgres::PostgresStore;

use crate::domain::{BackupConfig, TableSpec};

/// Errors raised by a [`Store`].
///
/// Display strings name the operation only; driver errors stay in the
/// `source` chain so connection details never reach a response body.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A SQL statement failed.
    #[error("database query failed while {context}")]
    Query {
        /// What the store was doing.
        context: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A table could not be read or written.
    #[error("table {table} is unavailable")]
    Unavailable {
        /// Snapshot key of the table.
        table: String,
    },

    /// A row is not a JSON object.
    #[error("row {index} of {table} is not a JSON object")]
    MalformedRow {
        /// Snapshot key of the table.
        table: String,
        /// Row position.
        index: usize,
    },

    /// A row could not be written.
    #[error("row {index} of {table} was rejected: {reason}")]
    RowRejected {
        /// Snapshot key of the table.
        table: String,
        /// Row position.
        index: usize,
        /// Why it was rejected.
        reason: String,
    },

    /// The stored settings record cannot be interpreted.
    #[error("stored backup settings are invalid: {0}")]
    InvalidRecord(String),
}

/// Builds a `map_err` adapter that wraps a driver error with context.
pub(crate) fn query_err(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> StoreError {
    let context = context.into();
    move |source| StoreError::Query { context, source }
}

/// The relational store.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// Reads the full contents of each table from one consistent view.
    ///
    /// A failure affecting a single table is reported in that table's
    /// [`TableRead`]; the outer error is reserved for failures that affect
    /// the whole read (e.g. no connection).
    async fn read_tables(&self, tables: &[&'static TableSpec]) -> Result<Vec<TableRead>, StoreError>;

    /// Counts the rows of one table.
    async fn count_rows(&self, table: &TableSpec) -> Result<u64, StoreError>;

    /// Applies a restore plan atomically: either every row lands or none.
    async fn apply_restore(&self, plan: &RestorePlan) -> Result<AppliedCounts, StoreError>;

    /// Loads the backup settings record, if one exists.
    async fn load_backup_config(&self) -> Result<Option<BackupConfig>, StoreError>;

    /// Creates or updates the backup settings record.
    async fn save_backup_config(&self, config: &BackupConfig) -> Result<(), StoreError>;

    /// Appends an audit log row.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Lists queued emails, highest priority and earliest schedule first.
    async fn list_email_queue(
        &self,
        filter: &EmailQueueFilter,
    ) -> Result<Vec<EmailQueueItem>, StoreError>;

    /// Aggregates queue counters.
    async fn email_queue_stats(&self) -> Result<EmailQueueStats, StoreError>;

    /// Re-queues an email. Returns `false` if the id is unknown.
    async fn retry_email(&self, id: &str) -> Result<bool, StoreError>;

    /// Cancels a queued email. Returns `false` if the id is unknown.
    async fn cancel_email(&self, id: &str) -> Result<bool, StoreError>;
}
