//! Records exchanged with the store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::StoreError;
use crate::domain::{EventLevel, Row, TableSpec};

/// How a snapshot is applied to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStrategy {
    /// Update-if-exists-else-insert by primary key. Never deletes.
    #[default]
    Merge,
    /// Delete every row of the restored tables, then insert the snapshot.
    Replace,
}

impl RestoreStrategy {
    /// Strategy name as used in requests and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Replace => "replace",
        }
    }
}

impl fmt::Display for RestoreStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of reading one table during a snapshot.
#[derive(Debug)]
pub struct TableRead {
    /// Table that was read.
    pub spec: &'static TableSpec,
    /// Rows, or the failure for this table alone.
    pub rows: Result<Vec<Row>, StoreError>,
}

/// Validated restore input handed to the store.
///
/// `tables` is in catalog (parent-before-child) order; the store must not
/// reorder it.
#[derive(Debug)]
pub struct RestorePlan {
    /// Strategy applied to every table in the plan.
    pub strategy: RestoreStrategy,
    /// Rows to apply per table.
    pub tables: Vec<(&'static TableSpec, Vec<Row>)>,
}

/// Rows written per table key.
pub type AppliedCounts = BTreeMap<String, u64>;

/// One row for the `SystemLog` audit table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Row identifier.
    pub id: String,
    /// Severity.
    pub level: EventLevel,
    /// Summary line.
    pub message: String,
    /// Emitting subsystem.
    pub source: String,
    /// Full event as JSON text.
    pub metadata: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

/// Email queue status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    /// Waiting to be sent.
    Pending,
    /// Picked up by a sender.
    Processing,
    /// Sent.
    Completed,
    /// Send failed.
    Failed,
    /// Removed from the queue by an operator.
    Cancelled,
}

impl EmailStatus {
    /// Status string as stored in the table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown email status: {other}")),
        }
    }
}

/// Failed items with fewer retries than this count as "retry needed".
pub const MAX_EMAIL_RETRIES: i32 = 3;

/// One row of the email queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailQueueItem {
    /// Row identifier.
    pub id: String,
    /// Destination address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Queue status (raw string; unknown values are passed through).
    pub status: String,
    /// `high`, `normal` or `low`.
    pub priority: String,
    /// Send attempts so far.
    pub retry_count: i32,
    /// Last send error.
    pub error_message: Option<String>,
    /// When the item becomes eligible.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When it was sent.
    pub sent_at: Option<DateTime<Utc>>,
    /// When it was queued.
    pub created_at: DateTime<Utc>,
}

/// Filter for queue listings.
#[derive(Debug, Clone, Default)]
pub struct EmailQueueFilter {
    /// Only items with this status.
    pub status: Option<EmailStatus>,
    /// Maximum items returned.
    pub limit: u32,
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailQueueStats {
    /// All items.
    pub total: u64,
    /// Pending items.
    pub pending: u64,
    /// Items being sent.
    pub processing: u64,
    /// Failed items.
    pub failed: u64,
    /// Sent items.
    pub completed: u64,
    /// Cancelled items.
    pub cancelled: u64,
    /// Failed items still under the retry limit.
    pub retry_needed: u64,
}

impl EmailQueueStats {
    /// Adds `count` items of `status`, `retryable` of which are under the
    /// retry limit.
    pub fn add(&mut self, status: &str, count: u64, retryable: u64) {
        self.total += count;
        match status.parse::<EmailStatus>() {
            Ok(EmailStatus::Pending) => self.pending += count,
            Ok(EmailStatus::Processing) => self.processing += count,
            Ok(EmailStatus::Completed) => self.completed += count,
            Ok(EmailStatus::Failed) => {
                self.failed += count;
                self.retry_needed += retryable;
            }
            Ok(EmailStatus::Cancelled) => self.cancelled += count,
            Err(_) => {}
        }
    }
}
