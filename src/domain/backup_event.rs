//! Domain events describing pipeline outcomes.
//!
//! Every run, sweep, restore and settings change emits a [`BackupEvent`]
//! through the [`super::EventBus`]. The audit writer persists them to the
//! `SystemLog` table.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Severity recorded alongside an event in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventLevel {
    /// Normal outcome.
    Info,
    /// Degraded but completed.
    Warning,
    /// Failed outcome.
    Error,
}

impl EventLevel {
    /// Level string as stored in the audit log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Outcome event emitted by the backup pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum BackupEvent {
    /// A snapshot was built and published.
    SnapshotPublished {
        /// Remote path of the archive.
        path: String,
        /// Number of tables captured.
        tables: usize,
        /// Total rows captured.
        total_records: u64,
        /// Tables recorded empty after a failed read.
        failed_tables: Vec<String>,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A backup run failed before its snapshot was published.
    BackupFailed {
        /// Human-readable failure.
        reason: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The retention sweeper finished.
    RetentionSwept {
        /// Entries deleted.
        deleted: usize,
        /// Entries whose deletion failed.
        failed: usize,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A snapshot was applied to the store.
    RestoreCompleted {
        /// Archive path restored from.
        path: String,
        /// Strategy name (`merge` or `replace`).
        strategy: String,
        /// Rows written.
        total_rows: u64,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A restore attempt failed and was rolled back.
    RestoreFailed {
        /// Human-readable failure.
        reason: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Backup settings were changed.
    ConfigUpdated {
        /// New enabled flag.
        enabled: bool,
        /// New schedule.
        schedule: String,
        /// New retention in days.
        retention: u32,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl BackupEvent {
    /// Returns the event type as a static string.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::SnapshotPublished { .. } => "snapshot_published",
            Self::BackupFailed { .. } => "backup_failed",
            Self::RetentionSwept { .. } => "retention_swept",
            Self::RestoreCompleted { .. } => "restore_completed",
            Self::RestoreFailed { .. } => "restore_failed",
            Self::ConfigUpdated { .. } => "config_updated",
        }
    }

    /// Severity for the audit log.
    #[must_use]
    pub fn level(&self) -> EventLevel {
        match self {
            Self::BackupFailed { .. } | Self::RestoreFailed { .. } => EventLevel::Error,
            Self::RetentionSwept { failed, .. } if *failed > 0 => EventLevel::Warning,
            Self::SnapshotPublished { failed_tables, .. } if !failed_tables.is_empty() => {
                EventLevel::Warning
            }
            _ => EventLevel::Info,
        }
    }

    /// One-line summary for the audit log.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::SnapshotPublished {
                path,
                total_records,
                ..
            } => format!("snapshot published to {path} ({total_records} records)"),
            Self::BackupFailed { reason, .. } => format!("backup failed: {reason}"),
            Self::RetentionSwept {
                deleted, failed, ..
            } => format!("retention sweep deleted {deleted} entries ({failed} failed)"),
            Self::RestoreCompleted {
                path,
                strategy,
                total_rows,
                ..
            } => format!("restored {total_rows} rows from {path} ({strategy})"),
            Self::RestoreFailed { reason, .. } => format!("restore failed: {reason}"),
            Self::ConfigUpdated { enabled, .. } => {
                format!("automatic backup settings updated (enabled: {enabled})")
            }
        }
    }
}
