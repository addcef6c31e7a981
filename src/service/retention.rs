//! Retention sweeper: deletes archive entries older than the retention
//! horizon.
//!
//! Age comes from the timestamp embedded in the filename, not from host
//! metadata. Files without a recognizable token are left alone.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::archive::{ArchiveStore, EntryKind};
use crate::domain::archive_path::{self, SWEPT_FOLDERS};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Paths deleted.
    pub deleted: Vec<String>,
    /// Files within the retention horizon.
    pub kept: usize,
    /// Files whose names carry no timestamp.
    pub unmatched: usize,
    /// Paths whose deletion failed.
    pub failed: Vec<String>,
    /// Folders that could not be listed.
    pub failed_folders: Vec<String>,
}

/// Deletes expired archive entries.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    archive: Arc<dyn ArchiveStore>,
}

impl RetentionSweeper {
    /// Creates a sweeper over `archive`.
    #[must_use]
    pub fn new(archive: Arc<dyn ArchiveStore>) -> Self {
        Self { archive }
    }

    /// Deletes every file in the swept folders whose timestamp is older
    /// than `now - retention_days`.
    ///
    /// Individual failures are recorded in the report; the sweep itself
    /// never fails. A horizon that falls before the earliest representable
    /// date sweeps nothing.
    pub async fn sweep(&self, retention_days: u32, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(cutoff) = Duration::try_days(i64::from(retention_days))
            .and_then(|horizon| now.checked_sub_signed(horizon))
        else {
            tracing::warn!(retention_days, "retention horizon out of range, nothing swept");
            return report;
        };

        for folder in SWEPT_FOLDERS {
            let entries = match self.archive.list(folder).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(folder, error = %e, "cannot list archive folder");
                    report.failed_folders.push(folder.to_owned());
                    continue;
                }
            };

            for entry in entries.iter().filter(|entry| entry.kind == EntryKind::File) {
                let Some(stamped) = archive_path::parse_timestamp(&entry.name) else {
                    report.unmatched += 1;
                    continue;
                };
                if stamped >= cutoff {
                    report.kept += 1;
                    continue;
                }

                let message = format!("Remove expired backup {}", entry.name);
                match self.archive.delete(&entry.path, &entry.sha, &message).await {
                    Ok(()) => {
                        tracing::info!(path = %entry.path, "expired archive entry deleted");
                        report.deleted.push(entry.path.clone());
                    }
                    Err(e) => {
                        tracing::warn!(path = %entry.path, error = %e, "cannot delete expired archive entry");
                        report.failed.push(entry.path.clone());
                    }
                }
            }
        }

        tracing::info!(
            deleted = report.deleted.len(),
            kept = report.kept,
            unmatched = report.unmatched,
            failed = report.failed.len(),
            "retention sweep finished"
        );
        report
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::archive::LocalArchive;

    fn now() -> DateTime<Utc> {
        let Some(at) = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).single() else {
            panic!("valid timestamp");
        };
        at
    }

    async fn seeded() -> (tempfile::TempDir, Arc<LocalArchive>) {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir should be creatable");
        };
        let archive = Arc::new(LocalArchive::new(dir.path()));
        for path in [
            "database/db_backup_2026-10-18T02-00-00.json.gz",
            "database/db_backup_2026-10-12T02-00-00.json.gz",
            "database/db_backup_2026-09-01.json",
            "uploads/upload_backup_2026-10-01T02-00-00.json",
            "reports/backup_report_2026-10-19T02-00-00.json",
            "reports/README.md",
        ] {
            if archive.put(path, b"{}", None, "seed").await.is_err() {
                panic!("seeding {path} should succeed");
            }
        }
        (dir, archive)
    }

    #[tokio::test]
    async fn one_day_keeps_only_the_last_day() {
        let (_dir, archive) = seeded().await;
        let report = RetentionSweeper::new(archive).sweep(1, now()).await;
        assert_eq!(report.deleted.len(), 4);
        assert_eq!(report.kept, 1);
        assert_eq!(report.unmatched, 1);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn eight_days_keeps_the_last_week() {
        let (_dir, archive) = seeded().await;
        let report = RetentionSweeper::new(archive).sweep(8, now()).await;
        assert_eq!(
            report.deleted,
            vec![
                "database/db_backup_2026-09-01.json".to_owned(),
                "uploads/upload_backup_2026-10-01T02-00-00.json".to_owned(),
            ]
        );
        assert_eq!(report.kept, 3);
    }

    #[tokio::test]
    async fn thirty_days_keeps_everything_recent_and_never_touches_unmatched() {
        let (_dir, archive) = seeded().await;
        let sweeper = RetentionSweeper::new(Arc::clone(&archive) as Arc<dyn ArchiveStore>);
        let report = sweeper.sweep(30, now()).await;
        assert_eq!(report.deleted, vec!["database/db_backup_2026-09-01.json".to_owned()]);
        assert_eq!(report.kept, 4);
        assert_eq!(report.unmatched, 1);
        assert!(matches!(archive.get("reports/README.md").await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn one_week_deletes_entries_older_than_seven_days() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir should be creatable");
        };
        let archive = Arc::new(LocalArchive::new(dir.path()));
        let at = Utc::now();
        let recent = archive_path::snapshot_path(at - Duration::days(1), true);
        let week_old = archive_path::snapshot_path(at - Duration::days(8), true);
        let month_old = archive_path::report_path(at - Duration::days(30));
        let unmatched = "database/manual-export.json".to_owned();
        for path in [&recent, &week_old, &month_old, &unmatched] {
            if archive.put(path, b"{}", None, "seed").await.is_err() {
                panic!("seeding {path} should succeed");
            }
        }

        let sweeper = RetentionSweeper::new(Arc::clone(&archive) as Arc<dyn ArchiveStore>);
        let mut report = sweeper.sweep(7, at).await;
        report.deleted.sort();
        let mut expected = vec![week_old, month_old];
        expected.sort();
        assert_eq!(report.deleted, expected);
        assert_eq!(report.kept, 1);
        assert_eq!(report.unmatched, 1);
        assert!(matches!(archive.get(&recent).await, Ok(Some(_))));
        assert!(matches!(archive.get(&unmatched).await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn horizon_beyond_the_calendar_sweeps_nothing() {
        let (_dir, archive) = seeded().await;
        let report = RetentionSweeper::new(archive).sweep(u32::MAX, now()).await;
        assert_eq!(report, SweepReport::default());
    }
}
