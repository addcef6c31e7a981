//! Backup service: runs the pipeline and exposes status, settings and
//! restore to the HTTP layer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::restore::{RestoreEngine, RestoreReport, RestoreRequest};
use super::retention::{RetentionSweeper, SweepReport};
use super::snapshot_builder::SnapshotBuilder;
use super::upload_manifest::UploadManifest;
use super::{ConfigService, Dependency};
use crate::archive::publisher::{PublishReceipt, Publisher, RetryPolicy};
use crate::archive::{ArchiveStore, EntryKind, codec};
use crate::config::BackupSettings;
use crate::domain::archive_path::{self, DATABASE_FOLDER};
use crate::domain::{
    BackupConfig, BackupEvent, CronSchedule, EventBus, OperationGuard, OperationKind, TableSpec,
    table,
};
use crate::error::BackupError;
use crate::persistence::Store;

/// Outcome of one pipeline component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// Built and published.
    Success,
    /// Attempted and failed.
    Failed,
    /// Turned off in the settings.
    Skipped,
}

/// Per-component section of a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReport {
    /// What happened.
    pub status: ComponentStatus,
    /// Where the component was published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PublishReceipt>,
    /// Rows or files captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    /// Tables captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<usize>,
    /// Tables recorded empty after a failed read.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_tables: Vec<String>,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentReport {
    fn skipped() -> Self {
        Self {
            status: ComponentStatus::Skipped,
            receipt: None,
            records: None,
            tables: None,
            failed_tables: Vec::new(),
            error: None,
        }
    }

    fn failed(error: &BackupError) -> Self {
        Self {
            status: ComponentStatus::Failed,
            error: Some(error.to_string()),
            ..Self::skipped()
        }
    }

    fn published(receipt: PublishReceipt) -> Self {
        Self {
            status: ComponentStatus::Success,
            receipt: Some(receipt),
            ..Self::skipped()
        }
    }
}

/// Report document published to `reports/` after every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupRunReport {
    /// When the run started; also the timestamp in every archive name.
    pub started_at: DateTime<Utc>,
    /// When the last component finished.
    pub finished_at: DateTime<Utc>,
    /// Archive description, without credentials.
    pub destination: String,
    /// Database snapshot.
    pub database: ComponentReport,
    /// Upload manifest.
    pub uploads: ComponentReport,
}

/// What a run returns to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupRunOutcome {
    /// Published run report.
    #[serde(flatten)]
    pub run: BackupRunReport,
    /// Publishing of the run report itself.
    pub report: ComponentReport,
    /// Retention sweep that followed.
    pub sweep: SweepReport,
}

/// One snapshot in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSummary {
    /// File name.
    pub name: String,
    /// Archive path, usable as a restore `path`.
    pub path: String,
    /// Size in bytes, when the host reports it.
    pub size: Option<u64>,
    /// Timestamp parsed from the name.
    pub created_at: Option<DateTime<Utc>>,
}

/// Dashboard view of the backup system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// Current settings.
    pub config: BackupConfig,
    /// `active` or `disabled`.
    pub state: String,
    /// Newest snapshot in the archive.
    pub last_backup: Option<DateTime<Utc>>,
    /// Next fire time of the schedule.
    pub next_backup: Option<DateTime<Utc>>,
    /// Snapshots in the archive; absent if the archive is unreachable.
    pub archive_count: Option<usize>,
    /// Bytes held by those snapshots, when the host reports sizes.
    pub archive_bytes: Option<u64>,
    /// Rows currently in the selected tables; absent without a store.
    pub total_records: Option<u64>,
    /// A backup run is in progress.
    pub snapshot_running: bool,
    /// A restore is in progress.
    pub restore_running: bool,
}

/// Orchestrates snapshot, publish, sweep and restore.
///
/// Every run and restore takes a slot in the [`OperationGuard`] without
/// waiting, emits a [`BackupEvent`] for its outcome, and returns a report.
#[derive(Debug)]
pub struct BackupService {
    store: Dependency<Arc<dyn Store>>,
    archive: Dependency<Arc<dyn ArchiveStore>>,
    configs: Arc<ConfigService>,
    guard: OperationGuard,
    event_bus: EventBus,
    settings: BackupSettings,
    retry: RetryPolicy,
}

impl BackupService {
    /// Creates a new `BackupService`.
    #[must_use]
    pub fn new(
        store: Dependency<Arc<dyn Store>>,
        archive: Dependency<Arc<dyn ArchiveStore>>,
        configs: Arc<ConfigService>,
        event_bus: EventBus,
        settings: BackupSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            archive,
            configs,
            guard: OperationGuard::new(),
            event_bus,
            settings,
            retry,
        }
    }

    /// Returns a reference to the settings service.
    #[must_use]
    pub fn configs(&self) -> &Arc<ConfigService> {
        &self.configs
    }

    /// Returns a reference to the inner [`EventBus`].
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Whether a database is configured.
    #[must_use]
    pub fn has_store(&self) -> bool {
        self.store.ready().is_some()
    }

    /// Archive description, or `None` when no archive is configured.
    #[must_use]
    pub fn destination(&self) -> Option<String> {
        self.archive.ready().map(|archive| archive.describe())
    }

    /// Returns a reference to the single-flight guard.
    #[must_use]
    pub fn guard(&self) -> &OperationGuard {
        &self.guard
    }

    /// Runs the pipeline if scheduled backups are enabled.
    ///
    /// Returns `Ok(None)` when they are disabled.
    ///
    /// # Errors
    ///
    /// Same as [`BackupService::run_backup`].
    pub async fn run_scheduled(&self) -> Result<Option<BackupRunOutcome>, BackupError> {
        if !self.configs.get().await.enabled {
            tracing::info!("scheduled backup skipped, automatic backup is disabled");
            return Ok(None);
        }
        self.run_backup().await.map(Some)
    }

    /// Snapshot, manifest, report, sweep.
    ///
    /// A failed snapshot aborts the run before anything else is published
    /// or swept. A failed manifest is recorded in the report and the run
    /// continues.
    ///
    /// # Errors
    ///
    /// - [`BackupError::OperationInProgress`] if a run is already going.
    /// - [`BackupError::ConfigurationMissing`] if the archive, or the store
    ///   when tables are selected, is not configured.
    /// - [`BackupError::SnapshotFailed`], [`BackupError::Store`] or
    ///   [`BackupError::Archive`] if the database snapshot failed.
    pub async fn run_backup(&self) -> Result<BackupRunOutcome, BackupError> {
        let _permit = self.guard.try_acquire(&[OperationKind::Snapshot])?;
        let config = self.configs.get().await;
        let selection = table::select(&config);
        let archive = self.archive.get()?;
        let store = if selection.is_empty() {
            None
        } else {
            Some(self.store.get()?)
        };

        let started_at = Utc::now();
        let publisher = Publisher::new(Arc::clone(&archive), self.retry);
        tracing::info!(destination = %archive.describe(), tables = selection.len(), "backup run started");

        let database = match store {
            Some(store) => {
                match self
                    .publish_snapshot(store, &publisher, &selection, started_at)
                    .await
                {
                    Ok(report) => report,
                    Err(e) => {
                        tracing::error!(error = %e, "database snapshot failed, run aborted");
                        let _ = self.event_bus.publish(BackupEvent::BackupFailed {
                            reason: e.to_string(),
                            timestamp: Utc::now(),
                        });
                        return Err(e);
                    }
                }
            }
            None => ComponentReport::skipped(),
        };

        let uploads = if config.include_uploads {
            self.publish_manifest(&publisher, started_at)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "upload manifest failed");
                    ComponentReport::failed(&e)
                })
        } else {
            ComponentReport::skipped()
        };

        let run = BackupRunReport {
            started_at,
            finished_at: Utc::now(),
            destination: archive.describe(),
            database,
            uploads,
        };
        let report = self
            .publish_report(&publisher, &run)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "run report could not be published");
                ComponentReport::failed(&e)
            });

        let sweep = RetentionSweeper::new(archive)
            .sweep(config.retention, Utc::now())
            .await;
        let _ = self.event_bus.publish(BackupEvent::RetentionSwept {
            deleted: sweep.deleted.len(),
            failed: sweep.failed.len(),
            timestamp: Utc::now(),
        });

        tracing::info!(started_at = %run.started_at, "backup run finished");
        Ok(BackupRunOutcome { run, report, sweep })
    }

    async fn publish_snapshot(
        &self,
        store: Arc<dyn Store>,
        publisher: &Publisher,
        selection: &[&'static TableSpec],
        started_at: DateTime<Utc>,
    ) -> Result<ComponentReport, BackupError> {
        let builder = SnapshotBuilder::new(
            store,
            self.settings.source_tag.clone(),
            self.settings.partial_read_policy,
        );
        let snapshot = builder.build(selection, started_at).await?;
        let bytes = codec::encode(&snapshot, self.settings.compress)?;
        let path = archive_path::snapshot_path(started_at, self.settings.compress);
        let receipt = publisher
            .publish(&path, &bytes, &commit_message("Database backup", started_at))
            .await?;

        let _ = self.event_bus.publish(BackupEvent::SnapshotPublished {
            path,
            tables: snapshot.table_count(),
            total_records: snapshot.total_records,
            failed_tables: snapshot.failed_tables.clone(),
            timestamp: Utc::now(),
        });

        Ok(ComponentReport {
            records: Some(snapshot.total_records),
            tables: Some(snapshot.table_count()),
            failed_tables: snapshot.failed_tables,
            ..ComponentReport::published(receipt)
        })
    }

    async fn publish_manifest(
        &self,
        publisher: &Publisher,
        started_at: DateTime<Utc>,
    ) -> Result<ComponentReport, BackupError> {
        let manifest =
            UploadManifest::scan(&self.settings.uploads_dir, started_at, &self.settings.source_tag)
                .await?;
        let path = archive_path::upload_manifest_path(started_at);
        let receipt = publisher
            .publish(
                &path,
                &manifest.to_bytes()?,
                &commit_message("Upload files backup", started_at),
            )
            .await?;
        Ok(ComponentReport {
            records: Some(manifest.summary.total_files),
            ..ComponentReport::published(receipt)
        })
    }

    async fn publish_report(
        &self,
        publisher: &Publisher,
        run: &BackupRunReport,
    ) -> Result<ComponentReport, BackupError> {
        let bytes = serde_json::to_vec_pretty(run)
            .map_err(|e| BackupError::Internal(format!("cannot encode run report: {e}")))?;
        let path = archive_path::report_path(run.started_at);
        let receipt = publisher
            .publish(&path, &bytes, &commit_message("Backup report", run.started_at))
            .await?;
        Ok(ComponentReport::published(receipt))
    }

    /// Dashboard status. Remote and store figures are best effort.
    pub async fn status(&self) -> BackupStatus {
        let config = self.configs.get().await;
        let next_backup = CronSchedule::parse(&config.schedule)
            .ok()
            .and_then(|schedule| schedule.next_after(Utc::now()));

        let archives = match self.list_archives().await {
            Ok(archives) => Some(archives),
            Err(e) => {
                tracing::warn!(error = %e, "archive listing unavailable for status");
                None
            }
        };
        let last_backup = archives
            .as_ref()
            .and_then(|archives| archives.iter().find_map(|archive| archive.created_at));
        let archive_bytes = archives.as_ref().and_then(|archives| {
            archives
                .iter()
                .map(|archive| archive.size)
                .sum::<Option<u64>>()
        });

        BackupStatus {
            state: if config.enabled { "active" } else { "disabled" }.to_owned(),
            total_records: self.count_selected(&config).await,
            config,
            last_backup,
            next_backup,
            archive_count: archives.as_ref().map(Vec::len),
            archive_bytes,
            snapshot_running: self.guard.is_running(OperationKind::Snapshot),
            restore_running: self.guard.is_running(OperationKind::Restore),
        }
    }

    async fn count_selected(&self, config: &BackupConfig) -> Option<u64> {
        let store = self.store.ready()?;
        let mut total: u64 = 0;
        for spec in table::select(config) {
            match store.count_rows(spec).await {
                Ok(count) => total = total.saturating_add(count),
                Err(e) => {
                    tracing::warn!(table = spec.key, error = %e, "cannot count rows for status");
                    return None;
                }
            }
        }
        Some(total)
    }

    /// Snapshot entries in the archive, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::ConfigurationMissing`] without an archive or
    /// [`BackupError::Archive`] if the listing failed.
    pub async fn list_archives(&self) -> Result<Vec<ArchiveSummary>, BackupError> {
        let archive = self.archive.get()?;
        let mut archives: Vec<ArchiveSummary> = archive
            .list(DATABASE_FOLDER)
            .await?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::File && archive_path::is_snapshot_name(&entry.name))
            .map(|entry| ArchiveSummary {
                created_at: archive_path::parse_timestamp(&entry.name),
                name: entry.name,
                path: entry.path,
                size: entry.size,
            })
            .collect();
        archives.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(archives)
    }

    /// Validates and stores new settings.
    ///
    /// # Errors
    ///
    /// See [`ConfigService::set`].
    pub async fn configure(&self, config: BackupConfig) -> Result<BackupConfig, BackupError> {
        let saved = self.configs.set(config).await?;
        self.emit_config_updated(&saved);
        Ok(saved)
    }

    /// Flips scheduled backups on or off.
    ///
    /// # Errors
    ///
    /// See [`ConfigService::toggle`].
    pub async fn toggle(&self) -> Result<BackupConfig, BackupError> {
        let saved = self.configs.toggle().await?;
        self.emit_config_updated(&saved);
        Ok(saved)
    }

    fn emit_config_updated(&self, config: &BackupConfig) {
        let _ = self.event_bus.publish(BackupEvent::ConfigUpdated {
            enabled: config.enabled,
            schedule: config.schedule.clone(),
            retention: config.retention,
            timestamp: Utc::now(),
        });
    }

    /// Restores a snapshot. Holds both the snapshot and restore slots.
    ///
    /// # Errors
    ///
    /// [`BackupError::OperationInProgress`] if either slot is taken,
    /// [`BackupError::ConfigurationMissing`] without store or archive, or
    /// any error from [`RestoreEngine::restore`].
    pub async fn restore(&self, request: &RestoreRequest) -> Result<RestoreReport, BackupError> {
        let _permit = self
            .guard
            .try_acquire(&[OperationKind::Snapshot, OperationKind::Restore])?;
        let engine = RestoreEngine::new(self.store.get()?, self.archive.get()?);

        match engine.restore(request).await {
            Ok(report) => {
                if report.tables.contains_key("systemSettings") {
                    self.configs.invalidate().await;
                }
                tracing::info!(path = %report.path, total_rows = report.total_rows, "restore completed");
                let _ = self.event_bus.publish(BackupEvent::RestoreCompleted {
                    path: report.path.clone(),
                    strategy: report.strategy.to_string(),
                    total_rows: report.total_rows,
                    timestamp: Utc::now(),
                });
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "restore failed");
                let _ = self.event_bus.publish(BackupEvent::RestoreFailed {
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }
}

fn commit_message(what: &str, at: DateTime<Utc>) -> String {
    format!("{what} - {}", at.format("%Y-%m-%d %H:%M:%S UTC"))
}
