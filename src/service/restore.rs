//! Restore engine: applies an archived snapshot back to the store.
//!
//! The archive is located, downloaded, decoded and validated in full
//! before the store is touched. The write itself is one transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::archive::{ArchiveStore, EntryKind, codec};
use crate::domain::archive_path::{self, DATABASE_FOLDER};
use crate::domain::table::{self, CATALOG};
use crate::domain::{Row, Snapshot, TableSpec};
use crate::error::BackupError;
use crate::persistence::{RestorePlan, RestoreStrategy, Store};

/// What to restore and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RestoreRequest {
    /// Strategy applied to every restored table.
    pub strategy: RestoreStrategy,
    /// Archive path under `database/`. The newest snapshot when absent.
    pub path: Option<String>,
    /// Table keys to restore. Every table in the snapshot when absent.
    pub tables: Option<Vec<String>>,
}

/// Outcome of a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    /// Archive path restored from.
    pub path: String,
    /// Strategy used.
    pub strategy: RestoreStrategy,
    /// Rows written per table key.
    pub tables: BTreeMap<String, u64>,
    /// Sum of rows written.
    pub total_rows: u64,
    /// When the snapshot was taken.
    pub snapshot_created_at: DateTime<Utc>,
}

/// Locates, validates and applies snapshots.
#[derive(Debug, Clone)]
pub struct RestoreEngine {
    store: Arc<dyn Store>,
    archive: Arc<dyn ArchiveStore>,
}

impl RestoreEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, archive: Arc<dyn ArchiveStore>) -> Self {
        Self { store, archive }
    }

    /// Path of the newest snapshot in the archive.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::NotFound`] if the archive holds no snapshot,
    /// or [`BackupError::Archive`] if the folder cannot be listed.
    pub async fn latest_snapshot_path(&self) -> Result<String, BackupError> {
        self.archive
            .list(DATABASE_FOLDER)
            .await?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::File && archive_path::is_snapshot_name(&entry.name))
            .max_by(|a, b| a.name.cmp(&b.name))
            .map(|entry| entry.path)
            .ok_or_else(|| BackupError::NotFound("no database snapshot found in the archive".into()))
    }

    /// Restores `request` and returns what was written.
    ///
    /// # Errors
    ///
    /// - [`BackupError::InvalidRequest`] for a bad path, an unknown table
    ///   key, or a `replace` filter that leaves out a table referencing one
    ///   of the filtered tables.
    /// - [`BackupError::NotFound`] if the snapshot does not exist.
    /// - [`BackupError::MalformedArchive`] if it is not a valid snapshot.
    /// - [`BackupError::Store`] if the write failed; nothing was changed.
    pub async fn restore(&self, request: &RestoreRequest) -> Result<RestoreReport, BackupError> {
        let filter = resolve_filter(request.tables.as_deref())?;
        if let (RestoreStrategy::Replace, Some(keys)) = (request.strategy, filter.as_deref()) {
            check_replace_covers_dependents(keys)?;
        }
        let path = match &request.path {
            Some(path) => {
                validate_path(path)?;
                path.clone()
            }
            None => self.latest_snapshot_path().await?,
        };

        let file = self
            .archive
            .get(&path)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("snapshot {path}")))?;
        let snapshot = codec::decode(&file.bytes)?;
        let snapshot_created_at = snapshot.created_at;
        let plan = build_plan(snapshot, filter.as_deref(), request.strategy)?;

        tracing::info!(
            %path,
            strategy = %request.strategy,
            tables = plan.tables.len(),
            "applying snapshot"
        );
        let tables = self.store.apply_restore(&plan).await?;
        let total_rows = tables.values().sum();

        Ok(RestoreReport {
            path,
            strategy: request.strategy,
            tables,
            total_rows,
            snapshot_created_at,
        })
    }
}

fn validate_path(path: &str) -> Result<(), BackupError> {
    let in_database = path
        .strip_prefix(DATABASE_FOLDER)
        .is_some_and(|rest| rest.starts_with('/'));
    if in_database && archive_path::is_safe_relative(path) {
        Ok(())
    } else {
        Err(BackupError::InvalidRequest(format!(
            "restore path must be a file under {DATABASE_FOLDER}/"
        )))
    }
}

fn resolve_filter(keys: Option<&[String]>) -> Result<Option<Vec<&'static str>>, BackupError> {
    let Some(keys) = keys else {
        return Ok(None);
    };
    keys.iter()
        .map(|key| {
            table::find(key)
                .map(|spec| spec.key)
                .ok_or_else(|| BackupError::InvalidRequest(format!("unknown table: {key}")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// A replace deletes every row of the filtered tables, which fails on
/// foreign keys while child rows outside the filter still point at them.
fn check_replace_covers_dependents(keys: &[&'static str]) -> Result<(), BackupError> {
    let mut missing: Vec<&'static str> = Vec::new();
    for key in keys {
        for child in table::dependents(key) {
            if !keys.contains(&child.key) && !missing.contains(&child.key) {
                missing.push(child.key);
            }
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort_by_key(|key| table::rank(key));
    Err(BackupError::InvalidRequest(format!(
        "a replace restore must also include the tables that reference the requested ones: {}",
        missing.join(", ")
    )))
}

/// Orders the snapshot's tables parent-first and checks every row.
fn build_plan(
    mut snapshot: Snapshot,
    filter: Option<&[&'static str]>,
    strategy: RestoreStrategy,
) -> Result<RestorePlan, BackupError> {
    for key in snapshot.tables.keys().filter(|key| table::find(key).is_none()) {
        tracing::warn!(table = %key, "snapshot table is not in the catalog, skipping");
    }

    let mut tables: Vec<(&'static TableSpec, Vec<Row>)> = Vec::new();
    for spec in CATALOG.iter() {
        if filter.is_some_and(|keys| !keys.contains(&spec.key)) {
            continue;
        }
        let Some(rows) = snapshot.tables.remove(spec.key) else {
            continue;
        };
        if let Some(index) = rows.iter().position(|row| !has_primary_key(row, spec)) {
            return Err(BackupError::MalformedArchive(format!(
                "row {index} of {} has no {}",
                spec.key, spec.primary_key
            )));
        }
        tables.push((spec, rows));
    }

    if tables.is_empty() && filter.is_some() {
        return Err(BackupError::InvalidRequest(
            "the snapshot contains none of the requested tables".into(),
        ));
    }
    Ok(RestorePlan { strategy, tables })
}

fn has_primary_key(row: &Row, spec: &TableSpec) -> bool {
    row.get(spec.primary_key).is_some_and(|value| !value.is_null())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeZone;
    use serde_json::{Value, json};

    use super::*;
    use crate::archive::LocalArchive;
    use crate::persistence::MemoryStore;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    fn snapshot(tables: Vec<(&str, Vec<Row>)>) -> Snapshot {
        let Some(at) = Utc.with_ymd_and_hms(2026, 10, 18, 2, 0, 0).single() else {
            panic!("valid timestamp");
        };
        let tables = tables
            .into_iter()
            .map(|(key, rows)| (key.to_owned(), rows))
            .collect();
        Snapshot::new(at, "test", tables, Vec::new())
    }

    async fn publish(archive: &LocalArchive, path: &str, snapshot: &Snapshot) {
        let Ok(bytes) = codec::encode(snapshot, true) else {
            panic!("encode should succeed");
        };
        if archive.put(path, &bytes, None, "seed").await.is_err() {
            panic!("seeding {path} should succeed");
        }
    }

    fn fixture() -> (tempfile::TempDir, Arc<LocalArchive>, Arc<MemoryStore>, RestoreEngine) {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir should be creatable");
        };
        let archive = Arc::new(LocalArchive::new(dir.path()));
        let store = Arc::new(MemoryStore::new());
        let engine = RestoreEngine::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&archive) as Arc<dyn ArchiveStore>,
        );
        (dir, archive, store, engine)
    }

    #[tokio::test]
    async fn picks_the_newest_snapshot() {
        let (_dir, archive, _store, engine) = fixture();
        let empty = snapshot(vec![]);
        publish(&archive, "database/db_backup_2026-10-17T02-00-00.json.gz", &empty).await;
        publish(&archive, "database/db_backup_2026-10-18T02-00-00.json.gz", &empty).await;
        if archive.put("database/notes.txt", b"x", None, "m").await.is_err() {
            panic!("seeding notes should succeed");
        }
        assert!(matches!(
            engine.latest_snapshot_path().await,
            Ok(path) if path == "database/db_backup_2026-10-18T02-00-00.json.gz"
        ));
    }

    #[tokio::test]
    async fn empty_archive_is_not_found() {
        let (_dir, _archive, _store, engine) = fixture();
        assert!(matches!(
            engine.restore(&RestoreRequest::default()).await,
            Err(BackupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn replace_restores_users_and_campaigns_in_catalog_order() {
        let (_dir, archive, store, engine) = fixture();
        let users: Vec<Row> = (0..5).map(|i| row(json!({"id": format!("u{i}")}))).collect();
        let campaigns: Vec<Row> = (0..3).map(|i| row(json!({"id": format!("c{i}")}))).collect();
        publish(
            &archive,
            "database/db_backup_2026-10-18T02-00-00.json.gz",
            &snapshot(vec![("users", users), ("campaigns", campaigns)]),
        )
        .await;
        store.set_rows("users", vec![row(json!({"id": "stale"}))]).await;

        let request = RestoreRequest {
            strategy: RestoreStrategy::Replace,
            ..RestoreRequest::default()
        };
        let Ok(report) = engine.restore(&request).await else {
            panic!("restore should succeed");
        };
        assert_eq!(report.total_rows, 8);
        assert_eq!(store.rows("users").await.len(), 5);
        assert_eq!(store.rows("campaigns").await.len(), 3);
        assert_eq!(
            store.operations().await,
            vec!["delete:campaigns", "delete:users", "insert:users", "insert:campaigns"]
        );
    }

    #[tokio::test]
    async fn malformed_archive_never_touches_the_store() {
        let (_dir, archive, store, engine) = fixture();
        if archive
            .put("database/db_backup_2026-10-18T02-00-00.json", b"{\"tables\": 3}", None, "m")
            .await
            .is_err()
        {
            panic!("seeding should succeed");
        }
        store.set_rows("users", vec![row(json!({"id": "keep"}))]).await;
        assert!(matches!(
            engine.restore(&RestoreRequest::default()).await,
            Err(BackupError::MalformedArchive(_))
        ));
        assert!(store.operations().await.is_empty());
        assert_eq!(store.rows("users").await.len(), 1);
    }

    #[tokio::test]
    async fn rows_without_ids_are_rejected_up_front() {
        let (_dir, archive, store, engine) = fixture();
        publish(
            &archive,
            "database/db_backup_2026-10-18T02-00-00.json.gz",
            &snapshot(vec![("users", vec![row(json!({"email": "x@y"}))])]),
        )
        .await;
        assert!(matches!(
            engine.restore(&RestoreRequest::default()).await,
            Err(BackupError::MalformedArchive(_))
        ));
        assert!(store.operations().await.is_empty());
    }

    #[tokio::test]
    async fn table_filter_and_path_are_validated() {
        let (_dir, _archive, _store, engine) = fixture();
        let unknown = RestoreRequest {
            tables: Some(vec!["users".into(), "bogus".into()]),
            ..RestoreRequest::default()
        };
        assert!(matches!(
            engine.restore(&unknown).await,
            Err(BackupError::InvalidRequest(_))
        ));
        for path in ["uploads/upload_backup_x.json", "database/../secrets", "databasex/y"] {
            let request = RestoreRequest {
                path: Some(path.into()),
                ..RestoreRequest::default()
            };
            assert!(
                matches!(engine.restore(&request).await, Err(BackupError::InvalidRequest(_))),
                "{path} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn filter_limits_restored_tables() {
        let (_dir, archive, store, engine) = fixture();
        publish(
            &archive,
            "database/db_backup_2026-10-18T02-00-00.json.gz",
            &snapshot(vec![
                ("users", vec![row(json!({"id": "u1"}))]),
                ("campaigns", vec![row(json!({"id": "c1"}))]),
            ]),
        )
        .await;
        let request = RestoreRequest {
            tables: Some(vec!["campaigns".into()]),
            ..RestoreRequest::default()
        };
        let Ok(report) = engine.restore(&request).await else {
            panic!("restore should succeed");
        };
        assert_eq!(report.tables.keys().collect::<Vec<_>>(), vec!["campaigns"]);
        assert!(store.rows("users").await.is_empty());
    }

    #[tokio::test]
    async fn replace_filter_must_include_referencing_tables() {
        let (_dir, archive, store, engine) = fixture();
        publish(
            &archive,
            "database/db_backup_2026-10-18T02-00-00.json.gz",
            &snapshot(vec![
                ("reservations", vec![row(json!({"id": "r1"}))]),
                ("payments", vec![row(json!({"id": "p1"}))]),
            ]),
        )
        .await;

        let parent_only = RestoreRequest {
            strategy: RestoreStrategy::Replace,
            tables: Some(vec!["reservations".into()]),
            ..RestoreRequest::default()
        };
        let Err(BackupError::InvalidRequest(message)) = engine.restore(&parent_only).await else {
            panic!("a parent-only replace should be rejected");
        };
        assert!(message.ends_with("passengers, payments"), "{message}");
        assert!(store.operations().await.is_empty());

        let merge = RestoreRequest {
            strategy: RestoreStrategy::Merge,
            ..parent_only.clone()
        };
        assert!(engine.restore(&merge).await.is_ok());

        let closed = RestoreRequest {
            strategy: RestoreStrategy::Replace,
            path: None,
            tables: Some(vec!["reservations".into(), "passengers".into(), "payments".into()]),
        };
        let Ok(report) = engine.restore(&closed).await else {
            panic!("a replace covering every child should succeed");
        };
        assert_eq!(report.total_rows, 2);
    }
}
