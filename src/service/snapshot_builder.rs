//! Snapshot builder: reads the selected tables into one [`Snapshot`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{Snapshot, TableSpec};
use crate::error::BackupError;
use crate::persistence::Store;

/// What to do when a single table cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartialReadPolicy {
    /// Fail the whole snapshot.
    #[default]
    Abort,
    /// Record the table as empty and list it in `failedTables`.
    RecordEmpty,
}

impl FromStr for PartialReadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "record_empty" => Ok(Self::RecordEmpty),
            other => Err(format!("unknown partial read policy: {other}")),
        }
    }
}

impl fmt::Display for PartialReadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => f.write_str("abort"),
            Self::RecordEmpty => f.write_str("record_empty"),
        }
    }
}

/// Assembles snapshots from the store.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    store: Arc<dyn Store>,
    source_tag: String,
    policy: PartialReadPolicy,
}

impl SnapshotBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, source_tag: impl Into<String>, policy: PartialReadPolicy) -> Self {
        Self {
            store,
            source_tag: source_tag.into(),
            policy,
        }
    }

    /// Reads every table in `tables` and assembles a snapshot stamped with
    /// `created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Store`] if the read could not start, or
    /// [`BackupError::SnapshotFailed`] for the first failing table under
    /// [`PartialReadPolicy::Abort`].
    pub async fn build(
        &self,
        tables: &[&'static TableSpec],
        created_at: DateTime<Utc>,
    ) -> Result<Snapshot, BackupError> {
        let reads = self.store.read_tables(tables).await?;

        let mut rows_by_table = BTreeMap::new();
        let mut failed_tables = Vec::new();
        for read in reads {
            match (read.rows, self.policy) {
                (Ok(rows), _) => {
                    rows_by_table.insert(read.spec.key.to_owned(), rows);
                }
                (Err(source), PartialReadPolicy::Abort) => {
                    return Err(BackupError::SnapshotFailed {
                        table: read.spec.key.to_owned(),
                        source,
                    });
                }
                (Err(e), PartialReadPolicy::RecordEmpty) => {
                    tracing::warn!(table = read.spec.key, error = %e, "table read failed, recording it empty");
                    rows_by_table.insert(read.spec.key.to_owned(), Vec::new());
                    failed_tables.push(read.spec.key.to_owned());
                }
            }
        }

        let snapshot = Snapshot::new(created_at, self.source_tag.clone(), rows_by_table, failed_tables);
        tracing::info!(
            tables = snapshot.table_count(),
            total_records = snapshot.total_records,
            failed = snapshot.failed_tables.len(),
            "snapshot built"
        );
        Ok(snapshot)
    }
}
