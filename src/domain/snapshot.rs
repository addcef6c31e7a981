//! Point-in-time capture of the selected tables.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An opaque row as returned by the store: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Current snapshot document version.
pub const FORMAT_VERSION: u32 = 1;

/// A JSON document holding the full contents of every selected table.
///
/// `counts` and `total_records` are derived from `tables`. They are written
/// out for human readers of the archive but recomputed by
/// [`Snapshot::recount`] whenever a document is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// When the table reads started.
    pub created_at: DateTime<Utc>,
    /// Free-form origin label (deployment name).
    pub source_tag: String,
    /// Document format version.
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Rows per table key, ordered by key.
    pub tables: BTreeMap<String, Vec<Row>>,
    /// Row count per table key.
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
    /// Sum of all row counts.
    #[serde(default)]
    pub total_records: u64,
    /// Tables recorded as empty because their read failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tables: Vec<String>,
}

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

impl Snapshot {
    /// Assembles a snapshot and derives its counts.
    #[must_use]
    pub fn new(
        created_at: DateTime<Utc>,
        source_tag: impl Into<String>,
        tables: BTreeMap<String, Vec<Row>>,
        failed_tables: Vec<String>,
    ) -> Self {
        let mut snapshot = Self {
            created_at,
            source_tag: source_tag.into(),
            format_version: FORMAT_VERSION,
            tables,
            counts: BTreeMap::new(),
            total_records: 0,
            failed_tables,
        };
        snapshot.recount();
        snapshot
    }

    /// Recomputes `counts` and `total_records` from `tables`.
    pub fn recount(&mut self) {
        self.counts = self
            .tables
            .iter()
            .map(|(key, rows)| (key.clone(), rows.len() as u64))
            .collect();
        self.total_records = self.counts.values().sum();
    }

    /// Row count for one table key (0 when absent).
    #[must_use]
    pub fn count(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Number of tables in the document.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}
