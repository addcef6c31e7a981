//! PostgreSQL implementation of the persistence layer.
//!
//! Tables are read and written as JSON objects: `row_to_json` on the way
//! out, `jsonb_populate_record` on the way in. This keeps the store
//! independent of the main application's schema while letting Postgres do
//! the type coercion per column.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};

use super::models::{
    AppliedCounts, AuditEntry, EmailQueueFilter, EmailQueueItem, EmailQueueStats, RestorePlan,
    RestoreStrategy, TableRead, MAX_EMAIL_RETRIES,
};
use super::{query_err, Store, StoreError};
use crate::config::DatabaseSettings;
use crate::domain::table::quote_ident;
use crate::domain::{BackupConfig, Row, TableSpec};

/// Id given to the settings row when none exists yet.
const SETTINGS_ROW_ID: &str = "backup-settings";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

type EmailRow = (
    String,
    String,
    String,
    String,
    String,
    i32,
    Option<String>,
    Option<NaiveDateTime>,
    Option<NaiveDateTime>,
    NaiveDateTime,
);

impl PostgresStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool with the given settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the database cannot be reached.
    pub async fn connect(url: &str, settings: &DatabaseSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(url)
            .await
            .map_err(query_err("connecting to the database"))?;
        Ok(Self::new(pool))
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn read_table(
        conn: &mut PgConnection,
        spec: &TableSpec,
    ) -> Result<Vec<Row>, StoreError> {
        let sql = format!(
            "SELECT row_to_json(t)::jsonb FROM {} t ORDER BY t.{}",
            spec.quoted(),
            quote_ident(spec.primary_key)
        );
        let values = sqlx::query_scalar::<_, serde_json::Value>(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(query_err(format!("reading {}", spec.key)))?;

        values
            .into_iter()
            .enumerate()
            .map(|(index, value)| match value {
                serde_json::Value::Object(row) => Ok(row),
                _ => Err(StoreError::MalformedRow {
                    table: spec.key.to_owned(),
                    index,
                }),
            })
            .collect()
    }

    async fn table_columns(
        conn: &mut PgConnection,
        spec: &TableSpec,
    ) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind(spec.table)
        .fetch_all(&mut *conn)
        .await
        .map_err(query_err(format!("listing columns of {}", spec.key)))
    }

    async fn write_rows(
        conn: &mut PgConnection,
        spec: &TableSpec,
        rows: &[Row],
        strategy: RestoreStrategy,
    ) -> Result<u64, StoreError> {
        let columns = Self::table_columns(conn, spec).await?;
        let mut written = 0;
        for (index, row) in rows.iter().enumerate() {
            let present: Vec<&str> = columns
                .iter()
                .map(String::as_str)
                .filter(|column| row.contains_key(*column))
                .collect();
            if !present.contains(&spec.primary_key) {
                return Err(StoreError::RowRejected {
                    table: spec.key.to_owned(),
                    index,
                    reason: format!("missing primary key {}", spec.primary_key),
                });
            }

            let sql = insert_sql(spec, &present, strategy == RestoreStrategy::Merge);
            sqlx::query(&sql)
                .bind(serde_json::Value::Object(row.clone()))
                .execute(&mut *conn)
                .await
                .map_err(|source| {
                    tracing::debug!(table = spec.key, index, error = %source, "row rejected");
                    StoreError::RowRejected {
                        table: spec.key.to_owned(),
                        index,
                        reason: "the database refused the row".to_owned(),
                    }
                })?;
            written += 1;
        }
        Ok(written)
    }
}

/// Builds the insert (or upsert) statement for one row's column set.
fn insert_sql(spec: &TableSpec, columns: &[&str], upsert: bool) -> String {
    let table = spec.quoted();
    let column_list = columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {table} ({column_list}) \
         SELECT {column_list} FROM jsonb_populate_record(NULL::{table}, $1)"
    );
    if upsert {
        let key = quote_ident(spec.primary_key);
        let updates = columns
            .iter()
            .filter(|column| **column != spec.primary_key)
            .map(|column| {
                let quoted = quote_ident(column);
                format!("{quoted} = EXCLUDED.{quoted}")
            })
            .collect::<Vec<_>>();
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({key}) DO NOTHING"));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT ({key}) DO UPDATE SET {}",
                updates.join(", ")
            ));
        }
    }
    sql
}

#[async_trait]
impl Store for PostgresStore {
    async fn read_tables(&self, tables: &[&'static TableSpec]) -> Result<Vec<TableRead>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_err("starting the snapshot transaction"))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(query_err("setting the snapshot isolation level"))?;

        let mut reads = Vec::with_capacity(tables.len());
        for &spec in tables {
            sqlx::query("SAVEPOINT snapshot_table")
                .execute(&mut *tx)
                .await
                .map_err(query_err("creating a savepoint"))?;
            let rows = Self::read_table(&mut *tx, spec).await;
            let close = if rows.is_ok() {
                "RELEASE SAVEPOINT snapshot_table"
            } else {
                "ROLLBACK TO SAVEPOINT snapshot_table"
            };
            sqlx::query(close)
                .execute(&mut *tx)
                .await
                .map_err(query_err("closing a savepoint"))?;
            reads.push(TableRead { spec, rows });
        }

        tx.commit()
            .await
            .map_err(query_err("ending the snapshot transaction"))?;
        Ok(reads)
    }

    async fn count_rows(&self, table: &TableSpec) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.quoted());
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(query_err(format!("counting {}", table.key)))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn apply_restore(&self, plan: &RestorePlan) -> Result<AppliedCounts, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_err("starting the restore transaction"))?;

        if plan.strategy == RestoreStrategy::Replace {
            for (spec, _) in plan.tables.iter().rev() {
                let sql = format!("DELETE FROM {}", spec.quoted());
                sqlx::query(&sql)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_err(format!("clearing {}", spec.key)))?;
            }
        }

        let mut applied = AppliedCounts::new();
        for (spec, rows) in &plan.tables {
            let written = Self::write_rows(&mut *tx, spec, rows, plan.strategy).await?;
            applied.insert(spec.key.to_owned(), written);
        }

        tx.commit()
            .await
            .map_err(query_err("committing the restore"))?;
        Ok(applied)
    }

    async fn load_backup_config(&self) -> Result<Option<BackupConfig>, StoreError> {
        let row = sqlx::query_as::<_, (bool, String, i32, bool, bool, bool)>(
            "SELECT \"backupEnabled\", \"backupSchedule\", \"backupRetention\", \
             \"backupDatabase\", \"backupUploads\", \"backupLogs\" \
             FROM \"SystemSettings\" ORDER BY \"createdAt\" ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err("loading backup settings"))?;

        row.map(
            |(enabled, schedule, retention, include_database, include_uploads, include_logs)| {
                let retention = u32::try_from(retention)
                    .map_err(|_| StoreError::InvalidRecord(format!("retention {retention}")))?;
                Ok(BackupConfig {
                    enabled,
                    schedule,
                    retention,
                    include_database,
                    include_uploads,
                    include_logs,
                })
            },
        )
        .transpose()
    }

    async fn save_backup_config(&self, config: &BackupConfig) -> Result<(), StoreError> {
        let retention = i32::try_from(config.retention)
            .map_err(|_| StoreError::InvalidRecord(format!("retention {}", config.retention)))?;
        sqlx::query(
            "WITH updated AS ( \
                UPDATE \"SystemSettings\" SET \"backupEnabled\" = $1, \"backupSchedule\" = $2, \
                \"backupRetention\" = $3, \"backupDatabase\" = $4, \"backupUploads\" = $5, \
                \"backupLogs\" = $6, \"updatedAt\" = NOW() \
                WHERE \"id\" = (SELECT \"id\" FROM \"SystemSettings\" ORDER BY \"createdAt\" ASC LIMIT 1) \
                RETURNING \"id\") \
             INSERT INTO \"SystemSettings\" (\"id\", \"backupEnabled\", \"backupSchedule\", \
                \"backupRetention\", \"backupDatabase\", \"backupUploads\", \"backupLogs\", \
                \"createdAt\", \"updatedAt\") \
             SELECT $7, $1, $2, $3, $4, $5, $6, NOW(), NOW() \
             WHERE NOT EXISTS (SELECT 1 FROM updated)",
        )
        .bind(config.enabled)
        .bind(&config.schedule)
        .bind(retention)
        .bind(config.include_database)
        .bind(config.include_uploads)
        .bind(config.include_logs)
        .bind(SETTINGS_ROW_ID)
        .execute(&self.pool)
        .await
        .map_err(query_err("saving backup settings"))?;
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO \"SystemLog\" (\"id\", \"level\", \"message\", \"source\", \"metadata\", \"timestamp\") \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&entry.id)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(&entry.source)
        .bind(&entry.metadata)
        .bind(entry.timestamp.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(query_err("writing an audit entry"))?;
        Ok(())
    }

    async fn list_email_queue(
        &self,
        filter: &EmailQueueFilter,
    ) -> Result<Vec<EmailQueueItem>, StoreError> {
        let rows = sqlx::query_as::<_, EmailRow>(
            "SELECT \"id\", \"recipient\", \"subject\", \"status\", \"priority\", \"retryCount\", \
             \"errorMessage\", \"scheduledAt\", \"sentAt\", \"createdAt\" \
             FROM \"EmailQueue\" WHERE ($1::text IS NULL OR \"status\"::text = $1) \
             ORDER BY CASE \"priority\" WHEN 'high' THEN 0 WHEN 'normal' THEN 1 ELSE 2 END, \
             \"scheduledAt\" ASC NULLS LAST, \"createdAt\" ASC LIMIT $2",
        )
        .bind(filter.status.map(|status| status.as_str()))
        .bind(i64::from(filter.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(query_err("listing the email queue"))?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    id,
                    recipient,
                    subject,
                    status,
                    priority,
                    retry_count,
                    error_message,
                    scheduled_at,
                    sent_at,
                    created_at,
                )| EmailQueueItem {
                    id,
                    recipient,
                    subject,
                    status,
                    priority,
                    retry_count,
                    error_message,
                    scheduled_at: scheduled_at.map(|at| at.and_utc()),
                    sent_at: sent_at.map(|at| at.and_utc()),
                    created_at: created_at.and_utc(),
                },
            )
            .collect())
    }

    async fn email_queue_stats(&self) -> Result<EmailQueueStats, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT \"status\"::text, COUNT(*), COUNT(*) FILTER (WHERE \"retryCount\" < $1) \
             FROM \"EmailQueue\" GROUP BY \"status\"",
        )
        .bind(MAX_EMAIL_RETRIES)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err("aggregating the email queue"))?;

        let mut stats = EmailQueueStats::default();
        for (status, count, retryable) in rows {
            stats.add(
                &status,
                u64::try_from(count).unwrap_or_default(),
                u64::try_from(retryable).unwrap_or_default(),
            );
        }
        Ok(stats)
    }

    async fn retry_email(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE \"EmailQueue\" SET \"status\" = 'pending', \"retryCount\" = \"retryCount\" + 1, \
             \"errorMessage\" = NULL, \"scheduledAt\" = NOW() WHERE \"id\" = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_err("re-queuing an email"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_email(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE \"EmailQueue\" SET \"status\" = 'cancelled' WHERE \"id\" = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_err("cancelling an email"))?;
        Ok(result.rows_affected() > 0)
    }
}
