//! Audit Store (C2): the durable record of every reconciliation batch and
//! principal-level operation, backed by an embedded SQLite file.
//!
//! Single writer, many readers via a pooled connection; every write goes
//! through a transaction, and batch inserts are always one transaction so
//! the audit of a single reconciliation step is atomic.

pub mod errors;
pub mod model;

use chrono::Utc;
use sqlx::{
    sqlite::{
        SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions,
        SqliteSynchronous,
    },
    Row, SqlitePool,
};
use tracing::{error, warn};
use uuid::Uuid;

pub use self::errors::AuditError;
use self::model::{
    BatchFilter, BatchSource, OpResult, OpType, OperationFilter, Page, RetentionState, SummaryStats,
    SyncBatch, SyncOperation,
};

/// Embedded audit store, migrated at startup.
#[derive(Clone)]
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    /// Open (creating if necessary) the SQLite file at `path`, enable WAL
    /// mode, and apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be opened or migrations fail to
    /// apply; both are treated as fatal startup errors by the caller.
    pub async fn open(path: &str, max_connections: u32) -> Result<Self, AuditError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .auto_vacuum(SqliteAutoVacuum::Incremental);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Create a new batch row, returning its freshly allocated correlation ID.
    pub async fn create_batch(
        &self,
        source: BatchSource,
        items_total: i64,
    ) -> Result<Uuid, AuditError> {
        let correlation_id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sync_batch (correlation_id, started_at, source, items_total) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(correlation_id.to_string())
        .bind(now.to_rfc3339())
        .bind(source.as_str())
        .bind(items_total)
        .execute(&self.pool)
        .await?;
        Ok(correlation_id)
    }

    /// Record a single operation outside of a batch-insert transaction.
    ///
    /// Write failures are retried once in-process; a persistent failure is
    /// propagated so the caller can record it as an in-memory ERROR instead
    /// of halting the batch.
    pub async fn record_operation(&self, op: &SyncOperation) -> Result<(), AuditError> {
        match self.insert_operation(&self.pool, op).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "audit write failed, retrying once");
                self.insert_operation(&self.pool, op).await.map_err(|err| {
                    error!(error = %err, "audit write failed persistently");
                    err
                })
            }
        }
    }

    /// Record every operation of a batch in a single transaction, so the
    /// audit of one reconciliation step is atomic.
    pub async fn record_operations(&self, ops: &[SyncOperation]) -> Result<(), AuditError> {
        let mut tx = self.pool.begin().await?;
        for op in ops {
            insert_operation_tx(&mut tx, op).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_operation(
        &self,
        pool: &SqlitePool,
        op: &SyncOperation,
    ) -> Result<(), AuditError> {
        sqlx::query(INSERT_OPERATION_SQL)
            .bind(op.correlation_id.to_string())
            .bind(op.occurred_at.to_rfc3339())
            .bind(&op.realm)
            .bind(&op.cluster_id)
            .bind(&op.principal)
            .bind(op.op_type.as_str())
            .bind(&op.mechanism)
            .bind(op.result.as_str())
            .bind(&op.error_code)
            .bind(&op.error_message)
            .bind(op.duration_ms)
            .bind(op.retry_count)
            .bind(&op.acl_resource)
            .bind(&op.acl_operation)
            .bind(&op.acl_role)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Mark a batch complete, setting `finished_at`, `duration_ms`, and the
    /// final item counts.
    pub async fn complete_batch(
        &self,
        correlation_id: Uuid,
        items_success: i64,
        items_error: i64,
        error_summary: Option<&str>,
    ) -> Result<(), AuditError> {
        let now = Utc::now();
        let row = sqlx::query("SELECT started_at FROM sync_batch WHERE correlation_id = ?")
            .bind(correlation_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        let started_at: String = row.try_get("started_at")?;
        let started_at = chrono::DateTime::parse_from_rfc3339(&started_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);
        let duration_ms = (now - started_at).num_milliseconds().max(0);

        sqlx::query(
            "UPDATE sync_batch SET finished_at = ?, items_success = ?, items_error = ?, \
             duration_ms = ?, error_summary = ? WHERE correlation_id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(items_success)
        .bind(items_error)
        .bind(duration_ms)
        .bind(error_summary)
        .bind(correlation_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Paged, filtered view over `sync_operation`.
    pub async fn get_operations(
        &self,
        filter: &OperationFilter,
        page: u32,
        size: u32,
    ) -> Result<Page<SyncOperation>, AuditError> {
        let mut where_clauses = Vec::new();
        if filter.start_time.is_some() {
            where_clauses.push("occurred_at >= ?");
        }
        if filter.end_time.is_some() {
            where_clauses.push("occurred_at <= ?");
        }
        if filter.principal.is_some() {
            where_clauses.push("principal = ?");
        }
        if filter.op_type.is_some() {
            where_clauses.push("op_type = ?");
        }
        if filter.result.is_some() {
            where_clauses.push("result = ?");
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_clauses.join(" AND "))
        };

        macro_rules! bind_filters {
            ($q:expr) => {{
                let mut q = $q;
                if let Some(v) = &filter.start_time {
                    q = q.bind(v.to_rfc3339());
                }
                if let Some(v) = &filter.end_time {
                    q = q.bind(v.to_rfc3339());
                }
                if let Some(v) = &filter.principal {
                    q = q.bind(v.clone());
                }
                if let Some(v) = filter.op_type {
                    q = q.bind(v.as_str());
                }
                if let Some(v) = filter.result {
                    q = q.bind(v.as_str());
                }
                q
            }};
        }

        let count_sql = format!("SELECT COUNT(*) AS n FROM sync_operation{where_sql}");
        let count_row = bind_filters!(sqlx::query(&count_sql))
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = count_row.try_get("n")?;

        let list_sql = format!(
            "SELECT * FROM sync_operation{where_sql} ORDER BY occurred_at DESC LIMIT ? OFFSET ?"
        );
        let rows = bind_filters!(sqlx::query(&list_sql))
            .bind(i64::from(size))
            .bind(i64::from(page) * i64::from(size))
            .fetch_all(&self.pool)
            .await?;

        let items = rows.into_iter().map(row_to_operation).collect::<Result<_, _>>()?;
        Ok(Page {
            items,
            total,
            page,
            size,
        })
    }

    /// Paged, filtered view over `sync_batch`.
    pub async fn get_batches(
        &self,
        filter: &BatchFilter,
        page: u32,
        size: u32,
    ) -> Result<Page<SyncBatch>, AuditError> {
        let mut where_clauses = Vec::new();
        if filter.start_time.is_some() {
            where_clauses.push("started_at >= ?");
        }
        if filter.end_time.is_some() {
            where_clauses.push("started_at <= ?");
        }
        if filter.source.is_some() {
            where_clauses.push("source = ?");
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_clauses.join(" AND "))
        };

        macro_rules! bind_filters {
            ($q:expr) => {{
                let mut q = $q;
                if let Some(v) = &filter.start_time {
                    q = q.bind(v.to_rfc3339());
                }
                if let Some(v) = &filter.end_time {
                    q = q.bind(v.to_rfc3339());
                }
                if let Some(v) = filter.source {
                    q = q.bind(v.as_str());
                }
                q
            }};
        }

        let count_sql = format!("SELECT COUNT(*) AS n FROM sync_batch{where_sql}");
        let count_row = bind_filters!(sqlx::query(&count_sql))
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = count_row.try_get("n")?;

        let list_sql =
            format!("SELECT * FROM sync_batch{where_sql} ORDER BY started_at DESC LIMIT ? OFFSET ?");
        let rows = bind_filters!(sqlx::query(&list_sql))
            .bind(i64::from(size))
            .bind(i64::from(page) * i64::from(size))
            .fetch_all(&self.pool)
            .await?;

        let items = rows.into_iter().map(row_to_batch).collect::<Result<_, _>>()?;
        Ok(Page {
            items,
            total,
            page,
            size,
        })
    }

    /// Read the singleton retention row.
    pub async fn get_retention_state(&self) -> Result<RetentionState, AuditError> {
        let row = sqlx::query("SELECT * FROM retention_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        row_to_retention(row)
    }

    /// Update the retention policy's configured bounds.
    pub async fn set_retention_policy(
        &self,
        max_bytes: Option<i64>,
        max_age_days: Option<i64>,
    ) -> Result<(), AuditError> {
        sqlx::query(
            "UPDATE retention_state SET max_bytes = ?, max_age_days = ?, updated_at = ? WHERE id = 1",
        )
        .bind(max_bytes)
        .bind(max_age_days)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update retention bookkeeping after a purge run.
    pub async fn record_purge(&self, approx_db_bytes: i64, purged: i64) -> Result<(), AuditError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE retention_state SET approx_db_bytes = ?, last_purge_at = ?, \
             total_purged_records = total_purged_records + ?, updated_at = ? WHERE id = 1",
        )
        .bind(approx_db_bytes)
        .bind(&now)
        .bind(purged)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete operations whose `occurred_at` is strictly older than `cutoff`,
    /// excluding rows belonging to an in-progress batch (`finished_at IS NULL`).
    pub async fn delete_operations_older_than(
        &self,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<i64, AuditError> {
        let result = sqlx::query(
            "DELETE FROM sync_operation WHERE occurred_at < ? AND correlation_id NOT IN \
             (SELECT correlation_id FROM sync_batch WHERE finished_at IS NULL)",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i64)
    }

    /// Delete the oldest `limit` operations (by `occurred_at` ascending),
    /// excluding rows belonging to an in-progress batch.
    pub async fn delete_oldest_operations(&self, limit: i64) -> Result<i64, AuditError> {
        let result = sqlx::query(
            "DELETE FROM sync_operation WHERE id IN ( \
                SELECT id FROM sync_operation \
                WHERE correlation_id NOT IN (SELECT correlation_id FROM sync_batch WHERE finished_at IS NULL) \
                ORDER BY occurred_at ASC LIMIT ? \
             )",
        )
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i64)
    }

    /// Approximate on-disk size of the database, via `page_count * page_size`.
    pub async fn approximate_db_bytes(&self) -> Result<i64, AuditError> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await?;
        Ok(page_count * page_size)
    }

    /// Number of rows currently in `sync_operation`, used to estimate the
    /// average row size during size-based purging.
    pub async fn operation_row_count(&self) -> Result<i64, AuditError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM sync_operation")
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Reclaim freed pages after a purge so `approximate_db_bytes` reflects
    /// the deletion. Requires `auto_vacuum = incremental` (set at connect
    /// time in [`Self::open`]); without it this pragma is a no-op and
    /// `page_count` never shrinks.
    pub async fn reclaim_space(&self) -> Result<(), AuditError> {
        sqlx::query("PRAGMA incremental_vacuum").execute(&self.pool).await?;
        Ok(())
    }

    /// Whether the pool can currently serve a trivial query, used by `/readyz`.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// KPI snapshot over operations recorded since `since`, for `GET /api/summary`.
    pub async fn summary_stats(&self, since: chrono::DateTime<Utc>) -> Result<SummaryStats, AuditError> {
        let rows = sqlx::query("SELECT result, duration_ms FROM sync_operation WHERE occurred_at >= ?")
            .bind(since.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;

        let ops_total = rows.len() as i64;
        let mut durations: Vec<i64> = Vec::with_capacity(rows.len());
        let mut errors = 0i64;
        for row in &rows {
            let result: String = row.try_get("result")?;
            if result == OpResult::Error.as_str() {
                errors += 1;
            }
            durations.push(row.try_get("duration_ms")?);
        }
        durations.sort_unstable();

        let percentile = |p: f64| -> i64 {
            if durations.is_empty() {
                return 0;
            }
            let idx = ((durations.len() as f64 - 1.0) * p).round() as usize;
            durations[idx.min(durations.len() - 1)]
        };

        let window_hours = (Utc::now() - since).num_seconds() as f64 / 3600.0;
        let ops_per_hour = if window_hours > 0.0 {
            ops_total as f64 / window_hours
        } else {
            0.0
        };
        let error_rate = if ops_total > 0 {
            errors as f64 / ops_total as f64
        } else {
            0.0
        };

        Ok(SummaryStats {
            ops_total,
            ops_per_hour,
            error_rate,
            p95_duration_ms: percentile(0.95),
            p99_duration_ms: percentile(0.99),
            approx_db_bytes: self.approximate_db_bytes().await?,
        })
    }
}

const INSERT_OPERATION_SQL: &str = "INSERT INTO sync_operation \
    (correlation_id, occurred_at, realm, cluster_id, principal, op_type, mechanism, result, \
     error_code, error_message, duration_ms, retry_count, acl_resource, acl_operation, acl_role) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

async fn insert_operation_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    op: &SyncOperation,
) -> Result<(), AuditError> {
    sqlx::query(INSERT_OPERATION_SQL)
        .bind(op.correlation_id.to_string())
        .bind(op.occurred_at.to_rfc3339())
        .bind(&op.realm)
        .bind(&op.cluster_id)
        .bind(&op.principal)
        .bind(op.op_type.as_str())
        .bind(&op.mechanism)
        .bind(op.result.as_str())
        .bind(&op.error_code)
        .bind(&op.error_message)
        .bind(op.duration_ms)
        .bind(op.retry_count)
        .bind(&op.acl_resource)
        .bind(&op.acl_operation)
        .bind(&op.acl_role)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn row_to_operation(row: sqlx::sqlite::SqliteRow) -> Result<SyncOperation, AuditError> {
    let correlation_id: String = row.try_get("correlation_id")?;
    let occurred_at: String = row.try_get("occurred_at")?;
    let op_type: String = row.try_get("op_type")?;
    let result: String = row.try_get("result")?;
    Ok(SyncOperation {
        id: row.try_get("id")?,
        correlation_id: Uuid::parse_str(&correlation_id).unwrap_or_default(),
        occurred_at: parse_timestamp(&occurred_at),
        realm: row.try_get("realm")?,
        cluster_id: row.try_get("cluster_id")?,
        principal: row.try_get("principal")?,
        op_type: OpType::from_str(&op_type).unwrap_or(OpType::ScramUpsert),
        mechanism: row.try_get("mechanism")?,
        result: OpResult::from_str(&result).unwrap_or(OpResult::Error),
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        duration_ms: row.try_get("duration_ms")?,
        retry_count: row.try_get("retry_count")?,
        acl_resource: row.try_get("acl_resource")?,
        acl_operation: row.try_get("acl_operation")?,
        acl_role: row.try_get("acl_role")?,
    })
}

fn row_to_batch(row: sqlx::sqlite::SqliteRow) -> Result<SyncBatch, AuditError> {
    let correlation_id: String = row.try_get("correlation_id")?;
    let started_at: String = row.try_get("started_at")?;
    let finished_at: Option<String> = row.try_get("finished_at")?;
    let source: String = row.try_get("source")?;
    Ok(SyncBatch {
        id: row.try_get("id")?,
        correlation_id: Uuid::parse_str(&correlation_id).unwrap_or_default(),
        started_at: parse_timestamp(&started_at),
        finished_at: finished_at.map(|s| parse_timestamp(&s)),
        source: BatchSource::from_str(&source).unwrap_or(BatchSource::Periodic),
        items_total: row.try_get("items_total")?,
        items_success: row.try_get("items_success")?,
        items_error: row.try_get("items_error")?,
        duration_ms: row.try_get("duration_ms")?,
        error_summary: row.try_get("error_summary")?,
    })
}

fn row_to_retention(row: sqlx::sqlite::SqliteRow) -> Result<RetentionState, AuditError> {
    let last_purge_at: Option<String> = row.try_get("last_purge_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(RetentionState {
        max_bytes: row.try_get("max_bytes")?,
        max_age_days: row.try_get("max_age_days")?,
        approx_db_bytes: row.try_get("approx_db_bytes")?,
        last_purge_at: last_purge_at.map(|s| parse_timestamp(&s)),
        total_purged_records: row.try_get("total_purged_records")?,
        updated_at: parse_timestamp(&updated_at),
    })
}

fn parse_timestamp(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::model::{OpResult, OpType};

    async fn store() -> AuditStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.sqlite3");
        // Leak the tempdir so the file survives for the pool's lifetime;
        // each test gets its own directory so this doesn't accumulate.
        let path = path.to_str().unwrap().to_owned();
        std::mem::forget(dir);
        AuditStore::open(&path, 4).await.unwrap()
    }

    fn op(correlation_id: Uuid, result: OpResult, duration_ms: i64) -> SyncOperation {
        SyncOperation {
            id: None,
            correlation_id,
            occurred_at: Utc::now(),
            realm: "test-realm".into(),
            cluster_id: "test-cluster".into(),
            principal: "alice".into(),
            op_type: OpType::ScramUpsert,
            mechanism: Some("SCRAM-SHA-512".into()),
            result,
            error_code: None,
            error_message: None,
            duration_ms,
            retry_count: 0,
            acl_resource: None,
            acl_operation: None,
            acl_role: None,
        }
    }

    #[tokio::test]
    async fn batch_and_operations_round_trip() {
        let store = store().await;
        let correlation_id = store.create_batch(BatchSource::Manual, 2).await.unwrap();

        let ops = vec![
            op(correlation_id, OpResult::Success, 10),
            op(correlation_id, OpResult::Error, 20),
        ];
        store.record_operations(&ops).await.unwrap();
        store
            .complete_batch(correlation_id, 1, 1, Some("one principal failed"))
            .await
            .unwrap();

        let page = store
            .get_operations(&OperationFilter::default(), 0, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 2);

        let batches = store
            .get_batches(&BatchFilter::default(), 0, 10)
            .await
            .unwrap();
        assert_eq!(batches.total, 1);
        let batch = &batches.items[0];
        assert_eq!(batch.correlation_id, correlation_id);
        assert_eq!(batch.items_success, 1);
        assert_eq!(batch.items_error, 1);
        assert!(batch.finished_at.is_some());
    }

    #[tokio::test]
    async fn summary_stats_computes_percentiles_and_error_rate() {
        let store = store().await;
        let correlation_id = store.create_batch(BatchSource::Periodic, 4).await.unwrap();

        let durations = [10_i64, 20, 30, 100];
        let ops: Vec<SyncOperation> = durations
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                let result = if i == 0 { OpResult::Error } else { OpResult::Success };
                op(correlation_id, result, d)
            })
            .collect();
        store.record_operations(&ops).await.unwrap();
        store.complete_batch(correlation_id, 3, 1, None).await.unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        let stats = store.summary_stats(since).await.unwrap();

        assert_eq!(stats.ops_total, 4);
        assert!((stats.error_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(stats.p95_duration_ms, 100);
        assert_eq!(stats.p99_duration_ms, 100);
    }

    #[tokio::test]
    async fn retention_policy_round_trips() {
        let store = store().await;
        let initial = store.get_retention_state().await.unwrap();
        assert_eq!(initial.max_bytes, Some(268_435_456));
        assert_eq!(initial.max_age_days, Some(30));

        store.set_retention_policy(Some(1_000_000), Some(30)).await.unwrap();
        let updated = store.get_retention_state().await.unwrap();
        assert_eq!(updated.max_bytes, Some(1_000_000));
        assert_eq!(updated.max_age_days, Some(30));

        store.set_retention_policy(None, None).await.unwrap();
        let cleared = store.get_retention_state().await.unwrap();
        assert_eq!(cleared.max_bytes, None);
        assert_eq!(cleared.max_age_days, None);
    }

    #[tokio::test]
    async fn delete_operations_older_than_spares_unfinished_batches() {
        let store = store().await;

        let finished = store.create_batch(BatchSource::Manual, 1).await.unwrap();
        let mut old_op = op(finished, OpResult::Success, 5);
        old_op.occurred_at = Utc::now() - chrono::Duration::days(2);
        store.record_operations(&[old_op]).await.unwrap();
        store.complete_batch(finished, 1, 0, None).await.unwrap();

        let unfinished = store.create_batch(BatchSource::Manual, 1).await.unwrap();
        let mut old_unfinished_op = op(unfinished, OpResult::Success, 5);
        old_unfinished_op.occurred_at = Utc::now() - chrono::Duration::days(2);
        store.record_operations(&[old_unfinished_op]).await.unwrap();

        let purged = store
            .delete_operations_older_than(Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);

        let remaining = store.operation_row_count().await.unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn is_healthy_reports_true_for_open_store() {
        let store = store().await;
        assert!(store.is_healthy().await);
    }
}
