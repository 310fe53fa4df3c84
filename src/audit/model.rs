//! Row shapes for the audit store (C2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of mutation a [`SyncOperation`] recorded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpType {
    /// SCRAM credential created or refreshed.
    ScramUpsert,
    /// SCRAM credential removed.
    ScramDelete,
    /// ACL created. Not exercised by the core reconciliation path.
    AclCreate,
    /// ACL removed. Not exercised by the core reconciliation path.
    AclDelete,
}

impl OpType {
    /// Stable string form stored in the `sync_operation.op_type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScramUpsert => "SCRAM_UPSERT",
            Self::ScramDelete => "SCRAM_DELETE",
            Self::AclCreate => "ACL_CREATE",
            Self::AclDelete => "ACL_DELETE",
        }
    }

    /// Parse the string form stored in the database.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SCRAM_UPSERT" => Some(Self::ScramUpsert),
            "SCRAM_DELETE" => Some(Self::ScramDelete),
            "ACL_CREATE" => Some(Self::AclCreate),
            "ACL_DELETE" => Some(Self::AclDelete),
            _ => None,
        }
    }
}

/// Outcome of one principal-level attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpResult {
    /// Attempt succeeded.
    Success,
    /// Attempt failed, see `error_code`/`error_message`.
    Error,
    /// Attempt was not needed and was skipped.
    Skipped,
}

impl OpResult {
    /// Stable string form stored in the `sync_operation.result` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Skipped => "SKIPPED",
        }
    }

    /// Parse the string form stored in the database.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(Self::Success),
            "ERROR" => Some(Self::Error),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Where a reconciliation/event batch originated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchSource {
    /// Triggered by the periodic reconcile timer.
    Periodic,
    /// Triggered via `POST /api/reconcile/trigger`.
    Manual,
    /// Triggered by an incoming webhook event.
    Webhook,
}

impl BatchSource {
    /// Stable string form stored in the `sync_batch.source` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Periodic => "PERIODIC",
            Self::Manual => "MANUAL",
            Self::Webhook => "WEBHOOK",
        }
    }

    /// Parse the string form stored in the database.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PERIODIC" => Some(Self::Periodic),
            "MANUAL" => Some(Self::Manual),
            "WEBHOOK" => Some(Self::Webhook),
            _ => None,
        }
    }
}

/// One record per principal-level attempt within a batch.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SyncOperation {
    /// Monotonic row ID, assigned by the store.
    pub id: Option<i64>,
    /// UUID grouping every operation belonging to the same batch.
    pub correlation_id: Uuid,
    /// UTC instant the attempt completed.
    pub occurred_at: DateTime<Utc>,
    /// Keycloak realm the principal belongs to.
    pub realm: String,
    /// Target Kafka cluster identifier.
    pub cluster_id: String,
    /// Kafka principal (user name) this operation applies to.
    pub principal: String,
    /// Kind of mutation attempted.
    pub op_type: OpType,
    /// SCRAM mechanism involved, if any.
    pub mechanism: Option<String>,
    /// Attempt outcome.
    pub result: OpResult,
    /// Machine-readable error code, present only on `Error`.
    pub error_code: Option<String>,
    /// Human-readable error message, present only on `Error`.
    pub error_message: Option<String>,
    /// Wall-clock duration of the attempt.
    pub duration_ms: i64,
    /// Number of retries already performed before this attempt.
    pub retry_count: i64,
    /// ACL resource descriptor, reserved for future use (see Non-goals).
    pub acl_resource: Option<String>,
    /// ACL operation descriptor, reserved for future use.
    pub acl_operation: Option<String>,
    /// ACL role descriptor, reserved for future use.
    pub acl_role: Option<String>,
}

/// One record per reconciliation or event batch.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SyncBatch {
    /// Monotonic row ID, assigned by the store.
    pub id: i64,
    /// Unique UUID for this batch.
    pub correlation_id: Uuid,
    /// When the batch started.
    pub started_at: DateTime<Utc>,
    /// When the batch finished; `None` means still in progress.
    pub finished_at: Option<DateTime<Utc>>,
    /// What triggered this batch.
    pub source: BatchSource,
    /// Total number of principals planned for this batch.
    pub items_total: i64,
    /// Number of principals that succeeded.
    pub items_success: i64,
    /// Number of principals that errored.
    pub items_error: i64,
    /// Wall-clock duration once finished.
    pub duration_ms: Option<i64>,
    /// Short human-readable summary when the batch ended with errors.
    pub error_summary: Option<String>,
}

/// Singleton retention configuration and bookkeeping row.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RetentionState {
    /// Maximum allowed database size in bytes, `None` = unlimited.
    pub max_bytes: Option<i64>,
    /// Maximum allowed row age in days, `None` = unlimited.
    pub max_age_days: Option<i64>,
    /// Last computed approximate database size in bytes.
    pub approx_db_bytes: i64,
    /// Timestamp of the last successful purge.
    pub last_purge_at: Option<DateTime<Utc>>,
    /// Cumulative count of rows purged over the store's lifetime.
    pub total_purged_records: i64,
    /// When this row was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Filters accepted by [`super::AuditStore::get_operations`].
#[derive(Clone, Debug, Default)]
pub struct OperationFilter {
    /// Restrict to operations at or after this instant.
    pub start_time: Option<DateTime<Utc>>,
    /// Restrict to operations at or before this instant.
    pub end_time: Option<DateTime<Utc>>,
    /// Restrict to a single principal.
    pub principal: Option<String>,
    /// Restrict to a single operation kind.
    pub op_type: Option<OpType>,
    /// Restrict to a single outcome.
    pub result: Option<OpResult>,
}

/// Filters accepted by [`super::AuditStore::get_batches`].
#[derive(Clone, Debug, Default)]
pub struct BatchFilter {
    /// Restrict to batches at or after this instant.
    pub start_time: Option<DateTime<Utc>>,
    /// Restrict to batches at or before this instant.
    pub end_time: Option<DateTime<Utc>>,
    /// Restrict to a single source.
    pub source: Option<BatchSource>,
}

/// KPI snapshot served by `GET /api/summary`.
#[derive(Clone, Debug, Serialize)]
pub struct SummaryStats {
    /// Operations recorded over the summary window.
    pub ops_total: i64,
    /// `ops_total` divided by the window length, in hours.
    pub ops_per_hour: f64,
    /// Fraction of operations in the window with `result = ERROR`.
    pub error_rate: f64,
    /// 95th percentile operation duration, in milliseconds.
    pub p95_duration_ms: i64,
    /// 99th percentile operation duration, in milliseconds.
    pub p99_duration_ms: i64,
    /// Approximate on-disk database size in bytes.
    pub approx_db_bytes: i64,
}

/// A page of results plus the total row count matching the filter.
#[derive(Clone, Debug, Serialize)]
pub struct Page<T> {
    /// Matching rows for this page.
    pub items: Vec<T>,
    /// Total rows matching the filter across all pages.
    pub total: i64,
    /// Page number (0-based) this response corresponds to.
    pub page: u32,
    /// Number of rows per page.
    pub size: u32,
}
