//! `GET /api/summary`, `GET /api/operations`, `GET /api/batches`.

use axum::{extract::{Query, State}, Json};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;

use crate::{
    audit::model::{BatchFilter, OperationFilter, Page, SummaryStats, SyncBatch, SyncOperation},
    errors::AppError,
    state::AppState,
};

fn default_page() -> u32 {
    0
}

fn default_size() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    /// Window length, in hours, to aggregate KPIs over. Defaults to 24.
    #[serde(default = "SummaryQuery::default_window_hours")]
    window_hours: i64,
}

impl SummaryQuery {
    fn default_window_hours() -> i64 {
        24
    }
}

pub async fn summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryStats>, AppError> {
    let window_hours = query.window_hours.clamp(1, 24 * 365);
    let since = Utc::now() - ChronoDuration::hours(window_hours);
    let stats = state.audit.summary_stats(since).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct OperationsQuery {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_size")]
    size: u32,
    #[serde(rename = "startTime")]
    start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime")]
    end_time: Option<DateTime<Utc>>,
    principal: Option<String>,
    #[serde(rename = "opType")]
    op_type: Option<String>,
    result: Option<String>,
}

pub async fn list_operations(
    State(state): State<AppState>,
    Query(query): Query<OperationsQuery>,
) -> Result<Json<Page<SyncOperation>>, AppError> {
    let filter = OperationFilter {
        start_time: query.start_time,
        end_time: query.end_time,
        principal: query.principal,
        op_type: query
            .op_type
            .as_deref()
            .map(|s| {
                crate::audit::model::OpType::from_str(s)
                    .ok_or_else(|| AppError::PayloadInvalid(format!("unknown opType {s}")))
            })
            .transpose()?,
        result: query
            .result
            .as_deref()
            .map(|s| {
                crate::audit::model::OpResult::from_str(s)
                    .ok_or_else(|| AppError::PayloadInvalid(format!("unknown result {s}")))
            })
            .transpose()?,
    };
    let page = state.audit.get_operations(&filter, query.page, query.size).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct BatchesQuery {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_size")]
    size: u32,
    #[serde(rename = "startTime")]
    start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime")]
    end_time: Option<DateTime<Utc>>,
    source: Option<String>,
}

pub async fn list_batches(
    State(state): State<AppState>,
    Query(query): Query<BatchesQuery>,
) -> Result<Json<Page<SyncBatch>>, AppError> {
    let filter = BatchFilter {
        start_time: query.start_time,
        end_time: query.end_time,
        source: query
            .source
            .as_deref()
            .map(|s| {
                crate::audit::model::BatchSource::from_str(s)
                    .ok_or_else(|| AppError::PayloadInvalid(format!("unknown source {s}")))
            })
            .transpose()?,
    };
    let page = state.audit.get_batches(&filter, query.page, query.size).await?;
    Ok(Json(page))
}
