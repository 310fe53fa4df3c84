//! `GET`/`PUT /api/config/retention`.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{errors::AppError, state::AppState};

const MAX_BYTES_CEILING: i64 = 10 * 1024 * 1024 * 1024;
const MAX_AGE_DAYS_CEILING: i64 = 3650;

#[derive(Debug, Serialize)]
pub struct RetentionResponse {
    max_bytes: Option<i64>,
    max_age_days: Option<i64>,
    approx_db_bytes: i64,
    updated_at: chrono::DateTime<chrono::Utc>,
}

pub async fn get_retention(State(state): State<AppState>) -> Result<Json<RetentionResponse>, AppError> {
    let row = state.audit.get_retention_state().await?;
    Ok(Json(RetentionResponse {
        max_bytes: row.max_bytes,
        max_age_days: row.max_age_days,
        approx_db_bytes: row.approx_db_bytes,
        updated_at: row.updated_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RetentionUpdate {
    max_bytes: Option<i64>,
    max_age_days: Option<i64>,
}

pub async fn put_retention(
    State(state): State<AppState>,
    Json(update): Json<RetentionUpdate>,
) -> Result<Json<RetentionResponse>, AppError> {
    if let Some(max_bytes) = update.max_bytes {
        if !(0..=MAX_BYTES_CEILING).contains(&max_bytes) {
            return Err(AppError::PayloadInvalid(format!(
                "max_bytes must be within [0, {MAX_BYTES_CEILING}]"
            )));
        }
    }
    if let Some(max_age_days) = update.max_age_days {
        if !(0..=MAX_AGE_DAYS_CEILING).contains(&max_age_days) {
            return Err(AppError::PayloadInvalid(format!(
                "max_age_days must be within [0, {MAX_AGE_DAYS_CEILING}]"
            )));
        }
    }
    state
        .audit
        .set_retention_policy(update.max_bytes, update.max_age_days)
        .await?;
    state.retention.nudge().await;
    let row = state.audit.get_retention_state().await?;
    Ok(Json(RetentionResponse {
        max_bytes: row.max_bytes,
        max_age_days: row.max_age_days,
        approx_db_bytes: row.approx_db_bytes,
        updated_at: row.updated_at,
    }))
}
