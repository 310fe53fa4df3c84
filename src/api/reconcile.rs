//! `POST /api/reconcile/trigger`, `GET /api/reconcile/status`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::{audit::model::BatchSource, errors::AppError, state::AppState};

#[derive(Debug, Serialize)]
struct TriggerResponse {
    correlation_id: Uuid,
    items_total: i64,
    items_success: i64,
    items_error: i64,
    duration_ms: i64,
}

pub async fn trigger(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let outcome = state.orchestrator.reconcile(BatchSource::Manual).await;
    if outcome.conflict {
        return Err(AppError::Conflict);
    }
    let Some(correlation_id) = outcome.correlation_id else {
        return Err(AppError::Terminal("reconcile cycle produced no batch".to_string()));
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            correlation_id,
            items_total: outcome.items_total,
            items_success: outcome.items_success,
            items_error: outcome.items_error,
            duration_ms: outcome.duration_ms,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    running: bool,
    current_correlation_id: Option<Uuid>,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.orchestrator.is_running(),
        // The orchestrator does not track the in-flight batch's
        // correlation_id separately from `is_running`; callers needing
        // the exact id of a running cycle should poll `/api/batches`.
        current_correlation_id: None,
    })
}
