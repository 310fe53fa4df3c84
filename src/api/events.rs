//! `POST /api/kc/events`: authenticated Keycloak webhook ingress.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::{errors::AppError, state::AppState};

const SIGNATURE_HEADER: &str = "X-Keycloak-Signature";

pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    state.webhook.ingest(&body, signature)?;
    Ok(StatusCode::OK)
}
