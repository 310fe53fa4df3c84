//! `/health`, `/healthz`, `/readyz`: liveness and readiness probes.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::state::AppState;

/// Pure liveness: the runtime is scheduling tasks. Does not touch Kafka,
/// Keycloak, or the audit store — see [`ready`] for that.
pub async fn health(State(state): State<AppState>) -> StatusCode {
    if state.watchdog.is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Debug, Serialize)]
struct DependencyState {
    status: &'static str,
    error: Option<String>,
}

impl DependencyState {
    fn up() -> Self {
        Self { status: "UP", error: None }
    }

    fn down(error: impl ToString) -> Self {
        Self { status: "DOWN", error: Some(error.to_string()) }
    }

    fn circuit_open() -> Self {
        Self { status: "CIRCUIT_OPEN", error: None }
    }
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    audit_store: DependencyState,
    kafka: DependencyState,
    keycloak: DependencyState,
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let audit_store = if state.audit.is_healthy().await {
        DependencyState::up()
    } else {
        DependencyState::down("audit store query failed")
    };

    let kafka = match state.kafka.describe(&[]).await {
        Ok(_) => DependencyState::up(),
        Err(crate::kafka::admin::KafkaAdminError::CircuitOpen) => DependencyState::circuit_open(),
        Err(err) => DependencyState::down(err),
    };

    let keycloak = match state.keycloak.health_check().await {
        Ok(()) => DependencyState::up(),
        Err(crate::keycloak::KeycloakError::CircuitOpen) => DependencyState::circuit_open(),
        Err(err) => DependencyState::down(err),
    };

    let all_up = matches!(audit_store.status, "UP")
        && matches!(kafka.status, "UP")
        && matches!(keycloak.status, "UP");

    let status = if all_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse { audit_store, kafka, keycloak }),
    )
}
