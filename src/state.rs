//! Shared application state handed to every Axum handler via `State<AppState>`.

use std::sync::Arc;

use crate::{
    audit::AuditStore,
    kafka::admin::ScramAdminClient,
    keycloak::KeycloakClient,
    orchestrator::Orchestrator,
    retention::RetentionManager,
    watchdog::WatchdogHandle,
    webhook::EventPipeline,
};

/// Handles to every long-lived component, built once in the composition
/// root ([`crate::handle`]) and cheaply cloned into each request.
#[derive(Clone)]
pub struct AppState {
    /// Durable record of every batch and operation (C2).
    pub audit: AuditStore,
    /// Kafka SCRAM admin client (C4).
    pub kafka: Arc<ScramAdminClient>,
    /// Keycloak directory client (C5).
    pub keycloak: Arc<KeycloakClient>,
    /// Reconciliation orchestrator (C7).
    pub orchestrator: Arc<Orchestrator>,
    /// Event pipeline (C8).
    pub webhook: Arc<EventPipeline>,
    /// Retention manager (C3).
    pub retention: Arc<RetentionManager>,
    /// Tokio runtime responsiveness probe, surfaced on `/health`.
    pub watchdog: WatchdogHandle,
}
