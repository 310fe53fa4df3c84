//! HTTP surface (§6): webhook ingress, manual-reconcile control, read
//! endpoints over the audit store, retention configuration, and the
//! standard liveness/readiness/metrics triad.

mod events;
mod health;
mod operations;
mod reconcile;
mod retention;

use std::any::Any;

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};

use crate::{logging::span::CustomMakeSpan, state::AppState};

/// Assemble the full application router. The metrics scrape route is
/// mounted separately by the caller, since it is served from
/// [`crate::metrics::MetricsState`] rather than [`AppState`].
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let global_layers = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(CustomMakeSpan::new())
                .on_request(DefaultOnRequest::new().level(tracing::Level::DEBUG))
                .on_response(
                    DefaultOnResponse::new()
                        .level(tracing::Level::INFO)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        .layer(CatchPanicLayer::custom(panic_handler));

    Router::new()
        .route("/api/kc/events", routing::post(events::ingest))
        .route(
            "/api/reconcile/trigger",
            routing::post(reconcile::trigger),
        )
        .route("/api/reconcile/status", routing::get(reconcile::status))
        .route("/api/summary", routing::get(operations::summary))
        .route("/api/operations", routing::get(operations::list_operations))
        .route("/api/batches", routing::get(operations::list_batches))
        .route(
            "/api/config/retention",
            routing::get(retention::get_retention).put(retention::put_retention),
        )
        .route("/health", routing::get(health::health))
        .route("/healthz", routing::get(health::health))
        .route("/readyz", routing::get(health::ready))
        .with_state(state)
        .layer(global_layers)
}

fn panic_handler(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };
    problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
        .with_type("tag:kckc-sync,2026:panic")
        .with_title("panic in request handler")
        .with_detail(detail)
        .into_response()
}
