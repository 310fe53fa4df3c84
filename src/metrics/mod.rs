//! Metrics exposition (part of the ambient stack): every counter/gauge/
//! histogram in this crate is recorded through the [`metrics`] facade
//! macros at the call site; this module only installs the global
//! recorder and serves its Prometheus text-format rendering.

use std::time::Duration;

use axum::{extract::State, http::header, response::IntoResponse, routing, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use tracing::debug_span;

/// Configuration for the metrics subsystem.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct MetricsConfig {
    /// URL path metrics are exposed on.
    #[serde(default = "MetricsConfig::default_path")]
    pub path: String,
    /// Interval between recordings of Tokio runtime gauges.
    #[serde(
        default = "MetricsConfig::default_runtime_metrics_interval",
        with = "humantime_serde"
    )]
    pub runtime_metrics_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            runtime_metrics_interval: Self::default_runtime_metrics_interval(),
        }
    }
}

impl MetricsConfig {
    #[must_use]
    #[inline]
    fn default_path() -> String {
        "/metrics".to_string()
    }

    #[must_use]
    #[inline]
    fn default_runtime_metrics_interval() -> Duration {
        Duration::from_secs(15)
    }

    /// Install the global Prometheus recorder and return the handle used to
    /// render the scrape response.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a recorder is already installed.
    pub fn install(&self) -> Result<MetricsState, BuildError> {
        let _span = debug_span!("install_metrics_recorder").entered();
        let handle = PrometheusBuilder::new().install_recorder()?;
        Ok(MetricsState { handle })
    }

    /// Build the Axum router serving the scrape endpoint.
    #[must_use]
    pub fn build_router(&self, state: &MetricsState) -> Router {
        Router::new()
            .route(&self.path, routing::get(get_metrics))
            .with_state(state.clone())
    }
}

/// Shared handle to the installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsState {
    handle: PrometheusHandle,
}

impl MetricsState {
    /// Render currently registered metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

async fn get_metrics(state: State<MetricsState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.render(),
    )
}

/// Periodically record Tokio runtime gauges until `shutdown` fires.
pub async fn gather_runtime_metrics(
    period: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let rt = tokio::runtime::Handle::current().metrics();
                metrics::gauge!("sync_runtime_workers").set(rt.num_workers() as f64);
                metrics::gauge!("sync_runtime_alive_tasks").set(rt.num_alive_tasks() as f64);
                metrics::gauge!("sync_runtime_global_queue_depth").set(rt.global_queue_depth() as f64);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
