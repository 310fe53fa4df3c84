//! Composition root: wires the audit store, Kafka admin client, Keycloak
//! directory client, retention manager, orchestrator, event pipeline,
//! metrics, and HTTP surface together, then runs until a termination
//! signal arrives.

use std::process::ExitCode;
use std::sync::Arc;

use kckc_sync::{
    api,
    audit::AuditStore,
    config::AppConfig,
    http_client::HttpClientCircuitBreakerConfig,
    kafka::admin::ScramAdminClient,
    keycloak::KeycloakClient,
    metrics as metrics_mod,
    orchestrator::{Orchestrator, ReconcileConfig},
    retention::RetentionManager,
    state::AppState,
    webhook::EventPipeline,
};
use tracing::error;

const SQLITE_MAX_CONNECTIONS: u32 = 8;

fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "fatal startup or runtime error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let mut handle = config.handle()?;

    let audit = AuditStore::open(&config.sqlite_db_path, SQLITE_MAX_CONNECTIONS).await?;
    if config.retention.max_bytes.is_some() || config.retention.max_age_days.is_some() {
        audit
            .set_retention_policy(config.retention.max_bytes, config.retention.max_age_days)
            .await?;
    }

    let kafka_breaker = HttpClientCircuitBreakerConfig::default().make_circuit_breaker();
    let kafka = Arc::new(ScramAdminClient::new(
        &config.kafka,
        kafka_breaker,
        config.reconcile.fetch_timeout,
    )?);

    let keycloak_http = config.http_client.to_client("keycloak").await?;
    let keycloak_breaker = HttpClientCircuitBreakerConfig::default().make_circuit_breaker();
    let keycloak = Arc::new(KeycloakClient::new(
        config.keycloak.clone(),
        keycloak_http,
        keycloak_breaker,
        config.reconcile.fetch_timeout,
    )?);

    let retention = RetentionManager::new(audit.clone());

    let reconcile_config = ReconcileConfig {
        cluster_id: config.reconcile.cluster_id.clone(),
        mechanism: config.reconcile.mechanism,
        iterations: config.reconcile.iterations,
        always_upsert: config.reconcile.always_upsert,
        exclusion: config.reconcile.exclusion_policy(),
        fetch_timeout: config.reconcile.fetch_timeout,
    };
    let orchestrator = Orchestrator::new(
        audit.clone(),
        Arc::clone(&kafka),
        Arc::clone(&keycloak),
        Arc::clone(&retention),
        reconcile_config,
    );

    let webhook_config = config.webhook.pipeline_config(config.keycloak.webhook_hmac_secret.clone());
    let webhook = EventPipeline::new(webhook_config, Arc::clone(&orchestrator), Arc::clone(&keycloak));

    let metrics_state = config.metrics.install()?;

    let shutdown_rx = handle.shutdown_signal();
    handle.track_background(tokio::spawn(Arc::clone(&retention).run(
        config.retention.purge_interval,
        shutdown_rx.clone(),
    )));
    handle.track_background(tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        let interval = config.reconcile.interval;
        let mut shutdown = shutdown_rx.clone();
        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        orchestrator.reconcile(kckc_sync::audit::model::BatchSource::Periodic).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    }));
    handle.track_background(tokio::spawn(metrics_mod::gather_runtime_metrics(
        config.metrics.runtime_metrics_interval,
        shutdown_rx.clone(),
    )));
    handle.track_workers(webhook.spawn_workers(shutdown_rx));

    let state = AppState {
        audit,
        kafka,
        keycloak,
        orchestrator,
        webhook: Arc::clone(&webhook),
        retention,
        watchdog: handle.watchdog_handle(),
    };

    let app = api::build_router(state).merge(config.metrics.build_router(&metrics_state));

    handle.run(&config.listen, app, webhook).await?;
    Ok(())
}
