//! Bounded queue and worker pool driving the event pipeline (C8):
//! validated ingress → bounded FIFO → worker-pool consumer with
//! exponential-backoff retry.

use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::AppError,
    keycloak::{KeycloakClient, KeycloakError},
    orchestrator::{Orchestrator, ParsedEvent},
    webhook::{
        model::{KeycloakEventPayload, ResourceType, WebhookEvent},
        parse::{self, Classification},
        signature,
    },
};

/// Configuration for the event pipeline.
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// Bounded queue capacity.
    pub queue_capacity: usize,
    /// Fixed worker-pool size. Keep at 1 to preserve per-principal
    /// ordering; values >1 trade ordering for throughput.
    pub workers: usize,
    /// Maximum delivery attempts before an event is logged as permanently failed.
    pub max_attempts: u32,
    /// Base retry delay.
    pub base_delay: Duration,
    /// Maximum retry delay.
    pub max_delay: Duration,
    /// Shared secret validating `X-Keycloak-Signature`.
    pub hmac_secret: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            workers: 1,
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            hmac_secret: String::new(),
        }
    }
}

/// Validated-ingress → bounded queue → worker-pool consumer.
pub struct EventPipeline {
    sender: mpsc::Sender<WebhookEvent>,
    receiver: Mutex<Option<mpsc::Receiver<WebhookEvent>>>,
    backlog: AtomicI64,
    config: WebhookConfig,
    orchestrator: Arc<Orchestrator>,
    keycloak: Arc<KeycloakClient>,
}

impl EventPipeline {
    /// Build a new pipeline. Call [`Self::spawn_workers`] once to start
    /// consuming.
    #[must_use]
    pub fn new(
        config: WebhookConfig,
        orchestrator: Arc<Orchestrator>,
        keycloak: Arc<KeycloakClient>,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        Arc::new(Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            backlog: AtomicI64::new(0),
            config,
            orchestrator,
            keycloak,
        })
    }

    /// Current queue depth, exposed as `sync_queue_backlog`.
    #[must_use]
    pub fn backlog(&self) -> i64 {
        self.backlog.load(Ordering::Acquire)
    }

    /// Validate the signature, parse and classify the body, and enqueue it.
    ///
    /// Only the HMAC compute and JSON parse happen on this call; Keycloak
    /// lookups and the Kafka mutation happen in a worker.
    #[instrument(skip(self, body, signature_header))]
    pub fn ingest(&self, body: &[u8], signature_header: Option<&str>) -> Result<(), AppError> {
        let Some(sig) = signature_header else {
            metrics::counter!("sync_webhook_signature_failures_total").increment(1);
            return Err(AppError::SignatureInvalid);
        };
        if !signature::verify(self.config.hmac_secret.as_bytes(), body, sig) {
            metrics::counter!("sync_webhook_signature_failures_total").increment(1);
            return Err(AppError::SignatureInvalid);
        }

        let payload: KeycloakEventPayload = serde_json::from_slice(body)
            .map_err(|err| AppError::PayloadInvalid(err.to_string()))?;

        let Some(classification) = parse::classify(&payload) else {
            info!(resource_path = %payload.resource_path, "webhook event dropped: unrecognised combination");
            metrics::counter!("sync_webhook_received_total", "result" => "dropped").increment(1);
            return Ok(());
        };

        let plaintext_password = classification
            .is_password_change
            .then(|| extract_plaintext_password(&payload))
            .flatten();

        let event = WebhookEvent {
            correlation_id: Uuid::new_v4(),
            received_at: Instant::now(),
            realm: payload.realm_id,
            principal: None,
            upsert: classification.upsert,
            is_password_change: classification.is_password_change,
            plaintext_password,
            subject_id: classification.subject_id,
            retry_count: 0,
            scheduled_not_before: Instant::now(),
        };
        self.enqueue(event, &classification)
    }

    fn enqueue(&self, event: WebhookEvent, classification: &Classification) -> Result<(), AppError> {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.backlog.fetch_add(1, Ordering::AcqRel);
                metrics::gauge!("sync_queue_backlog").set(self.backlog() as f64);
                let result = match classification.resource_type {
                    ResourceType::User => "accepted_user",
                    ResourceType::Client => "accepted_client",
                    ResourceType::Other => "accepted",
                };
                metrics::counter!("sync_webhook_received_total", "result" => result).increment(1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::counter!("sync_webhook_received_total", "result" => "queue_full").increment(1);
                Err(AppError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(AppError::Terminal(
                "event pipeline is shut down".to_string(),
            )),
        }
    }

    fn requeue(&self, event: WebhookEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.backlog.fetch_add(1, Ordering::AcqRel);
                metrics::gauge!("sync_queue_backlog").set(self.backlog() as f64);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(correlation_id = %event.correlation_id, "dropped retry: queue full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Take ownership of the receiving half and spawn `workers` consumer
    /// tasks. Must be called exactly once.
    pub fn spawn_workers(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let receiver = self
            .receiver
            .try_lock()
            .expect("spawn_workers called more than once")
            .take()
            .expect("spawn_workers called more than once");
        let receiver = Arc::new(Mutex::new(receiver));

        (0..self.config.workers.max(1))
            .map(|worker_id| {
                let pipeline = Arc::clone(self);
                let receiver = Arc::clone(&receiver);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        let next = {
                            let mut guard = receiver.lock().await;
                            tokio::select! {
                                item = guard.recv() => item,
                                _ = shutdown.changed() => None,
                            }
                        };
                        let Some(event) = next else {
                            if *shutdown.borrow() {
                                break;
                            }
                            continue;
                        };
                        pipeline.backlog.fetch_sub(1, Ordering::AcqRel);
                        metrics::gauge!("sync_queue_backlog").set(pipeline.backlog() as f64);

                        let now = Instant::now();
                        if event.scheduled_not_before > now {
                            tokio::time::sleep(event.scheduled_not_before - now).await;
                        }
                        pipeline.process(event, worker_id).await;
                    }
                })
            })
            .collect()
    }

    async fn process(self: &Arc<Self>, mut event: WebhookEvent, worker_id: usize) {
        match self.resolve_and_apply(&event).await {
            Ok(()) => {
                info!(
                    worker_id,
                    correlation_id = %event.correlation_id,
                    subject_id = %event.subject_id,
                    "webhook event applied"
                );
            }
            Err(reason) => {
                event.retry_count += 1;
                metrics::counter!(
                    "sync_retry_total",
                    "reason" => classify_reason(&reason),
                    "attempt" => event.retry_count.to_string(),
                )
                .increment(1);

                if event.retry_count >= self.config.max_attempts {
                    warn!(
                        correlation_id = %event.correlation_id,
                        subject_id = %event.subject_id,
                        error = %reason,
                        "webhook event permanently failed"
                    );
                    return;
                }

                let delay = backoff_delay(
                    self.config.base_delay,
                    self.config.max_delay,
                    event.retry_count,
                );
                event.scheduled_not_before = Instant::now() + delay;
                warn!(
                    correlation_id = %event.correlation_id,
                    attempt = event.retry_count,
                    delay = ?delay,
                    error = %reason,
                    "retrying webhook event"
                );
                self.requeue(event);
            }
        }
    }

    async fn resolve_and_apply(&self, event: &WebhookEvent) -> Result<(), String> {
        let principal = self.resolve_principal(event).await.map_err(|err| err.to_string())?;
        let parsed = ParsedEvent {
            realm: event.realm.clone(),
            principal,
            upsert: event.upsert,
            plaintext_password: event.plaintext_password.clone(),
        };
        self.orchestrator.apply_event(parsed).await
    }

    async fn resolve_principal(&self, event: &WebhookEvent) -> Result<String, KeycloakError> {
        if !event.upsert {
            // By the time a DELETE event is processed, Keycloak has nothing
            // left at this id to query — the directory fetch below exists
            // only for the rare case the delete is processed ahead of the
            // removal actually landing. The real source of truth is the
            // id→username mapping learned from a prior full reconcile or a
            // prior upsert for this same id; without it we cannot know which
            // Kafka principal to delete and must not guess by using the
            // opaque subject_id as a principal name.
            if let Ok(user) = self.keycloak.find_user_by_id(&event.subject_id).await {
                return Ok(user.username);
            }
            if let Some(username) = self.orchestrator.known_username(&event.subject_id) {
                return Ok(username);
            }
            return Err(KeycloakError::NotFound(event.subject_id.clone()));
        }
        match event.upsert_resource_type(&self.keycloak).await {
            Some(username) => {
                self.orchestrator
                    .remember_principal(event.subject_id.clone(), username.clone());
                Ok(username)
            }
            None => Err(KeycloakError::NotFound(event.subject_id.clone())),
        }
    }
}

impl WebhookEvent {
    async fn upsert_resource_type(&self, keycloak: &KeycloakClient) -> Option<String> {
        if let Ok(user) = keycloak.find_user_by_id(&self.subject_id).await {
            return Some(user.username);
        }
        if let Ok(service_account) = keycloak.find_service_account_user(&self.subject_id).await {
            return Some(service_account.username);
        }
        None
    }
}

fn extract_plaintext_password(payload: &KeycloakEventPayload) -> Option<String> {
    payload
        .representation
        .as_ref()
        .and_then(|repr| repr.get("credentials"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}

fn classify_reason(reason: &str) -> &'static str {
    if reason.contains("circuit") {
        "circuit_open"
    } else if reason.contains("not found") || reason.contains("NotFound") {
        "not_found"
    } else {
        "transient"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_doubles_per_attempt_and_caps_at_max() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, max, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, max, 10), max);
    }

    #[test]
    fn classify_reason_matches_known_patterns() {
        assert_eq!(classify_reason("circuit open for keycloak"), "circuit_open");
        assert_eq!(classify_reason("user NotFound"), "not_found");
        assert_eq!(classify_reason("user not found"), "not_found");
        assert_eq!(classify_reason("connection reset"), "transient");
    }

    #[test]
    fn default_config_preserves_principal_ordering_with_one_worker() {
        let config = WebhookConfig::default();
        assert_eq!(config.workers, 1);
        assert!(config.max_attempts >= 1);
    }
}
