//! Reconciliation Orchestrator (C7): drives full-sync cycles and
//! targeted per-event syncs, writing through the audit store and
//! emitting metrics at every stage.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    audit::{
        model::{BatchSource, OpResult, OpType, SyncOperation},
        AuditStore,
    },
    diff::{self, ExclusionPolicy},
    kafka::admin::{Alteration, KafkaAdminError, ScramAdminClient},
    keycloak::{KeycloakClient, KeycloakError, KeycloakUser},
    retention::RetentionManager,
    scram::{ScramMechanism, MIN_ITERATIONS},
};

/// Length of a generated transient password for principals with no
/// plaintext supplied by the event path.
const GENERATED_PASSWORD_LEN: usize = 32;

/// Outcome of a `reconcile` call.
#[derive(Clone, Debug)]
pub struct ReconcileOutcome {
    /// Correlation ID of the batch, or `None` if the cycle was skipped.
    pub correlation_id: Option<Uuid>,
    /// Total principals planned.
    pub items_total: i64,
    /// Principals that succeeded.
    pub items_success: i64,
    /// Principals that errored.
    pub items_error: i64,
    /// Wall-clock duration of the cycle, in milliseconds.
    pub duration_ms: i64,
    /// Set when a `MANUAL` reconcile was requested while one was running.
    pub conflict: bool,
}

/// A single parsed Keycloak webhook event, already classified by
/// [`crate::webhook::parse`].
#[derive(Clone, Debug)]
pub struct ParsedEvent {
    /// Realm the event originated from.
    pub realm: String,
    /// Kafka principal (Keycloak user name) this event applies to.
    pub principal: String,
    /// Whether the principal's credential should be created/refreshed
    /// (`true`) or removed (`false`).
    pub upsert: bool,
    /// Plaintext password supplied out-of-band by the identity-provider
    /// plugin, if this event is a password change with a known value.
    pub plaintext_password: Option<String>,
}

/// Reconciliation configuration relevant to plan construction.
#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    /// Kafka cluster identifier recorded on every operation row.
    pub cluster_id: String,
    /// SCRAM mechanism newly generated credentials use.
    pub mechanism: ScramMechanism,
    /// PBKDF2 iteration count for newly generated credentials.
    pub iterations: u32,
    /// Whether every Keycloak user is re-upserted every cycle.
    pub always_upsert: bool,
    /// Exclusion policy applied to the Kafka principal set.
    pub exclusion: ExclusionPolicy,
    /// Per-call timeout applied to the Kafka/Keycloak fetch step.
    pub fetch_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            cluster_id: "default".to_string(),
            mechanism: ScramMechanism::Sha512,
            iterations: MIN_ITERATIONS,
            always_upsert: true,
            exclusion: ExclusionPolicy::default(),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Drives reconciliation cycles against C4/C5, writing through C2.
pub struct Orchestrator {
    audit: AuditStore,
    kafka: Arc<ScramAdminClient>,
    keycloak: Arc<KeycloakClient>,
    retention: Arc<RetentionManager>,
    config: ReconcileConfig,
    running: AtomicBool,
    last_success_epoch: std::sync::atomic::AtomicI64,
    /// Opaque Keycloak ID → username, refreshed on every reconcile cycle.
    /// A `USER DELETE` webhook event only carries the id, and by the time
    /// it's processed the user is already gone from Keycloak, so this is
    /// the only remaining source for the Kafka principal to delete.
    known_principals: Mutex<std::collections::HashMap<String, String>>,
}

impl Orchestrator {
    /// Wire up a new orchestrator.
    #[must_use]
    pub fn new(
        audit: AuditStore,
        kafka: Arc<ScramAdminClient>,
        keycloak: Arc<KeycloakClient>,
        retention: Arc<RetentionManager>,
        config: ReconcileConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            audit,
            kafka,
            keycloak,
            retention,
            config,
            running: AtomicBool::new(false),
            last_success_epoch: std::sync::atomic::AtomicI64::new(0),
            known_principals: Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// Last-known username for a Keycloak id, as of the most recent
    /// reconcile cycle that successfully fetched the directory, or the most
    /// recent successful webhook upsert resolution for that id.
    #[must_use]
    pub fn known_username(&self, id: &str) -> Option<String> {
        self.known_principals.lock().get(id).cloned()
    }

    /// Record an id→username resolution learned outside a full reconcile
    /// cycle (a webhook upsert), so a later `DELETE` for the same id — by
    /// which point Keycloak itself has nothing left to look up — can still
    /// be mapped to the right Kafka principal.
    pub fn remember_principal(&self, id: String, username: String) {
        self.known_principals.lock().insert(id, username);
    }

    /// Whether a reconcile cycle is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Epoch seconds of the last error-free completion, 0 if none yet.
    #[must_use]
    pub fn last_success_epoch(&self) -> i64 {
        self.last_success_epoch.load(Ordering::Acquire)
    }

    /// Run one full reconciliation cycle.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, source: BatchSource) -> ReconcileOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if source == BatchSource::Periodic {
                metrics::counter!("sync_reconcile_skipped_total", "source" => "periodic").increment(1);
                return ReconcileOutcome {
                    correlation_id: None,
                    items_total: 0,
                    items_success: 0,
                    items_error: 0,
                    duration_ms: 0,
                    conflict: false,
                };
            }
            return ReconcileOutcome {
                correlation_id: None,
                items_total: 0,
                items_success: 0,
                items_error: 0,
                duration_ms: 0,
                conflict: true,
            };
        }

        let outcome = self.reconcile_inner(source).await;
        self.running.store(false, Ordering::Release);
        self.retention.nudge().await;
        outcome
    }

    async fn reconcile_inner(&self, source: BatchSource) -> ReconcileOutcome {
        let start = Instant::now();

        let fetch = tokio::time::timeout(self.config.fetch_timeout, async {
            tokio::try_join!(self.fetch_keycloak_users(), self.fetch_kafka_principals())
        })
        .await;

        let (users, kafka_principals) = match fetch {
            Ok(Ok(pair)) => pair,
            Ok(Err(summary)) => return self.abort_cycle(source, start, summary).await,
            Err(_) => return self.abort_cycle(source, start, "fetch timed out".to_string()).await,
        };

        metrics::counter!("sync_kc_fetch_total").increment(1);

        {
            let mut known = self.known_principals.lock();
            known.clear();
            known.extend(users.iter().map(|u| (u.id.clone(), u.username.clone())));
        }

        let correlation_id = match self.audit.create_batch(source, users.len() as i64).await {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "failed to create batch row");
                return ReconcileOutcome {
                    correlation_id: None,
                    items_total: users.len() as i64,
                    items_success: 0,
                    items_error: 0,
                    duration_ms: start.elapsed().as_millis() as i64,
                    conflict: false,
                };
            }
        };

        let kafka_principal_set: HashSet<String> = kafka_principals.keys().cloned().collect();
        let plan = diff::compute(
            &users,
            &kafka_principal_set,
            &self.config.exclusion,
            self.config.always_upsert,
        );

        let outcome = self
            .execute_plan(
                correlation_id,
                plan.upserts,
                plan.deletes,
                &kafka_principals,
            )
            .await;

        let duration_ms = start.elapsed().as_millis() as i64;
        let error_summary = (outcome.1 > 0).then(|| format!("{} principal(s) failed", outcome.1));
        if let Err(err) = self
            .audit
            .complete_batch(correlation_id, outcome.0, outcome.1, error_summary.as_deref())
            .await
        {
            warn!(error = %err, "failed to complete batch row");
        }

        metrics::histogram!("sync_reconcile_duration_seconds").record(duration_ms as f64 / 1000.0);
        if outcome.1 == 0 {
            self.last_success_epoch
                .store(Utc::now().timestamp(), Ordering::Release);
            metrics::gauge!("sync_last_success_epoch_seconds").set(Utc::now().timestamp() as f64);
        }

        ReconcileOutcome {
            correlation_id: Some(correlation_id),
            items_total: users.len() as i64,
            items_success: outcome.0,
            items_error: outcome.1,
            duration_ms,
            conflict: false,
        }
    }

    /// Apply a single webhook-derived event as a one-principal batch.
    ///
    /// Returns `Err` with a human-readable reason when the Kafka-side
    /// mutation failed, so the webhook worker's retry handler can decide
    /// whether to re-enqueue the event; the outcome is durably recorded
    /// either way.
    #[instrument(skip(self, event))]
    pub async fn apply_event(&self, event: ParsedEvent) -> Result<(), String> {
        let correlation_id = match self.audit.create_batch(BatchSource::Webhook, 1).await {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "failed to create batch row for event");
                Uuid::new_v4()
            }
        };

        let alteration = if event.upsert {
            let password = event
                .plaintext_password
                .unwrap_or_else(|| generate_transient_password());
            Alteration::Upsertion {
                principal: event.principal.clone(),
                mechanism: self.config.mechanism,
                iterations: self.config.iterations,
                password,
            }
        } else {
            Alteration::Deletion {
                principal: event.principal.clone(),
                mechanism: self.config.mechanism,
            }
        };

        let start = Instant::now();
        let results = self
            .kafka
            .alter(vec![alteration])
            .await
            .map_err(|err| err.to_string())?;
        let result = results.get(&event.principal);

        let (op_result, error_code, error_message) = match result {
            Some(Ok(())) => (OpResult::Success, None, None),
            Some(Err(err)) => (OpResult::Error, Some("KAFKA_ADMIN".to_string()), Some(err.to_string())),
            None => (OpResult::Skipped, None, None),
        };

        let op = SyncOperation {
            id: None,
            correlation_id,
            occurred_at: Utc::now(),
            realm: event.realm,
            cluster_id: self.config.cluster_id.clone(),
            principal: event.principal,
            op_type: if event.upsert {
                OpType::ScramUpsert
            } else {
                OpType::ScramDelete
            },
            mechanism: Some(self.config.mechanism.as_str().to_string()),
            result: op_result,
            error_code,
            error_message,
            duration_ms: start.elapsed().as_millis() as i64,
            retry_count: 0,
            acl_resource: None,
            acl_operation: None,
            acl_role: None,
        };

        let success = matches!(op.result, OpResult::Success | OpResult::Skipped);
        if let Err(err) = self.audit.record_operation(&op).await {
            warn!(error = %err, "failed to record event operation");
        }
        let _ = self
            .audit
            .complete_batch(correlation_id, i64::from(success), i64::from(!success), None)
            .await;
        self.retention.nudge().await;

        // The per-principal outcome has already been durably recorded above;
        // a single event's Kafka-side failure is surfaced to the caller only
        // so the retry handler can schedule another attempt, never to abort
        // the broader pipeline.
        match result {
            Some(Err(err)) => Err(err.to_string()),
            _ => Ok(()),
        }
    }

    /// Record a zero-item batch with an error summary and return the
    /// corresponding outcome, used when the parallel fetch step fails.
    async fn abort_cycle(
        &self,
        source: BatchSource,
        start: Instant,
        summary: String,
    ) -> ReconcileOutcome {
        warn!(error = %summary, "reconcile fetch failed, aborting cycle");
        let correlation_id = match self.audit.create_batch(source, 0).await {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "failed to record aborted batch");
                return ReconcileOutcome {
                    correlation_id: None,
                    items_total: 0,
                    items_success: 0,
                    items_error: 0,
                    duration_ms: 0,
                    conflict: false,
                };
            }
        };
        let _ = self
            .audit
            .complete_batch(correlation_id, 0, 0, Some(&summary))
            .await;
        ReconcileOutcome {
            correlation_id: Some(correlation_id),
            items_total: 0,
            items_success: 0,
            items_error: 0,
            duration_ms: start.elapsed().as_millis() as i64,
            conflict: false,
        }
    }

    async fn fetch_keycloak_users(&self) -> Result<Vec<KeycloakUser>, String> {
        self.keycloak
            .fetch_all_users()
            .await
            .map_err(|err: KeycloakError| format!("keycloak fetch failed: {err}"))
    }

    async fn fetch_kafka_principals(
        &self,
    ) -> Result<std::collections::HashMap<String, Vec<ScramMechanism>>, String> {
        // Describing an empty principal list asks the broker to enumerate
        // everything it knows about.
        self.kafka
            .describe(&[])
            .await
            .map_err(|err| format!("kafka describe failed: {err}"))
    }

    async fn execute_plan(
        &self,
        correlation_id: Uuid,
        upserts: Vec<KeycloakUser>,
        deletes: Vec<String>,
        existing_mechanisms: &std::collections::HashMap<String, Vec<ScramMechanism>>,
    ) -> (i64, i64) {
        let mut alterations = Vec::with_capacity(upserts.len() + deletes.len());
        for user in &upserts {
            alterations.push(Alteration::Upsertion {
                principal: user.username.clone(),
                mechanism: self.config.mechanism,
                iterations: self.config.iterations,
                password: generate_transient_password(),
            });
        }
        for principal in &deletes {
            let mechanisms = existing_mechanisms
                .get(principal)
                .filter(|m| !m.is_empty())
                .cloned()
                .unwrap_or_else(|| vec![self.config.mechanism]);
            for mechanism in mechanisms {
                alterations.push(Alteration::Deletion {
                    principal: principal.clone(),
                    mechanism,
                });
            }
        }

        if alterations.is_empty() {
            return (0, 0);
        }

        let results = match self.kafka.alter(alterations).await {
            Ok(results) => results,
            Err(err) => {
                warn!(error = %err, "batch alter call failed outright");
                let ops: Vec<SyncOperation> = upserts
                    .iter()
                    .map(|u| &u.username)
                    .chain(deletes.iter())
                    .map(|principal| failed_op(correlation_id, &self.config.cluster_id, principal, err.to_string()))
                    .collect();
                let error_count = ops.len() as i64;
                if let Err(err) = self.audit.record_operations(&ops).await {
                    warn!(error = %err, "failed to record batch operations");
                }
                return (0, error_count);
            }
        };

        let mut success = 0i64;
        let mut error = 0i64;
        let mut ops = Vec::with_capacity(upserts.len() + deletes.len());

        for user in &upserts {
            push_op_result(
                &mut ops,
                &results,
                correlation_id,
                &self.config.cluster_id,
                &user.username,
                OpType::ScramUpsert,
                Some(self.config.mechanism.as_str()),
                &mut success,
                &mut error,
            );
        }
        for principal in &deletes {
            push_op_result(
                &mut ops,
                &results,
                correlation_id,
                &self.config.cluster_id,
                principal,
                OpType::ScramDelete,
                Some(self.config.mechanism.as_str()),
                &mut success,
                &mut error,
            );
        }

        metrics::counter!("sync_kafka_scram_upserts_total").increment(upserts.len() as u64);
        metrics::counter!("sync_kafka_scram_deletes_total").increment(deletes.len() as u64);

        if let Err(err) = self.audit.record_operations(&ops).await {
            warn!(error = %err, "failed to record batch operations");
        }

        info!(success, error, "reconcile batch executed");
        (success, error)
    }
}

#[allow(clippy::too_many_arguments)]
fn push_op_result(
    ops: &mut Vec<SyncOperation>,
    results: &std::collections::HashMap<String, Result<(), KafkaAdminError>>,
    correlation_id: Uuid,
    cluster_id: &str,
    principal: &str,
    op_type: OpType,
    mechanism: Option<&str>,
    success: &mut i64,
    error: &mut i64,
) {
    let start = Instant::now();
    let (result, error_code, error_message) = match results.get(principal) {
        Some(Ok(())) => {
            *success += 1;
            (OpResult::Success, None, None)
        }
        Some(Err(err)) => {
            *error += 1;
            (OpResult::Error, Some("KAFKA_ADMIN".to_string()), Some(err.to_string()))
        }
        None => {
            *success += 1;
            (OpResult::Skipped, None, None)
        }
    };
    ops.push(SyncOperation {
        id: None,
        correlation_id,
        occurred_at: Utc::now(),
        realm: String::new(),
        cluster_id: cluster_id.to_string(),
        principal: principal.to_string(),
        op_type,
        mechanism: mechanism.map(str::to_string),
        result,
        error_code,
        error_message,
        duration_ms: start.elapsed().as_millis() as i64,
        retry_count: 0,
        acl_resource: None,
        acl_operation: None,
        acl_role: None,
    });
}

fn failed_op(correlation_id: Uuid, cluster_id: &str, principal: &str, message: String) -> SyncOperation {
    SyncOperation {
        id: None,
        correlation_id,
        occurred_at: Utc::now(),
        realm: String::new(),
        cluster_id: cluster_id.to_string(),
        principal: principal.to_string(),
        op_type: OpType::ScramUpsert,
        mechanism: None,
        result: OpResult::Error,
        error_code: Some("KAFKA_ADMIN".to_string()),
        error_message: Some(message),
        duration_ms: 0,
        retry_count: 0,
        acl_resource: None,
        acl_operation: None,
        acl_role: None,
    }
}

/// Charset for transient passwords: alphanumeric plus a handful of symbols
/// that don't need escaping in a SCRAM SASL exchange.
const TRANSIENT_PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*-_=+";

fn generate_transient_password() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_PASSWORD_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..TRANSIENT_PASSWORD_CHARSET.len());
            TRANSIENT_PASSWORD_CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn generated_passwords_have_expected_length_and_charset() {
        let a = generate_transient_password();
        let b = generate_transient_password();
        assert_eq!(a.len(), GENERATED_PASSWORD_LEN);
        assert!(a
            .bytes()
            .all(|c| TRANSIENT_PASSWORD_CHARSET.contains(&c)));
        assert_ne!(a, b, "two draws should not collide");
    }

    #[test]
    fn push_op_result_counts_success_error_and_skip() {
        let correlation_id = Uuid::new_v4();
        let mut results: HashMap<String, Result<(), KafkaAdminError>> = HashMap::new();
        results.insert("alice".to_string(), Ok(()));
        results.insert("bob".to_string(), Err(KafkaAdminError::CircuitOpen));
        // "carol" deliberately absent from `results` to exercise the Skipped path.

        let mut ops = Vec::new();
        let mut success = 0i64;
        let mut error = 0i64;
        for principal in ["alice", "bob", "carol"] {
            push_op_result(
                &mut ops,
                &results,
                correlation_id,
                "cluster-a",
                principal,
                OpType::ScramUpsert,
                Some("SCRAM-SHA-512"),
                &mut success,
                &mut error,
            );
        }

        assert_eq!(success, 2, "alice (success) and carol (skipped) both count as success");
        assert_eq!(error, 1);

        let alice = ops.iter().find(|op| op.principal == "alice").unwrap();
        assert_eq!(alice.result, OpResult::Success);
        let bob = ops.iter().find(|op| op.principal == "bob").unwrap();
        assert_eq!(bob.result, OpResult::Error);
        assert_eq!(bob.error_code.as_deref(), Some("KAFKA_ADMIN"));
        let carol = ops.iter().find(|op| op.principal == "carol").unwrap();
        assert_eq!(carol.result, OpResult::Skipped);
    }

    #[test]
    fn failed_op_is_always_an_error_upsert() {
        let correlation_id = Uuid::new_v4();
        let op = failed_op(correlation_id, "cluster-a", "alice", "boom".to_string());
        assert_eq!(op.result, OpResult::Error);
        assert_eq!(op.op_type, OpType::ScramUpsert);
        assert_eq!(op.error_message.as_deref(), Some("boom"));
    }
}
