//! Application configuration structures.
//!
//! Values are loaded directly from environment variables by
//! [`AppConfig::from_env`]; see the field docs for the corresponding
//! `KAFKA_*` / `KEYCLOAK_*` / `RECONCILE_*` / `RETENTION_*` / `WEBHOOK_*` /
//! `SQLITE_DB_PATH` variables.

use std::{env, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    diff::ExclusionPolicy,
    http_client::HttpClientConfig,
    kafka::{KafkaAuthConfig, KafkaBackoffConfig, KafkaCommonConfig, KafkaProtocol},
    keycloak::KeycloakConfig,
    logging::LoggingConfig,
    metrics::MetricsConfig,
    scram::{ScramMechanism, MIN_ITERATIONS},
    watchdog::WatchdogConfig,
    webhook::WebhookConfig,
};

/// Error loading configuration from the environment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// An environment variable was set but could not be parsed.
    #[error("environment variable {0} has an invalid value: {1}")]
    Invalid(&'static str, String),
}

fn env_var(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw)),
    }
}

fn env_opt_parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key, raw)),
    }
}

fn env_csv(key: &'static str) -> Vec<String> {
    env_var(key)
        .map(|raw| raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

fn env_duration_secs(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(key, default.as_secs())?))
}

fn env_duration_millis(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(env_parse(key, default.as_millis() as u64)?))
}

/// Top-level application configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct AppConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Tokio runtime responsiveness watchdog configuration.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// HTTP server bind address, e.g. `0.0.0.0:8080`.
    #[serde(default = "AppConfig::default_listen")]
    pub listen: String,
    /// Path to the embedded SQLite audit store file. `SQLITE_DB_PATH`.
    #[serde(default = "AppConfig::default_db_path")]
    pub sqlite_db_path: String,
    /// Common Kafka client settings (`KAFKA_BOOTSTRAP_SERVERS`,
    /// `KAFKA_SECURITY_PROTOCOL`, `KAFKA_SASL_MECHANISM`, SASL/SSL material).
    #[serde(default)]
    pub kafka: KafkaCommonConfig,
    /// Keycloak directory client settings (`KEYCLOAK_URL`, `KEYCLOAK_REALM`,
    /// `KEYCLOAK_CLIENT_ID`/`KEYCLOAK_CLIENT_SECRET` or admin
    /// username/password, `KEYCLOAK_WEBHOOK_HMAC_SECRET`).
    pub keycloak: KeycloakConfig,
    /// Outbound HTTP client settings shared by the Keycloak client.
    #[serde(default)]
    pub http_client: HttpClientConfig,
    /// Reconciliation engine settings.
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    /// Retention manager settings.
    #[serde(default)]
    pub retention: RetentionSettings,
    /// Event pipeline settings.
    #[serde(default)]
    pub webhook: WebhookSettings,
    /// Short application name.
    #[serde(skip)]
    pub app_name: Option<String>,
    /// Application version.
    #[serde(skip)]
    pub app_version: Option<String>,
}

impl AppConfig {
    #[must_use]
    #[inline]
    fn default_listen() -> String {
        "0.0.0.0:8080".to_string()
    }

    #[must_use]
    #[inline]
    fn default_db_path() -> String {
        "kckc-sync.db".to_string()
    }

    /// Set short name of an application.
    #[must_use]
    pub fn with_app_name(&mut self, app_name: impl ToString) -> &mut Self {
        self.app_name = Some(app_name.to_string());
        self
    }

    /// Set application version.
    #[must_use]
    pub fn with_app_version(&mut self, app_version: impl ToString) -> &mut Self {
        self.app_version = Some(app_version.to_string());
        self
    }

    /// Load configuration from the process environment (§6's `KAFKA_*`,
    /// `KEYCLOAK_*`, `RECONCILE_*`, `RETENTION_*`, `WEBHOOK_*`,
    /// `SQLITE_DB_PATH` variables), falling back to each field's default
    /// where a variable is unset.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a required variable is missing or a set variable
    /// fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let kafka_auth = match (env_var("KAFKA_SASL_USERNAME"), env_var("KAFKA_SASL_PASSWORD")) {
            (None, None) => None,
            (username, password) => Some(KafkaAuthConfig {
                username,
                password,
                protocol: env_parse("KAFKA_SECURITY_PROTOCOL", KafkaProtocol::default())?,
                mechanism: env_parse("KAFKA_SASL_MECHANISM", crate::kafka::KafkaAuthMechanism::default())?,
            }),
        };
        let kafka_backoff = KafkaBackoffConfig::default();
        let kafka = KafkaCommonConfig {
            brokers: env_csv("KAFKA_BOOTSTRAP_SERVERS"),
            auth: kafka_auth,
            backoff: Some(kafka_backoff),
            extra_params: std::collections::HashMap::new(),
        };

        let keycloak = KeycloakConfig {
            url: env_var("KEYCLOAK_URL").ok_or(ConfigError::Missing("KEYCLOAK_URL"))?,
            realm: env_var("KEYCLOAK_REALM").ok_or(ConfigError::Missing("KEYCLOAK_REALM"))?,
            client_id: env_var("KEYCLOAK_CLIENT_ID"),
            client_secret: env_var("KEYCLOAK_CLIENT_SECRET"),
            admin_username: env_var("KEYCLOAK_ADMIN_USERNAME"),
            admin_password: env_var("KEYCLOAK_ADMIN_PASSWORD"),
            page_size: env_parse("RECONCILE_PAGE_SIZE", 500)?,
            webhook_hmac_secret: env_var("KEYCLOAK_WEBHOOK_HMAC_SECRET")
                .ok_or(ConfigError::Missing("KEYCLOAK_WEBHOOK_HMAC_SECRET"))?,
            service_account_prefixes: {
                let prefixes = env_csv("KEYCLOAK_SERVICE_ACCOUNT_PREFIXES");
                if prefixes.is_empty() {
                    vec!["service-account-".to_string()]
                } else {
                    prefixes
                }
            },
        };

        let reconcile = ReconcileSettings {
            cluster_id: env_var("KAFKA_CLUSTER_ID").unwrap_or_else(ReconcileSettings::default_cluster_id),
            interval: env_duration_secs("RECONCILE_INTERVAL_SECONDS", ReconcileSettings::default_interval())?,
            page_size: env_parse("RECONCILE_PAGE_SIZE", ReconcileSettings::default_page_size())?,
            always_upsert: env_parse("RECONCILE_ALWAYS_UPSERT", true)?,
            excluded_principals: env_csv("RECONCILE_EXCLUDED_PRINCIPALS"),
            mechanism: ScramMechanism::default(),
            iterations: env_parse("RECONCILE_ITERATIONS", ReconcileSettings::default_iterations())?,
            fetch_timeout: ReconcileSettings::default_fetch_timeout(),
        };

        let retention = RetentionSettings {
            max_bytes: env_opt_parse("RETENTION_MAX_BYTES")?,
            max_age_days: env_opt_parse("RETENTION_MAX_AGE_DAYS")?,
            purge_interval: env_duration_secs(
                "RETENTION_PURGE_INTERVAL_SECONDS",
                RetentionSettings::default_purge_interval(),
            )?,
        };

        let webhook = WebhookSettings {
            queue_capacity: env_parse("WEBHOOK_QUEUE_CAPACITY", WebhookSettings::default_queue_capacity())?,
            workers: WebhookSettings::default_workers(),
            max_attempts: env_parse("WEBHOOK_RETRY_MAX_ATTEMPTS", WebhookSettings::default_max_attempts())?,
            base_delay: env_duration_millis("WEBHOOK_RETRY_BASE_DELAY_MS", WebhookSettings::default_base_delay())?,
            max_delay: env_duration_millis("WEBHOOK_RETRY_MAX_DELAY_MS", WebhookSettings::default_max_delay())?,
        };

        Ok(Self {
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            watchdog: WatchdogConfig::default(),
            listen: env_var("LISTEN_ADDR").unwrap_or_else(Self::default_listen),
            sqlite_db_path: env_var("SQLITE_DB_PATH").unwrap_or_else(Self::default_db_path),
            kafka,
            keycloak,
            http_client: HttpClientConfig::default(),
            reconcile,
            retention,
            webhook,
            app_name: None,
            app_version: None,
        })
    }
}

/// `RECONCILE_*` settings driving the orchestrator (C7).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct ReconcileSettings {
    /// Kafka cluster identifier recorded on every operation row.
    #[serde(default = "ReconcileSettings::default_cluster_id")]
    pub cluster_id: String,
    /// Interval between periodic full reconciliations. `RECONCILE_INTERVAL_SECONDS`.
    #[serde(
        default = "ReconcileSettings::default_interval",
        with = "humantime_serde"
    )]
    pub interval: Duration,
    /// Page size used enumerating Keycloak users. `RECONCILE_PAGE_SIZE`.
    #[serde(default = "ReconcileSettings::default_page_size")]
    pub page_size: u32,
    /// Whether every Keycloak user is re-upserted every cycle, rather than
    /// only the ones not already present in Kafka. `RECONCILE_ALWAYS_UPSERT`.
    #[serde(default = "crate::util::default_true")]
    pub always_upsert: bool,
    /// Principals (CSV) never deleted by reconciliation. `RECONCILE_EXCLUDED_PRINCIPALS`.
    #[serde(default)]
    pub excluded_principals: Vec<String>,
    /// SCRAM mechanism newly generated credentials use.
    #[serde(default)]
    pub mechanism: ScramMechanism,
    /// PBKDF2 iteration count for newly generated credentials.
    #[serde(default = "ReconcileSettings::default_iterations")]
    pub iterations: u32,
    /// Per-cycle timeout applied to the parallel Kafka/Keycloak fetch step.
    #[serde(
        default = "ReconcileSettings::default_fetch_timeout",
        with = "humantime_serde"
    )]
    pub fetch_timeout: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            cluster_id: Self::default_cluster_id(),
            interval: Self::default_interval(),
            page_size: Self::default_page_size(),
            always_upsert: true,
            excluded_principals: Vec::new(),
            mechanism: ScramMechanism::default(),
            iterations: Self::default_iterations(),
            fetch_timeout: Self::default_fetch_timeout(),
        }
    }
}

impl ReconcileSettings {
    #[must_use]
    #[inline]
    fn default_cluster_id() -> String {
        "default".to_string()
    }

    #[must_use]
    #[inline]
    fn default_interval() -> Duration {
        Duration::from_secs(120)
    }

    #[must_use]
    #[inline]
    fn default_page_size() -> u32 {
        500
    }

    #[must_use]
    #[inline]
    fn default_iterations() -> u32 {
        MIN_ITERATIONS
    }

    #[must_use]
    #[inline]
    fn default_fetch_timeout() -> Duration {
        Duration::from_secs(30)
    }

    /// Build the [`ExclusionPolicy`] the diff engine (C6) consumes.
    #[must_use]
    pub fn exclusion_policy(&self) -> ExclusionPolicy {
        ExclusionPolicy::new(self.excluded_principals.iter().cloned())
    }
}

/// `RETENTION_*` settings for the retention manager (C3).
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct RetentionSettings {
    /// Maximum allowed database size in bytes. `RETENTION_MAX_BYTES`.
    #[serde(default)]
    pub max_bytes: Option<i64>,
    /// Maximum allowed row age in days. `RETENTION_MAX_AGE_DAYS`.
    #[serde(default)]
    pub max_age_days: Option<i64>,
    /// Interval between periodic retention sweeps. `RETENTION_PURGE_INTERVAL_SECONDS`.
    #[serde(
        default = "RetentionSettings::default_purge_interval",
        with = "humantime_serde"
    )]
    pub purge_interval: Duration,
}

impl RetentionSettings {
    #[must_use]
    #[inline]
    fn default_purge_interval() -> Duration {
        Duration::from_secs(300)
    }
}

/// `WEBHOOK_*` settings for the event pipeline (C8).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct WebhookSettings {
    /// Bounded queue capacity. `WEBHOOK_QUEUE_CAPACITY`.
    #[serde(default = "WebhookSettings::default_queue_capacity")]
    pub queue_capacity: usize,
    /// Fixed worker-pool size.
    #[serde(default = "WebhookSettings::default_workers")]
    pub workers: usize,
    /// Maximum delivery attempts. `WEBHOOK_RETRY_MAX_ATTEMPTS`.
    #[serde(default = "WebhookSettings::default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry delay. `WEBHOOK_RETRY_BASE_DELAY_MS`.
    #[serde(
        default = "WebhookSettings::default_base_delay",
        with = "humantime_serde"
    )]
    pub base_delay: Duration,
    /// Maximum retry delay. `WEBHOOK_RETRY_MAX_DELAY_MS`.
    #[serde(
        default = "WebhookSettings::default_max_delay",
        with = "humantime_serde"
    )]
    pub max_delay: Duration,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            queue_capacity: Self::default_queue_capacity(),
            workers: Self::default_workers(),
            max_attempts: Self::default_max_attempts(),
            base_delay: Self::default_base_delay(),
            max_delay: Self::default_max_delay(),
        }
    }
}

impl WebhookSettings {
    #[must_use]
    #[inline]
    fn default_queue_capacity() -> usize {
        1000
    }

    #[must_use]
    #[inline]
    fn default_workers() -> usize {
        1
    }

    #[must_use]
    #[inline]
    fn default_max_attempts() -> u32 {
        3
    }

    #[must_use]
    #[inline]
    fn default_base_delay() -> Duration {
        Duration::from_millis(1000)
    }

    #[must_use]
    #[inline]
    fn default_max_delay() -> Duration {
        Duration::from_millis(30000)
    }

    /// Build the [`WebhookConfig`] the event pipeline consumes, plugging in
    /// the HMAC secret sourced from [`KeycloakConfig::webhook_hmac_secret`].
    #[must_use]
    pub fn pipeline_config(&self, hmac_secret: String) -> WebhookConfig {
        WebhookConfig {
            queue_capacity: self.queue_capacity,
            workers: self.workers.max(1),
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            hmac_secret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test reads and writes its own env var key, so these are safe to
    // run concurrently with each other and with the rest of the suite.

    #[test]
    fn env_parse_falls_back_to_default_when_unset() {
        env::remove_var("KCKC_TEST_ENV_PARSE_UNSET");
        let value: u32 = env_parse("KCKC_TEST_ENV_PARSE_UNSET", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn env_parse_uses_the_set_value() {
        env::set_var("KCKC_TEST_ENV_PARSE_SET", "42");
        let value: u32 = env_parse("KCKC_TEST_ENV_PARSE_SET", 7).unwrap();
        assert_eq!(value, 42);
        env::remove_var("KCKC_TEST_ENV_PARSE_SET");
    }

    #[test]
    fn env_parse_rejects_unparsable_value() {
        env::set_var("KCKC_TEST_ENV_PARSE_BAD", "not-a-number");
        let err = env_parse::<u32>("KCKC_TEST_ENV_PARSE_BAD", 7).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("KCKC_TEST_ENV_PARSE_BAD", _)));
        env::remove_var("KCKC_TEST_ENV_PARSE_BAD");
    }

    #[test]
    fn env_opt_parse_is_none_when_unset() {
        env::remove_var("KCKC_TEST_ENV_OPT_UNSET");
        let value: Option<i64> = env_opt_parse("KCKC_TEST_ENV_OPT_UNSET").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn env_opt_parse_is_some_when_set() {
        env::set_var("KCKC_TEST_ENV_OPT_SET", "100");
        let value: Option<i64> = env_opt_parse("KCKC_TEST_ENV_OPT_SET").unwrap();
        assert_eq!(value, Some(100));
        env::remove_var("KCKC_TEST_ENV_OPT_SET");
    }

    #[test]
    fn env_csv_splits_trims_and_drops_empty_segments() {
        env::set_var("KCKC_TEST_ENV_CSV", "alice, bob ,,carol");
        let values = env_csv("KCKC_TEST_ENV_CSV");
        assert_eq!(values, vec!["alice", "bob", "carol"]);
        env::remove_var("KCKC_TEST_ENV_CSV");
    }

    #[test]
    fn env_csv_is_empty_when_unset() {
        env::remove_var("KCKC_TEST_ENV_CSV_UNSET");
        assert!(env_csv("KCKC_TEST_ENV_CSV_UNSET").is_empty());
    }

    #[test]
    fn env_duration_secs_parses_whole_seconds() {
        env::set_var("KCKC_TEST_ENV_DURATION_SECS", "90");
        let d = env_duration_secs("KCKC_TEST_ENV_DURATION_SECS", Duration::from_secs(1)).unwrap();
        assert_eq!(d, Duration::from_secs(90));
        env::remove_var("KCKC_TEST_ENV_DURATION_SECS");
    }

    #[test]
    fn env_var_treats_empty_string_as_unset() {
        env::set_var("KCKC_TEST_ENV_VAR_EMPTY", "");
        assert_eq!(env_var("KCKC_TEST_ENV_VAR_EMPTY"), None);
        env::remove_var("KCKC_TEST_ENV_VAR_EMPTY");
    }
}
