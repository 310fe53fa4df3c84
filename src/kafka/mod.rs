//! Kafka client configuration shared by the SCRAM admin client.

pub mod admin;

use std::{collections::HashMap, time::Duration};

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};

/// Common Kafka client configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct KafkaCommonConfig {
    /// List of brokers to connect to. Each element needs to be in `<host>` or `<host>:<port>`
    /// format.
    ///
    /// See `bootstrap.servers` parameter from [librdkafka].
    ///
    /// [librdkafka]: https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub brokers: Vec<String>,
    /// Authentication-related properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<KafkaAuthConfig>,
    /// Retry backoff properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<KafkaBackoffConfig>,
    /// Additional parameters to include in Kafka configuration.
    #[serde(
        default,
        alias = "rdkafka_params",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub extra_params: HashMap<String, String>,
}

impl KafkaCommonConfig {
    /// Apply relevant configuration to [`ClientConfig`].
    pub fn configure(&self, client: &mut ClientConfig) {
        client.set("bootstrap.servers", self.brokers.join(","));
        if let Some(cfg) = &self.auth {
            cfg.configure(client);
        }
        if let Some(cfg) = &self.backoff {
            cfg.configure(client);
        }
        for (key, value) in &self.extra_params {
            client.set(key, value);
        }
    }
}

/// Authentication-related Kafka properties.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct KafkaAuthConfig {
    /// SASL username to use. Applicable to `PLAIN` and `SCRAM-...` mechanisms.
    ///
    /// See `sasl.username` parameter from [librdkafka].
    ///
    /// [librdkafka]: https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    pub username: Option<String>,
    /// SASL password to use. Applicable to `PLAIN` and `SCRAM-...` mechanisms.
    ///
    /// See `sasl.password` parameter from [librdkafka].
    ///
    /// [librdkafka]: https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    pub password: Option<String>,
    /// Kafka security protocol to use.
    ///
    /// See `security.protocol` parameter from [librdkafka].
    ///
    /// [librdkafka]: https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    #[serde(default)]
    pub protocol: KafkaProtocol,
    /// Kafka authentication mechanism to use.
    ///
    /// See `sasl.mechanisms` parameter from [librdkafka].
    ///
    /// [librdkafka]: https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    #[serde(default)]
    pub mechanism: KafkaAuthMechanism,
}

impl KafkaAuthConfig {
    /// Apply relevant configuration to [`ClientConfig`].
    pub fn configure(&self, client: &mut ClientConfig) {
        if let Some(username) = &self.username {
            client.set("sasl.username", username);
        }
        if let Some(password) = &self.password {
            client.set("sasl.password", password);
        }
        client.set("sasl.mechanisms", self.mechanism.as_ref());
        client.set("security.protocol", self.protocol.as_ref());
    }
}

/// Kafka security protocol to use.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[non_exhaustive]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KafkaProtocol {
    /// Without authentication, without encryption.
    Plaintext,
    /// Without authentication, with encryption.
    Ssl,
    /// With authentication, without encryption.
    SaslPlaintext,
    /// With authentication, with encryption.
    #[default]
    SaslSsl,
}

impl AsRef<str> for KafkaProtocol {
    fn as_ref(&self) -> &str {
        match self {
            Self::Plaintext => "plaintext",
            Self::Ssl => "ssl",
            Self::SaslPlaintext => "sasl_plaintext",
            Self::SaslSsl => "sasl_ssl",
        }
    }
}

impl std::str::FromStr for KafkaProtocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLAINTEXT" => Ok(Self::Plaintext),
            "SSL" => Ok(Self::Ssl),
            "SASL_PLAINTEXT" => Ok(Self::SaslPlaintext),
            "SASL_SSL" => Ok(Self::SaslSsl),
            _ => Err(()),
        }
    }
}

/// Kafka SASL authentication mechanism to use.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub enum KafkaAuthMechanism {
    /// Authenticate via plain username and password.
    #[serde(rename = "PLAIN")]
    Plain,
    /// Authenticate via SCRAM algorithm using SHA-256 hashes.
    #[serde(rename = "SCRAM-SHA-256", alias = "SCRAM-SHA256")]
    ScramSha256,
    /// Authenticate via SCRAM algorithm using SHA-512 hashes.
    #[serde(rename = "SCRAM-SHA-512", alias = "SCRAM-SHA512")]
    #[default]
    ScramSha512,
}

impl AsRef<str> for KafkaAuthMechanism {
    fn as_ref(&self) -> &str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

impl std::str::FromStr for KafkaAuthMechanism {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "SCRAM-SHA-256" | "SCRAM-SHA256" => Ok(Self::ScramSha256),
            "SCRAM-SHA-512" | "SCRAM-SHA512" => Ok(Self::ScramSha512),
            _ => Err(()),
        }
    }
}

impl From<KafkaAuthMechanism> for crate::scram::ScramMechanism {
    fn from(value: KafkaAuthMechanism) -> Self {
        match value {
            KafkaAuthMechanism::Plain | KafkaAuthMechanism::ScramSha512 => Self::Sha512,
            KafkaAuthMechanism::ScramSha256 => Self::Sha256,
        }
    }
}

/// Kafka backoff time configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct KafkaBackoffConfig {
    /// Minimum backoff wait time before retrying a protocol request.
    ///
    /// See `retry.backoff.ms` parameter from [librdkafka].
    ///
    /// [librdkafka]: https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde"
    )]
    min: Option<Duration>,
    /// Maximum backoff wait time before retrying a protocol request.
    ///
    /// See `retry.backoff.max.ms` parameter from [librdkafka].
    ///
    /// [librdkafka]: https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde"
    )]
    max: Option<Duration>,
}

impl KafkaBackoffConfig {
    /// Apply relevant configuration to [`ClientConfig`].
    pub fn configure(&self, client: &mut ClientConfig) {
        if let Some(min) = self.min {
            client.set("retry.backoff.ms", kafka_ms(min));
        }
        if let Some(max) = self.max {
            client.set("retry.backoff.max.ms", kafka_ms(max));
        }
    }
}

/// Format duration as number of milliseconds, for use in Kafka configuration.
fn kafka_ms(d: Duration) -> String {
    d.as_millis().to_string()
}
