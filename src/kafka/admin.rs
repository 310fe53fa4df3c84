//! Kafka SCRAM credential admin client (C4).
//!
//! Describes, upserts, and deletes SCRAM user credentials through the
//! Kafka admin protocol. Every call is timed, labelled, and guarded by a
//! circuit breaker shared with the rest of the downstream-call surface
//! (see [`crate::http_client::cb`]).

use std::{collections::HashMap, time::Duration};

use base64::Engine as _;
use rdkafka::{
    admin::{
        AdminClient, AdminOptions, AlterUserScramCredentialsOptions, ScramCredentialInfo,
        ScramMechanism as RdScramMechanism, UserScramCredentialAlteration,
        UserScramCredentialDeletion, UserScramCredentialUpsertion,
    },
    client::DefaultClientContext,
    error::KafkaError,
};
use recloser::AsyncRecloser;
use tracing::{instrument, warn};

use crate::{
    kafka::KafkaCommonConfig,
    scram::{self, ScramMechanism},
};

/// Errors surfaced by the admin client.
#[derive(Debug, thiserror::Error)]
pub enum KafkaAdminError {
    /// librdkafka reported an error.
    #[error("kafka admin error: {0}")]
    Kafka(#[from] KafkaError),
    /// The broker does not support the SCRAM admin API at all — treated as
    /// a fatal configuration error by the caller.
    #[error("broker does not support SCRAM credential administration")]
    UnsupportedVersion,
    /// The circuit breaker is open; the call was not attempted.
    #[error("circuit breaker open for kafka admin client")]
    CircuitOpen,
    /// Password generation failed.
    #[error(transparent)]
    Scram(#[from] scram::ScramError),
}

/// One planned alteration for a single principal.
pub enum Alteration {
    /// Create-or-update a SCRAM credential.
    Upsertion {
        /// Kafka principal (user name).
        principal: String,
        /// SCRAM mechanism to write.
        mechanism: ScramMechanism,
        /// PBKDF2 iteration count.
        iterations: u32,
        /// Plaintext password to derive the credential from.
        password: String,
    },
    /// Delete a SCRAM credential for a given mechanism.
    Deletion {
        /// Kafka principal (user name).
        principal: String,
        /// SCRAM mechanism to remove.
        mechanism: ScramMechanism,
    },
}

impl Alteration {
    /// Principal this alteration applies to.
    #[must_use]
    pub fn principal(&self) -> &str {
        match self {
            Self::Upsertion { principal, .. } | Self::Deletion { principal, .. } => principal,
        }
    }
}

/// Outcome of a single alteration, keyed by principal in [`AdminClient::alter`]'s result map.
pub type AlterResult = Result<(), KafkaAdminError>;

fn to_rd_mechanism(mechanism: ScramMechanism) -> RdScramMechanism {
    match mechanism {
        ScramMechanism::Sha256 => RdScramMechanism::Sha256,
        ScramMechanism::Sha512 => RdScramMechanism::Sha512,
    }
}

/// Thin wrapper around [`rdkafka::admin::AdminClient`] specialised for SCRAM
/// credential management, guarded by a shared circuit breaker.
pub struct ScramAdminClient {
    client: AdminClient<DefaultClientContext>,
    breaker: AsyncRecloser,
    call_timeout: Duration,
}

impl ScramAdminClient {
    /// Build a new client from common Kafka configuration.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the underlying `rdkafka` client could not be created.
    pub fn new(
        config: &KafkaCommonConfig,
        breaker: AsyncRecloser,
        call_timeout: Duration,
    ) -> Result<Self, KafkaAdminError> {
        let mut client_config = rdkafka::ClientConfig::new();
        config.configure(&mut client_config);
        let client: AdminClient<DefaultClientContext> = client_config.create()?;
        Ok(Self {
            client,
            breaker,
            call_timeout,
        })
    }

    /// Describe the mechanisms currently configured for each of `principals`.
    ///
    /// Returns a mapping from principal to the set of mechanisms Kafka
    /// reports a credential for. Principals absent from the broker are
    /// simply absent from the map.
    #[instrument(skip(self, principals))]
    pub async fn describe(
        &self,
        principals: &[String],
    ) -> Result<HashMap<String, Vec<ScramMechanism>>, KafkaAdminError> {
        let opts = AdminOptions::new().request_timeout(Some(self.call_timeout));
        let users: Vec<&str> = principals.iter().map(String::as_str).collect();
        let fut = self.client.describe_user_scram_credentials(&users, opts);
        let results = self.breaker.call(fut).await.map_err(|err| match err {
            recloser::Error::Rejected => KafkaAdminError::CircuitOpen,
            recloser::Error::Inner(inner) => KafkaAdminError::Kafka(inner),
        })?;

        let mut out = HashMap::new();
        for (principal, result) in results {
            match result {
                Ok(infos) => {
                    let mechs = infos
                        .into_iter()
                        .filter_map(|info: ScramCredentialInfo| match info.mechanism {
                            RdScramMechanism::Sha256 => Some(ScramMechanism::Sha256),
                            RdScramMechanism::Sha512 => Some(ScramMechanism::Sha512),
                            _ => None,
                        })
                        .collect();
                    out.insert(principal, mechs);
                }
                Err(err) if err.is_unsupported_version() => {
                    return Err(KafkaAdminError::UnsupportedVersion)
                }
                Err(_) => {
                    // Principal has no credentials at all; treat as absent.
                }
            }
        }
        Ok(out)
    }

    /// Apply a batch of alterations, resolving per-principal.
    ///
    /// A partial failure never aborts the batch: each principal's outcome is
    /// reported independently in the returned map.
    #[instrument(skip(self, alterations))]
    pub async fn alter(
        &self,
        alterations: Vec<Alteration>,
    ) -> Result<HashMap<String, AlterResult>, KafkaAdminError> {
        let mut rd_alterations = Vec::with_capacity(alterations.len());
        let mut principals = Vec::with_capacity(alterations.len());
        for alteration in &alterations {
            principals.push(alteration.principal().to_string());
            let rd = match alteration {
                Alteration::Upsertion {
                    principal,
                    mechanism,
                    iterations,
                    password,
                } => {
                    let cred = scram::generate(password, *mechanism, *iterations)?;
                    UserScramCredentialAlteration::Upsert(UserScramCredentialUpsertion {
                        user: principal.clone(),
                        mechanism: to_rd_mechanism(*mechanism),
                        iterations: cred.iterations() as i32,
                        salt: base64::engine::general_purpose::STANDARD
                            .decode(cred.salt_base64())
                            .unwrap_or_default(),
                        password: password.clone().into_bytes(),
                    })
                }
                Alteration::Deletion {
                    principal,
                    mechanism,
                } => UserScramCredentialAlteration::Delete(UserScramCredentialDeletion {
                    user: principal.clone(),
                    mechanism: to_rd_mechanism(*mechanism),
                }),
            };
            rd_alterations.push(rd);
        }

        let opts = AlterUserScramCredentialsOptions::new().request_timeout(Some(self.call_timeout));
        let fut = self
            .client
            .alter_user_scram_credentials(&rd_alterations, opts);
        let results = self.breaker.call(fut).await.map_err(|err| match err {
            recloser::Error::Rejected => KafkaAdminError::CircuitOpen,
            recloser::Error::Inner(inner) => KafkaAdminError::Kafka(inner),
        })?;

        let mut out = HashMap::with_capacity(principals.len());
        for (principal, result) in results {
            out.insert(
                principal,
                result.map_err(|(err, _)| {
                    if err.is_unsupported_version() {
                        warn!("kafka broker does not support SCRAM credential alteration");
                    }
                    KafkaAdminError::Kafka(err)
                }),
            );
        }
        Ok(out)
    }
}

trait KafkaErrorExt {
    fn is_unsupported_version(&self) -> bool;
}

impl KafkaErrorExt for KafkaError {
    fn is_unsupported_version(&self) -> bool {
        self.to_string().to_lowercase().contains("unsupported")
    }
}
