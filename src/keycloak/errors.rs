//! Error taxonomy for the Keycloak directory client.

/// Classified failures from the Keycloak admin API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeycloakError {
    /// Network error, timeout, or 5xx response: safe to retry.
    #[error("transient keycloak error: {0}")]
    Transient(String),
    /// Credentials were rejected.
    #[error("keycloak authentication failure: {0}")]
    Authentication(String),
    /// Requested resource does not exist.
    #[error("keycloak resource not found: {0}")]
    NotFound(String),
    /// Response could not be parsed or otherwise violated the expected protocol.
    #[error("keycloak protocol error: {0}")]
    Protocol(String),
    /// The circuit breaker is open for this client.
    #[error("circuit breaker open for keycloak client")]
    CircuitOpen,
}

impl KeycloakError {
    /// Whether the pipeline's retry policy should retry this failure class.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
