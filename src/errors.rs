//! Error utility functions and error-to-response mapping.

use std::{fmt, io};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Wrapper for [`std::io::Error`].
#[derive(Debug)]
#[repr(transparent)]
pub struct IoError(io::Error);

impl From<io::Error> for IoError {
    fn from(value: io::Error) -> Self {
        Self(value)
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, kind={:?}", self.0, self.0.kind())?;
        if let Some(raw) = self.0.raw_os_error() {
            write!(f, ", raw={raw}")?;
        }
        Ok(())
    }
}

/// Tag URI for 404 bodies.
pub(crate) const TAG_NOT_FOUND: &str = "tag:kckc-sync,2026:not_found";
/// Tag URI for generic error bodies.
pub(crate) const TAG_ERROR: &str = "tag:kckc-sync,2026:error";
/// Tag URI for signature validation error bodies.
pub(crate) const TAG_SIGNATURE: &str = "tag:kckc-sync,2026:signature_invalid";
/// Tag URI for queue-full error bodies.
pub(crate) const TAG_QUEUE_FULL: &str = "tag:kckc-sync,2026:queue_full";
/// Tag URI for dependency-unavailable error bodies.
pub(crate) const TAG_DEPENDENCY: &str = "tag:kckc-sync,2026:dependency_unavailable";
/// Tag URI for persistence error bodies.
pub(crate) const TAG_PERSISTENCE: &str = "tag:kckc-sync,2026:persistence_error";

/// Error taxonomy shared by every internal component, mapped onto the HTTP
/// surface as RFC 7807 problem+json bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(String),
    /// A downstream dependency (Kafka, Keycloak) did not respond.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
    /// Dependency rejected our credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),
    /// Webhook signature did not match.
    #[error("signature invalid")]
    SignatureInvalid,
    /// Webhook payload failed to parse.
    #[error("payload invalid: {0}")]
    PayloadInvalid(String),
    /// Ingress queue is at capacity.
    #[error("queue full")]
    QueueFull,
    /// Transient failure, safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Failure the caller should not retry (malformed state, logic error).
    #[error("terminal failure: {0}")]
    Terminal(String),
    /// Audit store failure.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Conflicting operation is already in progress.
    #[error("operation already in progress")]
    Conflict,
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<crate::audit::AuditError> for AppError {
    fn from(err: crate::audit::AuditError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<crate::keycloak::KeycloakError> for AppError {
    fn from(err: crate::keycloak::KeycloakError) -> Self {
        match err {
            crate::keycloak::KeycloakError::CircuitOpen
            | crate::keycloak::KeycloakError::Transient(_) => {
                Self::DependencyUnavailable(err.to_string())
            }
            crate::keycloak::KeycloakError::Authentication(_) => {
                Self::AuthenticationFailure(err.to_string())
            }
            crate::keycloak::KeycloakError::NotFound(_) => Self::NotFound(err.to_string()),
            crate::keycloak::KeycloakError::Protocol(_) => Self::Terminal(err.to_string()),
        }
    }
}

impl From<crate::kafka::admin::KafkaAdminError> for AppError {
    fn from(err: crate::kafka::admin::KafkaAdminError) -> Self {
        Self::DependencyUnavailable(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, tag) = match &self {
            Self::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, TAG_ERROR),
            Self::DependencyUnavailable(_) => (StatusCode::BAD_GATEWAY, TAG_DEPENDENCY),
            Self::AuthenticationFailure(_) => (StatusCode::BAD_GATEWAY, TAG_DEPENDENCY),
            Self::SignatureInvalid => (StatusCode::UNAUTHORIZED, TAG_SIGNATURE),
            Self::PayloadInvalid(_) => (StatusCode::BAD_REQUEST, TAG_ERROR),
            Self::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, TAG_QUEUE_FULL),
            Self::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, TAG_DEPENDENCY),
            Self::Terminal(_) => (StatusCode::INTERNAL_SERVER_ERROR, TAG_ERROR),
            Self::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, TAG_PERSISTENCE),
            Self::Conflict => (StatusCode::CONFLICT, TAG_ERROR),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, TAG_NOT_FOUND),
        };
        problemdetails::new(status)
            .with_type(tag)
            .with_title(self.to_string())
            .into_response()
    }
}
