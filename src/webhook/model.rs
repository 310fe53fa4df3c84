//! In-memory representation of an accepted Keycloak webhook event.

use std::time::Instant;

use serde::Deserialize;

/// Inbound webhook body, as published by Keycloak's event listener SPI.
#[derive(Clone, Debug, Deserialize)]
pub struct KeycloakEventPayload {
    /// Event ID assigned by Keycloak.
    #[serde(default)]
    pub id: Option<String>,
    /// Event timestamp, milliseconds since epoch.
    #[serde(default)]
    pub time: Option<i64>,
    /// Realm the event occurred in.
    #[serde(rename = "realmId")]
    pub realm_id: String,
    /// Kind of resource the event concerns.
    #[serde(rename = "resourceType")]
    pub resource_type: ResourceType,
    /// Kind of mutation performed on the resource.
    #[serde(rename = "operationType")]
    pub operation_type: OperationType,
    /// Admin-REST-style path identifying the affected resource,
    /// e.g. `users/3fa9c1de-...` or `users/3fa9c1de-.../reset-password`.
    #[serde(rename = "resourcePath")]
    pub resource_path: String,
    /// Optional plaintext carried out-of-band by the password-hashing
    /// plugin for a single password-change event. Cleared immediately
    /// after use; never logged or persisted.
    #[serde(default)]
    pub representation: Option<serde_json::Value>,
}

/// `resourceType` values this pipeline understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceType {
    /// A Keycloak user (including service accounts).
    User,
    /// A Keycloak client (service account owner).
    Client,
    /// Anything else; dropped after classification.
    #[serde(other)]
    Other,
}

/// `operationType` values this pipeline understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    /// Resource created.
    Create,
    /// Resource updated.
    Update,
    /// Resource deleted.
    Delete,
    /// Anything else; dropped after classification.
    #[serde(other)]
    Other,
}

/// A validated, parsed, and not-yet-dispatched webhook event.
#[derive(Clone, Debug)]
pub struct WebhookEvent {
    /// Correlation ID assigned at ingress, used to group the eventual
    /// [`crate::audit::model::SyncOperation`] row(s).
    pub correlation_id: uuid::Uuid,
    /// When this event was accepted.
    pub received_at: Instant,
    /// Realm the event concerns.
    pub realm: String,
    /// Resolved Kafka principal, if resolvable at parse time.
    pub principal: Option<String>,
    /// Whether this is a create/update (`true`) or delete (`false`).
    pub upsert: bool,
    /// Whether this event was classified as a password change.
    pub is_password_change: bool,
    /// Out-of-band plaintext password, present only for a password-change
    /// event where the identity-provider plugin supplied it.
    pub plaintext_password: Option<String>,
    /// Resolved Keycloak user/service-account ID, used to re-resolve the
    /// principal if it wasn't present directly on the payload.
    pub subject_id: String,
    /// How many delivery attempts have already been made.
    pub retry_count: u32,
    /// Earliest instant this event may be dequeued again.
    pub scheduled_not_before: Instant,
}
