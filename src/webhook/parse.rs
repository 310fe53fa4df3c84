//! Pure mapping from a parsed Keycloak event payload to a dispatch
//! classification. No I/O: resolving the classification's `subject_id`
//! into a Kafka principal is the caller's job (it needs the directory
//! client).

use super::model::{KeycloakEventPayload, OperationType, ResourceType};

/// Paths whose `UPDATE` on a user resource indicate a password change.
const PASSWORD_CHANGE_SUFFIXES: &[&str] =
    &["reset-password", "reset-password-email", "execute-actions-email"];

/// What an accepted event should do, before principal resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Classification {
    /// Whether the resource is a user or a client (service account).
    pub resource_type: ResourceType,
    /// Opaque Keycloak ID parsed out of `resourcePath`.
    pub subject_id: String,
    /// `true` for create/update (upsert the credential), `false` for delete.
    pub upsert: bool,
    /// Set when this is a user `UPDATE` whose path matches a
    /// password-change endpoint.
    pub is_password_change: bool,
}

/// Classify a payload, or `None` if it should be logged and dropped:
/// unrecognised `resourceType`/`operationType` combination, or an
/// unparsable `resourcePath`.
#[must_use]
pub fn classify(payload: &KeycloakEventPayload) -> Option<Classification> {
    let subject_id = parse_subject_id(&payload.resource_type, &payload.resource_path)?;

    match (payload.resource_type, payload.operation_type) {
        (ResourceType::User, OperationType::Create) => Some(Classification {
            resource_type: ResourceType::User,
            subject_id,
            upsert: true,
            is_password_change: false,
        }),
        (ResourceType::User, OperationType::Update) => {
            let is_password_change = PASSWORD_CHANGE_SUFFIXES
                .iter()
                .any(|suffix| payload.resource_path.ends_with(suffix));
            Some(Classification {
                resource_type: ResourceType::User,
                subject_id,
                upsert: true,
                is_password_change,
            })
        }
        (ResourceType::User, OperationType::Delete) => Some(Classification {
            resource_type: ResourceType::User,
            subject_id,
            upsert: false,
            is_password_change: false,
        }),
        (ResourceType::Client, OperationType::Create | OperationType::Update) => {
            Some(Classification {
                resource_type: ResourceType::Client,
                subject_id,
                upsert: true,
                is_password_change: false,
            })
        }
        (ResourceType::Client, OperationType::Delete) => Some(Classification {
            resource_type: ResourceType::Client,
            subject_id,
            upsert: false,
            is_password_change: false,
        }),
        _ => None,
    }
}

/// Extract the opaque ID from a path like `users/<id>` or
/// `users/<id>/reset-password`. Returns `None` for anything that doesn't
/// start with the expected collection segment for `resource_type`.
fn parse_subject_id(resource_type: &ResourceType, resource_path: &str) -> Option<String> {
    let expected_prefix = match resource_type {
        ResourceType::User => "users/",
        ResourceType::Client => "clients/",
        ResourceType::Other => return None,
    };
    let rest = resource_path.strip_prefix(expected_prefix)?;
    let id = rest.split('/').next()?;
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(resource_type: ResourceType, operation_type: OperationType, path: &str) -> KeycloakEventPayload {
        KeycloakEventPayload {
            id: None,
            time: None,
            realm_id: "realm".to_string(),
            resource_type,
            operation_type,
            resource_path: path.to_string(),
            representation: None,
        }
    }

    #[test]
    fn user_create_is_upsert() {
        let p = payload(ResourceType::User, OperationType::Create, "users/abc-1");
        let c = classify(&p).unwrap();
        assert!(c.upsert);
        assert!(!c.is_password_change);
        assert_eq!(c.subject_id, "abc-1");
    }

    #[test]
    fn user_update_reset_password_is_password_change() {
        let p = payload(
            ResourceType::User,
            OperationType::Update,
            "users/abc-1/reset-password",
        );
        let c = classify(&p).unwrap();
        assert!(c.is_password_change);
    }

    #[test]
    fn user_delete_is_delete() {
        let p = payload(ResourceType::User, OperationType::Delete, "users/abc-1");
        let c = classify(&p).unwrap();
        assert!(!c.upsert);
    }

    #[test]
    fn client_update_maps_to_service_account_upsert() {
        let p = payload(ResourceType::Client, OperationType::Update, "clients/cli-1");
        let c = classify(&p).unwrap();
        assert_eq!(c.resource_type, ResourceType::Client);
        assert!(c.upsert);
    }

    #[test]
    fn unparsable_path_is_dropped() {
        let p = payload(ResourceType::User, OperationType::Create, "groups/abc-1");
        assert!(classify(&p).is_none());
    }

    #[test]
    fn other_resource_type_is_dropped() {
        let p = payload(ResourceType::Other, OperationType::Create, "realms/x");
        assert!(classify(&p).is_none());
    }
}
