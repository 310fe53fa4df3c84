//! Diff engine (C6): pure computation of the upsert/delete plan.
//!
//! No I/O, no clock reads. Hash-set based so the whole computation stays
//! `O(n+m)` regardless of how exclusions are expressed.

use std::collections::HashSet;

use crate::keycloak::KeycloakUser;

/// Exact-match and prefix-match exclusion policy applied to Kafka principals.
#[derive(Clone, Debug, Default)]
pub struct ExclusionPolicy {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl ExclusionPolicy {
    /// Build a policy from a list of patterns: entries ending in `*` are
    /// treated as prefixes (lowercase-compared), everything else as an
    /// exact match.
    #[must_use]
    pub fn new(patterns: impl IntoIterator<Item = String>) -> Self {
        let mut exact = HashSet::new();
        let mut prefixes = Vec::new();
        for pattern in patterns {
            if let Some(prefix) = pattern.strip_suffix('*') {
                prefixes.push(prefix.to_lowercase());
            } else {
                exact.insert(pattern);
            }
        }
        Self { exact, prefixes }
    }

    /// Whether `principal` is excluded: exact match is checked first, then
    /// prefix match (lowercase-compared).
    #[must_use]
    pub fn excludes(&self, principal: &str) -> bool {
        if self.exact.contains(principal) {
            return true;
        }
        let lower = principal.to_lowercase();
        self.prefixes.iter().any(|prefix| lower.starts_with(prefix))
    }
}

/// Immutable plan of principals to upsert and delete, computed once per
/// reconciliation cycle.
#[derive(Clone, Debug, Default)]
pub struct SyncPlan {
    /// Keycloak users whose SCRAM credential should be created or refreshed.
    pub upserts: Vec<KeycloakUser>,
    /// Kafka principals with no corresponding Keycloak user, to be deleted.
    pub deletes: Vec<String>,
    /// When true, no mutation is actually applied — plan is for inspection only.
    pub dry_run: bool,
}

/// Compute the [`SyncPlan`] for one reconciliation cycle.
///
/// `kafka_principals` is filtered by `exclusion` first; `always_upsert`
/// controls whether every Keycloak user is re-upserted or only those
/// missing from Kafka.
#[must_use]
pub fn compute(
    keycloak_users: &[KeycloakUser],
    kafka_principals: &HashSet<String>,
    exclusion: &ExclusionPolicy,
    always_upsert: bool,
) -> SyncPlan {
    let filtered_kafka: HashSet<&str> = kafka_principals
        .iter()
        .map(String::as_str)
        .filter(|p| !exclusion.excludes(p))
        .collect();

    let kc_names: HashSet<&str> = keycloak_users.iter().map(|u| u.username.as_str()).collect();

    let upserts: Vec<KeycloakUser> = if always_upsert {
        keycloak_users.to_vec()
    } else {
        keycloak_users
            .iter()
            .filter(|u| !filtered_kafka.contains(u.username.as_str()))
            .cloned()
            .collect()
    };

    let deletes: Vec<String> = filtered_kafka
        .into_iter()
        .filter(|p| !kc_names.contains(p))
        .map(str::to_string)
        .collect();

    SyncPlan {
        upserts,
        deletes,
        dry_run: false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn user(name: &str) -> KeycloakUser {
        KeycloakUser {
            id: format!("id-{name}"),
            username: name.to_string(),
            enabled: true,
            email: None,
            created_timestamp: None,
        }
    }

    #[test]
    fn always_upsert_reissues_everyone() {
        let users = vec![user("alice"), user("bob")];
        let kafka = HashSet::new();
        let plan = compute(&users, &kafka, &ExclusionPolicy::default(), true);
        assert_eq!(plan.upserts.len(), 2);
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn delete_detects_orphaned_kafka_principal() {
        let users = vec![user("alice")];
        let kafka: HashSet<String> = ["alice".to_string(), "bob".to_string()].into();
        let plan = compute(&users, &kafka, &ExclusionPolicy::default(), false);
        assert_eq!(plan.deletes, vec!["bob".to_string()]);
        assert!(plan.upserts.is_empty());
    }

    #[test]
    fn exclusions_covering_all_kafka_principals_yields_no_deletes() {
        let users: Vec<KeycloakUser> = Vec::new();
        let kafka: HashSet<String> = ["admin".to_string()].into();
        let exclusion = ExclusionPolicy::new(["admin".to_string()]);
        let plan = compute(&users, &kafka, &exclusion, true);
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn exact_match_checked_before_prefix() {
        let exclusion = ExclusionPolicy::new(["service-account-foo".to_string(), "service-".to_string() + "*"]);
        assert!(exclusion.excludes("service-account-foo"));
        assert!(exclusion.excludes("service-account-bar"));
        assert!(!exclusion.excludes("alice"));
    }

    #[test]
    fn ten_thousand_users_diff_under_one_second() {
        let users: Vec<KeycloakUser> = (0..10_000).map(|i| user(&format!("user-{i}"))).collect();
        let kafka: HashSet<String> = (5_000..15_000).map(|i| format!("user-{i}")).collect();
        let start = Instant::now();
        let plan = compute(&users, &kafka, &ExclusionPolicy::default(), false);
        assert!(start.elapsed().as_secs() < 1);
        assert_eq!(plan.upserts.len(), 5_000);
        assert_eq!(plan.deletes.len(), 5_000);
    }
}
