//! Keycloak directory client (C5): paginated user enumeration, single-user
//! lookups, and the token lifecycle wired in via [`super::token::TokenManager`].

use std::{sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use recloser::AsyncRecloser;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::keycloak::{
    errors::KeycloakError,
    token::{Credentials, TokenManager},
};

/// A Keycloak user or service account, filtered down to the fields the
/// reconciliation engine actually needs.
#[derive(Clone, Debug, Deserialize)]
pub struct KeycloakUser {
    /// Stable opaque Keycloak identifier.
    pub id: String,
    /// Unique user name; this is the Kafka principal.
    pub username: String,
    /// Whether the account is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Email address, if set.
    pub email: Option<String>,
    /// Creation timestamp, milliseconds since epoch as Keycloak reports it.
    #[serde(rename = "createdTimestamp")]
    pub created_timestamp: Option<i64>,
}

/// Configuration for the Keycloak directory client.
#[derive(Clone, Debug, serde::Serialize, Deserialize)]
#[non_exhaustive]
pub struct KeycloakConfig {
    /// Base URL of the Keycloak server, e.g. `https://idp.example.com`.
    pub url: String,
    /// Realm principals are synchronized from.
    pub realm: String,
    /// Confidential client ID, for client-credentials grant.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Confidential client secret, for client-credentials grant.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Admin username, for resource-owner password grant.
    #[serde(default)]
    pub admin_username: Option<String>,
    /// Admin password, for resource-owner password grant.
    #[serde(default)]
    pub admin_password: Option<String>,
    /// Page size used by [`KeycloakClient::fetch_all_users`].
    #[serde(default = "KeycloakConfig::default_page_size")]
    pub page_size: u32,
    /// Shared secret validating `X-Keycloak-Signature` on webhook ingress.
    pub webhook_hmac_secret: String,
    /// Prefixes identifying service-account user names, excluded by default
    /// unless explicitly included by the reconcile exclusion policy.
    #[serde(default = "KeycloakConfig::default_service_account_prefixes")]
    pub service_account_prefixes: Vec<String>,
}

impl KeycloakConfig {
    #[must_use]
    fn default_page_size() -> u32 {
        500
    }

    #[must_use]
    fn default_service_account_prefixes() -> Vec<String> {
        vec!["service-account-".to_string()]
    }

    /// Resolve configured credentials into a [`Credentials`] value.
    fn credentials(&self) -> Result<Credentials, KeycloakError> {
        if let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) {
            return Ok(Credentials::ClientCredentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
            });
        }
        if let (Some(username), Some(password)) = (&self.admin_username, &self.admin_password) {
            return Ok(Credentials::AdminPassword {
                username: username.clone(),
                password: password.clone(),
            });
        }
        Err(KeycloakError::Authentication(
            "neither client-credentials nor admin-password credentials configured".into(),
        ))
    }
}

/// Keycloak admin REST client.
pub struct KeycloakClient {
    http: ClientWithMiddleware,
    tokens: Arc<TokenManager>,
    config: KeycloakConfig,
    breaker: AsyncRecloser,
    call_timeout: Duration,
}

impl KeycloakClient {
    /// Build a new client.
    ///
    /// # Errors
    ///
    /// Returns `Err` if no usable credential pair is configured.
    pub fn new(
        config: KeycloakConfig,
        http: ClientWithMiddleware,
        breaker: AsyncRecloser,
        call_timeout: Duration,
    ) -> Result<Self, KeycloakError> {
        let credentials = config.credentials()?;
        let tokens = TokenManager::new(config.url.clone(), config.realm.clone(), credentials);
        Ok(Self {
            http,
            tokens,
            config,
            breaker,
            call_timeout,
        })
    }

    /// Whether `username` matches a configured service-account prefix.
    #[must_use]
    pub fn is_service_account(&self, username: &str) -> bool {
        self.config
            .service_account_prefixes
            .iter()
            .any(|prefix| username.starts_with(prefix.as_str()))
    }

    async fn authorized_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<T, KeycloakError> {
        let url = format!("{}{path}", self.config.url.trim_end_matches('/'));
        let token = self.tokens.get_token(&self.http).await?;
        let send = || {
            let url = url.clone();
            let token = token.clone();
            async move {
                self.http
                    .get(&url)
                    .bearer_auth(&token)
                    .timeout(self.call_timeout)
                    .send()
                    .await
            }
        };
        let resp = send().await.map_err(|err| KeycloakError::Transient(err.to_string()))?;
        let resp = if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            let token = self.tokens.force_refresh(&self.http).await?;
            self.http
                .get(&url)
                .bearer_auth(&token)
                .timeout(self.call_timeout)
                .send()
                .await
                .map_err(|err| KeycloakError::Transient(err.to_string()))?
        } else {
            resp
        };
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(KeycloakError::NotFound(path.to_string()));
        }
        if !resp.status().is_success() {
            return Err(KeycloakError::Protocol(format!(
                "{path} returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|err| KeycloakError::Protocol(err.to_string()))
    }

    async fn guarded_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<T, KeycloakError> {
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_max_times(3);
        let result = (|| self.authorized_get::<T>(path))
            .retry(retry_policy)
            .when(KeycloakError::is_retriable)
            .notify(|err, dur| warn!(error = %err, delay = ?dur, "retrying keycloak call"))
            .await;
        self.breaker
            .call(async { result })
            .await
            .map_err(|err| match err {
                recloser::Error::Rejected => KeycloakError::CircuitOpen,
                recloser::Error::Inner(inner) => inner,
            })
    }

    /// Lightweight readiness check: confirms a token can be obtained
    /// without paging the full user directory.
    pub async fn health_check(&self) -> Result<(), KeycloakError> {
        self.tokens.get_token(&self.http).await?;
        Ok(())
    }

    /// Paginate through every user in the configured realm, filtering out
    /// disabled accounts and configured service-account prefixes.
    #[instrument(skip(self))]
    pub async fn fetch_all_users(&self) -> Result<Vec<KeycloakUser>, KeycloakError> {
        let mut users = Vec::new();
        let mut first = 0u32;
        loop {
            let path = format!(
                "/admin/realms/{}/users?first={first}&max={}&briefRepresentation=true",
                self.config.realm, self.config.page_size
            );
            let page: Vec<KeycloakUser> = self.guarded_get(&path).await?;
            let page_len = page.len() as u32;
            users.extend(
                page.into_iter()
                    .filter(|u| u.enabled && !self.is_service_account(&u.username)),
            );
            if page_len < self.config.page_size {
                break;
            }
            first += self.config.page_size;
            tokio::task::yield_now().await;
        }
        Ok(users)
    }

    /// Look up a single user by opaque Keycloak ID.
    #[instrument(skip(self))]
    pub async fn find_user_by_id(&self, id: &str) -> Result<KeycloakUser, KeycloakError> {
        let path = format!("/admin/realms/{}/users/{id}", self.config.realm);
        self.guarded_get(&path).await
    }

    /// Look up a single user by exact user name.
    #[instrument(skip(self))]
    pub async fn find_user_by_username(&self, name: &str) -> Result<KeycloakUser, KeycloakError> {
        let path = format!(
            "/admin/realms/{}/users?username={name}&exact=true",
            self.config.realm
        );
        let mut matches: Vec<KeycloakUser> = self.guarded_get(&path).await?;
        matches
            .pop()
            .ok_or_else(|| KeycloakError::NotFound(name.to_string()))
    }

    /// Look up the service-account user backing a client, by the client's
    /// opaque Keycloak ID.
    #[instrument(skip(self))]
    pub async fn find_service_account_user(
        &self,
        client_id: &str,
    ) -> Result<KeycloakUser, KeycloakError> {
        let path = format!(
            "/admin/realms/{}/clients/{client_id}/service-account-user",
            self.config.realm
        );
        self.guarded_get(&path).await
    }
}
