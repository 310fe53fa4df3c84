//! Access token lifecycle for the Keycloak admin client.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::keycloak::errors::KeycloakError;

/// Fraction of a token's lifetime after which it is proactively refreshed.
const REFRESH_AT_FRACTION: f64 = 0.9;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    acquired_at: Instant,
    expires_in: Duration,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        let age = self.acquired_at.elapsed();
        let refresh_at = self.expires_in.mul_f64(REFRESH_AT_FRACTION);
        age < refresh_at
    }
}

/// How the admin client authenticates against Keycloak.
#[derive(Clone, Debug)]
pub enum Credentials {
    /// OAuth2 client-credentials grant.
    ClientCredentials {
        /// Confidential client ID.
        client_id: String,
        /// Confidential client secret.
        client_secret: String,
    },
    /// Resource-owner password grant using an admin account.
    AdminPassword {
        /// Admin username.
        username: String,
        /// Admin password.
        password: String,
    },
}

/// Single-flighted access-token cache.
///
/// Refresh is serialised across concurrent callers: the mutex is held for
/// the duration of the token request, so only one refresh is ever in
/// flight and every other caller observes the refreshed token.
pub struct TokenManager {
    base_url: String,
    realm: String,
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    /// Construct a new token manager. Does not perform any I/O.
    #[must_use]
    pub fn new(base_url: String, realm: String, credentials: Credentials) -> Arc<Self> {
        Arc::new(Self {
            base_url,
            realm,
            credentials,
            cached: Mutex::new(None),
        })
    }

    /// Get a currently-valid access token, refreshing it if needed.
    pub async fn get_token(&self, http: &ClientWithMiddleware) -> Result<String, KeycloakError> {
        let mut guard = self.cached.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.is_fresh() {
                return Ok(token.access_token.clone());
            }
        }
        let fresh = self.fetch_token(http).await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }

    /// Force a refresh regardless of freshness, used after a 401 response.
    pub async fn force_refresh(&self, http: &ClientWithMiddleware) -> Result<String, KeycloakError> {
        let mut guard = self.cached.lock().await;
        let fresh = self.fetch_token(http).await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }

    async fn fetch_token(&self, http: &ClientWithMiddleware) -> Result<CachedToken, KeycloakError> {
        let url = format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.base_url.trim_end_matches('/'),
            self.realm
        );
        let form: Vec<(&str, &str)> = match &self.credentials {
            Credentials::ClientCredentials {
                client_id,
                client_secret,
            } => vec![
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ],
            Credentials::AdminPassword { username, password } => vec![
                ("grant_type", "password"),
                ("client_id", "admin-cli"),
                ("username", username),
                ("password", password),
            ],
        };
        debug!(url = %url, "requesting keycloak access token");
        let resp = http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|err| KeycloakError::Transient(err.to_string()))?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(KeycloakError::Authentication(
                "token endpoint rejected credentials".into(),
            ));
        }
        if !resp.status().is_success() {
            return Err(KeycloakError::Protocol(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }
        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|err| KeycloakError::Protocol(err.to_string()))?;
        Ok(CachedToken {
            access_token: parsed.access_token,
            acquired_at: Instant::now(),
            expires_in: Duration::from_secs(parsed.expires_in),
        })
    }
}
