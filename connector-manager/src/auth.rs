//! Auth strategy resolver.
//!
//! Turns a connector's auth type and config blob into request headers. For
//! `oauth2_client_credentials` connectors the access token is obtained from
//! the configured token URL and cached per connector until it is within the
//! refresh skew of expiry.
//!
//! A token exchange failure fails the current poll only; the connector's
//! status is never touched here.

use crate::error::AuthError;
use crate::types::{AuthType, Connector};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use conduit::config::OAuthConfig;
use conduit::credentials::{CachedToken, TokenCache};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

/// Header used by `api_key` connectors that do not name one.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyAuth {
    #[serde(alias = "api_key", alias = "key")]
    api_key: Option<String>,
    #[serde(alias = "header_name")]
    header_name: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BearerAuth {
    #[serde(alias = "accessToken", alias = "access_token")]
    token: Option<String>,
}

#[derive(Default, Deserialize)]
struct BasicAuth {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientCredentialsAuth {
    #[serde(alias = "token_url")]
    token_url: Option<String>,
    #[serde(alias = "client_id")]
    client_id: Option<String>,
    #[serde(alias = "client_secret")]
    client_secret: Option<String>,
    scope: Option<String>,
    audience: Option<String>,
}

/// Token response from an OAuth2 token endpoint.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

fn decode<T: DeserializeOwned + Default>(config: &Value) -> Result<T, AuthError> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| AuthError::InvalidConfig(e.to_string()))
}

/// Treats absent and empty values alike.
fn require(value: Option<String>, auth_type: AuthType, field: &'static str) -> Result<String, AuthError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(AuthError::MissingCredential { auth_type, field })
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// Builds authentication headers for connectors.
pub struct AuthResolver {
    http_client: reqwest::Client,
    token_cache: Arc<TokenCache>,
    refresh_skew: Duration,
    default_expires_in: Duration,
    request_timeout: StdDuration,
    /// Cap on token endpoint error bodies kept in error messages
    error_body_limit: usize,
}

impl AuthResolver {
    pub fn new(
        http_client: reqwest::Client,
        token_cache: Arc<TokenCache>,
        config: &OAuthConfig,
        error_body_limit: usize,
    ) -> Self {
        Self {
            http_client,
            token_cache,
            refresh_skew: Duration::try_seconds(config.refresh_skew_secs).unwrap_or_else(Duration::zero),
            default_expires_in: Duration::try_seconds(config.default_expires_in_secs)
                .unwrap_or_else(|| Duration::hours(1)),
            request_timeout: StdDuration::from_secs(config.timeout_secs),
            error_body_limit,
        }
    }

    /// Returns the headers that authenticate a request to `connector`.
    pub async fn headers(&self, connector: &Connector) -> Result<BTreeMap<String, String>, AuthError> {
        let mut headers = BTreeMap::new();
        let auth_type = connector.auth_type;

        match auth_type {
            AuthType::None => {}
            AuthType::ApiKey => {
                let config: ApiKeyAuth = decode(&connector.auth_config)?;
                let key = require(config.api_key, auth_type, "apiKey")?;
                let header = config
                    .header_name
                    .filter(|h| !h.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string());
                headers.insert(header, key);
            }
            AuthType::Bearer => {
                let config: BearerAuth = decode(&connector.auth_config)?;
                let token = require(config.token, auth_type, "token")?;
                headers.insert("Authorization".to_string(), format!("Bearer {}", token));
            }
            AuthType::Basic => {
                let config: BasicAuth = decode(&connector.auth_config)?;
                let username = require(config.username, auth_type, "username")?;
                let password = require(config.password, auth_type, "password")?;
                let encoded = BASE64.encode(format!("{}:{}", username, password));
                headers.insert("Authorization".to_string(), format!("Basic {}", encoded));
            }
            AuthType::OAuth2ClientCredentials => {
                let token = self.client_credentials_token(connector).await?;
                headers.insert("Authorization".to_string(), format!("Bearer {}", token));
            }
        }

        Ok(headers)
    }

    /// Drops any cached token for `connector_id`.
    pub fn invalidate(&self, connector_id: &str) {
        self.token_cache.invalidate(connector_id);
    }

    /// Returns a cached access token or performs a client-credentials exchange.
    async fn client_credentials_token(&self, connector: &Connector) -> Result<String, AuthError> {
        if let Some(token) = self.token_cache.get_valid(&connector.id, self.refresh_skew) {
            debug!(connector_id = %connector.id, "Using cached OAuth2 access token");
            return Ok(token);
        }

        let auth_type = AuthType::OAuth2ClientCredentials;
        let config: ClientCredentialsAuth = decode(&connector.auth_config)?;
        let token_url = require(config.token_url, auth_type, "tokenUrl")?;
        let client_id = require(config.client_id, auth_type, "clientId")?;
        let client_secret = require(config.client_secret, auth_type, "clientSecret")?;

        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = config.scope.filter(|s| !s.is_empty()) {
            form.push(("scope", scope));
        }
        if let Some(audience) = config.audience.filter(|a| !a.is_empty()) {
            form.push(("audience", audience));
        }

        info!(connector_id = %connector.id, "Exchanging client credentials for access token");

        let response = self
            .http_client
            .post(&token_url)
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::TokenRequest(format!(
                        "token request timed out after {}s",
                        self.request_timeout.as_secs()
                    ))
                } else {
                    AuthError::TokenRequest(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(connector_id = %connector.id, status, "OAuth2 token exchange rejected");
            return Err(AuthError::TokenExchange {
                status,
                body: truncate(&body, self.error_body_limit),
            });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenRequest(format!("failed to parse token response: {}", e)))?;

        let expires_in = self.token_lifetime(token_response.expires_in);
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(expires_in)
            .or_else(|| now.checked_add_signed(self.default_expires_in))
            .unwrap_or(now);

        self.token_cache.insert(
            &connector.id,
            CachedToken {
                access_token: token_response.access_token.clone(),
                expires_at,
            },
        );

        info!(
            connector_id = %connector.id,
            expires_in_secs = expires_in.num_seconds(),
            "OAuth2 access token cached"
        );

        Ok(token_response.access_token)
    }

    /// Lifetime reported by the token endpoint, or the configured default
    /// when it is absent or out of range.
    fn token_lifetime(&self, expires_in: Option<i64>) -> Duration {
        match expires_in {
            Some(secs) => match Duration::try_seconds(secs.max(0)) {
                Some(lifetime) if lifetime <= Duration::days(3650) => lifetime,
                _ => {
                    warn!(expires_in = secs, "Ignoring out-of-range token lifetime");
                    self.default_expires_in
                }
            },
            None => self.default_expires_in,
        }
    }
}
