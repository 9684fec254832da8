//! Health and test-connection probes.
//!
//! A health check is one GET against the connector's health path with its own
//! timeout, independent of the poll path and the rate limiter. The last result
//! per connector is cached in memory.

use crate::auth::AuthResolver;
use crate::error::AuthError;
use crate::executor::join_url;
use crate::types::{
    Connector, Endpoint, HealthState, HealthStatus, TestConnectionDetails, TestConnectionResult,
};
use chrono::Utc;
use conduit::config::HealthConfig;
use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Classifies a probe outcome.
///
/// No status means the request never got a response.
pub fn classify(status: Option<u16>, latency_ms: u64, degraded_latency_ms: u64) -> HealthState {
    match status {
        None => HealthState::Offline,
        Some(code) if code >= 500 => HealthState::Offline,
        Some(code) if code >= 400 => HealthState::Degraded,
        Some(_) if latency_ms > degraded_latency_ms => HealthState::Degraded,
        Some(_) => HealthState::Online,
    }
}

pub struct HealthProbe {
    http_client: Client,
    auth: Arc<AuthResolver>,
    cache: DashMap<String, HealthStatus>,
    timeout: Duration,
    degraded_latency_ms: u64,
    default_path: String,
}

impl HealthProbe {
    pub fn new(http_client: Client, auth: Arc<AuthResolver>, config: &HealthConfig) -> Self {
        Self {
            http_client,
            auth,
            cache: DashMap::new(),
            timeout: Duration::from_secs(config.timeout_secs),
            degraded_latency_ms: config.degraded_latency_ms,
            default_path: config.default_path.clone(),
        }
    }

    /// Probes `connector` and caches the result.
    pub async fn check(&self, connector: &Connector) -> HealthStatus {
        let path = connector
            .health_check_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(self.default_path.as_str());
        let url = join_url(&connector.base_url, path);

        let mut request = self.http_client.get(&url).timeout(self.timeout);
        // Credentials are attached when resolvable; resolution problems are
        // reported by test_connection, not by the probe
        match tokio::time::timeout(self.timeout, self.auth.headers(connector)).await {
            Ok(Ok(headers)) => {
                for (name, value) in &headers {
                    request = request.header(name.as_str(), value.as_str());
                }
            }
            Ok(Err(e)) => debug!(connector_id = %connector.id, error = %e, "Probing without credentials"),
            Err(_) => warn!(
                connector_id = %connector.id,
                timeout_secs = self.timeout.as_secs(),
                "Credential resolution timed out, probing without credentials"
            ),
        }

        let started = Instant::now();
        let outcome = request.send().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let health = match outcome {
            Ok(response) => {
                let code = response.status().as_u16();
                let status = classify(Some(code), latency_ms, self.degraded_latency_ms);
                let error = match status {
                    HealthState::Online => None,
                    _ if response.status().is_success() => {
                        Some(format!("Slow response: {}ms", latency_ms))
                    }
                    _ => Some(format!("HTTP {}", code)),
                };
                HealthStatus {
                    status,
                    last_checked: Utc::now(),
                    latency_ms: Some(latency_ms),
                    error,
                }
            }
            Err(e) => HealthStatus {
                status: HealthState::Offline,
                last_checked: Utc::now(),
                latency_ms: None,
                error: Some(if e.is_timeout() {
                    format!("Timed out after {}s", self.timeout.as_secs())
                } else {
                    e.to_string()
                }),
            },
        };

        info!(
            connector_id = %connector.id,
            status = ?health.status,
            latency_ms = health.latency_ms,
            "Health check completed"
        );

        self.cache.insert(connector.id.clone(), health.clone());
        health
    }

    /// Last probe result for `connector_id`, without network I/O.
    pub fn cached(&self, connector_id: &str) -> Option<HealthStatus> {
        self.cache.get(connector_id).map(|entry| entry.value().clone())
    }
}

/// Folds an auth check, a health probe and the endpoint list into a single
/// pass/fail summary.
pub fn summarize_test(
    connector: &Connector,
    auth: Result<(), AuthError>,
    health: HealthStatus,
    endpoints: &[Endpoint],
) -> TestConnectionResult {
    let auth_ok = auth.is_ok();
    let message = match (&auth, health.status) {
        (Err(e), _) => format!("Authentication check failed: {}", e),
        (Ok(()), HealthState::Offline) => format!(
            "Connector is unreachable: {}",
            health.error.as_deref().unwrap_or("no response")
        ),
        (Ok(()), HealthState::Degraded) => format!(
            "Connected with degraded health: {}",
            health.error.as_deref().unwrap_or("slow response")
        ),
        (Ok(()), HealthState::Online) => "Connection successful".to_string(),
    };

    TestConnectionResult {
        success: auth_ok && health.status != HealthState::Offline,
        message,
        details: TestConnectionDetails {
            auth_type: connector.auth_type,
            auth_ok,
            endpoint_count: endpoints.len(),
            enabled_endpoint_count: endpoints.iter().filter(|e| e.is_enabled).count(),
            health: Some(health),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::{connector, endpoint};
    use crate::types::AuthType;
    use conduit::config::OAuthConfig;
    use conduit::credentials::TokenCache;
    use mockito::Server;

    fn probe() -> HealthProbe {
        let client = Client::new();
        let auth = Arc::new(AuthResolver::new(
            client.clone(),
            Arc::new(TokenCache::new()),
            &OAuthConfig::default(),
            500,
        ));
        HealthProbe::new(client, auth, &HealthConfig::default())
    }

    fn status(state: HealthState) -> HealthStatus {
        HealthStatus {
            status: state,
            last_checked: Utc::now(),
            latency_ms: Some(10),
            error: None,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(None, 0, 5000), HealthState::Offline);
        assert_eq!(classify(Some(503), 10, 5000), HealthState::Offline);
        assert_eq!(classify(Some(404), 10, 5000), HealthState::Degraded);
        assert_eq!(classify(Some(200), 5001, 5000), HealthState::Degraded);
        assert_eq!(classify(Some(200), 5000, 5000), HealthState::Online);
        assert_eq!(classify(Some(204), 10, 5000), HealthState::Online);
    }

    #[tokio::test]
    async fn test_probe_online_with_auth_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_header("X-API-Key", "secret-key")
            .with_status(200)
            .create_async()
            .await;

        let probe = probe();
        let c = connector("conn-1", &server.url());
        let health = probe.check(&c).await;

        mock.assert_async().await;
        assert_eq!(health.status, HealthState::Online);
        assert!(health.latency_ms.is_some());
        assert!(health.error.is_none());
        assert_eq!(probe.cached("conn-1"), Some(health));
    }

    #[tokio::test]
    async fn test_probe_uses_configured_path() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/status")
            .with_status(404)
            .create_async()
            .await;

        let probe = probe();
        let mut c = connector("conn-1", &server.url());
        c.health_check_path = Some("status".to_string());
        let health = probe.check(&c).await;

        mock.assert_async().await;
        assert_eq!(health.status, HealthState::Degraded);
        assert_eq!(health.error.as_deref(), Some("HTTP 404"));
    }

    #[tokio::test]
    async fn test_probe_server_error_is_offline() {
        let mut server = Server::new_async().await;
        let _mock = server.mock("GET", "/").with_status(502).create_async().await;

        let probe = probe();
        let c = connector("conn-1", &server.url());
        assert_eq!(probe.check(&c).await.status, HealthState::Offline);
    }

    #[tokio::test]
    async fn test_probe_unreachable_is_offline() {
        let probe = probe();
        let c = connector("conn-1", "http://127.0.0.1:1");
        let health = probe.check(&c).await;
        assert_eq!(health.status, HealthState::Offline);
        assert!(health.latency_ms.is_none());
        assert!(health.error.is_some());
    }

    #[tokio::test]
    async fn test_probe_without_resolvable_credentials() {
        let mut server = Server::new_async().await;
        let _mock = server.mock("GET", "/").with_status(200).create_async().await;

        let probe = probe();
        let mut c = connector("conn-1", &server.url());
        c.auth_type = AuthType::Bearer;
        c.auth_config = serde_json::json!({});
        assert_eq!(probe.check(&c).await.status, HealthState::Online);
    }

    #[tokio::test]
    async fn test_probe_bounds_credential_resolution() {
        let mut server = Server::new_async().await;
        let _mock = server.mock("GET", "/").with_status(200).create_async().await;

        // Token endpoint that accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let token_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = Client::new();
        let auth = Arc::new(AuthResolver::new(
            client.clone(),
            Arc::new(TokenCache::new()),
            &OAuthConfig::default(),
            500,
        ));
        let probe = HealthProbe::new(
            client,
            auth,
            &HealthConfig {
                timeout_secs: 1,
                ..HealthConfig::default()
            },
        );
        let mut c = connector("conn-1", &server.url());
        c.auth_type = AuthType::OAuth2ClientCredentials;
        c.auth_config = serde_json::json!({
            "tokenUrl": format!("http://{}/token", token_addr),
            "clientId": "cid",
            "clientSecret": "secret"
        });

        let health = tokio::time::timeout(Duration::from_secs(10), probe.check(&c))
            .await
            .expect("health probe did not honor its timeout");
        assert_eq!(health.status, HealthState::Online);
    }

    #[test]
    fn test_cached_absent() {
        assert!(probe().cached("nope").is_none());
    }

    #[test]
    fn test_summarize_success() {
        let c = connector("conn-1", "http://localhost");
        let mut disabled = endpoint("ep-2", "conn-1");
        disabled.is_enabled = false;
        let endpoints = vec![endpoint("ep-1", "conn-1"), disabled];

        let result = summarize_test(&c, Ok(()), status(HealthState::Online), &endpoints);
        assert!(result.success);
        assert_eq!(result.message, "Connection successful");
        assert!(result.details.auth_ok);
        assert_eq!(result.details.endpoint_count, 2);
        assert_eq!(result.details.enabled_endpoint_count, 1);
    }

    #[test]
    fn test_summarize_degraded_still_passes() {
        let c = connector("conn-1", "http://localhost");
        let result = summarize_test(&c, Ok(()), status(HealthState::Degraded), &[]);
        assert!(result.success);
    }

    #[test]
    fn test_summarize_failures() {
        let c = connector("conn-1", "http://localhost");

        let offline = summarize_test(&c, Ok(()), status(HealthState::Offline), &[]);
        assert!(!offline.success);
        assert!(offline.message.starts_with("Connector is unreachable"));

        let bad_auth = summarize_test(
            &c,
            Err(AuthError::InvalidConfig("bad".to_string())),
            status(HealthState::Online),
            &[],
        );
        assert!(!bad_auth.success);
        assert!(!bad_auth.details.auth_ok);
        assert!(bad_auth.message.starts_with("Authentication check failed"));
    }
}
