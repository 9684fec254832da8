//! Request executor.
//!
//! Performs one HTTP call for an endpoint and turns whatever happens into a
//! [`PollResult`]. Nothing in here returns an error to the caller: bad URLs,
//! auth failures, transport errors, timeouts and non-2xx responses all become
//! failure results with a diagnostic message.

use crate::auth::{truncate, AuthResolver};
use crate::types::{AuthType, Connector, Endpoint, HttpMethod, PollResult, RequestLog};
use anyhow::Context;
use chrono::Utc;
use conduit::config::HttpConfig;
use conduit::extract::extract_path;
use conduit::pagination::{build_query, extract_signal, PaginationState};
use conduit::rate_limit::RateLimiter;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Issues poll requests and extracts data plus pagination signals.
pub struct RequestExecutor {
    http_client: Client,
    auth: Arc<AuthResolver>,
    rate_limiter: Arc<RateLimiter>,
    request_timeout: Duration,
    error_body_limit: usize,
}

impl RequestExecutor {
    pub fn new(
        http_client: Client,
        auth: Arc<AuthResolver>,
        rate_limiter: Arc<RateLimiter>,
        config: &HttpConfig,
    ) -> Self {
        Self {
            http_client,
            auth,
            rate_limiter,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            error_body_limit: config.error_body_limit,
        }
    }

    /// Polls `endpoint` once, resuming from `state`.
    ///
    /// The request is recorded against the connector's rate limit window
    /// right before it is sent. Admission is the caller's job.
    pub async fn execute(
        &self,
        connector: &Connector,
        endpoint: &Endpoint,
        state: Option<&PaginationState>,
    ) -> PollResult {
        let url = match build_url(connector, endpoint, state) {
            Ok(url) => url,
            Err(e) => {
                warn!(endpoint_id = %endpoint.id, error = %e, "Invalid endpoint URL");
                return PollResult::failure(format!("Invalid request URL: {:#}", e), None);
            }
        };

        let auth_headers = match self.auth.headers(connector).await {
            Ok(headers) => headers,
            Err(e) => {
                warn!(
                    connector_id = %connector.id,
                    endpoint_id = %endpoint.id,
                    error = %e,
                    "Authentication failed"
                );
                return PollResult::failure(format!("Authentication failed: {}", e), None);
            }
        };

        let headers = match merge_headers(&endpoint.headers, &auth_headers) {
            Ok(headers) => headers,
            Err(e) => {
                warn!(endpoint_id = %endpoint.id, error = %e, "Invalid request headers");
                return PollResult::failure(format!("Invalid request headers: {:#}", e), None);
            }
        };

        let mut request = self
            .http_client
            .request(endpoint.method.as_reqwest_method(), url.clone())
            .timeout(self.request_timeout)
            .headers(headers);
        if let Some(body) = &endpoint.body {
            if endpoint.method != HttpMethod::Get {
                request = request.json(body);
            }
        }

        self.rate_limiter.record_request(&connector.id);
        debug!(
            connector_id = %connector.id,
            endpoint_id = %endpoint.id,
            method = endpoint.method.as_str(),
            url = %url,
            "Issuing poll request"
        );

        let timestamp = Utc::now();
        let started = Instant::now();
        let request_log = |status: Option<u16>| RequestLog {
            url: url.to_string(),
            method: endpoint.method,
            status,
            latency_ms: started.elapsed().as_millis() as u64,
            timestamp,
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let message = describe_transport_error(&e);
                warn!(
                    connector_id = %connector.id,
                    endpoint_id = %endpoint.id,
                    error = %message,
                    "Poll request failed"
                );
                return PollResult::failure(message, Some(request_log(None)));
            }
        };

        let status = response.status();
        let body = response.text().await;
        let log = request_log(Some(status.as_u16()));
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                warn!(endpoint_id = %endpoint.id, error = %e, "Failed to read response body");
                return PollResult::failure(format!("Failed to read response body: {}", e), Some(log));
            }
        };

        if !status.is_success() {
            warn!(
                connector_id = %connector.id,
                endpoint_id = %endpoint.id,
                status = status.as_u16(),
                latency_ms = log.latency_ms,
                "Poll request returned non-success status"
            );
            if status == StatusCode::UNAUTHORIZED && connector.auth_type == AuthType::OAuth2ClientCredentials {
                self.auth.invalidate(&connector.id);
            }
            return PollResult::failure(
                format!("HTTP {}: {}", status.as_u16(), truncate(&body, self.error_body_limit)),
                Some(log),
            );
        }

        let response_json = if body.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&body) {
                Ok(value) => value,
                Err(e) => {
                    warn!(endpoint_id = %endpoint.id, error = %e, "Response body is not JSON");
                    return PollResult::failure(format!("Invalid JSON response: {}", e), Some(log));
                }
            }
        };

        let data = match endpoint.data_path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => extract_path(&response_json, path).cloned(),
            None if response_json.is_null() => None,
            None => Some(response_json.clone()),
        };

        let pagination = endpoint
            .pagination
            .as_ref()
            .map(|config| extract_signal(config, &response_json, data.as_ref(), state));

        debug!(
            endpoint_id = %endpoint.id,
            status = status.as_u16(),
            latency_ms = log.latency_ms,
            has_more = pagination.as_ref().map(|p| p.has_more).unwrap_or(false),
            "Poll request succeeded"
        );

        PollResult {
            success: true,
            data,
            pagination,
            request: Some(log),
            ..Default::default()
        }
    }
}

/// Joins a base URL and a relative path with exactly one slash between them.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim();
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Base URL + endpoint path, then static query params, then pagination params.
pub fn build_url(
    connector: &Connector,
    endpoint: &Endpoint,
    state: Option<&PaginationState>,
) -> anyhow::Result<Url> {
    let joined = join_url(&connector.base_url, &endpoint.path);
    let mut url = Url::parse(&joined).with_context(|| format!("'{}' is not a valid URL", joined))?;

    let mut params: Vec<(String, String)> = endpoint
        .query_params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(config) = &endpoint.pagination {
        params.extend(build_query(config, state));
    }

    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &params {
            pairs.append_pair(key, value);
        }
    }

    Ok(url)
}

/// `Accept: application/json`, then endpoint headers, then auth headers.
///
/// Names compare case-insensitively and a later header replaces an earlier
/// one, so auth headers win over endpoint headers of the same name.
pub(crate) fn merge_headers(
    endpoint_headers: &BTreeMap<String, String>,
    auth_headers: &BTreeMap<String, String>,
) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    for (name, value) in endpoint_headers.iter().chain(auth_headers.iter()) {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid header name '{}'", name))?;
        let header_value =
            HeaderValue::from_str(value).with_context(|| format!("invalid value for header '{}'", name))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("Request timed out: {}", e)
    } else if e.is_connect() {
        format!("Connection failed: {}", e)
    } else {
        format!("Request failed: {}", e)
    }
}
