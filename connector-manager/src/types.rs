use chrono::{DateTime, Utc};
use conduit::pagination::{parse_state, PaginationConfig, PaginationSignal, PaginationState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Authentication scheme of a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    /// No authentication (public APIs).
    #[serde(rename = "none")]
    None,
    /// Single API key header, `X-API-Key` unless configured otherwise.
    #[serde(rename = "api_key")]
    ApiKey,
    /// `Authorization: Bearer <token>` from static config.
    #[serde(rename = "bearer")]
    Bearer,
    /// Token obtained through an OAuth2 `client_credentials` exchange.
    #[serde(rename = "oauth2_client_credentials")]
    OAuth2ClientCredentials,
    /// `Authorization: Basic <base64(user:pass)>`.
    #[serde(rename = "basic")]
    Basic,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::ApiKey => "api_key",
            AuthType::Bearer => "bearer",
            AuthType::OAuth2ClientCredentials => "oauth2_client_credentials",
            AuthType::Basic => "basic",
        }
    }
}

/// Lifecycle status of a connector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    #[default]
    Pending,
    Connected,
    Error,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStatus::Pending => "pending",
            ConnectorStatus::Connected => "connected",
            ConnectorStatus::Error => "error",
        }
    }
}

/// A registered external API.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub id: String,
    /// Owning tenant
    pub tenant_id: String,
    pub name: String,
    pub base_url: String,
    pub auth_type: AuthType,
    /// Scheme-specific settings (keys, secrets, token URL). Never logged.
    #[serde(default)]
    pub auth_config: Value,
    /// Declared requests-per-minute budget
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
    #[serde(default)]
    pub health_check_path: Option<String>,
    #[serde(default)]
    pub status: ConnectorStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// HTTP method used to poll an endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn as_reqwest_method(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Outcome of the most recent poll of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Success,
    Error,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Success => "success",
            PollStatus::Error => "error",
        }
    }
}

/// A pollable resource under a connector.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: String,
    pub connector_id: String,
    pub name: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Path relative to the connector's base URL
    pub path: String,
    /// Location of the data array in the response; the whole body when unset
    #[serde(default)]
    pub data_path: Option<String>,
    #[serde(default)]
    pub pagination: Option<PaginationConfig>,
    /// Static query parameters sent with every request
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON body for non-GET requests
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Serialized pagination state (or a legacy bare cursor)
    #[serde(default)]
    pub last_cursor: Option<String>,
    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_poll_status: Option<PollStatus>,
}

fn default_enabled() -> bool {
    true
}

impl Endpoint {
    /// Decoded pagination state, upgrading legacy bare cursors.
    pub fn pagination_state(&self) -> Option<PaginationState> {
        parse_state(self.last_cursor.as_deref())
    }
}

/// Partial connector update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectorPatch {
    pub status: Option<ConnectorStatus>,
}

/// Partial endpoint update. `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EndpointPatch {
    /// `Some(None)` clears the stored state
    pub last_cursor: Option<Option<String>>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_poll_status: Option<PollStatus>,
}

/// Health classification of a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Online,
    Degraded,
    Offline,
}

impl HealthState {
    /// Connector lifecycle status written back after a probe.
    pub fn connector_status(&self) -> ConnectorStatus {
        match self {
            HealthState::Online | HealthState::Degraded => ConnectorStatus::Connected,
            HealthState::Offline => ConnectorStatus::Error,
        }
    }
}

/// Result of a health probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: HealthState,
    pub last_checked: DateTime<Utc>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Record of the HTTP request behind a poll result.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLog {
    pub url: String,
    pub method: HttpMethod,
    /// HTTP status, absent when no response was received
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a single poll request.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub success: bool,
    pub data: Option<Value>,
    pub pagination: Option<PaginationSignal>,
    pub error: Option<String>,
    /// Rejected by the rate limiter before any network call
    pub rate_limited: bool,
    pub retry_after_ms: Option<u64>,
    pub request: Option<RequestLog>,
}

impl PollResult {
    pub fn failure(error: impl Into<String>, request: Option<RequestLog>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            request,
            ..Default::default()
        }
    }

    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self {
            success: false,
            error: Some("Rate limit exceeded".to_string()),
            rate_limited: true,
            retry_after_ms: Some(retry_after_ms),
            ..Default::default()
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.request.as_ref().and_then(|r| r.status)
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.request.as_ref().map(|r| r.latency_ms)
    }
}

/// Audit record written after every poll attempt that reached the executor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub action: String,
    pub connector_id: String,
    pub endpoint_id: Option<String>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// Per-endpoint entry of a batch poll.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPollResult {
    pub endpoint_id: String,
    pub result: PollResult,
}

/// Aggregate counts of a batch poll.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    /// Enabled endpoints of the connector
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub rate_limited: usize,
    /// Enabled endpoints not attempted after an early stop
    pub skipped: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollAllResult {
    pub success: bool,
    pub results: Vec<EndpointPollResult>,
    pub summary: PollSummary,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionDetails {
    pub auth_type: AuthType,
    pub auth_ok: bool,
    pub health: Option<HealthStatus>,
    pub endpoint_count: usize,
    pub enabled_endpoint_count: usize,
}

/// Operator-facing "Test Connection" summary.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionResult {
    pub success: bool,
    pub message: String,
    pub details: TestConnectionDetails,
}
