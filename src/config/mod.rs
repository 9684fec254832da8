use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Outbound HTTP configuration for the poll path
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Upper bound on a single poll request (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Maximum characters of a non-2xx response body kept in a failure result
    #[serde(default = "default_error_body_limit")]
    pub error_body_limit: usize,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    "conduit-connector/1.0".to_string()
}

fn default_error_body_limit() -> usize {
    500
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            error_body_limit: default_error_body_limit(),
        }
    }
}

/// Health probe configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    /// Latency above which a reachable connector is reported as degraded
    #[serde(default = "default_degraded_latency")]
    pub degraded_latency_ms: u64,
    /// Path probed when a connector declares no health-check path
    #[serde(default = "default_health_path")]
    pub default_path: String,
}

fn default_health_timeout() -> u64 {
    30
}

fn default_degraded_latency() -> u64 {
    5000
}

fn default_health_path() -> String {
    "/".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_health_timeout(),
            degraded_latency_ms: default_degraded_latency(),
            default_path: default_health_path(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Budget applied to connectors that declare none
    #[serde(default = "default_requests_per_minute")]
    pub default_requests_per_minute: u32,
}

fn default_requests_per_minute() -> u32 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_requests_per_minute: default_requests_per_minute(),
        }
    }
}

/// OAuth2 client-credentials configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Cached tokens this close to expiry are re-exchanged (seconds)
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_secs: i64,
    /// Lifetime assumed when a token response carries no `expires_in`
    #[serde(default = "default_expires_in")]
    pub default_expires_in_secs: i64,
    /// Upper bound on a token exchange request (seconds)
    #[serde(default = "default_token_timeout")]
    pub timeout_secs: u64,
}

fn default_refresh_skew() -> i64 {
    60
}

fn default_expires_in() -> i64 {
    3600
}

fn default_token_timeout() -> u64 {
    30
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            refresh_skew_secs: default_refresh_skew(),
            default_expires_in_secs: default_expires_in(),
            timeout_secs: default_token_timeout(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "conduit.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Load configuration if the file exists, otherwise fall back to defaults.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    let path = path.as_ref();
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "Config file not found, using defaults");
        Ok(EngineConfig::default())
    }
}
