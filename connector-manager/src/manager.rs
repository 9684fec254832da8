//! Connector manager - Orchestrates polling for registered connectors.
//!
//! Loads connector and endpoint records from the store, gates requests
//! through the rate limiter, delegates to the request executor, and writes
//! pagination state, poll status and audit entries back.
//!
//! The manager has no scheduler of its own. Callers decide when to poll and
//! must not poll the same endpoint concurrently: pagination state is read
//! before the request and written after it, with no lock in between.

use crate::auth::AuthResolver;
use crate::error::EngineError;
use crate::executor::RequestExecutor;
use crate::health::{summarize_test, HealthProbe};
use crate::store::ConnectorStore;
use crate::types::{
    AuditEntry, Connector, ConnectorPatch, Endpoint, EndpointPatch, EndpointPollResult, HealthStatus,
    PollAllResult, PollResult, PollStatus, PollSummary, TestConnectionResult,
};
use anyhow::Context;
use chrono::Utc;
use conduit::config::EngineConfig;
use conduit::credentials::TokenCache;
use conduit::pagination::{advance_state, serialize_state, StateUpdate};
use conduit::rate_limit::{RateLimitStatus, RateLimiter};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Audit action recorded for every poll attempt that reached the executor.
pub const POLL_AUDIT_ACTION: &str = "connector.poll";

/// Connector manager - the polling engine's public entry points.
///
/// # Responsibilities
/// - Validate connector/endpoint existence and tenant ownership
/// - Apply the per-connector rate limit before any network call
/// - Persist the next pagination state after a successful poll
/// - Record poll outcomes and audit entries
/// - Run health checks and operator connection tests
pub struct ConnectorManager {
    /// Storage collaborator for connectors, endpoints and audit entries
    store: Arc<dyn ConnectorStore>,
    /// Sliding-window admission per connector
    rate_limiter: Arc<RateLimiter>,
    auth: Arc<AuthResolver>,
    executor: RequestExecutor,
    health: HealthProbe,
    /// Budget for connectors that declare no rate limit
    default_budget: u32,
}

impl ConnectorManager {
    /// Creates a manager with fresh rate limit windows and token cache.
    ///
    /// # Arguments
    /// * `store` - Storage collaborator
    /// * `config` - Engine configuration (timeouts, defaults)
    pub fn new(store: Arc<dyn ConnectorStore>, config: &EngineConfig) -> anyhow::Result<Self> {
        Self::with_components(
            store,
            config,
            Arc::new(RateLimiter::new()),
            Arc::new(TokenCache::new()),
        )
    }

    /// Creates a manager around existing rate limiter and token cache instances.
    ///
    /// Lets several managers in one process share budgets and tokens.
    pub fn with_components(
        store: Arc<dyn ConnectorStore>,
        config: &EngineConfig,
        rate_limiter: Arc<RateLimiter>,
        token_cache: Arc<TokenCache>,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.http.user_agent.as_str())
            .build()
            .context("Failed to build HTTP client")?;

        let auth = Arc::new(AuthResolver::new(
            http_client.clone(),
            token_cache,
            &config.oauth,
            config.http.error_body_limit,
        ));
        let executor = RequestExecutor::new(
            http_client.clone(),
            Arc::clone(&auth),
            Arc::clone(&rate_limiter),
            &config.http,
        );
        let health = HealthProbe::new(http_client, Arc::clone(&auth), &config.health);

        Ok(Self {
            store,
            rate_limiter,
            auth,
            executor,
            health,
            default_budget: config.rate_limit.default_requests_per_minute,
        })
    }

    /// Polls a single endpoint once.
    ///
    /// Returns `Err` only for unknown/foreign records, disabled endpoints and
    /// storage failures. Rate limiting, auth failures and HTTP errors come back
    /// as unsuccessful [`PollResult`]s.
    ///
    /// # Arguments
    /// * `connector_id` - Connector that owns the endpoint
    /// * `endpoint_id` - Endpoint to poll
    /// * `tenant_id` - Tenant the caller acts for; must own the connector
    pub async fn poll_endpoint(
        &self,
        connector_id: &str,
        endpoint_id: &str,
        tenant_id: &str,
    ) -> Result<PollResult, EngineError> {
        let connector = self.load_connector(connector_id, Some(tenant_id)).await?;

        let endpoint = self
            .store
            .get_endpoint(endpoint_id)
            .await?
            .filter(|e| e.connector_id == connector.id)
            .ok_or_else(|| EngineError::EndpointNotFound(endpoint_id.to_string()))?;

        if !endpoint.is_enabled {
            return Err(EngineError::EndpointDisabled(endpoint.id));
        }

        self.poll_loaded(&connector, &endpoint).await
    }

    /// Polls every enabled endpoint of a connector in id order.
    ///
    /// Stops at the first rate-limited endpoint; the remaining endpoints are
    /// counted as skipped. A storage failure on one endpoint is reported as a
    /// failed result and polling continues.
    pub async fn poll_all_endpoints(
        &self,
        connector_id: &str,
        tenant_id: &str,
    ) -> Result<PollAllResult, EngineError> {
        let connector = self.load_connector(connector_id, Some(tenant_id)).await?;

        let endpoints: Vec<Endpoint> = self
            .store
            .list_endpoints(&connector.id)
            .await?
            .into_iter()
            .filter(|e| e.is_enabled)
            .collect();

        let mut summary = PollSummary {
            total: endpoints.len(),
            ..Default::default()
        };
        let mut results = Vec::with_capacity(endpoints.len());

        info!(
            connector_id = %connector.id,
            endpoint_count = endpoints.len(),
            "Polling all endpoints"
        );

        for (index, endpoint) in endpoints.iter().enumerate() {
            let result = match self.poll_loaded(&connector, endpoint).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        connector_id = %connector.id,
                        endpoint_id = %endpoint.id,
                        error = %e,
                        "Endpoint poll failed"
                    );
                    PollResult::failure(e.to_string(), None)
                }
            };

            let rate_limited = result.rate_limited;
            if rate_limited {
                summary.rate_limited += 1;
            } else if result.success {
                summary.successful += 1;
            } else {
                summary.failed += 1;
            }

            results.push(EndpointPollResult {
                endpoint_id: endpoint.id.clone(),
                result,
            });

            if rate_limited {
                summary.skipped = endpoints.len() - index - 1;
                warn!(
                    connector_id = %connector.id,
                    skipped = summary.skipped,
                    "Rate limit reached, stopping batch poll"
                );
                break;
            }
        }

        info!(
            connector_id = %connector.id,
            successful = summary.successful,
            failed = summary.failed,
            rate_limited = summary.rate_limited,
            "Batch poll finished"
        );

        Ok(PollAllResult {
            success: summary.failed == 0,
            results,
            summary,
        })
    }

    /// Probes a connector and writes the outcome to its status.
    pub async fn check_health(&self, connector_id: &str) -> Result<HealthStatus, EngineError> {
        let connector = self.load_connector(connector_id, None).await?;
        Ok(self.probe(&connector).await)
    }

    /// Last health probe result, if any, without network I/O.
    pub fn cached_health(&self, connector_id: &str) -> Option<HealthStatus> {
        self.health.cached(connector_id)
    }

    /// Resolves credentials, probes health and counts endpoints.
    pub async fn test_connection(&self, connector_id: &str) -> Result<TestConnectionResult, EngineError> {
        let connector = self.load_connector(connector_id, None).await?;

        let auth = self.auth.headers(&connector).await.map(|_| ());
        let health = self.probe(&connector).await;
        let endpoints = self.store.list_endpoints(&connector.id).await?;

        let result = summarize_test(&connector, auth, health, &endpoints);
        info!(
            connector_id = %connector.id,
            success = result.success,
            "Connection test finished"
        );
        Ok(result)
    }

    /// Current rate limit window usage for a connector.
    pub async fn get_rate_limit_status(&self, connector_id: &str) -> Result<RateLimitStatus, EngineError> {
        let connector = self.load_connector(connector_id, None).await?;
        Ok(self.rate_limiter.status(&connector.id, self.budget(&connector)))
    }

    fn budget(&self, connector: &Connector) -> u32 {
        connector.rate_limit_per_minute.unwrap_or(self.default_budget)
    }

    /// Loads a connector, hiding connectors owned by other tenants.
    async fn load_connector(&self, connector_id: &str, tenant_id: Option<&str>) -> Result<Connector, EngineError> {
        let connector = self
            .store
            .get_connector(connector_id)
            .await?
            .ok_or_else(|| EngineError::ConnectorNotFound(connector_id.to_string()))?;

        if let Some(tenant_id) = tenant_id {
            if connector.tenant_id != tenant_id {
                warn!(
                    connector_id = %connector_id,
                    tenant_id = %tenant_id,
                    "Connector requested by a tenant that does not own it"
                );
                return Err(EngineError::ConnectorNotFound(connector_id.to_string()));
            }
        }

        Ok(connector)
    }

    /// Runs a health probe and writes the derived connector status back.
    async fn probe(&self, connector: &Connector) -> HealthStatus {
        let health = self.health.check(connector).await;
        let status = health.status.connector_status();
        if let Err(e) = self
            .store
            .update_connector(&connector.id, ConnectorPatch { status: Some(status) })
            .await
        {
            warn!(connector_id = %connector.id, error = %e, "Failed to record connector status");
        }
        health
    }

    async fn poll_loaded(&self, connector: &Connector, endpoint: &Endpoint) -> Result<PollResult, EngineError> {
        let decision = self
            .rate_limiter
            .check_rate_limit(&connector.id, self.budget(connector));
        if !decision.allowed {
            warn!(
                connector_id = %connector.id,
                endpoint_id = %endpoint.id,
                reset_in_ms = decision.reset_in_ms,
                "Rate limit exceeded, poll deferred"
            );
            return Ok(PollResult::rate_limited(decision.reset_in_ms));
        }

        let previous = endpoint.pagination_state();
        let result = self.executor.execute(connector, endpoint, previous.as_ref()).await;

        let last_cursor = match (&endpoint.pagination, &result.pagination) {
            (Some(config), Some(signal)) if result.success => {
                match advance_state(config, signal, previous.as_ref()) {
                    StateUpdate::Unchanged => None,
                    StateUpdate::Clear => Some(None),
                    StateUpdate::Set(state) => Some(Some(
                        serialize_state(&state).context("Failed to serialize pagination state")?,
                    )),
                }
            }
            _ => None,
        };

        debug!(
            endpoint_id = %endpoint.id,
            state = ?last_cursor,
            "Pagination state update"
        );

        let poll_status = if result.success {
            PollStatus::Success
        } else {
            PollStatus::Error
        };

        self.store
            .update_endpoint(
                &endpoint.id,
                EndpointPatch {
                    last_cursor,
                    last_polled_at: Some(Utc::now()),
                    last_poll_status: Some(poll_status),
                },
            )
            .await?;

        let entry = AuditEntry {
            id: Uuid::now_v7(),
            tenant_id: connector.tenant_id.clone(),
            action: POLL_AUDIT_ACTION.to_string(),
            connector_id: connector.id.clone(),
            endpoint_id: Some(endpoint.id.clone()),
            details: json!({
                "success": result.success,
                "status": result.status_code(),
                "latencyMs": result.latency_ms(),
                "recordCount": result.pagination.as_ref().map(|p| p.record_count),
                "error": result.error.as_deref(),
            }),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.create_audit_log(entry).await {
            warn!(
                connector_id = %connector.id,
                endpoint_id = %endpoint.id,
                error = %e,
                "Failed to write audit entry"
            );
        }

        info!(
            connector_id = %connector.id,
            endpoint_id = %endpoint.id,
            success = result.success,
            status = result.status_code(),
            latency_ms = result.latency_ms(),
            "Endpoint polled"
        );

        Ok(result)
    }
}
