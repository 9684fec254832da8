//! Error types for the polling engine.
//!
//! Only configuration and storage problems surface as `Err`. Transport
//! failures, non-2xx responses and authentication failures during a poll are
//! reported as failure [`PollResult`](crate::types::PollResult)s instead.

use crate::types::AuthType;
use thiserror::Error;

/// Errors raised while building authentication headers.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A required credential is absent from the connector's auth config
    #[error("missing {field} for {} auth", .auth_type.as_str())]
    MissingCredential {
        auth_type: AuthType,
        field: &'static str,
    },

    /// Auth config present but unusable
    #[error("invalid auth configuration: {0}")]
    InvalidConfig(String),

    /// Token endpoint answered with a non-2xx status
    #[error("token exchange failed with status {status}: {body}")]
    TokenExchange { status: u16, body: String },

    /// Token endpoint unreachable or returned an unreadable body
    #[error("token request failed: {0}")]
    TokenRequest(String),
}

/// Errors returned by the orchestrator entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown connector, or one owned by a different tenant
    #[error("connector '{0}' not found")]
    ConnectorNotFound(String),

    /// Unknown endpoint, or one belonging to a different connector
    #[error("endpoint '{0}' not found")]
    EndpointNotFound(String),

    #[error("endpoint '{0}' is disabled")]
    EndpointDisabled(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}
