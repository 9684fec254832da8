//! Connector Manager - Polling engine for external REST APIs.
//!
//! Authenticates against registered connectors, paginates through their
//! endpoints under one of four strategies, enforces per-connector rate limits
//! and persists a resumable pagination state after every successful poll, so
//! that repeated polls form an incremental synchronization stream.
//!
//! # Architecture
//!
//! ```text
//!     Caller (scheduler, operator CLI)
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       Connector Manager                  │
//! │  - Load connector + endpoint             │
//! │  - Rate limit admission                  │
//! │  - Persist pagination state + audit      │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       Request Executor                   │
//! │  - Build URL from pagination state       │
//! │  - Attach auth headers                   │
//! │  - Extract data + pagination signal      │
//! └─────────────────────────────────────────┘
//!          ↓
//!       External API
//! ```
//!
//! # Core Types
//!
//! - [`ConnectorManager`] - Public entry points (`poll_endpoint`, `poll_all_endpoints`, ...)
//! - [`ConnectorStore`] - Storage collaborator trait
//! - [`PollResult`] - Outcome of a single poll
//!
//! # Polling an endpoint
//!
//! ```no_run
//! use connector_manager::{ConnectorManager, MemoryStore};
//! use conduit::config::EngineConfig;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let manager = ConnectorManager::new(store, &EngineConfig::default())?;
//!
//! let result = manager.poll_endpoint("conn-1", "ep-1", "tenant-1").await?;
//! if result.rate_limited {
//!     // back off and retry later
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod executor;
pub mod health;
pub mod manager;
pub mod store;
pub mod types;

// Re-export public types
pub use error::{AuthError, EngineError};
pub use manager::ConnectorManager;
pub use store::{ConnectorStore, MemoryStore, SqliteStore};
pub use types::{
    AuthType, Connector, ConnectorStatus, Endpoint, HealthState, HealthStatus, PollAllResult,
    PollResult, PollSummary, TestConnectionResult,
};
