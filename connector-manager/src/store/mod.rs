//! Storage collaborator for connector and endpoint records.
//!
//! The engine only loads and patches records through [`ConnectorStore`];
//! missing records come back as `Ok(None)` rather than errors. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`] - process-local maps, used by tests and embedding callers
//! - [`SqliteStore`] - SQLite-backed persistence for the operator CLI

use crate::types::{AuditEntry, Connector, ConnectorPatch, Endpoint, EndpointPatch};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

mod sqlite;

pub use sqlite::SqliteStore;

/// Load/save operations the polling engine needs from persistent storage.
///
/// Implementations must make each call atomic. Ownership checks happen in
/// the engine, so lookups are by id only.
#[async_trait]
pub trait ConnectorStore: Send + Sync {
    async fn get_connector(&self, id: &str) -> Result<Option<Connector>>;

    async fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>>;

    /// All endpoints of a connector, enabled or not, ordered by id.
    async fn list_endpoints(&self, connector_id: &str) -> Result<Vec<Endpoint>>;

    async fn update_connector(&self, id: &str, patch: ConnectorPatch) -> Result<()>;

    async fn update_endpoint(&self, id: &str, patch: EndpointPatch) -> Result<()>;

    async fn create_audit_log(&self, entry: AuditEntry) -> Result<()>;
}

/// In-memory [`ConnectorStore`].
#[derive(Default)]
pub struct MemoryStore {
    connectors: Mutex<BTreeMap<String, Connector>>,
    endpoints: Mutex<BTreeMap<String, Endpoint>>,
    audit_logs: Mutex<Vec<AuditEntry>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("memory store lock poisoned"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a connector.
    pub fn insert_connector(&self, connector: Connector) -> Result<()> {
        lock(&self.connectors)?.insert(connector.id.clone(), connector);
        Ok(())
    }

    /// Inserts or replaces an endpoint.
    pub fn insert_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        lock(&self.endpoints)?.insert(endpoint.id.clone(), endpoint);
        Ok(())
    }

    pub fn list_connectors(&self) -> Result<Vec<Connector>> {
        Ok(lock(&self.connectors)?.values().cloned().collect())
    }

    /// Audit entries for a connector in insertion order.
    pub fn list_audit_logs(&self, connector_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(lock(&self.audit_logs)?
            .iter()
            .filter(|e| e.connector_id == connector_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConnectorStore for MemoryStore {
    async fn get_connector(&self, id: &str) -> Result<Option<Connector>> {
        Ok(lock(&self.connectors)?.get(id).cloned())
    }

    async fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>> {
        Ok(lock(&self.endpoints)?.get(id).cloned())
    }

    async fn list_endpoints(&self, connector_id: &str) -> Result<Vec<Endpoint>> {
        Ok(lock(&self.endpoints)?
            .values()
            .filter(|e| e.connector_id == connector_id)
            .cloned()
            .collect())
    }

    async fn update_connector(&self, id: &str, patch: ConnectorPatch) -> Result<()> {
        let mut connectors = lock(&self.connectors)?;
        let connector = connectors
            .get_mut(id)
            .ok_or_else(|| anyhow!("Connector {} not found", id))?;
        if let Some(status) = patch.status {
            connector.status = status;
        }
        Ok(())
    }

    async fn update_endpoint(&self, id: &str, patch: EndpointPatch) -> Result<()> {
        let mut endpoints = lock(&self.endpoints)?;
        let endpoint = endpoints
            .get_mut(id)
            .ok_or_else(|| anyhow!("Endpoint {} not found", id))?;
        if let Some(cursor) = patch.last_cursor {
            endpoint.last_cursor = cursor;
        }
        if let Some(polled_at) = patch.last_polled_at {
            endpoint.last_polled_at = Some(polled_at);
        }
        if let Some(status) = patch.last_poll_status {
            endpoint.last_poll_status = Some(status);
        }
        Ok(())
    }

    async fn create_audit_log(&self, entry: AuditEntry) -> Result<()> {
        lock(&self.audit_logs)?.push(entry);
        Ok(())
    }
}
