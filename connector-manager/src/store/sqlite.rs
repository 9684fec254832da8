//! SQLite-backed connector storage.
//!
//! Connectors, endpoints and audit entries live in three tables. Structured
//! fields (auth config, pagination config, headers) are stored as JSON text.
//! The endpoint `last_cursor` column holds the serialized pagination state
//! exactly as the engine wrote it, including legacy bare-string cursors.

use super::ConnectorStore;
use crate::types::{
    AuditEntry, Connector, ConnectorPatch, Endpoint, EndpointPatch,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const CONNECTOR_COLUMNS: &str = "id, tenant_id, name, base_url, auth_type, auth_config_json,
     rate_limit_per_minute, health_check_path, status, created_at";

const ENDPOINT_COLUMNS: &str = "id, connector_id, name, method, path, data_path, pagination_json,
     query_params_json, headers_json, body_json, is_enabled, last_cursor, last_polled_at,
     last_poll_status";

/// Persists connector records in SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the SQLite database and ensures the tables exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open connector DB at {}", db_path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("connector DB lock poisoned"))
    }

    /// Creates the `connectors`, `endpoints` and `audit_logs` tables if missing.
    pub fn create_tables(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS connectors (
                id                     TEXT PRIMARY KEY,
                tenant_id              TEXT NOT NULL,
                name                   TEXT NOT NULL,
                base_url               TEXT NOT NULL,
                auth_type              TEXT NOT NULL,
                auth_config_json       TEXT NOT NULL,
                rate_limit_per_minute  INTEGER,
                health_check_path      TEXT,
                status                 TEXT NOT NULL,
                created_at             TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS endpoints (
                id                 TEXT PRIMARY KEY,
                connector_id       TEXT NOT NULL REFERENCES connectors(id),
                name               TEXT NOT NULL,
                method             TEXT NOT NULL,
                path               TEXT NOT NULL,
                data_path          TEXT,
                pagination_json    TEXT,
                query_params_json  TEXT NOT NULL,
                headers_json       TEXT NOT NULL,
                body_json          TEXT,
                is_enabled         INTEGER NOT NULL,
                last_cursor        TEXT,
                last_polled_at     TEXT,
                last_poll_status   TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_endpoints_connector ON endpoints(connector_id);
            CREATE TABLE IF NOT EXISTS audit_logs (
                id            TEXT PRIMARY KEY,
                tenant_id     TEXT NOT NULL,
                action        TEXT NOT NULL,
                connector_id  TEXT NOT NULL,
                endpoint_id   TEXT,
                details_json  TEXT NOT NULL,
                created_at    TEXT NOT NULL
            );",
        )
        .context("Failed to create connector tables")?;
        Ok(())
    }

    /// Inserts or replaces a connector.
    pub fn insert_connector(&self, connector: &Connector) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO connectors ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                CONNECTOR_COLUMNS
            ),
            params![
                connector.id,
                connector.tenant_id,
                connector.name,
                connector.base_url,
                connector.auth_type.as_str(),
                to_json(&connector.auth_config)?,
                connector.rate_limit_per_minute,
                connector.health_check_path,
                connector.status.as_str(),
                connector.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert connector")?;
        Ok(())
    }

    /// Inserts or replaces an endpoint.
    pub fn insert_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let pagination_json = endpoint.pagination.as_ref().map(to_json).transpose()?;
        let body_json = endpoint.body.as_ref().map(to_json).transpose()?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO endpoints ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                ENDPOINT_COLUMNS
            ),
            params![
                endpoint.id,
                endpoint.connector_id,
                endpoint.name,
                endpoint.method.as_str(),
                endpoint.path,
                endpoint.data_path,
                pagination_json,
                to_json(&endpoint.query_params)?,
                to_json(&endpoint.headers)?,
                body_json,
                endpoint.is_enabled,
                endpoint.last_cursor,
                endpoint.last_polled_at.map(|t| t.to_rfc3339()),
                endpoint.last_poll_status.map(|s| s.as_str()),
            ],
        )
        .context("Failed to insert endpoint")?;
        Ok(())
    }

    /// Returns all connectors ordered by creation time.
    pub fn list_connectors(&self) -> Result<Vec<Connector>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM connectors ORDER BY created_at ASC",
            CONNECTOR_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;
        let mut connectors = Vec::new();
        while let Some(row) = rows.next()? {
            connectors.push(row_to_connector(row)?);
        }
        Ok(connectors)
    }

    /// Returns audit entries for a connector, oldest first.
    pub fn list_audit_logs(&self, connector_id: &str) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, action, connector_id, endpoint_id, details_json, created_at
             FROM audit_logs WHERE connector_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let mut rows = stmt.query(params![connector_id])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_audit(row)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl ConnectorStore for SqliteStore {
    async fn get_connector(&self, id: &str) -> Result<Option<Connector>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM connectors WHERE id = ?1",
            CONNECTOR_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_connector(row)?)),
            None => Ok(None),
        }
    }

    async fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM endpoints WHERE id = ?1",
            ENDPOINT_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_endpoint(row)?)),
            None => Ok(None),
        }
    }

    async fn list_endpoints(&self, connector_id: &str) -> Result<Vec<Endpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM endpoints WHERE connector_id = ?1 ORDER BY id ASC",
            ENDPOINT_COLUMNS
        ))?;
        let mut rows = stmt.query(params![connector_id])?;
        let mut endpoints = Vec::new();
        while let Some(row) = rows.next()? {
            endpoints.push(row_to_endpoint(row)?);
        }
        Ok(endpoints)
    }

    async fn update_connector(&self, id: &str, patch: ConnectorPatch) -> Result<()> {
        let conn = self.lock()?;
        let exists: Option<String> = conn
            .query_row("SELECT id FROM connectors WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(anyhow!("Connector {} not found", id));
        }
        if let Some(status) = patch.status {
            conn.execute(
                "UPDATE connectors SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )
            .context("Failed to update connector status")?;
        }
        Ok(())
    }

    async fn update_endpoint(&self, id: &str, patch: EndpointPatch) -> Result<()> {
        let (set_cursor, cursor) = match patch.last_cursor {
            Some(cursor) => (true, cursor),
            None => (false, None),
        };
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE endpoints SET
                    last_cursor      = CASE WHEN ?2 THEN ?3 ELSE last_cursor END,
                    last_polled_at   = COALESCE(?4, last_polled_at),
                    last_poll_status = COALESCE(?5, last_poll_status)
                 WHERE id = ?1",
                params![
                    id,
                    set_cursor,
                    cursor,
                    patch.last_polled_at.map(|t| t.to_rfc3339()),
                    patch.last_poll_status.map(|s| s.as_str()),
                ],
            )
            .context("Failed to update endpoint")?;
        if updated == 0 {
            return Err(anyhow!("Endpoint {} not found", id));
        }
        Ok(())
    }

    async fn create_audit_log(&self, entry: AuditEntry) -> Result<()> {
        let details_json = to_json(&entry.details)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO audit_logs
                (id, tenant_id, action, connector_id, endpoint_id, details_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id.to_string(),
                entry.tenant_id,
                entry.action,
                entry.connector_id,
                entry.endpoint_id,
                details_json,
                entry.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert audit log")?;
        Ok(())
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize column")
}

fn from_json<T: DeserializeOwned>(column: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).with_context(|| format!("Failed to decode {}", column))
}

/// Decodes a unit enum stored under its serde name.
fn parse_enum<T: DeserializeOwned>(column: &str, text: String) -> Result<T> {
    serde_json::from_value(Value::String(text)).with_context(|| format!("Invalid {}", column))
}

fn parse_time(column: &str, text: &str) -> Result<DateTime<Utc>> {
    text.parse()
        .with_context(|| format!("Invalid {} timestamp: {}", column, text))
}

fn row_to_connector(row: &Row<'_>) -> Result<Connector> {
    let auth_config_json: String = row.get(5)?;
    let created_at: String = row.get(9)?;
    Ok(Connector {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        base_url: row.get(3)?,
        auth_type: parse_enum("auth_type", row.get(4)?)?,
        auth_config: from_json("auth_config_json", &auth_config_json)?,
        rate_limit_per_minute: row.get(6)?,
        health_check_path: row.get(7)?,
        status: parse_enum("status", row.get(8)?)?,
        created_at: parse_time("created_at", &created_at)?,
    })
}

fn row_to_endpoint(row: &Row<'_>) -> Result<Endpoint> {
    let pagination_json: Option<String> = row.get(6)?;
    let query_params_json: String = row.get(7)?;
    let headers_json: String = row.get(8)?;
    let body_json: Option<String> = row.get(9)?;
    let last_polled_at: Option<String> = row.get(12)?;
    let last_poll_status: Option<String> = row.get(13)?;

    Ok(Endpoint {
        id: row.get(0)?,
        connector_id: row.get(1)?,
        name: row.get(2)?,
        method: parse_enum("method", row.get(3)?)?,
        path: row.get(4)?,
        data_path: row.get(5)?,
        pagination: pagination_json
            .map(|text| from_json("pagination_json", &text))
            .transpose()?,
        query_params: from_json("query_params_json", &query_params_json)?,
        headers: from_json("headers_json", &headers_json)?,
        body: body_json.map(|text| from_json("body_json", &text)).transpose()?,
        is_enabled: row.get(10)?,
        last_cursor: row.get(11)?,
        last_polled_at: last_polled_at
            .map(|text| parse_time("last_polled_at", &text))
            .transpose()?,
        last_poll_status: last_poll_status
            .map(|text| parse_enum("last_poll_status", text))
            .transpose()?,
    })
}

fn row_to_audit(row: &Row<'_>) -> Result<AuditEntry> {
    let id: String = row.get(0)?;
    let details_json: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(AuditEntry {
        id: id.parse().context("Invalid audit id")?,
        tenant_id: row.get(1)?,
        action: row.get(2)?,
        connector_id: row.get(3)?,
        endpoint_id: row.get(4)?,
        details: from_json("details_json", &details_json)?,
        created_at: parse_time("created_at", &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::{connector, endpoint};
    use crate::types::{AuthType, ConnectorStatus, HttpMethod, PollStatus};
    use conduit::pagination::PaginationConfig;
    use serde_json::json;
    use uuid::Uuid;

    fn in_memory_store() -> SqliteStore {
        SqliteStore::new(":memory:").expect("in-memory store failed")
    }

    #[tokio::test]
    async fn test_insert_and_get_connector() {
        let store = in_memory_store();
        let mut conn = connector("conn-1", "https://api.example.com");
        conn.auth_type = AuthType::OAuth2ClientCredentials;
        conn.auth_config = json!({"tokenUrl": "https://auth.example.com/token", "clientId": "abc"});
        conn.health_check_path = Some("/health".to_string());
        store.insert_connector(&conn).unwrap();

        let fetched = store.get_connector("conn-1").await.unwrap().unwrap();
        assert_eq!(fetched.tenant_id, "tenant-1");
        assert_eq!(fetched.base_url, "https://api.example.com");
        assert_eq!(fetched.auth_type, AuthType::OAuth2ClientCredentials);
        assert_eq!(fetched.auth_config["clientId"], "abc");
        assert_eq!(fetched.rate_limit_per_minute, Some(60));
        assert_eq!(fetched.health_check_path.as_deref(), Some("/health"));
        assert_eq!(fetched.status, ConnectorStatus::Pending);
    }

    #[tokio::test]
    async fn test_insert_and_get_endpoint() {
        let store = in_memory_store();
        let mut ep = endpoint("ep-1", "conn-1");
        ep.method = HttpMethod::Post;
        ep.pagination = Some(serde_json::from_value(json!({"type": "offset", "limit": 25})).unwrap());
        ep.query_params.insert("status".to_string(), "open".to_string());
        ep.body = Some(json!({"filter": "all"}));
        ep.last_cursor = Some("legacy-token".to_string());
        store.insert_endpoint(&ep).unwrap();

        let fetched = store.get_endpoint("ep-1").await.unwrap().unwrap();
        assert_eq!(fetched.method, HttpMethod::Post);
        assert!(matches!(
            fetched.pagination,
            Some(PaginationConfig::Offset { limit: 25, .. })
        ));
        assert_eq!(fetched.query_params.get("status").map(String::as_str), Some("open"));
        assert_eq!(fetched.body, Some(json!({"filter": "all"})));
        assert_eq!(fetched.last_cursor.as_deref(), Some("legacy-token"));
        assert!(fetched.is_enabled);
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_none() {
        let store = in_memory_store();
        assert!(store.get_connector("no-such-id").await.unwrap().is_none());
        assert!(store.get_endpoint("no-such-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_endpoints_by_connector() {
        let store = in_memory_store();
        store.insert_endpoint(&endpoint("ep-b", "conn-1")).unwrap();
        store.insert_endpoint(&endpoint("ep-a", "conn-1")).unwrap();
        store.insert_endpoint(&endpoint("ep-c", "conn-2")).unwrap();

        let ids: Vec<String> = store
            .list_endpoints("conn-1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["ep-a", "ep-b"]);
    }

    #[tokio::test]
    async fn test_update_endpoint_leaves_cursor_when_not_patched() {
        let store = in_memory_store();
        let mut ep = endpoint("ep-1", "conn-1");
        ep.last_cursor = Some(r#"{"type":"page","page":2}"#.to_string());
        store.insert_endpoint(&ep).unwrap();

        let polled_at = Utc::now();
        store
            .update_endpoint(
                "ep-1",
                EndpointPatch {
                    last_polled_at: Some(polled_at),
                    last_poll_status: Some(PollStatus::Error),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let fetched = store.get_endpoint("ep-1").await.unwrap().unwrap();
        assert_eq!(fetched.last_cursor.as_deref(), Some(r#"{"type":"page","page":2}"#));
        assert_eq!(fetched.last_poll_status, Some(PollStatus::Error));
        assert_eq!(
            fetched.last_polled_at.map(|t| t.timestamp_millis()),
            Some(polled_at.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_update_endpoint_sets_and_clears_cursor() {
        let store = in_memory_store();
        store.insert_endpoint(&endpoint("ep-1", "conn-1")).unwrap();

        let set = EndpointPatch {
            last_cursor: Some(Some(r#"{"type":"offset","offset":100}"#.to_string())),
            ..Default::default()
        };
        store.update_endpoint("ep-1", set).await.unwrap();
        let fetched = store.get_endpoint("ep-1").await.unwrap().unwrap();
        assert_eq!(fetched.last_cursor.as_deref(), Some(r#"{"type":"offset","offset":100}"#));

        let clear = EndpointPatch {
            last_cursor: Some(None),
            ..Default::default()
        };
        store.update_endpoint("ep-1", clear).await.unwrap();
        let fetched = store.get_endpoint("ep-1").await.unwrap().unwrap();
        assert!(fetched.last_cursor.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_records_error() {
        let store = in_memory_store();
        assert!(store
            .update_endpoint("ghost", EndpointPatch::default())
            .await
            .is_err());
        assert!(store
            .update_connector("ghost", ConnectorPatch::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_connector_status() {
        let store = in_memory_store();
        store
            .insert_connector(&connector("conn-1", "https://api.example.com"))
            .unwrap();
        store
            .update_connector(
                "conn-1",
                ConnectorPatch {
                    status: Some(ConnectorStatus::Error),
                },
            )
            .await
            .unwrap();
        let fetched = store.get_connector("conn-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, ConnectorStatus::Error);
    }

    #[tokio::test]
    async fn test_audit_log_round_trip() {
        let store = in_memory_store();
        let entry = AuditEntry {
            id: Uuid::now_v7(),
            tenant_id: "tenant-1".to_string(),
            action: "connector.poll".to_string(),
            connector_id: "conn-1".to_string(),
            endpoint_id: Some("ep-1".to_string()),
            details: json!({"success": true, "statusCode": 200}),
            created_at: Utc::now(),
        };
        store.create_audit_log(entry.clone()).await.unwrap();

        let logs = store.list_audit_logs("conn-1").unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, entry.id);
        assert_eq!(logs[0].details["statusCode"], 200);
        assert!(store.list_audit_logs("conn-2").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connectors.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store
                .insert_connector(&connector("conn-1", "https://api.example.com"))
                .unwrap();
            store.insert_endpoint(&endpoint("ep-1", "conn-1")).unwrap();
            store
                .update_endpoint(
                    "ep-1",
                    EndpointPatch {
                        last_cursor: Some(Some(r#"{"type":"cursor","cursor":"c9"}"#.to_string())),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(reopened.list_connectors().unwrap().len(), 1);
        let ep = reopened.get_endpoint("ep-1").await.unwrap().unwrap();
        assert_eq!(ep.last_cursor.as_deref(), Some(r#"{"type":"cursor","cursor":"c9"}"#));
    }
}
