use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conduit::config::load_config_or_default;
use connector_manager::{Connector, ConnectorManager, ConnectorStore, Endpoint, SqliteStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Operator CLI for the connector polling engine.
#[derive(Debug, Parser)]
#[command(name = "connector-manager")]
#[command(about = "Poll, probe and inspect registered API connectors")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "CONDUIT_CONFIG", default_value = "conduit.toml")]
    config: PathBuf,

    /// SQLite database path, overriding `[store] database_path`.
    #[arg(long, env = "CONDUIT_DB")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register connectors and endpoints from a JSON file.
    Import {
        /// File shaped as `{"connectors": [...], "endpoints": [...]}`.
        file: PathBuf,
    },
    /// List connectors with their endpoints.
    List,
    /// Poll a single endpoint once.
    Poll {
        #[arg(long)]
        connector: String,
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        tenant: String,
    },
    /// Poll every enabled endpoint of a connector.
    PollAll {
        #[arg(long)]
        connector: String,
        #[arg(long)]
        tenant: String,
    },
    /// Probe a connector's health path.
    Health {
        #[arg(long)]
        connector: String,
    },
    /// Check credentials, health and endpoints of a connector.
    Test {
        #[arg(long)]
        connector: String,
    },
    /// Show rate limit window usage for a connector.
    RateLimit {
        #[arg(long)]
        connector: String,
    },
}

/// Import file contents.
#[derive(Debug, Default, Deserialize)]
struct ImportFile {
    #[serde(default)]
    connectors: Vec<Connector>,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber (stderr keeps stdout clean for JSON output)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "connector_manager=info,conduit=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = load_config_or_default(&cli.config)?;
    let database_path = cli
        .database
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.store.database_path));

    info!(
        config = %cli.config.display(),
        database = %database_path.display(),
        "Configuration loaded"
    );

    let store = Arc::new(
        SqliteStore::new(&database_path).context("Failed to initialize connector store")?,
    );
    let manager = ConnectorManager::new(Arc::clone(&store) as Arc<dyn ConnectorStore>, &config)?;

    match cli.command {
        Command::Import { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read import file {}", file.display()))?;
            let import: ImportFile = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse import file {}", file.display()))?;

            for connector in &import.connectors {
                store.insert_connector(connector)?;
            }
            for endpoint in &import.endpoints {
                store.insert_endpoint(endpoint)?;
            }
            info!(
                connectors = import.connectors.len(),
                endpoints = import.endpoints.len(),
                "Import complete"
            );
            print_json(&json!({
                "connectors": import.connectors.len(),
                "endpoints": import.endpoints.len(),
            }))?;
        }
        Command::List => {
            let mut listing = Vec::new();
            for connector in store.list_connectors()? {
                let endpoints: Vec<serde_json::Value> = store
                    .list_endpoints(&connector.id)
                    .await?
                    .iter()
                    .map(|e| {
                        json!({
                            "id": e.id,
                            "name": e.name,
                            "method": e.method,
                            "path": e.path,
                            "isEnabled": e.is_enabled,
                            "lastCursor": e.last_cursor,
                            "lastPolledAt": e.last_polled_at,
                            "lastPollStatus": e.last_poll_status,
                        })
                    })
                    .collect();
                // Auth config stays out of the listing
                listing.push(json!({
                    "id": connector.id,
                    "tenantId": connector.tenant_id,
                    "name": connector.name,
                    "baseUrl": connector.base_url,
                    "authType": connector.auth_type,
                    "rateLimitPerMinute": connector.rate_limit_per_minute,
                    "status": connector.status,
                    "endpoints": endpoints,
                }));
            }
            print_json(&listing)?;
        }
        Command::Poll {
            connector,
            endpoint,
            tenant,
        } => {
            let result = manager.poll_endpoint(&connector, &endpoint, &tenant).await?;
            print_json(&result)?;
        }
        Command::PollAll { connector, tenant } => {
            let result = manager.poll_all_endpoints(&connector, &tenant).await?;
            print_json(&result)?;
        }
        Command::Health { connector } => {
            let health = manager.check_health(&connector).await?;
            print_json(&health)?;
        }
        Command::Test { connector } => {
            let result = manager.test_connection(&connector).await?;
            print_json(&result)?;
        }
        Command::RateLimit { connector } => {
            let status = manager.get_rate_limit_status(&connector).await?;
            print_json(&status)?;
        }
    }

    Ok(())
}
