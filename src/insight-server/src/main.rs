//! Insight: multi-tenant marketing analytics dashboard server.
//!
//! Wires the metrics store, the analytics gateway and the reporting services
//! behind the HTTP API.

use clap::Parser;
use insight_api::{ApiServer, AppState};
use insight_core::config::AppConfig;
use insight_gateway::{AnalyticsGateway, HttpAnalyticsGateway};
use insight_store::{InMemoryMetricsStore, MetricsStore, PostgresMetricsStore};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "insight-server")]
#[command(about = "Marketing analytics dashboard server")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides config)
    #[arg(long, env = "INSIGHT__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// PostgreSQL URL (overrides config). Without one the in-memory store is used.
    #[arg(long, env = "INSIGHT__DATABASE__URL")]
    database_url: Option<String>,

    /// Analytics generator endpoint (overrides config)
    #[arg(long, env = "INSIGHT__GATEWAY__URL")]
    gateway_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "insight_server=info,insight_reporting=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Insight starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(url) = cli.database_url {
        config.database.url = Some(url);
    }
    if let Some(url) = cli.gateway_url {
        config.gateway.url = Some(url);
    }

    info!(
        http_port = config.api.http_port,
        database = config.database.url.is_some(),
        gateway = config.gateway.url.is_some(),
        gateway_timeout_secs = config.gateway.timeout_secs,
        "Configuration loaded"
    );

    let store: Arc<dyn MetricsStore> = if config.database.url.is_some() {
        Arc::new(PostgresMetricsStore::connect(&config.database).await?)
    } else {
        warn!("No database url configured, using the in-memory store");
        Arc::new(InMemoryMetricsStore::new())
    };

    let gateway: Arc<dyn AnalyticsGateway> = Arc::new(HttpAnalyticsGateway::new(&config.gateway)?);

    let api_server = ApiServer::new(config.clone(), AppState::new(store, gateway));

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Insight is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}
