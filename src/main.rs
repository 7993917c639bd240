//! Catalog Intake Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! catalog-intake
//!
//! # Start with custom config
//! catalog-intake --config /path/to/config.toml
//!
//! # Custom port, storage directory and idempotency window
//! catalog-intake --http-port 8081 --storage-dir /data/catalog --idempotency-ttl-secs 7200
//!
//! # Point at a specific database file
//! DATABASE_PATH=/data/catalog.db catalog-intake
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use catalog_intake::services::events::spawn_logging_listener;
use catalog_intake::sweeper::spawn_sweeper;
use catalog_intake::{metrics, CatalogDb, Config, HttpServer, IdempotencySweeper, Services};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "catalog-intake")]
#[command(about = "Catalog intake API with idempotent writes, cursor pagination and bulk ingestion")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// SQLite database file (defaults to <storage-dir>/catalog.db)
    #[arg(long, env = "DATABASE_PATH")]
    database_path: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "CATALOG_HTTP_PORT")]
    http_port: Option<u16>,

    /// Seconds an idempotency key is honoured
    #[arg(long)]
    idempotency_ttl_secs: Option<u64>,

    /// Seconds between sweeps of expired idempotency keys
    #[arg(long)]
    sweep_interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("catalog_intake=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(path) = args.database_path {
        config.database_path = Some(path);
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(ttl) = args.idempotency_ttl_secs {
        config.idempotency_ttl_secs = ttl;
    }
    if let Some(interval) = args.sweep_interval_secs {
        config.sweep_interval_secs = interval;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        idempotency_ttl_secs = config.idempotency_ttl_secs,
        "Starting catalog-intake"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    metrics::register_metrics();

    let db = Arc::new(
        CatalogDb::open(&config.database_path())
            .with_context(|| format!("opening database {}", config.database_path().display()))?,
    );
    let services = Arc::new(Services::new(db.clone(), &config));

    let listener_handle = spawn_logging_listener(services.events.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let sweeper = Arc::new(IdempotencySweeper::new(
        services.idempotency.clone(),
        services.events.clone(),
        config.sweep_interval(),
    ));
    let sweeper_handle = spawn_sweeper(sweeper, shutdown_rx);

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(HttpServer::new(services.clone(), http_addr));

    info!("HTTP API available at http://{}", http_addr);
    info!("Endpoints:");
    info!("  POST  /api/v1/items              - Create item (Idempotency-Key)");
    info!("  GET   /api/v1/items              - List items (cursor pagination)");
    info!("  GET   /api/v1/items/{{id}}         - Get item");
    info!("  PATCH /api/v1/items/{{id}}         - Update item (optimistic version)");
    info!("  POST  /api/v1/items:bulk         - Bulk create (Idempotency-Key)");
    info!("  GET   /api/v1/items:bulk/limits  - Bulk limits");
    info!("  GET   /api/v1/idempotency/stats  - Idempotency statistics");
    info!("  GET   /healthz, /readyz          - Probes");
    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    // Stop background tasks
    let _ = shutdown_tx.send(());
    let _ = sweeper_handle.await;
    listener_handle.abort();

    if let Ok(stats) = db.stats() {
        info!(
            items = stats.item_count,
            idempotency_keys = stats.idempotency_key_count,
            "Final store stats"
        );
    }

    Ok(())
}
