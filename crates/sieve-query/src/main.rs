//! Sieve query API service.
//!
//! Usage:
//!   sieve-query [--config <PATH>] [--port <PORT>]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use sieve_common::{AnalyticalClient, BlobClient};
use sieve_query::{router, QueryConfig};

#[derive(Debug, Parser)]
#[command(name = "sieve-query", about = "Run/step/item query API")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port override.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(path) => QueryConfig::from_file(path)?,
        None => QueryConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(port) = args.port {
        config.port = port;
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level.parse().unwrap_or(tracing::Level::INFO))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(port = config.port, "Starting sieve-query");

    let analytical = Arc::new(AnalyticalClient::new(&config.analytical));
    analytical
        .ping()
        .await
        .context("Analytical store unreachable")?;
    info!("Analytical store reachable");

    let blob = Arc::new(BlobClient::new(config.blob.clone()).context("Failed to build blob client")?);

    let app = router(analytical, blob);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}
