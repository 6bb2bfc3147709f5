//! Sieve ingestion service.
//!
//! Usage:
//!   sieve-ingest [--config <PATH>] [--port <PORT>]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use sieve_common::build_queue;
use sieve_ingest::{router, IngestConfig};

#[derive(Debug, Parser)]
#[command(name = "sieve-ingest", about = "Event ingestion boundary")]
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
        Some(path) => IngestConfig::from_file(path)?,
        None => IngestConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(port) = args.port {
        config.port = port;
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level.parse().unwrap_or(tracing::Level::INFO))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        port = config.port,
        queue = ?config.queue.queue_type,
        "Starting sieve-ingest"
    );

    let queue = build_queue(&config.queue).context("Failed to initialize queue adapter")?;
    let app = router(queue);

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
