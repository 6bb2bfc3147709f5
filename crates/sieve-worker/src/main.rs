//! Sieve processor worker.
//!
//! Usage:
//!   sieve-worker [--config <PATH>]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use sieve_common::{build_queue, AnalyticalClient, BlobClient};
use sieve_worker::{Processor, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "sieve-worker", about = "Queue-to-storage processor worker")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    config.apply_env_overrides();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level.parse().unwrap_or(tracing::Level::INFO))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        poll_interval_ms = config.poll_interval.as_millis(),
        batch_size = config.batch_size,
        queue = ?config.queue.queue_type,
        "Starting sieve-worker"
    );

    // Storage initialization is unrecoverable; fail fast with exit code 1.
    let analytical = AnalyticalClient::new(&config.analytical);
    analytical
        .create_tables()
        .await
        .context("Failed to create analytical tables")?;
    info!("Analytical schema ready");

    let blob = BlobClient::new(config.blob.clone()).context("Failed to build blob client")?;
    blob.ensure_bucket()
        .await
        .context("Failed to ensure blob bucket")?;
    info!(bucket = %config.blob.bucket, "Blob bucket ready");

    // The broker may still be down; the loop polls through outages.
    let queue = build_queue(&config.queue).context("Failed to initialize queue adapter")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let processor = Processor::new(queue, Arc::new(analytical), Arc::new(blob), config);
    let stats = processor.stats_handle();

    let worker_handle = tokio::spawn(processor.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(());
    let _ = worker_handle.await;

    let snapshot = stats.snapshot();
    info!(
        processed = snapshot.processed,
        failures = snapshot.failures,
        "Shutdown complete"
    );
    Ok(())
}
