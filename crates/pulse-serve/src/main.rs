//! Pulse Serve - event intake and live metrics server.
//!
//! This binary runs the whole pipeline in one process: the HTTP API, the
//! stream processor that drains the queue into SQLite, and the engagement
//! view refresher. Ctrl+C stops all three.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use pulse_core::metrics::{init_metrics, start_metrics_server};
use pulse_ingest::{EventStore, QueueConfig, RocksQueue, StreamProcessor, ViewRefresher};
use pulse_serve::{AppState, Config, router};

/// Pulse event ingestion server.
#[derive(Parser, Debug)]
#[command(name = "pulse-serve")]
#[command(about = "HTTP intake and live metrics for user interaction events", long_about = None)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load .env file if it exists
    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // Operational metrics on their own port
    if config.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(config.metrics_port, metrics_handle)
            .await
            .with_context(|| format!("Failed to bind metrics port {}", config.metrics_port))?;
    }

    // Backends
    if let Some(parent) = config.store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let queue = Arc::new(
        RocksQueue::open(QueueConfig {
            path: config.queue_path.clone(),
            ..Default::default()
        })
        .context("Failed to open durable queue")?,
    );
    let store = EventStore::open(&config.store_path).context("Failed to open event store")?;

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Background tasks. The refresher's first tick rebuilds the view at startup.
    let processor = StreamProcessor::new(queue.clone(), store.clone(), config.processor_config());
    let processor_stats = processor.stats();
    let processor_handle = processor.spawn(shutdown_rx.clone());
    let refresher_handle =
        ViewRefresher::new(store.clone(), config.refresh_interval).spawn(shutdown_rx.clone());

    // Start server
    let bind_addr = config.bind_addr.clone();
    let app = router(AppState::new(config, queue.clone(), store));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "starting server");

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    // Let in-flight work finish
    if let Err(e) = processor_handle.await {
        tracing::error!(error = %e, "stream processor task failed");
    }
    if let Err(e) = refresher_handle.await {
        tracing::error!(error = %e, "view refresher task failed");
    }
    queue.flush()?;

    let stats = processor_stats.snapshot();
    tracing::info!(
        persisted = stats.persisted,
        decode_errors = stats.decode_errors,
        insert_errors = stats.insert_errors,
        ack_errors = stats.ack_errors,
        read_errors = stats.read_errors,
        "Shutdown complete"
    );

    Ok(())
}
