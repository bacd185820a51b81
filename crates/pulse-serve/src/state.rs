//! Application state and configuration.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use pulse_core::{DEFAULT_CONSUMER_GROUP, DEFAULT_STREAM_KEY};
use pulse_ingest::{EventQueue, EventStore, IntakeService, ProcessorConfig};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8081").
    pub bind_addr: String,

    /// Directory of the durable queue.
    pub queue_path: PathBuf,

    /// SQLite database file for the event store.
    pub store_path: PathBuf,

    /// Static dashboard page served at `/`.
    pub dashboard_path: PathBuf,

    /// The single origin allowed by CORS.
    pub allowed_origin: HeaderValue,

    /// Stream that intake appends to and the processor drains.
    pub stream_key: String,

    /// Delivery group used by the processor.
    pub consumer_group: String,

    /// Time between engagement view rebuilds.
    pub refresh_interval: Duration,

    /// Processor pause after a failed queue read.
    pub read_backoff: Duration,

    /// Port for the Prometheus exporter; 0 disables it.
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - None (all have defaults for local development)
    ///
    /// Optional:
    /// - `PULSE_BIND_ADDR`: Server bind address (default: "0.0.0.0:8081")
    /// - `PULSE_QUEUE_PATH`: Queue directory (default: "./data/queue")
    /// - `PULSE_STORE_PATH`: SQLite file (default: "./data/events.db")
    /// - `PULSE_DASHBOARD_PATH`: Dashboard HTML (default: "index.html")
    /// - `PULSE_ALLOWED_ORIGIN`: CORS origin (default: "http://localhost:5173")
    /// - `PULSE_STREAM_KEY`: Stream key (default: "events:live")
    /// - `PULSE_CONSUMER_GROUP`: Delivery group (default: "events-group")
    /// - `PULSE_REFRESH_INTERVAL_SECS`: View refresh period (default: 60)
    /// - `PULSE_READ_BACKOFF_MS`: Read retry backoff (default: 1000)
    /// - `PULSE_METRICS_PORT`: Prometheus port, 0 to disable (default: 9091)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("PULSE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let queue_path = PathBuf::from(
            std::env::var("PULSE_QUEUE_PATH").unwrap_or_else(|_| "./data/queue".to_string()),
        );

        let store_path = PathBuf::from(
            std::env::var("PULSE_STORE_PATH").unwrap_or_else(|_| "./data/events.db".to_string()),
        );

        let dashboard_path = PathBuf::from(
            std::env::var("PULSE_DASHBOARD_PATH").unwrap_or_else(|_| "index.html".to_string()),
        );

        let origin = std::env::var("PULSE_ALLOWED_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:5173".to_string());
        let allowed_origin = HeaderValue::from_str(origin.trim_end_matches('/'))
            .with_context(|| format!("PULSE_ALLOWED_ORIGIN is not a valid origin: {origin:?}"))?;

        let stream_key =
            std::env::var("PULSE_STREAM_KEY").unwrap_or_else(|_| DEFAULT_STREAM_KEY.to_string());
        if stream_key.is_empty() || stream_key.contains('\0') {
            anyhow::bail!("PULSE_STREAM_KEY must be non-empty and must not contain NUL");
        }

        let consumer_group = std::env::var("PULSE_CONSUMER_GROUP")
            .unwrap_or_else(|_| DEFAULT_CONSUMER_GROUP.to_string());
        if consumer_group.is_empty() {
            anyhow::bail!("PULSE_CONSUMER_GROUP must be non-empty");
        }

        let refresh_secs: u64 = env_parse("PULSE_REFRESH_INTERVAL_SECS", 60)?;
        if refresh_secs == 0 {
            anyhow::bail!("PULSE_REFRESH_INTERVAL_SECS must be at least 1");
        }

        let read_backoff_ms: u64 = env_parse("PULSE_READ_BACKOFF_MS", 1000)?;
        let metrics_port: u16 = env_parse("PULSE_METRICS_PORT", 9091)?;

        tracing::info!(
            bind_addr = %bind_addr,
            queue_path = %queue_path.display(),
            store_path = %store_path.display(),
            allowed_origin = ?allowed_origin,
            stream_key = %stream_key,
            consumer_group = %consumer_group,
            refresh_secs,
            metrics_port,
            "configuration loaded"
        );

        Ok(Self {
            bind_addr,
            queue_path,
            store_path,
            dashboard_path,
            allowed_origin,
            stream_key,
            consumer_group,
            refresh_interval: Duration::from_secs(refresh_secs),
            read_backoff: Duration::from_millis(read_backoff_ms),
            metrics_port,
        })
    }

    /// Processor settings derived from this configuration.
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            stream: self.stream_key.clone(),
            group: self.consumer_group.clone(),
            retry_backoff: self.read_backoff,
            ..Default::default()
        }
    }
}

/// Parse an optional numeric variable, failing on garbage instead of
/// silently falling back.
fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key} value {raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Appends posted events to the queue.
    pub intake: IntakeService,

    /// Read side of the event store.
    pub store: EventStore,

    /// Application configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Create the state from configuration and already-opened backends.
    pub fn new(config: Config, queue: Arc<dyn EventQueue>, store: EventStore) -> Self {
        let intake = IntakeService::new(queue, config.stream_key.clone());
        Self {
            intake,
            store,
            config: Arc::new(config),
        }
    }
}
