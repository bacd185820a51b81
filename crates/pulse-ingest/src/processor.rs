//! Stream processor: drains the ingestion stream into the event store.
//!
//! A single long-lived task reads forward from its delivery group's cursor,
//! persists each event, and acknowledges it. Per-message failures are logged
//! and skipped; the loop itself only ends on shutdown.
//!
//! ```text
//! read_blocking ──► decode ──► insert ──► acknowledge
//!       │             │          │            │
//!    backoff        skip       skip         log
//! ```
//!
//! Skipped messages are never acknowledged, but the group cursor is a
//! high-water mark: once a later message is acknowledged, a restart resumes
//! past them and they are not retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use pulse_core::{DEFAULT_CONSUMER_GROUP, DEFAULT_STREAM_KEY, MessageId, QueueMessage, metrics};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::EventQueue;
use crate::store::EventStore;

/// Configuration for the stream processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Stream to consume.
    pub stream: String,

    /// Delivery group whose cursor tracks progress.
    pub group: String,

    /// Upper bound on one blocking read. `None` waits until data arrives.
    pub read_block: Option<Duration>,

    /// Pause after a failed read or group registration.
    pub retry_backoff: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM_KEY.to_string(),
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            read_block: None,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Why a single message was not fully processed.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// Payload is not a valid event. Not persisted, not acknowledged.
    #[error("undecodable payload: {0}")]
    Decode(#[source] pulse_core::Error),

    /// Insert failed. Not acknowledged.
    #[error("failed to persist event: {0}")]
    Persist(#[source] crate::Error),

    /// Persisted, but the acknowledgement failed; redelivery may duplicate it.
    #[error("failed to acknowledge message: {0}")]
    Acknowledge(#[source] crate::Error),
}

/// Outcome counters, updated by the processor task.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    delivered: AtomicU64,
    persisted: AtomicU64,
    decode_errors: AtomicU64,
    insert_errors: AtomicU64,
    ack_errors: AtomicU64,
    read_errors: AtomicU64,
}

/// Point-in-time copy of [`ProcessorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStatsSnapshot {
    pub delivered: u64,
    pub persisted: u64,
    pub decode_errors: u64,
    pub insert_errors: u64,
    pub ack_errors: u64,
    pub read_errors: u64,
}

impl ProcessorStats {
    pub fn snapshot(&self) -> ProcessorStatsSnapshot {
        ProcessorStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            insert_errors: self.insert_errors.load(Ordering::Relaxed),
            ack_errors: self.ack_errors.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

/// Consumes one stream into the event store.
pub struct StreamProcessor {
    queue: Arc<dyn EventQueue>,
    store: EventStore,
    config: ProcessorConfig,
    stats: Arc<ProcessorStats>,
}

impl StreamProcessor {
    pub fn new(queue: Arc<dyn EventQueue>, store: EventStore, config: ProcessorConfig) -> Self {
        Self {
            queue,
            store,
            config,
            stats: Arc::new(ProcessorStats::default()),
        }
    }

    /// Shared handle to the outcome counters.
    pub fn stats(&self) -> Arc<ProcessorStats> {
        Arc::clone(&self.stats)
    }

    /// Run the processor on its own task until `shutdown` flips to `true`.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Processing loop.
    ///
    /// Shutdown interrupts a blocking read or a backoff sleep. A batch that
    /// has already been read is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut position) = self.join_group(&mut shutdown).await else {
            info!("Stream processor stopped before joining its group");
            return;
        };

        info!(
            stream = %self.config.stream,
            group = %self.config.group,
            cursor = %position,
            "Stream processor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let read = tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                result = self.queue.read_blocking(
                    &self.config.stream,
                    position,
                    self.config.read_block,
                ) => result,
            };

            let messages = match read {
                Ok(messages) => messages,
                Err(e) => {
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    metrics::increment("processor_read_errors_total", 1);
                    warn!(error = %e, "Failed to read from stream, backing off");
                    if self.backoff(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            for message in &messages {
                self.handle(message);
                position = message.id;
            }
        }

        let stats = self.stats.snapshot();
        info!(
            persisted = stats.persisted,
            decode_errors = stats.decode_errors,
            insert_errors = stats.insert_errors,
            "Stream processor stopped"
        );
    }

    /// Decode, persist, and acknowledge one message.
    ///
    /// Returns the row id of the inserted event. Each call inserts a new row,
    /// so handling the same message twice stores it twice.
    pub fn process_message(&self, message: &QueueMessage) -> Result<i64, ProcessingError> {
        let event = message.decode_event().map_err(ProcessingError::Decode)?;

        let started = Instant::now();
        let row_id = self
            .store
            .insert_event(&event)
            .map_err(ProcessingError::Persist)?;
        metrics::record_seconds(
            "processor_insert_duration_seconds",
            started.elapsed().as_secs_f64(),
        );

        self.queue
            .acknowledge(&self.config.stream, &self.config.group, message.id)
            .map_err(ProcessingError::Acknowledge)?;

        Ok(row_id)
    }

    fn handle(&self, message: &QueueMessage) {
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);

        match self.process_message(message) {
            Ok(row_id) => {
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                metrics::increment("processor_events_persisted_total", 1);
                debug!(message_id = %message.id, row_id, "persisted event");
            }
            Err(ProcessingError::Decode(e)) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                metrics::increment("processor_decode_errors_total", 1);
                warn!(message_id = %message.id, error = %e, "Skipping undecodable message");
            }
            Err(ProcessingError::Persist(e)) => {
                self.stats.insert_errors.fetch_add(1, Ordering::Relaxed);
                metrics::increment("processor_insert_errors_total", 1);
                error!(message_id = %message.id, error = %e, "Failed to persist event, skipping");
            }
            Err(ProcessingError::Acknowledge(e)) => {
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                self.stats.ack_errors.fetch_add(1, Ordering::Relaxed);
                metrics::increment("processor_events_persisted_total", 1);
                metrics::increment("processor_ack_errors_total", 1);
                error!(message_id = %message.id, error = %e, "Failed to acknowledge message");
            }
        }
    }

    /// Register the delivery group and return the position to resume after.
    ///
    /// The group starts at the beginning of the stream, so events queued
    /// before the first run are still processed. Returns `None` on shutdown.
    async fn join_group(&self, shutdown: &mut watch::Receiver<bool>) -> Option<MessageId> {
        let stream = &self.config.stream;
        let group = &self.config.group;

        loop {
            let joined = self
                .queue
                .create_group(stream, group, MessageId::START)
                .and_then(|_| self.queue.group_cursor(stream, group));

            match joined {
                Ok(cursor) => return Some(cursor.unwrap_or(MessageId::START)),
                Err(e) => {
                    warn!(stream = %stream, group = %group, error = %e, "Failed to register delivery group");
                    if self.backoff(shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for the retry backoff. Returns `true` if shutdown fired first.
    async fn backoff(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = shutdown_signalled(shutdown) => true,
            _ = tokio::time::sleep(self.config.retry_backoff) => false,
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
