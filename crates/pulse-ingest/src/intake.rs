//! Intake: validate a posted event and append it to the ingestion stream.
//!
//! Intake never touches the event store. A successful submit only means the
//! event is durably queued; it becomes queryable once the stream processor
//! has drained it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pulse_core::{Event, IncomingEvent, MessageId};
use thiserror::Error;

use crate::queue::EventQueue;

/// Why a submission was not accepted.
#[derive(Error, Debug)]
pub enum IntakeError {
    /// The body is not a structurally valid event. Nothing was queued.
    #[error("invalid event body: {0}")]
    Validation(#[source] pulse_core::Error),

    /// The event was valid but the queue append failed. The event is lost.
    #[error("failed to enqueue event: {0}")]
    Enqueue(#[source] crate::Error),
}

/// A submission that reached the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub id: MessageId,
    pub event: Event,
}

/// Validates request bodies and appends them to one stream.
#[derive(Clone)]
pub struct IntakeService {
    queue: Arc<dyn EventQueue>,
    stream: String,
}

impl IntakeService {
    pub fn new(queue: Arc<dyn EventQueue>, stream: impl Into<String>) -> Self {
        Self {
            queue,
            stream: stream.into(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Submit a request body, stamping the current time if needed.
    pub fn submit(&self, body: &[u8]) -> Result<Accepted, IntakeError> {
        self.submit_at(body, Utc::now())
    }

    /// Submit a request body accepted at `accepted_at`.
    ///
    /// Exactly one append happens per valid body; failures are not retried.
    pub fn submit_at(
        &self,
        body: &[u8],
        accepted_at: DateTime<Utc>,
    ) -> Result<Accepted, IntakeError> {
        let incoming = IncomingEvent::from_json_bytes(body).map_err(|e| {
            metrics::counter!("intake_events_rejected_total").increment(1);
            IntakeError::Validation(e)
        })?;
        let event = incoming.into_event(accepted_at);

        let payload = event
            .to_json_bytes()
            .map_err(|e| IntakeError::Enqueue(e.into()))?;

        let id = self.queue.append(&self.stream, &payload).map_err(|e| {
            metrics::counter!("intake_enqueue_errors_total").increment(1);
            tracing::error!(error = %e, stream = %self.stream, "failed to enqueue event");
            IntakeError::Enqueue(e)
        })?;

        metrics::counter!("intake_events_accepted_total").increment(1);
        tracing::debug!(message_id = %id, user_id = %event.user_id, "event accepted");

        Ok(Accepted { id, event })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::queue::{QueueConfig, RocksQueue};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pulse_core::{DEFAULT_STREAM_KEY, QueueMessage};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Queue whose log is unreachable.
    pub(crate) struct UnreachableQueue;

    #[async_trait]
    impl EventQueue for UnreachableQueue {
        fn append(&self, stream: &str, _payload: &[u8]) -> crate::Result<MessageId> {
            Err(crate::Error::InvalidStreamKey(stream.to_string()))
        }

        async fn read_blocking(
            &self,
            stream: &str,
            _after: MessageId,
            _block: Option<Duration>,
        ) -> crate::Result<Vec<QueueMessage>> {
            Err(crate::Error::InvalidStreamKey(stream.to_string()))
        }

        fn create_group(&self, _: &str, _: &str, _: MessageId) -> crate::Result<bool> {
            Ok(true)
        }

        fn acknowledge(&self, _: &str, _: &str, _: MessageId) -> crate::Result<()> {
            Ok(())
        }

        fn group_cursor(&self, _: &str, _: &str) -> crate::Result<Option<MessageId>> {
            Ok(None)
        }

        fn len(&self, _: &str) -> crate::Result<u64> {
            Ok(0)
        }
    }

    fn queue(tmp: &TempDir) -> Arc<RocksQueue> {
        Arc::new(
            RocksQueue::open(QueueConfig {
                path: tmp.path().to_path_buf(),
                sync_writes: false,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn accepted_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_submit_appends_one_message() {
        let tmp = TempDir::new().unwrap();
        let queue = queue(&tmp);
        let intake = IntakeService::new(queue.clone(), DEFAULT_STREAM_KEY);

        let accepted = intake
            .submit_at(
                br#"{"user_id":"u1","action":"click","element":"btn1","duration":2.5}"#,
                accepted_at(),
            )
            .unwrap();

        assert_eq!(accepted.event.timestamp, accepted_at());
        assert_eq!(queue.len(DEFAULT_STREAM_KEY).unwrap(), 1);

        let queued = queue
            .read_blocking(DEFAULT_STREAM_KEY, MessageId::START, Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(queued[0].id, accepted.id);
        assert_eq!(queued[0].decode_event().unwrap(), accepted.event);
    }

    #[test]
    fn test_malformed_body_is_rejected_without_append() {
        let tmp = TempDir::new().unwrap();
        let queue = queue(&tmp);
        let intake = IntakeService::new(queue.clone(), DEFAULT_STREAM_KEY);

        let err = intake.submit_at(b"{\"user_id\":", accepted_at()).unwrap_err();

        assert!(matches!(err, IntakeError::Validation(_)));
        assert_eq!(queue.len(DEFAULT_STREAM_KEY).unwrap(), 0);
    }

    #[test]
    fn test_empty_fields_are_accepted() {
        let tmp = TempDir::new().unwrap();
        let intake = IntakeService::new(queue(&tmp), DEFAULT_STREAM_KEY);

        let accepted = intake.submit_at(b"{}", accepted_at()).unwrap();
        assert_eq!(accepted.event.user_id, "");
        assert_eq!(accepted.event.action, "");
    }

    #[test]
    fn test_submit_stamps_current_time() {
        let tmp = TempDir::new().unwrap();
        let intake = IntakeService::new(queue(&tmp), DEFAULT_STREAM_KEY);

        let before = Utc::now();
        let accepted = intake.submit(br#"{"user_id":"u1"}"#).unwrap();
        let after = Utc::now();

        // Truncation to millis can move the stamp just below `before`
        let ts = accepted.event.timestamp;
        assert!(ts >= before - chrono::Duration::milliseconds(1));
        assert!(ts <= after);
    }

    #[test]
    fn test_enqueue_failure_surfaces() {
        let intake = IntakeService::new(Arc::new(UnreachableQueue), DEFAULT_STREAM_KEY);

        let err = intake
            .submit_at(br#"{"user_id":"u1"}"#, accepted_at())
            .unwrap_err();
        assert!(matches!(err, IntakeError::Enqueue(_)));
    }
}
