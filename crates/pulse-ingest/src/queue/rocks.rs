//! RocksDB-backed durable queue.
//!
//! # Key Design
//!
//! All records live in the default column family, distinguished by a one-byte
//! tag:
//!
//! ```text
//! Entry:   'e' [stream] 0x00 [id_be (8 bytes)]  -> payload
//! Counter: 's' [stream]                         -> last id (u64 be)
//! Group:   'g' [stream] 0x00 [group]            -> cursor id (u64 be)
//! ```
//!
//! Big-endian ids keep each stream's entries in append order, so reading
//! forward from a position is a single ordered iterator seek. Stream keys may
//! not contain NUL, which keeps the separator unambiguous.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::{MessageId, QueueMessage};
use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch, WriteOptions};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::EventQueue;
use crate::{Error, Result};

const ENTRY_TAG: u8 = b'e';
const COUNTER_TAG: u8 = b's';
const GROUP_TAG: u8 = b'g';
const SEPARATOR: u8 = 0x00;

/// Configuration for the RocksDB queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory for the RocksDB database.
    pub path: PathBuf,

    /// Maximum number of messages returned by one read.
    pub read_batch_size: usize,

    /// Fsync every append and acknowledgement.
    pub sync_writes: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/queue"),
            read_batch_size: 100,
            sync_writes: true,
        }
    }
}

/// Durable, ordered, multi-stream log stored in RocksDB.
///
/// Thread-safe: share it as `Arc<RocksQueue>` or `Arc<dyn EventQueue>`.
pub struct RocksQueue {
    db: DBWithThreadMode<MultiThreaded>,
    config: QueueConfig,
    /// Serializes id allocation.
    append_lock: Mutex<()>,
    /// Serializes group cursor updates.
    group_lock: Mutex<()>,
    /// Wakes blocked readers after every append.
    appended: Notify,
}

impl RocksQueue {
    /// Open or create a queue at `config.path`.
    pub fn open(config: QueueConfig) -> Result<Self> {
        info!("Opening durable queue at {}", config.path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_write_buffer_size(16 * 1024 * 1024); // 16MB write buffer
        opts.set_max_write_buffer_number(2);
        opts.increase_parallelism(num_cpus::get().min(4) as i32);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, &config.path)?;

        Ok(Self {
            db,
            config,
            append_lock: Mutex::new(()),
            group_lock: Mutex::new(()),
            appended: Notify::new(),
        })
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn write_opts(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }

    /// Highest id assigned on `stream` (`START` if none).
    fn last_id(&self, stream: &str) -> Result<MessageId> {
        match self.db.get(counter_key(stream))? {
            Some(raw) => Ok(MessageId(decode_u64(&raw, "stream counter")?)),
            None => Ok(MessageId::START),
        }
    }

    /// Non-blocking read of up to `read_batch_size` messages after `after`.
    fn read_after(&self, stream: &str, after: MessageId) -> Result<Vec<QueueMessage>> {
        if after.as_u64() == u64::MAX {
            return Ok(Vec::new());
        }

        let prefix = entry_prefix(stream);
        let start = entry_key(stream, after.next());
        let iter = self
            .db
            .iterator(IteratorMode::From(&start, Direction::Forward));

        let mut messages = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let id = MessageId(decode_u64(&key[prefix.len()..], "entry key")?);
            messages.push(QueueMessage {
                id,
                payload: value.into_vec(),
            });

            if messages.len() >= self.config.read_batch_size {
                break;
            }
        }

        Ok(messages)
    }
}

#[async_trait]
impl EventQueue for RocksQueue {
    fn append(&self, stream: &str, payload: &[u8]) -> Result<MessageId> {
        validate_stream(stream)?;

        let id = {
            let _guard = self.append_lock.lock();
            let id = self.last_id(stream)?.next();

            let mut batch = WriteBatch::default();
            batch.put(entry_key(stream, id), payload);
            batch.put(counter_key(stream), id.as_u64().to_be_bytes());
            self.db.write_opt(batch, &self.write_opts())?;
            id
        };

        self.appended.notify_waiters();
        metrics::counter!("queue_appends_total").increment(1);
        debug!(stream, message_id = %id, bytes = payload.len(), "appended message");

        Ok(id)
    }

    async fn read_blocking(
        &self,
        stream: &str,
        after: MessageId,
        block: Option<Duration>,
    ) -> Result<Vec<QueueMessage>> {
        validate_stream(stream)?;
        let deadline = block.map(|limit| tokio::time::Instant::now() + limit);

        loop {
            // Register for wakeups before reading so an append landing between
            // the read and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let messages = self.read_after(stream, after)?;
            if !messages.is_empty() {
                return Ok(messages);
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
            }
        }
    }

    fn create_group(&self, stream: &str, group: &str, start: MessageId) -> Result<bool> {
        validate_stream(stream)?;
        validate_group(group)?;

        let _guard = self.group_lock.lock();
        let key = group_key(stream, group);
        if self.db.get(&key)?.is_some() {
            return Ok(false);
        }

        self.db
            .put_opt(&key, start.as_u64().to_be_bytes(), &self.write_opts())?;
        info!(stream, group, cursor = %start, "created delivery group");
        Ok(true)
    }

    fn acknowledge(&self, stream: &str, group: &str, id: MessageId) -> Result<()> {
        validate_stream(stream)?;

        let _guard = self.group_lock.lock();
        let key = group_key(stream, group);
        let Some(raw) = self.db.get(&key)? else {
            return Err(Error::UnknownGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        };

        if self.db.get(entry_key(stream, id))?.is_none() {
            return Err(Error::UnknownMessage {
                stream: stream.to_string(),
                id,
            });
        }

        let cursor = decode_u64(&raw, "group cursor")?;
        if id.as_u64() > cursor {
            self.db
                .put_opt(&key, id.as_u64().to_be_bytes(), &self.write_opts())?;
        }

        Ok(())
    }

    fn group_cursor(&self, stream: &str, group: &str) -> Result<Option<MessageId>> {
        validate_stream(stream)?;
        match self.db.get(group_key(stream, group))? {
            Some(raw) => Ok(Some(MessageId(decode_u64(&raw, "group cursor")?))),
            None => Ok(None),
        }
    }

    fn len(&self, stream: &str) -> Result<u64> {
        validate_stream(stream)?;
        // Entries are never removed, so the counter is the length.
        Ok(self.last_id(stream)?.as_u64())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Key encoding
// ═══════════════════════════════════════════════════════════════════════════

fn validate_stream(stream: &str) -> Result<()> {
    if stream.is_empty() || stream.as_bytes().contains(&SEPARATOR) {
        return Err(Error::InvalidStreamKey(stream.to_string()));
    }
    Ok(())
}

fn validate_group(group: &str) -> Result<()> {
    if group.is_empty() {
        return Err(Error::InvalidGroupName(group.to_string()));
    }
    Ok(())
}

fn entry_prefix(stream: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(stream.len() + 2);
    key.push(ENTRY_TAG);
    key.extend_from_slice(stream.as_bytes());
    key.push(SEPARATOR);
    key
}

fn entry_key(stream: &str, id: MessageId) -> Vec<u8> {
    let mut key = entry_prefix(stream);
    key.extend_from_slice(&id.as_u64().to_be_bytes()); // Big-endian for ordering
    key
}

fn counter_key(stream: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(stream.len() + 1);
    key.push(COUNTER_TAG);
    key.extend_from_slice(stream.as_bytes());
    key
}

fn group_key(stream: &str, group: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(stream.len() + group.len() + 2);
    key.push(GROUP_TAG);
    key.extend_from_slice(stream.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(group.as_bytes());
    key
}

fn decode_u64(raw: &[u8], what: &str) -> Result<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| Error::Corrupt(format!("{what} has {} bytes, expected 8", raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    const STREAM: &str = "events:live";
    const GROUP: &str = "events-group";

    fn open_queue(tmp: &TempDir) -> RocksQueue {
        RocksQueue::open(QueueConfig {
            path: tmp.path().to_path_buf(),
            read_batch_size: 100,
            sync_writes: false,
        })
        .unwrap()
    }

    async fn read_now(queue: &RocksQueue, after: MessageId) -> Vec<QueueMessage> {
        queue
            .read_blocking(STREAM, after, Some(Duration::from_millis(10)))
            .await
            .unwrap()
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        assert_eq!(queue.append(STREAM, b"a").unwrap(), MessageId(1));
        assert_eq!(queue.append(STREAM, b"b").unwrap(), MessageId(2));
        assert_eq!(queue.append(STREAM, b"c").unwrap(), MessageId(3));
        assert_eq!(queue.len(STREAM).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_read_returns_messages_after_position_in_order() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);
        for payload in [b"a", b"b", b"c"] {
            queue.append(STREAM, payload).unwrap();
        }

        let all = read_now(&queue, MessageId::START).await;
        let payloads: Vec<&[u8]> = all.iter().map(|m| m.payload.as_slice()).collect();
        assert_eq!(payloads, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);

        let rest = read_now(&queue, MessageId(2)).await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, MessageId(3));
        assert_eq!(rest[0].payload, b"c");
    }

    #[tokio::test]
    async fn test_streams_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);
        queue.append(STREAM, b"live").unwrap();
        queue.append("events:other", b"other").unwrap();
        queue.append("events:other", b"other2").unwrap();

        let live = read_now(&queue, MessageId::START).await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].payload, b"live");
        assert_eq!(queue.len("events:other").unwrap(), 2);
        assert_eq!(queue.len("events:empty").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_respects_batch_size() {
        let tmp = TempDir::new().unwrap();
        let queue = RocksQueue::open(QueueConfig {
            path: tmp.path().to_path_buf(),
            read_batch_size: 2,
            sync_writes: false,
        })
        .unwrap();
        for _ in 0..5 {
            queue.append(STREAM, b"x").unwrap();
        }

        let first = read_now(&queue, MessageId::START).await;
        assert_eq!(first.len(), 2);
        let second = read_now(&queue, first[1].id).await;
        assert_eq!(second[0].id, MessageId(3));
    }

    #[test]
    fn test_invalid_stream_key_rejected() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);
        assert!(matches!(
            queue.append("", b"x"),
            Err(Error::InvalidStreamKey(_))
        ));
        assert!(matches!(
            queue.append("bad\0key", b"x"),
            Err(Error::InvalidStreamKey(_))
        ));
    }

    #[test]
    fn test_create_group_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);
        queue.append(STREAM, b"a").unwrap();

        assert!(queue.create_group(STREAM, GROUP, MessageId::START).unwrap());
        queue.acknowledge(STREAM, GROUP, MessageId(1)).unwrap();

        // Re-creating keeps the existing cursor
        assert!(!queue.create_group(STREAM, GROUP, MessageId::START).unwrap());
        assert_eq!(
            queue.group_cursor(STREAM, GROUP).unwrap(),
            Some(MessageId(1))
        );
    }

    #[test]
    fn test_acknowledge_advances_cursor_monotonically() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);
        for _ in 0..3 {
            queue.append(STREAM, b"x").unwrap();
        }
        queue.create_group(STREAM, GROUP, MessageId::START).unwrap();

        queue.acknowledge(STREAM, GROUP, MessageId(3)).unwrap();
        queue.acknowledge(STREAM, GROUP, MessageId(2)).unwrap();
        assert_eq!(
            queue.group_cursor(STREAM, GROUP).unwrap(),
            Some(MessageId(3))
        );
    }

    #[test]
    fn test_acknowledge_unknown_group_fails() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);
        let id = queue.append(STREAM, b"x").unwrap();

        let err = queue.acknowledge(STREAM, "never-created", id).unwrap_err();
        assert!(matches!(err, Error::UnknownGroup { .. }));
        assert_eq!(queue.group_cursor(STREAM, "never-created").unwrap(), None);
    }

    #[test]
    fn test_acknowledge_unknown_message_fails() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);
        queue.create_group(STREAM, GROUP, MessageId::START).unwrap();

        let err = queue.acknowledge(STREAM, GROUP, MessageId(42)).unwrap_err();
        assert!(matches!(err, Error::UnknownMessage { .. }));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let queue = open_queue(&tmp);
            queue.append(STREAM, b"a").unwrap();
            queue.append(STREAM, b"b").unwrap();
            queue.create_group(STREAM, GROUP, MessageId::START).unwrap();
            queue.acknowledge(STREAM, GROUP, MessageId(1)).unwrap();
            queue.flush().unwrap();
        }

        let queue = open_queue(&tmp);
        assert_eq!(queue.len(STREAM).unwrap(), 2);
        assert_eq!(
            queue.group_cursor(STREAM, GROUP).unwrap(),
            Some(MessageId(1))
        );
        assert_eq!(queue.append(STREAM, b"c").unwrap(), MessageId(3));

        let pending = read_now(&queue, MessageId(1)).await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].payload, b"b");
    }

    #[tokio::test]
    async fn test_read_blocking_wakes_on_append() {
        let tmp = TempDir::new().unwrap();
        let queue = Arc::new(open_queue(&tmp));

        let reader = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .read_blocking(STREAM, MessageId::START, None)
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.append(STREAM, b"late").unwrap();

        let messages = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader should wake")
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, b"late");
    }

    #[tokio::test]
    async fn test_read_blocking_times_out_empty() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        let messages = queue
            .read_blocking(STREAM, MessageId::START, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_read_keeps_position() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);
        let position = MessageId::START;

        tokio::select! {
            _ = queue.read_blocking(STREAM, position, None) => panic!("nothing to read yet"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        queue.append(STREAM, b"after-cancel").unwrap();
        let messages = read_now(&queue, position).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, MessageId(1));
    }
}
