//! Inbound permission-change queue
//!
//! Events travel on a Redis Stream read through a consumer group. Each entry
//! carries the JSON-encoded event in its `payload` field. Nothing is
//! acknowledged implicitly: the consumer decides per message whether to `XACK`
//! (see `AckPolicy`). Entries left unacknowledged stay in this consumer's pending
//! list and are delivered again, once, when the queue is next opened under the
//! same consumer name.
//!
//! `XREADGROUP >` assigns an entry to this consumer as soon as Redis serves it.
//! When such a read never hands its reply back (dropped future, reply timeout),
//! the next poll goes back over the pending list first so the entry is not lost.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info};

use crate::{Result, SyncError};

/// Stream entry field holding the encoded event
pub const PAYLOAD_FIELD: &str = "payload";

/// One message taken from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Stream entry id, used for acknowledgement
    pub id: String,
    pub payload: Vec<u8>,
}

impl QueueMessage {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }

    /// Payload rendered for logs
    #[must_use]
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Source of permission-change messages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Take at most one message, waiting up to `block` for one to arrive.
    /// `Ok(None)` means nothing was available.
    async fn poll(&self, block: Duration) -> Result<Option<QueueMessage>>;

    /// Mark a message as handled so it is never delivered again
    async fn ack(&self, message: &QueueMessage) -> Result<()>;
}

/// Where the next read starts
#[derive(Debug)]
struct ReadCursor {
    /// Last pending entry handed out; `None` once the pending list is drained
    pending: Option<String>,
    /// A read of new entries was issued and has not returned a reply yet
    reading_new: bool,
}

impl ReadCursor {
    const START: &'static str = "0";

    fn new() -> Self {
        Self {
            pending: Some(Self::START.to_string()),
            reading_new: false,
        }
    }

    /// Id to read pending entries after, or `None` to read new entries
    fn next(&mut self) -> Option<String> {
        if self.reading_new {
            // The last read may have claimed an entry nobody saw
            self.reading_new = false;
            self.pending = Some(Self::START.to_string());
        }
        self.pending.clone()
    }

    fn pending_read(&mut self, id: Option<&str>) {
        self.pending = id.map(str::to_string);
    }

    fn begin_new(&mut self) {
        self.reading_new = true;
    }

    fn finish_new(&mut self) {
        self.reading_new = false;
    }
}

/// `EventQueue` backed by a Redis Stream consumer group
pub struct RedisStreamQueue {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    cursor: Mutex<ReadCursor>,
}

impl RedisStreamQueue {
    pub fn new(
        conn: ConnectionManager,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            cursor: Mutex::new(ReadCursor::new()),
        }
    }

    /// Create the consumer group (and the stream) if missing.
    ///
    /// A new group starts at the stream tip: events published before the group
    /// existed are not replayed.
    pub async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "$")
            .await;

        match created {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.stream, group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(SyncError::Queue(format!(
                "Failed to create consumer group {} on {}: {e}",
                self.group, self.stream
            ))),
        }
    }

    async fn read_one(&self, id: &str, block: Option<Duration>) -> Result<Option<QueueMessage>> {
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        if let Some(block) = block {
            opts = opts.block(usize::try_from(block.as_millis()).unwrap_or(usize::MAX));
        }

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[id], &opts)
            .await
            .map_err(|e| SyncError::Queue(format!("XREADGROUP on {} failed: {e}", self.stream)))?;

        let entry = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next());

        Ok(entry.map(|entry| {
            // Trimmed pending entries come back without fields
            let payload: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
            QueueMessage {
                id: entry.id,
                payload,
            }
        }))
    }
}

#[async_trait]
impl EventQueue for RedisStreamQueue {
    async fn poll(&self, block: Duration) -> Result<Option<QueueMessage>> {
        let after = self.cursor.lock().next();
        if let Some(after) = after {
            let message = self.read_one(&after, None).await?;
            self.cursor
                .lock()
                .pending_read(message.as_ref().map(|m| m.id.as_str()));
            match message {
                Some(message) => {
                    debug!(message_id = %message.id, "Redelivering pending message");
                    return Ok(Some(message));
                }
                None => {
                    info!(consumer = %self.consumer, "Pending messages drained, reading new messages");
                }
            }
        }

        // Stays flagged unless a reply arrives
        self.cursor.lock().begin_new();
        let message = self.read_one(">", Some(block)).await?;
        self.cursor.lock().finish_new();
        Ok(message)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.stream, &self.group, &[&message.id])
            .await
            .map_err(|e| SyncError::Queue(format!("XACK {} failed: {e}", message.id)))?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStreamQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamQueue")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}
