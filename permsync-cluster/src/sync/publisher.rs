//! Producer side of the permission-change stream
//!
//! Upstream services publish one entry per logical permission change. The
//! stream is trimmed approximately so it cannot grow without bound while no
//! consumer is running.

use permsync_core::models::PermissionChangeEvent;
use redis::aio::ConnectionManager;
use redis::streams::StreamMaxlen;
use redis::AsyncCommands;
use tracing::debug;

use super::queue::PAYLOAD_FIELD;
use crate::{Result, SyncError};

#[derive(Clone)]
pub struct PermissionEventPublisher {
    conn: ConnectionManager,
    stream: String,
    max_len: usize,
}

impl PermissionEventPublisher {
    pub fn new(conn: ConnectionManager, stream: impl Into<String>, max_len: usize) -> Self {
        Self {
            conn,
            stream: stream.into(),
            max_len,
        }
    }

    /// Append an event to the stream, returning its entry id
    pub async fn publish(&self, event: &PermissionChangeEvent) -> Result<String> {
        let payload = event
            .encode()
            .map_err(|e| SyncError::Serialization(format!("permission event: {e}")))?;

        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(
                &self.stream,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &[(PAYLOAD_FIELD, payload.as_str())],
            )
            .await
            .map_err(|e| SyncError::Queue(format!("XADD to {} failed: {e}", self.stream)))?;

        debug!(
            stream = %self.stream,
            entry_id = %id,
            users = event.len(),
            "Published permission change event"
        );

        Ok(id)
    }
}

impl std::fmt::Debug for PermissionEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionEventPublisher")
            .field("stream", &self.stream)
            .field("max_len", &self.max_len)
            .finish_non_exhaustive()
    }
}
