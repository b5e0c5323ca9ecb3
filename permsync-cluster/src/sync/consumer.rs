//! Permission cache synchronizer loop
//!
//! One background task takes one message at a time from the event queue and
//! applies it:
//!
//! 1. decode the `PermissionChangeEvent`
//! 2. resolve all of its users to active sessions with one bulk lookup
//! 3. encode a snapshot per resolved user and stage it into one pipeline,
//!    versioned by the message id
//! 4. execute the pipeline once
//! 5. acknowledge according to the configured `AckPolicy`
//!
//! A poll waits at most `poll_block`, which the queue enforces. The iteration
//! deadline starts once a message is in hand, so a message the queue has handed
//! out is always processed. A failed message is logged and dropped; the loop
//! itself only stops when its cancellation token fires.

use permsync_core::models::PermissionChangeEvent;
use permsync_core::{AckPolicy, Config};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache_writer::CacheWriter;
use super::queue::{EventQueue, QueueMessage};
use super::session_resolver::SessionResolver;
use crate::{Result, SyncError};

/// Initial backoff after a failed poll
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum backoff after repeated failed polls
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Deadline for processing one message, and for acknowledging it
    pub iteration_timeout: Duration,
    /// How long a poll may wait for a message
    pub poll_block: Duration,
    pub ack_policy: AckPolicy,
}

impl ConsumerSettings {
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            iteration_timeout: config.iteration_timeout(),
            poll_block: config.poll_block(),
            ack_policy: config.queue.ack_policy,
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What one message did to the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// Users named by the event
    pub users: usize,
    /// Snapshots written (users with an active session)
    pub written: usize,
    /// Snapshots not written because the cache holds a newer event
    pub stale: usize,
}

impl ProcessReport {
    /// Users without an active session
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.users - self.written - self.stale
    }
}

/// Result of one loop iteration
#[derive(Debug)]
pub enum IterationOutcome {
    /// No message arrived before the poll returned
    Idle,
    /// A message was applied
    Applied(ProcessReport),
    /// A message was taken but could not be applied
    Failed(SyncError),
    /// The queue itself could not be polled
    PollFailed(SyncError),
    /// Cancellation was requested while polling
    Shutdown,
}

/// Running counters of the consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    snapshots_written: AtomicU64,
    snapshots_stale: AtomicU64,
    users_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub applied: u64,
    pub failed: u64,
    pub snapshots_written: u64,
    pub snapshots_stale: u64,
    pub users_skipped: u64,
}

impl ConsumerStats {
    fn record_applied(&self, report: &ProcessReport) {
        self.applied.fetch_add(1, Ordering::Relaxed);
        self.snapshots_written
            .fetch_add(report.written as u64, Ordering::Relaxed);
        self.snapshots_stale
            .fetch_add(report.stale as u64, Ordering::Relaxed);
        self.users_skipped
            .fetch_add(report.skipped() as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            snapshots_written: self.snapshots_written.load(Ordering::Relaxed),
            snapshots_stale: self.snapshots_stale.load(Ordering::Relaxed),
            users_skipped: self.users_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Keeps session permission snapshots in line with permission-change events
pub struct PermissionSyncConsumer {
    queue: Arc<dyn EventQueue>,
    resolver: SessionResolver,
    writer: CacheWriter,
    settings: ConsumerSettings,
    stats: Arc<ConsumerStats>,
    cancel_token: CancellationToken,
}

impl PermissionSyncConsumer {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        resolver: SessionResolver,
        writer: CacheWriter,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            queue,
            resolver,
            writer,
            settings,
            stats: Arc::new(ConsumerStats::default()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for external shutdown signaling
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Stop the loop after the current iteration
    pub fn shutdown(&self) {
        info!("Shutting down permission sync consumer");
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Spawn the loop as a background task
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Consume until cancelled
    pub async fn run(&self) {
        info!(
            iteration_timeout_ms = self.settings.iteration_timeout.as_millis() as u64,
            poll_block_ms = self.settings.poll_block.as_millis() as u64,
            ack_policy = ?self.settings.ack_policy,
            "Permission sync consumer started"
        );

        let mut backoff = INITIAL_BACKOFF;

        while !self.cancel_token.is_cancelled() {
            match self.consume_once().await {
                IterationOutcome::Shutdown => break,
                IterationOutcome::PollFailed(e) => {
                    error!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Failed to poll permission events, retrying after backoff"
                    );
                    tokio::select! {
                        () = self.cancel_token.cancelled() => break,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                _ => backoff = INITIAL_BACKOFF,
            }
        }

        let stats = self.stats.snapshot();
        info!(
            received = stats.received,
            applied = stats.applied,
            failed = stats.failed,
            "Permission sync consumer stopped"
        );
    }

    /// Poll for one message and handle it under the iteration deadline
    pub async fn consume_once(&self) -> IterationOutcome {
        let polled = tokio::select! {
            () = self.cancel_token.cancelled() => return IterationOutcome::Shutdown,
            polled = self.queue.poll(self.settings.poll_block) => polled,
        };

        let message = match polled {
            Ok(Some(message)) => message,
            Ok(None) => return IterationOutcome::Idle,
            Err(e) => return IterationOutcome::PollFailed(e),
        };

        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let processed = timeout(self.settings.iteration_timeout, self.process(&message)).await;
        let result = match processed {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "processing exceeded {}ms",
                self.settings.iteration_timeout.as_millis()
            ))),
        };

        let ack = match &result {
            Ok(_) => true,
            Err(e) => self.settings.ack_policy == AckPolicy::Always || !e.is_transient(),
        };

        let outcome = match result {
            Ok(report) => {
                self.stats.record_applied(&report);
                info!(
                    message_id = %message.id,
                    users = report.users,
                    written = report.written,
                    stale = report.stale,
                    skipped = report.skipped(),
                    "Applied permission change event"
                );
                IterationOutcome::Applied(report)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    error = %e,
                    kind = e.kind(),
                    message_id = %message.id,
                    payload = %message.payload_lossy(),
                    acked = ack,
                    "Failed to apply permission change event"
                );
                IterationOutcome::Failed(e)
            }
        };

        if ack {
            self.acknowledge(&message).await;
        }

        outcome
    }

    /// decode -> resolve -> stage -> execute, aborting on the first failure
    async fn process(&self, message: &QueueMessage) -> Result<ProcessReport> {
        let event = PermissionChangeEvent::decode(&message.payload).map_err(|e| {
            for entry in PermissionChangeEvent::unknown_effects(&message.payload) {
                warn!(
                    message_id = %message.id,
                    user = %entry.user,
                    entry = entry.index,
                    effect = %entry.effect,
                    "Unknown permission effect rejects the event"
                );
            }
            SyncError::Decode(e.to_string())
        })?;

        let user_ids = event.user_ids();
        let sessions = self.resolver.resolve(&user_ids).await?;
        let pipeline = self.writer.stage(&event, &message.id, &sessions)?;
        let written = self.writer.apply(&pipeline).await?;

        Ok(ProcessReport {
            users: user_ids.len(),
            written,
            stale: pipeline.len().saturating_sub(written),
        })
    }

    /// Acknowledge with its own time budget; a failed ack leaves the message pending
    async fn acknowledge(&self, message: &QueueMessage) {
        match timeout(self.settings.iteration_timeout, self.queue.ack(message)).await {
            Ok(Ok(())) => debug!(message_id = %message.id, "Acknowledged message"),
            Ok(Err(e)) => warn!(
                error = %e,
                message_id = %message.id,
                "Failed to acknowledge message, it stays pending"
            ),
            Err(_) => warn!(
                message_id = %message.id,
                "Timed out acknowledging message, it stays pending"
            ),
        }
    }
}

impl std::fmt::Debug for PermissionSyncConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionSyncConsumer")
            .field("settings", &self.settings)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}
