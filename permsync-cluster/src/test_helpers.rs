//! In-memory stand-ins for the queue, session store and cache

use async_trait::async_trait;
use parking_lot::Mutex;
use permsync_core::models::{
    Effect, PermissionChangeEvent, PermissionEntry, Resource, UserPermissionChange,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::sync::cache_writer::supersedes;
use crate::sync::{CacheStore, EventQueue, QueueMessage, SessionStore, SnapshotPipeline};
use crate::{Result, SyncError};

/// User 42 in biz 7 with `doc/d1 read allow`
pub fn sample_event() -> PermissionChangeEvent {
    PermissionChangeEvent::decode(
        br#"{"permissions":{"42":{"userId":42,"bizId":7,"permissions":[{"resource":{"type":"doc","key":"d1"},"action":"read","effect":"allow"}]}}}"#,
    )
    .unwrap()
}

/// One `doc/d{uid} read allow` entry per user, all in biz 1
pub fn event_with_users(user_ids: &[i64]) -> PermissionChangeEvent {
    let permissions = user_ids
        .iter()
        .map(|uid| {
            (
                *uid,
                UserPermissionChange {
                    user_id: *uid,
                    biz_id: 1,
                    permissions: vec![PermissionEntry {
                        resource: Resource::new("doc", format!("d{uid}")),
                        action: "read".to_string(),
                        effect: Effect::Allow,
                    }],
                },
            )
        })
        .collect();
    PermissionChangeEvent { permissions }
}

/// FIFO queue recording acknowledgements; an empty poll waits out `block`
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<QueueMessage>>,
    acked: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_raw(&self, id: &str, payload: &[u8]) {
        self.messages
            .lock()
            .push_back(QueueMessage::new(id, payload.to_vec()));
    }

    /// Enqueue an encoded event, returning its generated id
    pub fn push_event(&self, event: &PermissionChangeEvent) -> String {
        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 100);
        self.push_raw(&id, event.encode().unwrap().as_bytes());
        id
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().clone()
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn poll(&self, block: Duration) -> Result<Option<QueueMessage>> {
        let next = self.messages.lock().pop_front();
        if next.is_none() {
            tokio::time::sleep(block).await;
        }
        Ok(next)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<()> {
        self.acked.lock().push(message.id.clone());
        Ok(())
    }
}

/// Queue that takes its next message at once but replies only after `delay`
pub struct DelayedQueue {
    inner: MemoryQueue,
    delay: Duration,
    taken: AtomicUsize,
}

impl DelayedQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryQueue::new(),
            delay,
            taken: AtomicUsize::new(0),
        }
    }

    pub fn push_event(&self, event: &PermissionChangeEvent) -> String {
        self.inner.push_event(event)
    }

    /// Messages removed from the queue, answered or not
    pub fn taken(&self) -> usize {
        self.taken.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> Vec<String> {
        self.inner.acked()
    }
}

#[async_trait]
impl EventQueue for DelayedQueue {
    async fn poll(&self, _block: Duration) -> Result<Option<QueueMessage>> {
        let next = self.inner.messages.lock().pop_front();
        if next.is_some() {
            self.taken.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;
        Ok(next)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<()> {
        self.inner.ack(message).await
    }
}

/// String store with call counting and injectable failures
#[derive(Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, session_id: &str) {
        self.values
            .lock()
            .insert(key.to_string(), session_id.to_string());
    }

    /// Make the next `n` lookups fail
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::Lookup("session store unavailable".to_string()));
        }

        let values = self.values.lock();
        Ok(keys.iter().map(|k| values.get(k).cloned()).collect())
    }
}

/// Session store that never answers within a short deadline
pub struct SlowSessionStore {
    delay: Duration,
}

impl SlowSessionStore {
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl SessionStore for SlowSessionStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![None; keys.len()])
    }
}

/// Hash store applying each pipeline all-or-nothing, honoring write versions
#[derive(Default)]
pub struct MemoryCacheStore {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    executions: AtomicUsize,
    failures: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` pipeline executions fail
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn set_field(&self, key: &str, field: &str, value: &str) {
        self.hashes
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    pub fn field(&self, key: &str, field: &str) -> Option<String> {
        self.hashes
            .lock()
            .get(key)
            .and_then(|h| h.get(field))
            .cloned()
    }

    /// Number of hashes present
    pub fn len(&self) -> usize {
        self.hashes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.lock().is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn execute(&self, pipeline: &SnapshotPipeline) -> Result<usize> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::Write("connection reset by peer".to_string()));
        }

        let mut hashes = self.hashes.lock();
        let mut written = 0;
        for write in pipeline.writes() {
            let hash = hashes.entry(write.key.clone()).or_default();
            if !supersedes(&write.version, hash.get(&write.version_field).map(String::as_str)) {
                continue;
            }
            hash.insert(write.field.clone(), write.value.clone());
            hash.insert(write.version_field.clone(), write.version.clone());
            written += 1;
        }
        Ok(written)
    }

    async fn read_snapshot(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.field(key, field))
    }
}
