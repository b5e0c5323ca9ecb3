//! Per-session permission cache writes
//!
//! Every resolved user of an event gets one snapshot write staged into a single
//! `SnapshotPipeline`, executed once per event. Each write carries the stream id
//! of its event as a version, stored in a sibling hash field. A write whose
//! version is older than the stored one is skipped, so a redelivered event can
//! never replace the snapshot of a later event.

use async_trait::async_trait;
use permsync_core::cache::{decode_snapshot, encode_snapshot};
use permsync_core::models::{PermissionChangeEvent, UserPermission};
use permsync_core::KeyBuilder;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::{Result, SyncError};

/// Per write: KEYS[i] is the session hash, ARGV[4i-3..4i] are
/// field, version field, version, snapshot. Returns the number of writes applied.
const CONDITIONAL_HSET: &str = r"
local function parse(id)
    if not id then
        return nil
    end
    local ms, seq = string.match(id, '^(%d+)-(%d+)$')
    if not ms then
        return nil
    end
    return tonumber(ms), tonumber(seq)
end

local written = 0
for i, key in ipairs(KEYS) do
    local base = (i - 1) * 4
    local field, version_field = ARGV[base + 1], ARGV[base + 2]
    local version, value = ARGV[base + 3], ARGV[base + 4]

    local cur_ms, cur_seq = parse(redis.call('HGET', key, version_field))
    local new_ms, new_seq = parse(version)
    local stale = cur_ms ~= nil and new_ms ~= nil
        and (new_ms < cur_ms or (new_ms == cur_ms and new_seq < cur_seq))

    if not stale then
        redis.call('HSET', key, field, value, version_field, version)
        written = written + 1
    end
end
return written
";

/// Parse a stream entry id (`{ms}-{seq}`)
fn parse_version(version: &str) -> Option<(u64, u64)> {
    let (ms, seq) = version.split_once('-')?;
    Some((ms.parse().ok()?, seq.parse().ok()?))
}

/// Whether a snapshot at `version` may replace one at `current`.
///
/// Ids that do not parse as stream ids never block a write.
#[must_use]
pub fn supersedes(version: &str, current: Option<&str>) -> bool {
    match (parse_version(version), current.and_then(parse_version)) {
        (Some(new), Some(cur)) => new.cmp(&cur) != Ordering::Less,
        _ => true,
    }
}

/// One staged hash-field write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotWrite {
    pub user_id: i64,
    pub key: String,
    pub field: String,
    pub value: String,
    pub version_field: String,
    /// Stream id of the event the snapshot comes from
    pub version: String,
}

/// Writes staged for one event, executed as a unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotPipeline {
    writes: Vec<SnapshotWrite>,
}

impl SnapshotPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, write: SnapshotWrite) {
        self.writes.push(write);
    }

    #[must_use]
    pub fn writes(&self) -> &[SnapshotWrite] {
        &self.writes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Shared cache holding per-session permission snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Apply the pipeline in one round trip, skipping writes older than the
    /// stored version. Returns how many writes were applied.
    async fn execute(&self, pipeline: &SnapshotPipeline) -> Result<usize>;

    /// Read one snapshot field
    async fn read_snapshot(&self, key: &str, field: &str) -> Result<Option<String>>;
}

/// `CacheStore` backed by Redis hashes
///
/// The pipeline runs as one Lua script, so no other client sees a partly
/// applied event.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: ConnectionManager,
    script: Arc<Script>,
}

impl RedisCacheStore {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Arc::new(Script::new(CONDITIONAL_HSET)),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn execute(&self, pipeline: &SnapshotPipeline) -> Result<usize> {
        let mut invocation = self.script.prepare_invoke();
        for write in pipeline.writes() {
            invocation
                .key(&write.key)
                .arg(&write.field)
                .arg(&write.version_field)
                .arg(&write.version)
                .arg(&write.value);
        }

        let mut conn = self.conn.clone();
        invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                SyncError::Write(format!(
                    "snapshot script over {} keys failed: {e}",
                    pipeline.len()
                ))
            })
    }

    async fn read_snapshot(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.hget(key, field)
            .await
            .map_err(|e| SyncError::Lookup(format!("HGET {key} {field} failed: {e}")))
    }
}

/// Encodes snapshots and applies them to the cache
#[derive(Clone)]
pub struct CacheWriter {
    store: Arc<dyn CacheStore>,
    keys: KeyBuilder,
    field: String,
    version_field: String,
}

impl CacheWriter {
    /// Writer storing snapshots in `field` and their versions in `{field}_version`
    pub fn new(store: Arc<dyn CacheStore>, keys: KeyBuilder, field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            store,
            keys,
            version_field: format!("{field}_version"),
            field,
        }
    }

    #[must_use]
    pub fn with_version_field(mut self, version_field: impl Into<String>) -> Self {
        self.version_field = version_field.into();
        self
    }

    /// Encode and stage a write for every user of `event` that has a session.
    ///
    /// `version` is the stream id of the event. Fails on the first snapshot that
    /// cannot be encoded; nothing staged so far is kept.
    pub fn stage(
        &self,
        event: &PermissionChangeEvent,
        version: &str,
        sessions: &HashMap<i64, String>,
    ) -> Result<SnapshotPipeline> {
        let mut pipeline = SnapshotPipeline::new();

        for user_id in event.user_ids() {
            let Some(session_id) = sessions.get(&user_id) else {
                debug!(user_id, "No active session, skipping user");
                continue;
            };
            let change = &event.permissions[&user_id];

            let value = encode_snapshot(user_id, change).map_err(|e| {
                error!(
                    error = %e,
                    user_id,
                    session_id = %session_id,
                    permissions = ?change.permissions,
                    "Failed to serialize permission snapshot"
                );
                SyncError::Serialization(format!("user {user_id}: {e}"))
            })?;

            pipeline.stage(SnapshotWrite {
                user_id,
                key: self.keys.session_cache(session_id),
                field: self.field.clone(),
                value,
                version_field: self.version_field.clone(),
                version: version.to_string(),
            });
        }

        Ok(pipeline)
    }

    /// Execute the pipeline once; returns the number of snapshots written
    pub async fn apply(&self, pipeline: &SnapshotPipeline) -> Result<usize> {
        if pipeline.is_empty() {
            return Ok(0);
        }
        let written = self.store.execute(pipeline).await?;
        if written < pipeline.len() {
            debug!(
                staged = pipeline.len(),
                written,
                "Skipped snapshots older than the cached version"
            );
        }
        Ok(written)
    }

    /// Read back the cached snapshot of a session
    pub async fn read(&self, session_id: &str) -> Result<Option<Vec<UserPermission>>> {
        let key = self.keys.session_cache(session_id);
        let Some(raw) = self.store.read_snapshot(&key, &self.field).await? else {
            return Ok(None);
        };
        decode_snapshot(&raw)
            .map(Some)
            .map_err(|e| SyncError::Decode(format!("snapshot at {key}: {e}")))
    }
}

impl std::fmt::Debug for CacheWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWriter")
            .field("keys", &self.keys)
            .field("field", &self.field)
            .field("version_field", &self.version_field)
            .finish_non_exhaustive()
    }
}
