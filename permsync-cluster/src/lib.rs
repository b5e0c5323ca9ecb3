pub mod error;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{Result, SyncError};
pub use sync::{
    CacheStore, CacheWriter, ConsumerSettings, ConsumerStats, EventQueue,
    PermissionEventPublisher, PermissionSyncConsumer, QueueMessage, RedisCacheStore,
    RedisSessionStore, RedisStreamQueue, SessionResolver, SessionStore, SnapshotPipeline,
};
