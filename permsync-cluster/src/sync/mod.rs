// Module: sync

pub mod cache_writer;
pub mod consumer;
pub mod publisher;
pub mod queue;
pub mod session_resolver;

pub use cache_writer::{CacheStore, CacheWriter, RedisCacheStore, SnapshotPipeline, SnapshotWrite};
pub use consumer::{
    ConsumerSettings, ConsumerStats, ConsumerStatsSnapshot, IterationOutcome,
    PermissionSyncConsumer, ProcessReport,
};
pub use publisher::PermissionEventPublisher;
pub use queue::{EventQueue, QueueMessage, RedisStreamQueue};
pub use session_resolver::{RedisSessionStore, SessionResolver, SessionStore};
