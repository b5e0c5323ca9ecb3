//! Redis initialization

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use std::time::Duration;
use tracing::{error, info};

use crate::{Config, Error, Result};

/// Connect to Redis, bounded by the configured connect timeout
///
/// Replies may take up to `Config::redis_response_timeout`, which leaves room for
/// a blocking stream read.
pub async fn init_redis(config: &Config) -> Result<ConnectionManager> {
    info!("Connecting to Redis: {}", config.redis_url());

    let client = redis::Client::open(config.redis_url())?;
    let timeout = Duration::from_secs(config.redis.connect_timeout_seconds);
    let manager_config = ConnectionManagerConfig::new()
        .set_connection_timeout(Some(timeout))
        .set_response_timeout(Some(config.redis_response_timeout()));

    let connect = client.get_connection_manager_with_config(manager_config);
    let conn = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| {
            error!(timeout_secs = timeout.as_secs(), "Timed out connecting to Redis");
            Error::Timeout("Redis connection".to_string())
        })?
        .map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            Error::Redis(e)
        })?;

    info!("Redis connected successfully");

    Ok(conn)
}

/// Name of this process inside the consumer group
///
/// Uses the configured name when set, otherwise the hostname. The name owns the
/// pending list that is redelivered on the next start, so it is never random.
#[must_use]
pub fn consumer_name(config: &Config) -> String {
    if !config.queue.consumer.is_empty() {
        return config.queue.consumer.clone();
    }

    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "permsync".to_string())
}
