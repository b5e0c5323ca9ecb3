use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use permsync_cluster::sync::{
    CacheWriter, ConsumerSettings, PermissionSyncConsumer, RedisCacheStore, RedisSessionStore,
    RedisStreamQueue, SessionResolver,
};
use permsync_core::{
    bootstrap::{consumer_name, init_redis, load_config},
    logging, KeyBuilder,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load and validate configuration
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Permission cache synchronizer starting...");

    // 3. Connect to Redis (queue, session lookup and cache share one server)
    let conn = init_redis(&config).await?;

    // 4. Open the event stream under this process's consumer name
    let consumer_id = consumer_name(&config);
    let queue = Arc::new(RedisStreamQueue::new(
        conn.clone(),
        config.queue.stream.clone(),
        config.queue.group.clone(),
        consumer_id.clone(),
    ));
    queue.ensure_group().await?;
    info!(
        stream = %config.queue.stream,
        group = %config.queue.group,
        consumer = %consumer_id,
        "Event stream ready"
    );

    // 5. Wire the synchronizer
    let keys = KeyBuilder::from_config(&config);
    let resolver = SessionResolver::new(Arc::new(RedisSessionStore::new(conn.clone())), keys.clone());
    let writer = CacheWriter::new(
        Arc::new(RedisCacheStore::new(conn)),
        keys,
        config.cache.permission_field.clone(),
    )
    .with_version_field(config.cache.version_field.clone());
    let consumer = Arc::new(PermissionSyncConsumer::new(
        queue,
        resolver,
        writer,
        ConsumerSettings::from_config(&config),
    ));

    // 6. Run until SIGINT/SIGTERM
    let cancel_token = consumer.cancel_token();
    let handle = consumer.clone().start();

    shutdown_signal().await;
    cancel_token.cancel();

    if let Err(e) = handle.await {
        error!("Consumer task ended abnormally: {}", e);
    }

    let stats = consumer.stats().snapshot();
    info!(
        received = stats.received,
        applied = stats.applied,
        failed = stats.failed,
        snapshots_written = stats.snapshots_written,
        snapshots_stale = stats.snapshots_stale,
        users_skipped = stats.users_skipped,
        "Permission cache synchronizer stopped"
    );

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
