use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub session: SessionConfig,
    pub cache: CacheConfig,
    pub consumer: ConsumerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub connect_timeout_seconds: u64,
    /// Deployment prefix for cache keys; empty keeps the bare `session:` namespace
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout_seconds: 5,
            key_prefix: String::new(),
        }
    }
}

/// When a consumed message is acknowledged to the consumer group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Acknowledge applied messages and messages that can never succeed
    /// (malformed payload, unencodable snapshot). Transiently failed messages stay
    /// pending and are redelivered when the consumer next starts.
    #[default]
    AfterSuccess,
    /// Acknowledge every message once it has been taken, whatever the outcome.
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Redis stream carrying permission-change events
    pub stream: String,
    /// Consumer group shared by all synchronizer replicas
    pub group: String,
    /// Consumer name inside the group; the hostname when empty. Must stay the
    /// same across restarts for pending messages to be redelivered.
    pub consumer: String,
    /// How long one poll may block waiting for a message
    pub block_ms: u64,
    pub ack_policy: AckPolicy,
    /// Approximate cap applied by the publisher
    pub max_stream_length: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream: "permission:events".to_string(),
            group: "permission-cache-sync".to_string(),
            consumer: String::new(),
            block_ms: 1000,
            ack_policy: AckPolicy::AfterSuccess,
            max_stream_length: 100_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prefix of the `user id -> session id` lookup keys
    pub lookup_key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Hash field of the session entry holding the permission snapshot
    pub permission_field: String,
    /// Hash field recording the stream id of the event behind the snapshot
    pub version_field: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            permission_field: "permission".to_string(),
            version_field: "permission_version".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Time budget for processing one message, starting once it is taken
    pub iteration_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            iteration_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// Priority (highest first):
    /// 1. Environment variables (`PERMSYNC_REDIS__URL`, `PERMSYNC_QUEUE__STREAM`, ...)
    /// 2. Config file
    /// 3. Defaults
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("PERMSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the configuration, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.redis.url.is_empty() {
            errors.push("redis.url must not be empty".to_string());
        }
        if self.queue.stream.is_empty() {
            errors.push("queue.stream must not be empty".to_string());
        }
        if self.queue.group.is_empty() {
            errors.push("queue.group must not be empty".to_string());
        }
        if self.consumer.iteration_timeout_ms == 0 {
            errors.push("consumer.iteration_timeout_ms must be greater than 0".to_string());
        }
        if self.queue.block_ms >= self.consumer.iteration_timeout_ms {
            errors.push(format!(
                "queue.block_ms ({}) must be below consumer.iteration_timeout_ms ({})",
                self.queue.block_ms, self.consumer.iteration_timeout_ms
            ));
        }
        if self.cache.permission_field.is_empty() {
            errors.push("cache.permission_field must not be empty".to_string());
        }
        if self.cache.version_field.is_empty() {
            errors.push("cache.version_field must not be empty".to_string());
        } else if self.cache.version_field == self.cache.permission_field {
            errors.push("cache.version_field must differ from cache.permission_field".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get Redis URL
    #[must_use]
    pub fn redis_url(&self) -> &str {
        &self.redis.url
    }

    #[must_use]
    pub const fn iteration_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer.iteration_timeout_ms)
    }

    #[must_use]
    pub const fn poll_block(&self) -> Duration {
        Duration::from_millis(self.queue.block_ms)
    }

    /// Upper bound on any single Redis reply, long enough for a blocking poll
    #[must_use]
    pub fn redis_response_timeout(&self) -> Duration {
        self.poll_block() + self.iteration_timeout()
    }
}
