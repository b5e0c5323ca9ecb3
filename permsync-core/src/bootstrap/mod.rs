//! Bootstrap helpers for the synchronizer binary
//!
//! - Configuration loading
//! - Redis connection setup
//! - Consumer naming

pub mod config;
pub mod redis_conn;

pub use self::config::load_config;
pub use self::redis_conn::{consumer_name, init_redis};
