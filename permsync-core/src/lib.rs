pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;

pub use self::cache::KeyBuilder;
pub use self::config::{AckPolicy, Config};
pub use self::error::{Error, Result};
