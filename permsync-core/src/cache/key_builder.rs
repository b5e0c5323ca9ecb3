//! Redis key builder for the session permission cache
//!
//! - Session cache hash: `session:{session_id}`, or `{prefix}:session:{session_id}`
//!   when a deployment prefix is configured
//! - Session lookup string: `{lookup_prefix}{user_id}`, the key under which the
//!   session service stores a user's active session id

use crate::Config;

#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    prefix: String,
    lookup_prefix: String,
}

impl KeyBuilder {
    /// Create a new `KeyBuilder` with the given prefix (may be empty)
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            lookup_prefix: String::new(),
        }
    }

    /// Set the prefix prepended to stringified user ids for session lookup
    #[must_use]
    pub fn with_lookup_prefix(mut self, lookup_prefix: impl Into<String>) -> Self {
        self.lookup_prefix = lookup_prefix.into();
        self
    }

    /// Create `KeyBuilder` from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.redis.key_prefix.trim_end_matches(':'))
            .with_lookup_prefix(config.session.lookup_key_prefix.clone())
    }

    /// Session permission cache
    ///
    /// Type: Hash
    /// Field: the configured permission field
    /// Value: JSON array of `UserPermission`
    #[must_use]
    pub fn session_cache(&self, session_id: &str) -> String {
        if self.prefix.is_empty() {
            format!("session:{session_id}")
        } else {
            format!("{}:session:{}", self.prefix, session_id)
        }
    }

    /// Active session id of a user
    ///
    /// Type: String
    /// Value: session id
    #[must_use]
    pub fn session_lookup(&self, user_id: i64) -> String {
        format!("{}{}", self.lookup_prefix, user_id)
    }
}
