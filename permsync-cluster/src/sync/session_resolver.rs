//! Reverse lookup from user id to active session id
//!
//! The session service stores each user's active session id as a plain string
//! under the user's lookup key. One event resolves all of its users with a
//! single MGET, so the round-trip count does not grow with event fan-out.

use async_trait::async_trait;
use permsync_core::KeyBuilder;
use redis::aio::ConnectionManager;
use redis::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{Result, SyncError};

/// Bulk key/value lookup used to find active sessions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Values in the same order as `keys`, `None` where the key is missing
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;
}

/// `SessionStore` backed by Redis strings
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

/// A session id from one MGET slot; anything but a UTF-8 string is no session
fn session_value(key: &str, value: Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => match String::from_utf8(bytes) {
            Ok(session_id) => Some(session_id),
            Err(_) => {
                warn!(key, "Session id is not valid UTF-8, treating user as without session");
                None
            }
        },
        Value::SimpleString(session_id) => Some(session_id),
        _ => None,
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut conn = self.conn.clone();
        let values: Vec<Value> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| SyncError::Lookup(format!("MGET of {} session keys failed: {e}", keys.len())))?;

        Ok(keys
            .iter()
            .zip(values)
            .map(|(key, value)| session_value(key, value))
            .collect())
    }
}

/// Resolves the users of one event to their current sessions
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn SessionStore>,
    keys: KeyBuilder,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn SessionStore>, keys: KeyBuilder) -> Self {
        Self { store, keys }
    }

    /// Map each user with an active session to its session id.
    ///
    /// Users without a session are left out. Issues no lookup for an empty set
    /// and exactly one otherwise; the result is never cached.
    pub async fn resolve(&self, user_ids: &[i64]) -> Result<HashMap<i64, String>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let lookup_keys: Vec<String> = user_ids
            .iter()
            .map(|uid| self.keys.session_lookup(*uid))
            .collect();

        let values = self.store.get_many(&lookup_keys).await?;
        if values.len() != lookup_keys.len() {
            return Err(SyncError::Lookup(format!(
                "session store returned {} values for {} keys",
                values.len(),
                lookup_keys.len()
            )));
        }

        let sessions: HashMap<i64, String> = user_ids
            .iter()
            .zip(values)
            .filter_map(|(uid, value)| {
                value
                    .filter(|session_id| !session_id.is_empty())
                    .map(|session_id| (*uid, session_id))
            })
            .collect();

        debug!(
            users = user_ids.len(),
            resolved = sessions.len(),
            "Resolved active sessions"
        );

        Ok(sessions)
    }
}

impl std::fmt::Debug for SessionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResolver")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_value_skips_undecodable_values() {
        assert_eq!(
            session_value("1", Value::BulkString(b"sess-abc".to_vec())),
            Some("sess-abc".to_string())
        );
        assert_eq!(
            session_value("2", Value::SimpleString("sess-def".to_string())),
            Some("sess-def".to_string())
        );
        assert_eq!(session_value("3", Value::BulkString(vec![0xff, 0xfe])), None);
        assert_eq!(session_value("4", Value::Nil), None);
        assert_eq!(session_value("5", Value::Int(7)), None);
    }

    #[tokio::test]
    async fn test_resolve_skips_users_without_session() {
        let mut store = MockSessionStore::new();
        store.expect_get_many().times(1).returning(|keys: &[String]| {
            assert_eq!(keys, ["1", "2", "3"]);
            Ok(vec![Some("s1".to_string()), None, Some(String::new())])
        });

        let resolver = SessionResolver::new(Arc::new(store), KeyBuilder::default());
        let sessions = resolver.resolve(&[1, 2, 3]).await.unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[&1], "s1");
    }

    #[tokio::test]
    async fn test_resolve_uses_lookup_prefix() {
        let mut store = MockSessionStore::new();
        store.expect_get_many().times(1).returning(|keys: &[String]| {
            assert_eq!(keys, ["uid:42"]);
            Ok(vec![Some("sess-abc".to_string())])
        });

        let resolver = SessionResolver::new(
            Arc::new(store),
            KeyBuilder::default().with_lookup_prefix("uid:"),
        );
        let sessions = resolver.resolve(&[42]).await.unwrap();
        assert_eq!(sessions[&42], "sess-abc");
    }

    #[tokio::test]
    async fn test_resolve_empty_set_skips_lookup() {
        let mut store = MockSessionStore::new();
        store.expect_get_many().times(0);

        let resolver = SessionResolver::new(Arc::new(store), KeyBuilder::default());
        assert!(resolver.resolve(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_propagates_store_failure() {
        let mut store = MockSessionStore::new();
        store
            .expect_get_many()
            .times(1)
            .returning(|_| Err(SyncError::Lookup("connection refused".to_string())));

        let resolver = SessionResolver::new(Arc::new(store), KeyBuilder::default());
        let err = resolver.resolve(&[1]).await.unwrap_err();
        assert_eq!(err.kind(), "lookup");
    }

    #[tokio::test]
    async fn test_resolve_rejects_short_reply() {
        let mut store = MockSessionStore::new();
        store
            .expect_get_many()
            .times(1)
            .returning(|_| Ok(vec![Some("s1".to_string())]));

        let resolver = SessionResolver::new(Arc::new(store), KeyBuilder::default());
        let err = resolver.resolve(&[1, 2]).await.unwrap_err();
        assert!(matches!(err, SyncError::Lookup(_)));
    }
}
