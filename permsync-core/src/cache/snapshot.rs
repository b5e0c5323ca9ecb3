//! Permission snapshot encoding
//!
//! A snapshot is the full list of a user's `UserPermission` records serialized as
//! one JSON array. Writers always store the whole array.

use crate::models::{Permission, UserPermission, UserPermissionChange};
use crate::Result;

/// Map one user's change into cached records, preserving entry order
///
/// `user_id` is the event's key for this user and wins over the embedded id.
#[must_use]
pub fn to_user_permissions(user_id: i64, change: &UserPermissionChange) -> Vec<UserPermission> {
    change
        .permissions
        .iter()
        .map(|entry| UserPermission {
            biz_id: change.biz_id,
            user_id,
            permission: Permission {
                resource: entry.resource.clone(),
                action: entry.action.clone(),
            },
            effect: entry.effect,
        })
        .collect()
}

/// Serialize one user's complete permission set
pub fn encode_snapshot(user_id: i64, change: &UserPermissionChange) -> Result<String> {
    let records = to_user_permissions(user_id, change);
    Ok(serde_json::to_string(&records)?)
}

/// Parse a cached snapshot
pub fn decode_snapshot(raw: &str) -> Result<Vec<UserPermission>> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Effect, PermissionEntry, Resource};

    fn entry(resource_type: &str, key: &str, action: &str, effect: Effect) -> PermissionEntry {
        PermissionEntry {
            resource: Resource::new(resource_type, key),
            action: action.to_string(),
            effect,
        }
    }

    fn tuples(records: &[UserPermission]) -> Vec<(String, String, String, Effect)> {
        records
            .iter()
            .map(|r| {
                (
                    r.permission.resource.resource_type.clone(),
                    r.permission.resource.key.clone(),
                    r.permission.action.clone(),
                    r.effect,
                )
            })
            .collect()
    }

    #[test]
    fn test_single_entry_snapshot() {
        let change = UserPermissionChange {
            user_id: 42,
            biz_id: 7,
            permissions: vec![entry("doc", "d1", "read", Effect::Allow)],
        };

        let raw = encode_snapshot(42, &change).unwrap();
        assert_eq!(
            raw,
            r#"[{"bizId":7,"userId":42,"permission":{"resource":{"type":"doc","key":"d1"},"action":"read"},"effect":"allow"}]"#
        );
    }

    #[test]
    fn test_snapshot_preserves_entries_and_order() {
        let change = UserPermissionChange {
            user_id: 5,
            biz_id: 3,
            permissions: vec![
                entry("doc", "d2", "write", Effect::Deny),
                entry("doc", "d1", "read", Effect::Allow),
                entry("menu", "settings", "read", Effect::Allow),
                entry("doc", "d1", "read", Effect::Allow),
            ],
        };

        let raw = encode_snapshot(5, &change).unwrap();
        let decoded = decode_snapshot(&raw).unwrap();

        let expected: Vec<_> = change
            .permissions
            .iter()
            .map(|e| {
                (
                    e.resource.resource_type.clone(),
                    e.resource.key.clone(),
                    e.action.clone(),
                    e.effect,
                )
            })
            .collect();
        assert_eq!(tuples(&decoded), expected);
        assert!(decoded.iter().all(|r| r.biz_id == 3 && r.user_id == 5));
    }

    #[test]
    fn test_empty_set_encodes_empty_array() {
        let change = UserPermissionChange {
            user_id: 1,
            biz_id: 1,
            permissions: Vec::new(),
        };
        assert_eq!(encode_snapshot(1, &change).unwrap(), "[]");
    }

    #[test]
    fn test_event_key_wins_over_embedded_user_id() {
        let change = UserPermissionChange {
            user_id: 999,
            biz_id: 1,
            permissions: vec![entry("doc", "d1", "read", Effect::Allow)],
        };
        let records = to_user_permissions(42, &change);
        assert_eq!(records[0].user_id, 42);
    }

    #[test]
    fn test_decode_snapshot_rejects_garbage() {
        assert!(decode_snapshot("{").is_err());
        assert!(decode_snapshot(r#"[{"bizId":1}]"#).is_err());
    }
}
