//! Permission-change events consumed from the queue
//!
//! One event carries the complete permission set of every affected user. The
//! set replaces whatever was cached before; it is never a delta.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::permission::{Effect, Resource};

/// Inbound payload: user id => full permission set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionChangeEvent {
    #[serde(default)]
    pub permissions: HashMap<i64, UserPermissionChange>,
}

/// Full permission set of one user after a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermissionChange {
    pub user_id: i64,
    pub biz_id: i64,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub resource: Resource,
    pub action: String,
    pub effect: Effect,
}

/// An entry whose effect is neither `allow` nor `deny`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEffect {
    /// User key as it appears in the payload
    pub user: String,
    /// Position of the entry in the user's permission list
    pub index: usize,
    pub effect: String,
}

impl PermissionChangeEvent {
    /// Parse raw message bytes
    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Ids of every user named by the event, in ascending order
    #[must_use]
    pub fn user_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.permissions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    /// Entries of a raw payload carrying an effect that does not parse.
    ///
    /// Used to point at the offending user when `decode` rejects an event;
    /// payloads that are not JSON objects yield nothing.
    #[must_use]
    pub fn unknown_effects(payload: &[u8]) -> Vec<UnknownEffect> {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) else {
            return Vec::new();
        };
        let Some(users) = value.get("permissions").and_then(|v| v.as_object()) else {
            return Vec::new();
        };

        let mut found = Vec::new();
        for (user, change) in users {
            let Some(entries) = change.get("permissions").and_then(|v| v.as_array()) else {
                continue;
            };
            for (index, entry) in entries.iter().enumerate() {
                let Some(effect) = entry.get("effect") else {
                    continue;
                };
                let effect = match effect.as_str() {
                    Some(s) if s.parse::<Effect>().is_ok() => continue,
                    Some(s) => s.to_string(),
                    None => effect.to_string(),
                };
                found.push(UnknownEffect {
                    user: user.clone(),
                    index,
                    effect,
                });
            }
        }
        found
    }
}
