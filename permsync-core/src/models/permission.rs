//! Resolved permission records as stored in the per-session cache.
//!
//! Authorization checks read these records back from the session hash, so the
//! JSON shape here is the contract shared with the read path.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A protected object, identified by its type and a key within that type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub key: String,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            key: key.into(),
        }
    }
}

/// Outcome attached to a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl FromStr for Effect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(format!("unknown effect: {other}")),
        }
    }
}

/// An action on a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: Resource,
    pub action: String,
}

/// One cached permission of a user inside a business namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermission {
    pub biz_id: i64,
    pub user_id: i64,
    pub permission: Permission,
    pub effect: Effect,
}
