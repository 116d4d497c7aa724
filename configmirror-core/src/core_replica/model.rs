/*
    model.rs - Replica data model

    Types mirrored from the authority:
    - ConfigItem: a single configuration entry, keyed by `key`, deleted by `id`
    - BlockedAddress: an address the authority has blocked, with its reason
    - ReplicaSnapshot: point-in-time copy of the whole replica

    Field names on the wire are camelCase.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Numeric identity the authority uses for deletions
pub type ItemId = i64;

/// A configuration entry owned by the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigItem {
    pub id: ItemId,
    pub key: String,
    pub value: String,
    /// Free-form type tag ("string", "int", "json", ...)
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub domain: Option<String>,
}

impl ConfigItem {
    /// Create an item with an empty type tag and no domain
    pub fn new(id: ItemId, key: impl Into<String>, value: impl Into<String>, version: i64) -> Self {
        Self {
            id,
            key: key.into(),
            value: value.into(),
            item_type: String::new(),
            version,
            domain: None,
        }
    }

    pub fn with_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = item_type.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// An address blocked by the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedAddress {
    #[serde(alias = "ipAddress")]
    pub address: String,
    #[serde(default)]
    pub reason: String,
}

impl BlockedAddress {
    pub fn new(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reason: reason.into(),
        }
    }
}

/// Immutable copy of the replica contents at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSnapshot {
    /// Items keyed by `ConfigItem::key`
    pub items: BTreeMap<String, ConfigItem>,

    /// Blocked set keyed by address
    pub blocked: BTreeMap<String, BlockedAddress>,

    /// When the copy was taken
    pub taken_at: DateTime<Utc>,
}

impl ReplicaSnapshot {
    /// An empty snapshot taken now
    pub fn empty() -> Self {
        Self {
            items: BTreeMap::new(),
            blocked: BTreeMap::new(),
            taken_at: Utc::now(),
        }
    }

    /// Highest `version` among items, 0 when there are none
    pub fn max_version(&self) -> i64 {
        self.items.values().map(|item| item.version).max().unwrap_or(0)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }
}
