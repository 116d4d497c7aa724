/*
    events.rs - Server-to-client notifications

    Hub method names are fixed by the authority:
    - ConfigurationUpdated(item)
    - ConfigurationDeleted(id)
    - IpBlocked({ address, reason })
*/

use crate::core_replica::{BlockedAddress, ConfigItem, ItemId};
use serde_json::Value as JsonValue;

pub const CONFIGURATION_UPDATED: &str = "ConfigurationUpdated";
pub const CONFIGURATION_DELETED: &str = "ConfigurationDeleted";
pub const IP_BLOCKED: &str = "IpBlocked";

/// A notification pushed by the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubNotification {
    ItemPushed(ConfigItem),
    ItemRemoved(ItemId),
    AddressBlocked(BlockedAddress),
}

impl HubNotification {
    /// Decode a hub invocation into a notification.
    ///
    /// Returns `Ok(None)` for targets this client does not handle.
    pub fn from_invocation(
        target: &str,
        arguments: &[JsonValue],
    ) -> Result<Option<Self>, serde_json::Error> {
        let first = || arguments.first().cloned().unwrap_or(JsonValue::Null);

        let notification = match target {
            CONFIGURATION_UPDATED => HubNotification::ItemPushed(serde_json::from_value(first())?),
            CONFIGURATION_DELETED => HubNotification::ItemRemoved(serde_json::from_value(first())?),
            IP_BLOCKED => HubNotification::AddressBlocked(serde_json::from_value(first())?),
            _ => return Ok(None),
        };

        Ok(Some(notification))
    }

    /// Hub method name this notification arrives on
    pub fn target(&self) -> &'static str {
        match self {
            HubNotification::ItemPushed(_) => CONFIGURATION_UPDATED,
            HubNotification::ItemRemoved(_) => CONFIGURATION_DELETED,
            HubNotification::AddressBlocked(_) => IP_BLOCKED,
        }
    }
}
