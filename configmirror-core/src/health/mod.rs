//! Agent health and status reporting

use crate::core_link::ConnectionState;
use crate::core_replica::ReplicaSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Live updates flow only while connected
    pub fn from_connection(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => HealthStatus::Healthy,
            ConnectionState::Connecting | ConnectionState::Reconnecting => HealthStatus::Degraded,
            ConnectionState::Disconnected | ConnectionState::Closed => HealthStatus::Unhealthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the agent for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub instance_id: String,
    pub local_address: String,
    pub state: ConnectionState,
    pub health: HealthStatus,
    pub config_count: usize,
    pub blocked_count: usize,
    pub max_version: i64,
}

impl AgentStatus {
    pub fn new(
        instance_id: impl Into<String>,
        local_address: impl Into<String>,
        state: ConnectionState,
        snapshot: &ReplicaSnapshot,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            local_address: local_address.into(),
            state,
            health: HealthStatus::from_connection(state),
            config_count: snapshot.item_count(),
            blocked_count: snapshot.blocked_count(),
            max_version: snapshot.max_version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_replica::{BlockedAddress, ConfigItem, ReplicaStore};

    #[test]
    fn test_health_follows_connection() {
        assert_eq!(
            HealthStatus::from_connection(ConnectionState::Connected),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthStatus::from_connection(ConnectionState::Reconnecting),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::from_connection(ConnectionState::Closed),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_status_counts() {
        let store = ReplicaStore::new();
        store.upsert(ConfigItem::new(1, "A", "v1", 2)).unwrap();
        store.upsert(ConfigItem::new(2, "B", "v1", 7)).unwrap();
        store
            .block_address(BlockedAddress::new("10.0.0.1", "spam"))
            .unwrap();

        let status = AgentStatus::new(
            "agent-1",
            "10.0.0.5",
            ConnectionState::Connected,
            &store.snapshot().unwrap(),
        );

        assert_eq!(status.health, HealthStatus::Healthy);
        assert_eq!(status.config_count, 2);
        assert_eq!(status.blocked_count, 1);
        assert_eq!(status.max_version, 7);
    }
}
