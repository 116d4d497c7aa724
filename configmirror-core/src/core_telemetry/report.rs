//! Metrics report sent to the authority

use crate::core_link::InstanceIdentity;
use crate::core_replica::ReplicaSnapshot;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::Range;

pub const SCHEMA_VERSION: u32 = 1;
pub const STATUS_ONLINE: &str = "online";

/// Synthetic load figures; the agent serves no traffic of its own
pub const REQUEST_COUNT_RANGE: Range<u64> = 100..1000;
pub const LATENCY_MS_RANGE: Range<u64> = 10..100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub schema_version: u32,
    pub instance_id: String,
    pub local_address: String,
    /// Highest item version in the replica, 0 when empty
    pub max_config_version: i64,
    pub config_count: usize,
    pub blocked_count: usize,
    pub status: String,
    pub synthetic_request_count: u64,
    /// Milliseconds
    pub synthetic_latency: u64,
    pub reported_at: DateTime<Utc>,
}

impl MetricsReport {
    /// Build a report from a replica snapshot
    pub fn sample<R: Rng>(
        identity: &InstanceIdentity,
        snapshot: &ReplicaSnapshot,
        rng: &mut R,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            instance_id: identity.instance_id.clone(),
            local_address: identity.local_address.clone(),
            max_config_version: snapshot.max_version(),
            config_count: snapshot.item_count(),
            blocked_count: snapshot.blocked_count(),
            status: STATUS_ONLINE.to_string(),
            synthetic_request_count: rng.random_range(REQUEST_COUNT_RANGE),
            synthetic_latency: rng.random_range(LATENCY_MS_RANGE),
            reported_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_replica::{ConfigItem, ReplicaStore};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn identity() -> InstanceIdentity {
        InstanceIdentity::new("agent-1", "10.0.0.5")
    }

    #[test]
    fn test_empty_replica_reports_version_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        let report = MetricsReport::sample(&identity(), &ReplicaSnapshot::empty(), &mut rng);

        assert_eq!(report.max_config_version, 0);
        assert_eq!(report.config_count, 0);
        assert_eq!(report.status, "online");
    }

    #[test]
    fn test_report_reflects_snapshot() {
        let store = ReplicaStore::new();
        store.upsert(ConfigItem::new(1, "A", "v1", 4)).unwrap();
        store.upsert(ConfigItem::new(2, "B", "v1", 9)).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let report = MetricsReport::sample(&identity(), &store.snapshot().unwrap(), &mut rng);

        assert_eq!(report.max_config_version, 9);
        assert_eq!(report.config_count, 2);
        assert_eq!(report.instance_id, "agent-1");
    }

    #[test]
    fn test_synthetic_figures_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let report = MetricsReport::sample(&identity(), &ReplicaSnapshot::empty(), &mut rng);
            assert!(REQUEST_COUNT_RANGE.contains(&report.synthetic_request_count));
            assert!(LATENCY_MS_RANGE.contains(&report.synthetic_latency));
        }
    }

    #[test]
    fn test_wire_field_names() {
        let mut rng = StdRng::seed_from_u64(1);
        let report = MetricsReport::sample(&identity(), &ReplicaSnapshot::empty(), &mut rng);
        let value = serde_json::to_value(&report).unwrap();

        for field in [
            "schemaVersion",
            "instanceId",
            "localAddress",
            "maxConfigVersion",
            "configCount",
            "blockedCount",
            "status",
            "syntheticRequestCount",
            "syntheticLatency",
            "reportedAt",
        ] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
    }
}
