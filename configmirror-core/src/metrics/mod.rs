//! Local metrics for the mirror agent
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding binary installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const ITEMS_UPSERTED: &str = "replica.items.upserted";
pub const ITEMS_DELETED: &str = "replica.items.deleted";
pub const ADDRESSES_BLOCKED: &str = "replica.addresses.blocked";
pub const ITEMS_COUNT: &str = "replica.items.count";
pub const PERSIST_FAILURES: &str = "persist.writes.failed";
pub const REPORTS_SENT: &str = "telemetry.reports.sent";
pub const REPORTS_FAILED: &str = "telemetry.reports.failed";

/// Initialize metrics with descriptions
pub fn init_metrics() {
    // Replica metrics
    describe_counter!(ITEMS_UPSERTED, "Config items inserted or replaced");
    describe_counter!(ITEMS_DELETED, "Config items removed by id");
    describe_counter!(ADDRESSES_BLOCKED, "Blocked-address notifications applied");
    describe_gauge!(ITEMS_COUNT, "Config items currently mirrored");

    // Persistence metrics
    describe_counter!(PERSIST_FAILURES, "Snapshot writes that failed");

    // Telemetry metrics
    describe_counter!(REPORTS_SENT, "Metrics reports delivered to the authority");
    describe_counter!(REPORTS_FAILED, "Metrics reports that failed to send");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a gauge metric
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}
