/*
    core_telemetry - Periodic metrics reports to the authority

    - report:    MetricsReport wire struct and sampling
    - reporter:  loop that runs while the link is Connected
*/

pub mod report;
pub mod reporter;

pub use report::MetricsReport;
pub use reporter::{
    ReporterExit, ReporterOutcome, ReporterStats, TelemetryReporter, DEFAULT_REPORT_INTERVAL,
};
