/*
    reporter.rs - Periodic ReportMetrics loop

    while state == Connected:
        sleep(interval)          <- woken early by shutdown or a state change
        snapshot replica
        send MetricsReport       <- failure is logged, next interval retries

    The loop owns its RNG so reports can be made deterministic in tests.
*/

use crate::core_link::{ConnectionState, InstanceIdentity, PushChannel};
use crate::core_replica::ReplicaStore;
use crate::core_telemetry::report::MetricsReport;
use crate::metrics::{record_counter, REPORTS_FAILED, REPORTS_SENT};
use crate::shutdown::ShutdownSignal;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterExit {
    /// Connection state left `Connected`
    Disconnected,
    /// Shutdown was signalled
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReporterStats {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterOutcome {
    pub exit: ReporterExit,
    pub stats: ReporterStats,
}

pub struct TelemetryReporter {
    identity: InstanceIdentity,
    store: Arc<ReplicaStore>,
    channel: Arc<dyn PushChannel>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    interval: Duration,
    rng: StdRng,
}

impl TelemetryReporter {
    pub fn new(
        identity: InstanceIdentity,
        store: Arc<ReplicaStore>,
        channel: Arc<dyn PushChannel>,
        state_rx: watch::Receiver<ConnectionState>,
        shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    ) -> Self {
        Self {
            identity,
            store,
            channel,
            state_rx,
            shutdown_rx,
            interval: DEFAULT_REPORT_INTERVAL,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }

    pub async fn run(mut self) -> ReporterOutcome {
        let mut stats = ReporterStats::default();
        debug!("Telemetry reporter started (interval {:?})", self.interval);

        let exit = loop {
            if !self.is_connected() {
                break ReporterExit::Disconnected;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown_rx.recv() => break ReporterExit::Cancelled,
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break ReporterExit::Disconnected;
                    }
                    continue;
                }
            }

            if !self.is_connected() {
                break ReporterExit::Disconnected;
            }
            self.report_once(&mut stats).await;
        };

        debug!(
            "Telemetry reporter stopped ({:?}, {} sent, {} failed)",
            exit, stats.sent, stats.failed
        );
        ReporterOutcome { exit, stats }
    }

    async fn report_once(&mut self, stats: &mut ReporterStats) {
        let snapshot = match self.store.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Skipping metrics report: {}", e);
                stats.failed += 1;
                return;
            }
        };

        let report = MetricsReport::sample(&self.identity, &snapshot, &mut self.rng);
        match self.channel.report_metrics(&report).await {
            Ok(()) => {
                stats.sent += 1;
                record_counter(REPORTS_SENT, 1);
            }
            Err(e) => {
                stats.failed += 1;
                record_counter(REPORTS_FAILED, 1);
                warn!("Failed to send metrics report: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_link::channel::REPORT_METRICS;
    use crate::core_link::MockPushChannel;
    use crate::core_replica::ConfigItem;
    use crate::shutdown::ShutdownCoordinator;
    use tokio::sync::mpsc;

    struct Fixture {
        channel: Arc<MockPushChannel>,
        store: Arc<ReplicaStore>,
        state_tx: watch::Sender<ConnectionState>,
        shutdown: ShutdownCoordinator,
        _events: mpsc::UnboundedReceiver<crate::core_link::ChannelEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let channel = Arc::new(MockPushChannel::new(tx));
            channel.set_state(ConnectionState::Connected);
            let (state_tx, _) = watch::channel(ConnectionState::Connected);

            Self {
                channel,
                store: Arc::new(ReplicaStore::new()),
                state_tx,
                shutdown: ShutdownCoordinator::new(),
                _events: rx,
            }
        }

        fn reporter(&self) -> TelemetryReporter {
            TelemetryReporter::new(
                InstanceIdentity::new("agent-1", "10.0.0.5"),
                self.store.clone(),
                self.channel.clone(),
                self.state_tx.subscribe(),
                self.shutdown.subscribe(),
            )
            .with_rng(StdRng::seed_from_u64(3))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_every_interval_until_disconnected() {
        let fixture = Fixture::new();
        fixture.store.upsert(ConfigItem::new(1, "A", "v1", 5)).unwrap();
        let task = tokio::spawn(fixture.reporter().run());

        tokio::time::sleep(Duration::from_secs(25)).await;
        fixture.state_tx.send_replace(ConnectionState::Reconnecting);

        let outcome = task.await.unwrap();
        assert_eq!(outcome.exit, ReporterExit::Disconnected);
        assert_eq!(outcome.stats.sent, 2);

        let reports = fixture.channel.invocations_of(REPORT_METRICS);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].arguments[0]["maxConfigVersion"], 5);
        assert_eq!(reports[0].arguments[0]["status"], "online");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_before_next_report() {
        let fixture = Fixture::new();
        let task = tokio::spawn(fixture.reporter().run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        fixture.shutdown.shutdown().await;

        let outcome = task.await.unwrap();
        assert_eq!(outcome.exit, ReporterExit::Cancelled);
        assert_eq!(outcome.stats.sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_keeps_looping() {
        let fixture = Fixture::new();
        fixture.channel.fail_invokes(true);
        let task = tokio::spawn(fixture.reporter().run());

        tokio::time::sleep(Duration::from_secs(21)).await;
        fixture.channel.fail_invokes(false);
        tokio::time::sleep(Duration::from_secs(10)).await;
        fixture.shutdown.shutdown().await;

        let outcome = task.await.unwrap();
        assert_eq!(outcome.stats.failed, 2);
        assert_eq!(outcome.stats.sent, 1);
    }

    #[tokio::test]
    async fn test_not_connected_exits_immediately() {
        let fixture = Fixture::new();
        fixture.state_tx.send_replace(ConnectionState::Reconnecting);

        let outcome = fixture.reporter().run().await;
        assert_eq!(outcome.exit, ReporterExit::Disconnected);
        assert_eq!(outcome.stats, ReporterStats::default());
    }
}
