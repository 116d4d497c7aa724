/*
    supervisor.rs - Connection state machine

    Consumes the channel's event queue one event at a time:

    | Transition                 | Action                                          |
    |----------------------------|-------------------------------------------------|
    | first -> Connected         | RegisterInstance, bulk load, start reporter     |
    | Connected -> anything else | stop the reporter                               |
    | Reconnecting -> Connected  | Disabled: fresh reporter only                   |
    |                            | Replace:  re-register, replace replica, reporter|
    | -> Closed                  | terminal; `run` returns                         |

    Register and bulk-load failures are warnings. With `ResyncPolicy::Disabled`
    anything the authority pushed during an outage is never seen.

    On a graceful shutdown events already queued are still applied; after an
    immediate shutdown they are discarded.
*/

use crate::core_link::bulk_load::BulkLoader;
use crate::core_link::channel::{ChannelEvent, ChannelEventReceiver, ChannelResult, ConnectionState, PushChannel};
use crate::core_link::identity::InstanceIdentity;
use crate::core_sync::{HubNotification, Reconciler};
use crate::core_telemetry::{ReporterOutcome, TelemetryReporter, DEFAULT_REPORT_INTERVAL};
use crate::shutdown::{ShutdownCoordinator, ShutdownState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What to do with the replica after the link comes back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncPolicy {
    /// Keep the replica as-is; events missed while disconnected stay missed
    #[default]
    Disabled,
    /// Re-register and replace the replica from a fresh bulk load
    Replace,
}

pub struct ConnectionSupervisor {
    identity: InstanceIdentity,
    channel: Arc<dyn PushChannel>,
    loader: Arc<dyn BulkLoader>,
    reconciler: Arc<Reconciler>,
    shutdown: Arc<ShutdownCoordinator>,
    resync_policy: ResyncPolicy,
    telemetry_enabled: bool,
    report_interval: Duration,
    state_tx: watch::Sender<ConnectionState>,
    registered: bool,
    reporter: Option<JoinHandle<ReporterOutcome>>,
}

impl ConnectionSupervisor {
    pub fn new(
        identity: InstanceIdentity,
        channel: Arc<dyn PushChannel>,
        loader: Arc<dyn BulkLoader>,
        reconciler: Arc<Reconciler>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            identity,
            channel,
            loader,
            reconciler,
            shutdown,
            resync_policy: ResyncPolicy::default(),
            telemetry_enabled: true,
            report_interval: DEFAULT_REPORT_INTERVAL,
            state_tx,
            registered: false,
            reporter: None,
        }
    }

    pub fn with_resync_policy(mut self, policy: ResyncPolicy) -> Self {
        self.resync_policy = policy;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn with_telemetry(mut self, enabled: bool) -> Self {
        self.telemetry_enabled = enabled;
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Open the channel. Failure here is fatal to the caller.
    pub async fn open(&self) -> ChannelResult<()> {
        info!(
            "Opening hub connection as {} ({})",
            self.identity.instance_id, self.identity.local_address
        );
        self.channel.start().await
    }

    /// Process events until shutdown, until the channel reports `Closed`
    /// or until every sender is gone. Returns the final connection state.
    pub async fn run(mut self, mut events: ChannelEventReceiver) -> ConnectionState {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut stopping = self.shutdown.is_shutting_down().await;

        while !stopping {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event).await;
                        if self.state() == ConnectionState::Closed {
                            info!("Hub connection closed for good");
                            break;
                        }
                    }
                    None => {
                        debug!("Channel event queue closed");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => stopping = true,
            }
        }

        if stopping {
            self.stop_channel(&mut events).await;
        } else if let Err(e) = self.channel.stop().await {
            warn!("Error while releasing hub connection: {}", e);
        }

        self.set_state(ConnectionState::Closed);
        self.join_reporter().await;
        self.state()
    }

    pub async fn handle_event(&mut self, event: ChannelEvent) {
        if self.state() == ConnectionState::Closed {
            debug!("Ignoring {:?} after channel closed", event);
            return;
        }

        match event {
            ChannelEvent::State(state) => self.on_state(state).await,
            ChannelEvent::Notification(notification) => self.on_notification(notification),
        }
    }

    async fn on_state(&mut self, next: ConnectionState) {
        let previous = self.state();
        if !self.set_state(next) {
            return;
        }
        info!("Connection state: {} -> {}", previous, next);

        if previous == ConnectionState::Connected {
            self.stop_reporter().await;
        }

        match next {
            ConnectionState::Connected if !self.registered => {
                self.registered = true;
                self.register().await;
                self.load_snapshot(false).await;
                self.start_reporter().await;
            }
            ConnectionState::Connected => {
                match self.resync_policy {
                    ResyncPolicy::Disabled => {
                        info!("Reconnected without resync; updates sent while offline are not replayed")
                    }
                    ResyncPolicy::Replace => {
                        self.register().await;
                        self.load_snapshot(true).await;
                    }
                }
                self.start_reporter().await;
            }
            ConnectionState::Reconnecting => warn!("Hub connection lost, reconnecting"),
            ConnectionState::Closed => warn!("Hub connection closed; no further updates"),
            ConnectionState::Connecting | ConnectionState::Disconnected => {}
        }
    }

    fn on_notification(&self, notification: HubNotification) {
        let target = notification.target();
        if let Err(e) = self.reconciler.apply(notification) {
            error!("Failed to apply {}: {}", target, e);
        }
    }

    /// Returns whether the state changed
    fn set_state(&self, next: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        })
    }

    async fn register(&self) {
        let result = self
            .channel
            .register_instance(&self.identity.instance_id, &self.identity.local_address)
            .await;

        match result {
            Ok(()) => info!("Registered instance {}", self.identity.instance_id),
            Err(e) => warn!("Failed to register instance: {}", e),
        }
    }

    async fn load_snapshot(&self, replace: bool) {
        let items = match self.loader.fetch_snapshot().await {
            Ok(items) => items,
            Err(e) => {
                warn!("Bulk load failed, keeping current replica: {}", e);
                return;
            }
        };

        let result = if replace {
            self.reconciler.apply_resync(items)
        } else {
            self.reconciler.apply_bulk(items)
        };
        if let Err(e) = result {
            error!("Failed to apply configuration snapshot: {}", e);
        }
    }

    /// Every transition into `Connected` gets its own reporter
    async fn start_reporter(&mut self) {
        self.stop_reporter().await;
        if !self.telemetry_enabled || self.shutdown.is_shutting_down().await {
            return;
        }

        let reporter = TelemetryReporter::new(
            self.identity.clone(),
            self.reconciler.store().clone(),
            self.channel.clone(),
            self.state_tx.subscribe(),
            self.shutdown.subscribe(),
        )
        .with_interval(self.report_interval);

        self.reporter = Some(tokio::spawn(reporter.run()));
    }

    /// Abort the reporter and wait for it, so a new one never overlaps it
    async fn stop_reporter(&mut self) {
        if let Some(handle) = self.reporter.take() {
            handle.abort();
            log_reporter_outcome(handle.await);
        }
    }

    /// Let the reporter notice shutdown or `Closed` and finish on its own
    async fn join_reporter(&mut self) {
        if let Some(handle) = self.reporter.take() {
            log_reporter_outcome(handle.await);
        }
    }

    async fn stop_channel(&mut self, events: &mut ChannelEventReceiver) {
        if let Err(e) = self.channel.stop().await {
            warn!("Error while stopping hub connection: {}", e);
        }

        while let Ok(event) = events.try_recv() {
            if self.shutdown.state().await == ShutdownState::Shutdown {
                debug!("Immediate shutdown, discarding queued hub events");
                break;
            }
            self.handle_event(event).await;
        }
    }
}

fn log_reporter_outcome(result: Result<ReporterOutcome, tokio::task::JoinError>) {
    match result {
        Ok(outcome) => debug!(
            "Reporter exited {:?} after {} reports",
            outcome.exit, outcome.stats.sent
        ),
        Err(e) if e.is_cancelled() => debug!("Reporter stopped"),
        Err(e) => error!("Reporter task failed: {}", e),
    }
}
