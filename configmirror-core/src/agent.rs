/*
    agent.rs - Wires the subsystems into a running mirror

    MirrorAgent::new     validate config, open data dir, optional warm start
    MirrorAgent::start   build WebSocket channel + HTTP loader, open the link,
                         spawn the supervisor loop
    AgentHandle          status queries and graceful shutdown
*/

use crate::config::{AgentConfig, ConfigError};
use crate::core_link::channel::ChannelEventReceiver;
use crate::core_link::{
    BulkLoadError, BulkLoader, ChannelError, ConnectionState, ConnectionSupervisor,
    HttpBulkLoader, InstanceIdentity, PushChannel, WsChannelConfig, WsPushChannel,
};
use crate::core_persist::{FileSnapshotWriter, PersistError};
use crate::core_replica::{ReplicaError, ReplicaStore};
use crate::core_sync::Reconciler;
use crate::health::AgentStatus;
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Replica error: {0}")]
    Replica(#[from] ReplicaError),

    #[error("Connection error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Bulk load error: {0}")]
    BulkLoad(#[from] BulkLoadError),

    #[error("Agent task failed: {0}")]
    Task(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

pub struct MirrorAgent {
    config: AgentConfig,
    identity: InstanceIdentity,
    store: Arc<ReplicaStore>,
    writer: Arc<FileSnapshotWriter>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl MirrorAgent {
    pub fn new(config: AgentConfig, identity: InstanceIdentity) -> AgentResult<Self> {
        config.validate()?;

        let writer = Arc::new(FileSnapshotWriter::new(
            config.store.data_dir.clone(),
            identity.instance_id.clone(),
        )?);
        let store = Arc::new(ReplicaStore::new());

        let agent = Self {
            config,
            identity,
            store,
            writer,
            shutdown: Arc::new(ShutdownCoordinator::new()),
        };

        if agent.config.store.warm_start {
            agent.warm_start()?;
        }
        Ok(agent)
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    pub fn shutdown_coordinator(&self) -> Arc<ShutdownCoordinator> {
        self.shutdown.clone()
    }

    /// Seed the replica from the last persisted snapshot, if any.
    /// Unreadable files are skipped; the bulk load will repopulate.
    fn warm_start(&self) -> AgentResult<()> {
        match self.writer.load_snapshot() {
            Ok(Some(snapshot)) => {
                info!(
                    "Warm start: {} items, {} blocked addresses from {}",
                    snapshot.item_count(),
                    snapshot.blocked_count(),
                    self.writer.config_path().display()
                );
                self.store.restore(snapshot)?;
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable snapshot files: {}", e),
        }
        Ok(())
    }

    /// Connect to the authority over WebSocket + HTTP
    pub async fn start(self) -> AgentResult<AgentHandle> {
        let server = &self.config.server;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let ws_config = WsChannelConfig {
            url: server.hub_url()?.to_string(),
            reconnect_delays: server.reconnect_delays(),
            handshake_timeout: server.request_timeout,
            keepalive_interval: server.keepalive_interval,
        };
        let channel = Arc::new(WsPushChannel::new(ws_config, event_tx));
        let loader = Arc::new(HttpBulkLoader::new(
            server.configuration_url()?.to_string(),
            server.request_timeout,
        )?);

        self.start_with(channel, loader, event_rx).await
    }

    /// Start with caller-supplied collaborators. `events` must be the queue
    /// `channel` emits on.
    pub async fn start_with(
        self,
        channel: Arc<dyn PushChannel>,
        loader: Arc<dyn BulkLoader>,
        events: ChannelEventReceiver,
    ) -> AgentResult<AgentHandle> {
        let reconciler = Arc::new(Reconciler::new(self.store.clone(), self.writer.clone()));

        let supervisor = ConnectionSupervisor::new(
            self.identity.clone(),
            channel,
            loader,
            reconciler,
            self.shutdown.clone(),
        )
        .with_resync_policy(self.config.store.resync_policy)
        .with_telemetry(self.config.telemetry.enabled)
        .with_report_interval(self.config.telemetry.report_interval);

        supervisor.open().await?;

        let state_rx = supervisor.subscribe_state();
        let task = tokio::spawn(supervisor.run(events));

        Ok(AgentHandle {
            identity: self.identity,
            store: self.store,
            shutdown: self.shutdown,
            state_rx,
            task,
        })
    }
}

/// A running agent
pub struct AgentHandle {
    identity: InstanceIdentity,
    store: Arc<ReplicaStore>,
    shutdown: Arc<ShutdownCoordinator>,
    state_rx: watch::Receiver<ConnectionState>,
    task: JoinHandle<ConnectionState>,
}

impl AgentHandle {
    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn shutdown_coordinator(&self) -> Arc<ShutdownCoordinator> {
        self.shutdown.clone()
    }

    pub fn status(&self) -> AgentResult<AgentStatus> {
        let snapshot = self.store.snapshot()?;
        Ok(AgentStatus::new(
            self.identity.instance_id.clone(),
            self.identity.local_address.clone(),
            self.state(),
            &snapshot,
        ))
    }

    /// Resolves once the connection is closed for good
    pub async fn closed(&self) {
        let mut state_rx = self.state_rx.clone();
        let _ = state_rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Stop the link and the reporter, returning the final state
    pub async fn shutdown(self) -> AgentResult<ConnectionState> {
        self.shutdown.shutdown().await;
        let state = self
            .task
            .await
            .map_err(|e| AgentError::Task(e.to_string()))?;
        self.shutdown.mark_complete().await;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_link::{MockPushChannel, StaticBulkLoader};
    use crate::core_persist::ReplicaPersistence;
    use crate::core_replica::{BlockedAddress, ConfigItem};
    use crate::health::HealthStatus;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.store.data_dir = dir.to_path_buf();
        config
    }

    fn identity() -> InstanceIdentity {
        InstanceIdentity::new("agent-1", "10.0.0.5")
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.logging.level = "loud".to_string();

        assert!(matches!(
            MirrorAgent::new(config, identity()),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn test_warm_start_restores_files() {
        let dir = tempdir().unwrap();
        let writer = FileSnapshotWriter::new(dir.path(), "agent-1").unwrap();
        let seed = ReplicaStore::new();
        seed.upsert(ConfigItem::new(1, "A", "v1", 1)).unwrap();
        seed.block_address(BlockedAddress::new("10.0.0.9", "spam"))
            .unwrap();
        let snapshot = seed.snapshot().unwrap();
        writer.write_config_snapshot(&snapshot).unwrap();
        writer.write_blocked_snapshot(&snapshot).unwrap();

        let agent = MirrorAgent::new(config_in(dir.path()), identity()).unwrap();
        assert_eq!(agent.store().get("A").unwrap().unwrap().value, "v1");
        assert!(agent.store().is_blocked("10.0.0.9").unwrap());

        let mut cold = config_in(dir.path());
        cold.store.warm_start = false;
        let agent = MirrorAgent::new(cold, identity()).unwrap();
        assert!(agent.store().is_empty().unwrap());
    }

    #[test]
    fn test_corrupt_snapshot_does_not_block_startup() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("config_agent-1.json"), "{ nope").unwrap();

        let agent = MirrorAgent::new(config_in(dir.path()), identity()).unwrap();
        assert!(agent.store().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_start_with_mock_and_shutdown() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.telemetry.enabled = false;
        let agent = MirrorAgent::new(config, identity()).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(MockPushChannel::new(tx));
        let loader = Arc::new(StaticBulkLoader::new(vec![ConfigItem::new(1, "A", "v1", 4)]));

        let handle = agent.start_with(channel.clone(), loader, rx).await.unwrap();
        let mut state_rx = handle.subscribe_state();
        state_rx
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .unwrap();

        while handle.store().is_empty().unwrap() {
            tokio::task::yield_now().await;
        }
        let status = handle.status().unwrap();
        assert_eq!(status.health, HealthStatus::Healthy);
        assert_eq!(status.max_version, 4);

        assert_eq!(handle.shutdown().await.unwrap(), ConnectionState::Closed);
        assert_eq!(channel.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_closed_link_ends_agent() {
        let dir = tempdir().unwrap();
        let agent = MirrorAgent::new(config_in(dir.path()), identity()).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(MockPushChannel::new(tx));
        let loader = Arc::new(StaticBulkLoader::default());
        let handle = agent.start_with(channel.clone(), loader, rx).await.unwrap();

        let mut state_rx = handle.subscribe_state();
        state_rx
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .unwrap();
        channel.set_state(ConnectionState::Closed);

        tokio::time::timeout(std::time::Duration::from_secs(5), handle.closed())
            .await
            .unwrap();
        assert_eq!(handle.status().unwrap().health, HealthStatus::Unhealthy);
        assert_eq!(handle.shutdown().await.unwrap(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_start_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let agent = MirrorAgent::new(config_in(dir.path()), identity()).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(MockPushChannel::new(tx));
        channel.fail_start(true);
        let loader = Arc::new(StaticBulkLoader::default());

        assert!(matches!(
            agent.start_with(channel, loader, rx).await,
            Err(AgentError::Channel(ChannelError::Connect(_)))
        ));
    }
}
