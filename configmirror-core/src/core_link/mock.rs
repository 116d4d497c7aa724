//! In-memory PushChannel and BulkLoader for exercising the supervisor
//! without a network.
//!
//! The test drives the channel directly: `set_state` emits transitions,
//! `push` emits notifications, `drop_notification` models an event the
//! authority sent while the link was down.

use crate::core_link::bulk_load::{BulkLoadError, BulkLoadResult, BulkLoader};
use crate::core_link::channel::{
    ChannelError, ChannelEvent, ChannelEventSender, ChannelResult, ConnectionState, PushChannel,
};
use crate::core_replica::ConfigItem;
use crate::core_sync::HubNotification;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// A recorded client-to-server call
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub method: String,
    pub arguments: Vec<JsonValue>,
}

pub struct MockPushChannel {
    event_tx: ChannelEventSender,
    state: Mutex<ConnectionState>,
    invocations: Mutex<Vec<Invocation>>,
    dropped: AtomicUsize,
    fail_start: AtomicBool,
    fail_invokes: AtomicBool,
}

impl MockPushChannel {
    pub fn new(event_tx: ChannelEventSender) -> Self {
        Self {
            event_tx,
            state: Mutex::new(ConnectionState::Disconnected),
            invocations: Mutex::new(Vec::new()),
            dropped: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            fail_invokes: AtomicBool::new(false),
        }
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_invokes(&self, fail: bool) {
        self.fail_invokes.store(fail, Ordering::SeqCst);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record a transition and emit it
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
        let _ = self.event_tx.send(ChannelEvent::State(state));
    }

    /// Deliver a notification as if the authority pushed it
    pub fn push(&self, notification: HubNotification) {
        let _ = self.event_tx.send(ChannelEvent::Notification(notification));
    }

    /// The authority sent this while the link was down; nobody sees it
    pub fn drop_notification(&self, notification: HubNotification) {
        debug!("Mock channel dropped {} notification", notification.target());
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn invocations_of(&self, method: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|inv| inv.method == method)
            .collect()
    }
}

#[async_trait]
impl PushChannel for MockPushChannel {
    async fn start(&self) -> ChannelResult<()> {
        self.set_state(ConnectionState::Connecting);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect("mock refused connection".to_string()));
        }
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn invoke(&self, method: &str, arguments: Vec<JsonValue>) -> ChannelResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(ChannelError::NotConnected);
        }
        if self.fail_invokes.load(Ordering::SeqCst) {
            return Err(ChannelError::Send("mock send failure".to_string()));
        }

        self.invocations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Invocation {
                method: method.to_string(),
                arguments,
            });
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        if self.state() != ConnectionState::Closed {
            self.set_state(ConnectionState::Closed);
        }
        Ok(())
    }
}

/// Bulk loader serving a fixed item list
#[derive(Default)]
pub struct StaticBulkLoader {
    items: Mutex<Vec<ConfigItem>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl StaticBulkLoader {
    pub fn new(items: Vec<ConfigItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Default::default()
        }
    }

    pub fn set_items(&self, items: Vec<ConfigItem>) {
        *self.items.lock().unwrap_or_else(|p| p.into_inner()) = items;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkLoader for StaticBulkLoader {
    async fn fetch_snapshot(&self) -> BulkLoadResult<Vec<ConfigItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BulkLoadError::Status(503));
        }
        Ok(self
            .items
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_start_emits_connecting_then_connected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = MockPushChannel::new(tx);

        channel.start().await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::State(ConnectionState::Connecting))
        );
        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::State(ConnectionState::Connected))
        );
    }

    #[tokio::test]
    async fn test_invoke_requires_connection() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = MockPushChannel::new(tx);

        assert!(matches!(
            channel.invoke("ReportMetrics", vec![]).await,
            Err(ChannelError::NotConnected)
        ));

        channel.set_state(ConnectionState::Connected);
        channel.register_instance("agent-1", "10.0.0.5").await.unwrap();

        let calls = channel.invocations_of("RegisterInstance");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments[0], "agent-1");
    }

    #[tokio::test]
    async fn test_static_loader_failure() {
        let loader = StaticBulkLoader::new(vec![ConfigItem::new(1, "A", "v1", 1)]);
        assert_eq!(loader.fetch_snapshot().await.unwrap().len(), 1);

        loader.fail(true);
        assert!(loader.fetch_snapshot().await.is_err());
        assert_eq!(loader.calls(), 2);
    }
}
