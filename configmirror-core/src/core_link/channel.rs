/*
    channel.rs - Push channel abstraction

    The transport owns connection setup, framing and retry timing. The core
    only sees what it emits on the event queue:
    - State(ConnectionState) transitions
    - Notification(HubNotification) pushed by the authority

    and issues two client-to-server calls: RegisterInstance and ReportMetrics.
*/

use crate::core_sync::HubNotification;
use crate::core_telemetry::MetricsReport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

pub const REGISTER_INSTANCE: &str = "RegisterInstance";
pub const REPORT_METRICS: &str = "ReportMetrics";

/// Link state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a transport reports to the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    State(ConnectionState),
    Notification(HubNotification),
}

pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;
pub type ChannelEventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Handshake rejected: {0}")]
    Handshake(String),

    #[error("Channel is not connected")]
    NotConnected,

    #[error("Channel already started")]
    AlreadyStarted,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Persistent bidirectional link to the authority
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Open the link. An error here is fatal for the agent.
    async fn start(&self) -> ChannelResult<()>;

    /// Fire-and-forget invocation of a hub method
    async fn invoke(&self, method: &str, arguments: Vec<JsonValue>) -> ChannelResult<()>;

    /// Close the link; the transport emits `Closed` when done
    async fn stop(&self) -> ChannelResult<()>;

    async fn register_instance(&self, instance_id: &str, local_address: &str) -> ChannelResult<()> {
        self.invoke(REGISTER_INSTANCE, vec![json!(instance_id), json!(local_address)])
            .await
    }

    async fn report_metrics(&self, report: &MetricsReport) -> ChannelResult<()> {
        let payload =
            serde_json::to_value(report).map_err(|e| ChannelError::Protocol(e.to_string()))?;
        self.invoke(REPORT_METRICS, vec![payload]).await
    }
}
