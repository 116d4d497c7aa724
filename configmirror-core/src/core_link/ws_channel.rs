/*
    ws_channel.rs - WebSocket PushChannel

    Speaks the JSON hub protocol over a single WebSocket. One driver task
    owns the socket; callers reach it through an outbound queue that only
    exists while the link is up.

    Lifecycle:
        start()  -> Connecting, connect + handshake (failure is returned)
        driver   -> Connected, pump frames until the link drops
                 -> Reconnecting, retry after each configured delay
                 -> Connected again, or Closed once the delays run out
                 -> Closed at once if the hub closes without allowReconnect
        stop()   -> close frame, Closed

    ┌────────────┐ outbound (mpsc) ┌──────────────┐  ws  ┌───────────┐
    │ invoke()   │────────────────►│ driver task  │◄────►│ authority │
    └────────────┘                 │ (pump loop)  │      └───────────┘
                                   └──────┬───────┘
                                          │ ChannelEvent
                                          ▼
                                     supervisor
*/

use crate::core_link::channel::{
    ChannelError, ChannelEvent, ChannelEventSender, ChannelResult, ConnectionState, PushChannel,
};
use crate::core_link::hub_protocol::{self, FrameBuffer, HubMessage};
use crate::core_sync::HubNotification;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings for the WebSocket transport
#[derive(Debug, Clone)]
pub struct WsChannelConfig {
    /// Full hub endpoint, e.g. `ws://host:5000/configHub`
    pub url: String,

    /// Wait before each reconnect attempt; Closed once exhausted
    pub reconnect_delays: Vec<Duration>,

    /// Bound on TCP connect + hub handshake
    pub handshake_timeout: Duration,

    /// Interval between client pings
    pub keepalive_interval: Duration,
}

impl WsChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_reconnect_delays(mut self, delays: Vec<Duration>) -> Self {
        self.reconnect_delays = delays;
        self
    }
}

impl Default for WsChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/configHub".to_string(),
            reconnect_delays: vec![
                Duration::from_secs(0),
                Duration::from_secs(2),
                Duration::from_secs(10),
                Duration::from_secs(30),
            ],
            handshake_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

/// An open socket that has completed the hub handshake
struct HubConnection {
    ws: WsStream,
    /// Frames that arrived in the same message as the handshake reply
    pending: Vec<String>,
    buffer: FrameBuffer,
}

enum PumpExit {
    Stopped,
    Lost(String),
    /// Close message without `allowReconnect`
    Refused(String),
}

/// Why `handle_frame` ended the connection
#[derive(Debug, PartialEq, Eq)]
struct HubClosed {
    reason: String,
    allow_reconnect: bool,
}

impl From<HubClosed> for PumpExit {
    fn from(closed: HubClosed) -> Self {
        if closed.allow_reconnect {
            PumpExit::Lost(closed.reason)
        } else {
            PumpExit::Refused(closed.reason)
        }
    }
}

pub struct WsPushChannel {
    config: WsChannelConfig,
    event_tx: ChannelEventSender,
    outbound: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    stop_tx: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl WsPushChannel {
    pub fn new(config: WsChannelConfig, event_tx: ChannelEventSender) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            event_tx,
            outbound: Arc::new(Mutex::new(None)),
            stop_tx,
            driver: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PushChannel for WsPushChannel {
    async fn start(&self) -> ChannelResult<()> {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            return Err(ChannelError::AlreadyStarted);
        }

        emit(&self.event_tx, ChannelEvent::State(ConnectionState::Connecting));
        let connection = connect(&self.config).await?;
        info!("Connected to hub at {}", self.config.url);

        *driver = Some(tokio::spawn(drive(
            connection,
            self.config.clone(),
            self.event_tx.clone(),
            self.outbound.clone(),
            self.stop_tx.subscribe(),
        )));
        Ok(())
    }

    async fn invoke(&self, method: &str, arguments: Vec<JsonValue>) -> ChannelResult<()> {
        let frame = hub_protocol::encode_invocation(method, arguments);
        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(ChannelError::NotConnected)?;

        sender
            .send(frame)
            .await
            .map_err(|_| ChannelError::NotConnected)
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.stop_tx.send_replace(true);

        let handle = self.driver.lock().await.take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| ChannelError::Internal(format!("driver task failed: {}", e)))?;
        }
        Ok(())
    }
}

fn emit(event_tx: &ChannelEventSender, event: ChannelEvent) {
    if event_tx.send(event).is_err() {
        debug!("Channel event dropped: receiver gone");
    }
}

async fn connect(config: &WsChannelConfig) -> ChannelResult<HubConnection> {
    timeout(config.handshake_timeout, open_and_handshake(&config.url))
        .await
        .map_err(|_| ChannelError::Connect(format!("timed out connecting to {}", config.url)))?
}

async fn open_and_handshake(url: &str) -> ChannelResult<HubConnection> {
    let (mut ws, _response) = connect_async(url)
        .await
        .map_err(|e| ChannelError::Connect(e.to_string()))?;

    ws.send(Message::Text(hub_protocol::encode_handshake()))
        .await
        .map_err(|e| ChannelError::Send(e.to_string()))?;

    let mut buffer = FrameBuffer::new();
    loop {
        let text = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                return Err(ChannelError::Handshake("connection closed during handshake".into()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ChannelError::Connect(e.to_string())),
        };

        let mut frames = buffer.push(&text).into_iter();
        if let Some(reply) = frames.next() {
            hub_protocol::parse_handshake_response(&reply)
                .map_err(|e| ChannelError::Handshake(e.to_string()))?;

            return Ok(HubConnection {
                ws,
                pending: frames.collect(),
                buffer,
            });
        }
    }
}

async fn drive(
    mut connection: HubConnection,
    config: WsChannelConfig,
    event_tx: ChannelEventSender,
    outbound: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let (out_tx, out_rx) = mpsc::channel(64);
        *outbound.lock().await = Some(out_tx);
        emit(&event_tx, ChannelEvent::State(ConnectionState::Connected));

        let exit = pump(
            connection,
            out_rx,
            &event_tx,
            &mut stop_rx,
            config.keepalive_interval,
        )
        .await;
        *outbound.lock().await = None;

        match exit {
            PumpExit::Stopped => break,
            PumpExit::Refused(reason) => {
                warn!("Hub closed the connection without reconnect: {}", reason);
                break;
            }
            PumpExit::Lost(reason) => warn!("Hub connection lost: {}", reason),
        }

        emit(&event_tx, ChannelEvent::State(ConnectionState::Reconnecting));
        match reconnect(&config, &mut stop_rx).await {
            Some(next) => connection = next,
            None => break,
        }
    }

    emit(&event_tx, ChannelEvent::State(ConnectionState::Closed));
}

async fn reconnect(
    config: &WsChannelConfig,
    stop_rx: &mut watch::Receiver<bool>,
) -> Option<HubConnection> {
    for (attempt, delay) in config.reconnect_delays.iter().enumerate() {
        if *stop_rx.borrow() {
            return None;
        }

        tokio::select! {
            _ = tokio::time::sleep(*delay) => {}
            _ = stop_rx.changed() => return None,
        }

        match connect(config).await {
            Ok(connection) => {
                info!("Reconnected to hub after {} attempt(s)", attempt + 1);
                return Some(connection);
            }
            Err(e) => warn!("Reconnect attempt {} failed: {}", attempt + 1, e),
        }
    }

    warn!(
        "Giving up on hub after {} reconnect attempts",
        config.reconnect_delays.len()
    );
    None
}

async fn pump(
    connection: HubConnection,
    mut out_rx: mpsc::Receiver<String>,
    event_tx: &ChannelEventSender,
    stop_rx: &mut watch::Receiver<bool>,
    keepalive_interval: Duration,
) -> PumpExit {
    let HubConnection {
        ws,
        pending,
        mut buffer,
    } = connection;
    let (mut sink, mut stream) = ws.split();

    for frame in pending {
        if let Err(closed) = handle_frame(&frame, event_tx) {
            return closed.into();
        }
    }

    let mut keepalive = tokio::time::interval(keepalive_interval);
    keepalive.tick().await;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    debug!("Close frame not delivered: {}", e);
                }
                return PumpExit::Stopped;
            }
            Some(frame) = out_rx.recv() => {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    return PumpExit::Lost(e.to_string());
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = sink.send(Message::Text(hub_protocol::encode_ping())).await {
                    return PumpExit::Lost(e.to_string());
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    for frame in buffer.push(&text) {
                        if let Err(closed) = handle_frame(&frame, event_tx) {
                            return closed.into();
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return PumpExit::Lost("closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpExit::Lost(e.to_string()),
            }
        }
    }
}

/// Returns `Err` when the server asked to close the connection
fn handle_frame(frame: &str, event_tx: &ChannelEventSender) -> Result<(), HubClosed> {
    let message = match hub_protocol::parse_message(frame) {
        Ok(message) => message,
        Err(e) => {
            warn!("Ignoring malformed hub frame: {}", e);
            return Ok(());
        }
    };

    match message {
        HubMessage::Invocation {
            target, arguments, ..
        } => match HubNotification::from_invocation(&target, &arguments) {
            Ok(Some(notification)) => emit(event_tx, ChannelEvent::Notification(notification)),
            Ok(None) => debug!("No handler for hub method {}", target),
            Err(e) => warn!("Bad arguments for {}: {}", target, e),
        },
        HubMessage::Ping => {}
        HubMessage::Close {
            error,
            allow_reconnect,
        } => {
            return Err(HubClosed {
                reason: error.unwrap_or_else(|| "server closed the hub".to_string()),
                allow_reconnect,
            });
        }
        HubMessage::Other(kind) => debug!("Ignoring hub message type {}", kind),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_replica::ConfigItem;

    #[test]
    fn test_default_reconnect_schedule() {
        let config = WsChannelConfig::default();
        assert_eq!(
            config.reconnect_delays,
            vec![
                Duration::from_secs(0),
                Duration::from_secs(2),
                Duration::from_secs(10),
                Duration::from_secs(30)
            ]
        );
    }

    #[test]
    fn test_handle_frame_emits_notification() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frame = r#"{"type":1,"target":"ConfigurationUpdated","arguments":[{"id":1,"key":"A","value":"v1","version":1}]}"#;

        handle_frame(frame, &tx).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelEvent::Notification(HubNotification::ItemPushed(ConfigItem::new(
                1, "A", "v1", 1
            )))
        );
    }

    #[test]
    fn test_handle_frame_close_reports_reason() {
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = handle_frame(r#"{"type":7,"error":"maintenance","allowReconnect":true}"#, &tx);
        assert_eq!(
            result,
            Err(HubClosed {
                reason: "maintenance".to_string(),
                allow_reconnect: true
            })
        );
        assert!(matches!(PumpExit::from(result.unwrap_err()), PumpExit::Lost(_)));
    }

    #[test]
    fn test_close_without_reconnect_is_refused() {
        let (tx, _rx) = mpsc::unbounded_channel();

        let closed = handle_frame(r#"{"type":7,"error":"decommissioned"}"#, &tx).unwrap_err();
        assert!(!closed.allow_reconnect);
        assert!(matches!(
            PumpExit::from(closed),
            PumpExit::Refused(reason) if reason == "decommissioned"
        ));
    }

    #[test]
    fn test_handle_frame_ignores_garbage() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_frame("{{{", &tx).unwrap();
        handle_frame(r#"{"type":1,"target":"IpBlocked","arguments":[42]}"#, &tx).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invoke_before_start_is_not_connected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = WsPushChannel::new(WsChannelConfig::default(), tx);

        let result = channel.invoke("RegisterInstance", vec![]).await;
        assert!(matches!(result, Err(ChannelError::NotConnected)));
    }

    #[tokio::test]
    async fn test_start_against_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = WsPushChannel::new(
            WsChannelConfig::new(format!("ws://127.0.0.1:{}/configHub", port)),
            tx,
        );

        assert!(matches!(channel.start().await, Err(ChannelError::Connect(_))));
        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelEvent::State(ConnectionState::Connecting)
        );
    }
}
