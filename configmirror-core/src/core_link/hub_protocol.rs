/*
    hub_protocol.rs - JSON hub protocol codec

    Every message is a UTF-8 JSON object terminated by the record separator
    0x1E. A connection starts with a handshake:

        client -> {"protocol":"json","version":1}\x1e
        server -> {}\x1e                (or {"error":"..."}\x1e)

    After that, messages carry a numeric `type`:
        1 = invocation  { target, arguments }
        6 = ping
        7 = close       { error?, allowReconnect? }   absent allowReconnect = false
    Other types are decoded as `HubMessage::Other` and ignored by the client.
*/

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

pub const RECORD_SEPARATOR: char = '\u{1e}';
pub const PROTOCOL_NAME: &str = "json";
pub const PROTOCOL_VERSION: u32 = 1;

const TYPE_INVOCATION: u8 = 1;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Handshake error: {0}")]
    HandshakeRejected(String),
}

/// Decoded hub message
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation {
        target: String,
        arguments: Vec<JsonValue>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    Other(u8),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<JsonValue>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

fn terminate(value: JsonValue) -> String {
    let mut frame = value.to_string();
    frame.push(RECORD_SEPARATOR);
    frame
}

pub fn encode_handshake() -> String {
    terminate(json!({ "protocol": PROTOCOL_NAME, "version": PROTOCOL_VERSION }))
}

/// Non-blocking invocation: no invocation id, the server sends no completion
pub fn encode_invocation(target: &str, arguments: Vec<JsonValue>) -> String {
    terminate(json!({ "type": TYPE_INVOCATION, "target": target, "arguments": arguments }))
}

pub fn encode_ping() -> String {
    terminate(json!({ "type": TYPE_PING }))
}

/// Check the server's handshake reply
pub fn parse_handshake_response(frame: &str) -> Result<(), HubProtocolError> {
    let response: HandshakeResponse = serde_json::from_str(frame)
        .map_err(|e| HubProtocolError::Malformed(e.to_string()))?;

    match response.error {
        Some(error) => Err(HubProtocolError::HandshakeRejected(error)),
        None => Ok(()),
    }
}

pub fn parse_message(frame: &str) -> Result<HubMessage, HubProtocolError> {
    let raw: RawMessage =
        serde_json::from_str(frame).map_err(|e| HubProtocolError::Malformed(e.to_string()))?;

    let message = match raw.kind {
        TYPE_INVOCATION => HubMessage::Invocation {
            target: raw
                .target
                .ok_or_else(|| HubProtocolError::Malformed("invocation without target".into()))?,
            arguments: raw.arguments,
        },
        TYPE_PING => HubMessage::Ping,
        TYPE_CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect,
        },
        other => HubMessage::Other(other),
    };

    Ok(message)
}

/// Reassembles record-separated frames across transport messages
#[derive(Debug, Default)]
pub struct FrameBuffer {
    partial: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received text and return every complete frame
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);

        let mut frames = Vec::new();
        while let Some(end) = self.partial.find(RECORD_SEPARATOR) {
            let frame: String = self.partial.drain(..=end).collect();
            let frame = frame.trim_end_matches(RECORD_SEPARATOR);
            if !frame.trim().is_empty() {
                frames.push(frame.to_string());
            }
        }
        frames
    }
}
