//! # Wire Protocol
//!
//! Message types exchanged with the orchestration host over the WebSocket.
//!
//! ## Message Format:
//! - **Client → Server**: MessagePack maps tagged by `type` (`Text`, `Eos`).
//!   A JSON text frame carrying a `text` field is accepted as a convenience.
//! - **Server → Client**: MessagePack maps with named fields (`Ready`,
//!   `error`, `Audio`), always sent as binary frames.
//!
//! Decoding happens once, at the boundary: anything that is not a well-formed
//! `Text` or `Eos` becomes `ClientMessage::Unknown`.

use crate::error::SinkClosed;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// A raw frame as it came off the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Binary(Vec<u8>),
    Text(String),
}

/// Decoded client request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Text to synthesize (may be empty)
    Text { text: String },
    /// End of the input stream, informational only
    Eos,
    /// Unknown tag, missing fields or undecodable bytes
    Unknown,
}

/// The tagged shape the host sends in binary frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum TaggedFrame {
    Text { text: String },
    Eos,
}

impl ClientMessage {
    pub fn decode(frame: &InboundFrame) -> Self {
        match frame {
            InboundFrame::Binary(data) => match rmp_serde::from_slice::<TaggedFrame>(data) {
                Ok(TaggedFrame::Text { text }) => ClientMessage::Text { text },
                Ok(TaggedFrame::Eos) => ClientMessage::Eos,
                Err(_) => ClientMessage::Unknown,
            },
            InboundFrame::Text(raw) => {
                let text = serde_json::from_str::<serde_json::Value>(raw)
                    .ok()
                    .and_then(|value| value.get("text").and_then(|t| t.as_str()).map(str::to_owned));
                match text {
                    Some(text) => ClientMessage::Text { text },
                    None => ClientMessage::Unknown,
                }
            }
        }
    }

    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Text { .. } => "Text",
            ClientMessage::Eos => "Eos",
            ClientMessage::Unknown => "Unknown",
        }
    }
}

/// Messages the bridge sends to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Handshake succeeded; synthesis requests may follow
    Ready,

    #[serde(rename = "error")]
    Error { message: String },

    /// One window of mono samples in [-1.0, 1.0]
    Audio { pcm: Vec<f64> },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }

    /// Encode as a MessagePack map with field names, the shape the host decodes.
    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }
}

/// Outbound half of a connection.
///
/// The socket actor implements this for production; tests record into memory.
/// Sends are awaited so a failure surfaces to the caller as `SinkClosed`.
pub trait MessageSink {
    fn send(&mut self, message: ServerMessage) -> impl Future<Output = Result<(), SinkClosed>>;

    /// Close the socket from the server side.
    fn close(&mut self) -> impl Future<Output = ()>;
}

impl<T: MessageSink> MessageSink for &mut T {
    fn send(&mut self, message: ServerMessage) -> impl Future<Output = Result<(), SinkClosed>> {
        (**self).send(message)
    }

    fn close(&mut self) -> impl Future<Output = ()> {
        (**self).close()
    }
}
