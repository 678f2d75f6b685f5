//! # Session Lifecycle
//!
//! One connection, from accepted socket to closed socket:
//!
//! 1. **Handshake**: capacity, availability and upstream checks, then `Ready`
//!    or `Error` (see `handshake`)
//! 2. **Dispatch**: frames handled one by one until the peer goes away (see
//!    `dispatcher`)
//! 3. **Teardown**: the session permit is dropped, releasing the slot
//!
//! A rejected connection is closed by the server right after its `Error`.

pub mod dispatcher;
pub mod handshake;

use crate::audio::ChunkedStreamer;
use crate::error::SessionError;
use crate::protocol::{InboundFrame, MessageSink};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use dispatcher::Dispatcher;
use std::net::SocketAddr;
use tokio::sync::mpsc::Receiver;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

/// One accepted socket.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Monotonic identity, unique for the process lifetime
    pub id: u64,
    pub peer: Option<SocketAddr>,
    pub opened_at: DateTime<Utc>,
    /// Set once the handshake admitted the connection
    pub admitted: bool,
}

impl Connection {
    pub fn new(id: u64, peer: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer,
            opened_at: Utc::now(),
            admitted: false,
        }
    }

    pub fn peer_label(&self) -> String {
        self.peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Drive one connection to completion.
///
/// `inbound` yields the frames read off the socket and ends when the peer
/// closes; its capacity bounds how many frames wait while one is handled.
/// `sink` writes back to the same socket.
pub async fn run_connection<S: MessageSink>(
    state: AppState,
    mut connection: Connection,
    inbound: Receiver<InboundFrame>,
    mut sink: S,
) {
    info!(
        connection_id = connection.id,
        peer = %connection.peer_label(),
        "TTS connection opened"
    );

    let permit = match handshake::perform(&state, &connection, &mut sink).await {
        Ok(permit) => permit,
        Err(SessionError::Rejected(err)) => {
            info!(connection_id = connection.id, reason = %err, fatal = err.is_fatal(), "Connection rejected");
            sink.close().await;
            return;
        }
        Err(SessionError::Disconnected(_)) => {
            warn!(connection_id = connection.id, "Peer left during handshake");
            return;
        }
    };
    connection.admitted = true;

    let dispatcher = Dispatcher::new(
        &connection,
        &state.synthesizer,
        ChunkedStreamer::from_config(&state.config),
    );
    let mut frames = ReceiverStream::new(inbound);

    match dispatcher.run(&mut frames, &mut sink).await {
        Ok(()) => info!(connection_id = connection.id, "Connection closed by client"),
        Err(closed) => warn!(connection_id = connection.id, error = %closed, "Send failed, ending session"),
    }

    drop(permit);
    let lifetime = Utc::now() - connection.opened_at;
    info!(
        connection_id = connection.id,
        admitted = connection.admitted,
        active = state.sessions.active(),
        capacity = state.sessions.capacity(),
        duration_ms = lifetime.num_milliseconds(),
        "TTS session ended"
    );
}
