//! # Startup Handshake
//!
//! Decides whether a fresh connection is admitted and tells the peer, with
//! exactly one message: `Ready` or `Error`.
//!
//! ## Checks (in order, first failure wins):
//! 1. **Capacity**: admitted sessions already at the limit
//! 2. **Availability**: the service is shutting down
//! 3. **Probe**: the upstream provider answers a minimal synthesis request
//! 4. **Admission**: atomically take a session slot, then send `Ready`
//!
//! Step 4 re-checks capacity, because other connections may have been admitted
//! while this one was probing.

use crate::error::{BridgeError, SessionError};
use crate::protocol::{MessageSink, ServerMessage};
use crate::session::Connection;
use crate::state::{AppState, SessionPermit};
use tracing::{info, warn};

/// Run the handshake for `connection`.
///
/// On success the returned permit holds the session slot; it is released when
/// dropped. A rejection has already been reported to the peer when this
/// returns `SessionError::Rejected`.
pub async fn perform<S: MessageSink>(
    state: &AppState,
    connection: &Connection,
    sink: &mut S,
) -> Result<SessionPermit, SessionError> {
    match admit(state, connection).await {
        Ok(permit) => {
            // Dropping the permit on a failed send gives the slot back
            sink.send(ServerMessage::Ready).await?;
            info!(
                connection_id = connection.id,
                active = state.sessions.active(),
                capacity = state.sessions.capacity(),
                "Session started"
            );
            Ok(permit)
        }
        Err(rejection) => {
            sink.send(ServerMessage::error(rejection.client_message())).await?;
            Err(SessionError::Rejected(rejection))
        }
    }
}

async fn admit(state: &AppState, connection: &Connection) -> Result<SessionPermit, BridgeError> {
    if state.sessions.is_full() {
        warn!(
            connection_id = connection.id,
            active = state.sessions.active(),
            capacity = state.sessions.capacity(),
            "Service at capacity"
        );
        return Err(BridgeError::CapacityExceeded);
    }

    if !state.is_accepting() {
        warn!(connection_id = connection.id, "Service shutting down, refusing session");
        return Err(BridgeError::ServiceUnavailable);
    }

    if let Err(err) = state.synthesizer.probe().await {
        warn!(connection_id = connection.id, error = %err, "TTS API not available");
        return Err(BridgeError::ProbeFailed(err));
    }

    state.sessions.try_admit().ok_or_else(|| {
        warn!(connection_id = connection.id, "Capacity filled up while probing");
        BridgeError::CapacityExceeded
    })
}
