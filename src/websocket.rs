//! # WebSocket Transport
//!
//! Terminates the host's WebSocket and connects it to a session task.
//!
//! ## Actor Model:
//! Each socket is an actix actor. The actor only moves frames:
//! - **Inbound**: Text/Binary messages are forwarded, in arrival order, to the
//!   session task over a bounded channel (`sessions.max_pending_frames`).
//!   Fragmented messages are reassembled first.
//! - **Outbound**: The session task sends `Outbound` messages to the actor's
//!   address; the mailbox is the single writer for the socket, so frames leave
//!   in the order they were sent
//!
//! All protocol decisions (handshake, dispatch, streaming) live in the session
//! task, see `crate::session`.
//!
//! ## Backlog:
//! The session task reads the next frame only after the current one is fully
//! handled. Frames arriving while the queue is full are dropped; once the
//! session is admitted the peer is told with `Error{"Too many pending messages"}`.
//! The actor never waits on the queue, because the session task may itself be
//! waiting on the actor's mailbox.
//!
//! ## Keepalive:
//! The server pings every `heartbeat_interval_secs` and drops peers that have
//! been silent for `client_timeout_secs`.

use crate::error::{BridgeError, SinkClosed};
use crate::protocol::{InboundFrame, MessageSink, ServerMessage};
use crate::session::{run_connection, Connection};
use crate::state::AppState;

use actix::prelude::*;
use actix::WeakAddr;
use actix_http::ws::Item;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Largest message accepted when reassembling fragments.
const MAX_MESSAGE_BYTES: usize = 1 << 20;

/// Frame to write to the socket.
#[derive(Message)]
#[rtype(result = "()")]
struct Outbound(ServerMessage);

/// Close the socket from the server side.
#[derive(Message)]
#[rtype(result = "()")]
struct CloseSocket;

#[derive(Debug, Clone, Copy, PartialEq)]
enum FragmentKind {
    Text,
    Binary,
}

/// Collects the fragments of one WebSocket message.
#[derive(Debug, Default)]
struct FragmentBuffer {
    partial: Option<(FragmentKind, Vec<u8>)>,
    overflowed: bool,
}

impl FragmentBuffer {
    /// Feed one fragment; yields the whole message on the last one.
    fn push(&mut self, item: Item) -> Option<InboundFrame> {
        match item {
            Item::FirstText(data) => self.start(FragmentKind::Text, &data),
            Item::FirstBinary(data) => self.start(FragmentKind::Binary, &data),
            Item::Continue(data) => {
                self.append(&data);
                None
            }
            Item::Last(data) => {
                self.append(&data);
                Some(self.finish())
            }
        }
    }

    fn start(&mut self, kind: FragmentKind, data: &[u8]) -> Option<InboundFrame> {
        self.partial = Some((kind, Vec::with_capacity(data.len())));
        self.overflowed = false;
        self.append(data);
        None
    }

    fn append(&mut self, data: &[u8]) {
        if self.overflowed {
            return;
        }
        if let Some((_, buffer)) = &mut self.partial {
            if buffer.len() + data.len() > MAX_MESSAGE_BYTES {
                self.overflowed = true;
                buffer.clear();
            } else {
                buffer.extend_from_slice(data);
            }
        }
    }

    fn finish(&mut self) -> InboundFrame {
        let overflowed = std::mem::take(&mut self.overflowed);
        match self.partial.take() {
            Some((FragmentKind::Text, data)) if !overflowed => {
                InboundFrame::Text(String::from_utf8_lossy(&data).into_owned())
            }
            Some((FragmentKind::Binary, data)) if !overflowed => InboundFrame::Binary(data),
            // Oversized or orphaned; an empty binary frame decodes to Unknown
            _ => InboundFrame::Binary(Vec::new()),
        }
    }
}

/// WebSocket actor for one host connection.
pub struct BridgeSocket {
    state: AppState,

    /// Handed to the session task when the actor starts
    connection: Option<Connection>,
    connection_id: u64,

    /// Inbound frames for the session task; dropped when the socket stops
    inbound: Option<mpsc::Sender<InboundFrame>>,
    fragments: FragmentBuffer,

    /// Set once `Ready` went out; backlog errors are only sent after it
    admitted: bool,

    /// Last time the peer showed signs of life
    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl BridgeSocket {
    pub fn new(state: AppState, connection: Connection) -> Self {
        Self {
            connection_id: connection.id,
            connection: Some(connection),
            inbound: None,
            fragments: FragmentBuffer::default(),
            admitted: false,
            last_heartbeat: Instant::now(),
            heartbeat_interval: state.config.heartbeat_interval(),
            client_timeout: state.config.client_timeout(),
            state,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection_id = act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn forward(&mut self, frame: InboundFrame, ctx: &mut ws::WebsocketContext<Self>) {
        self.last_heartbeat = Instant::now();
        let Some(inbound) = &self.inbound else {
            return;
        };

        match inbound.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection_id = self.connection_id,
                    capacity = inbound.max_capacity(),
                    "Inbound queue full, dropping frame"
                );
                if self.admitted {
                    self.write(ServerMessage::error(BridgeError::Backlogged.client_message()), ctx);
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = self.connection_id, "Session task gone, dropping frame");
            }
        }
    }

    fn write(&mut self, message: ServerMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if message == ServerMessage::Ready {
            self.admitted = true;
        }
        match message.encode() {
            Ok(bytes) => ctx.binary(bytes),
            Err(err) => error!(connection_id = self.connection_id, error = %err, "Failed to encode message"),
        }
    }
}

impl Actor for BridgeSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.start_heartbeat(ctx);

        let Some(connection) = self.connection.take() else {
            return;
        };
        let (tx, rx) = mpsc::channel(self.state.config.sessions.max_pending_frames.max(1));
        self.inbound = Some(tx);

        let sink = ActorSink {
            addr: ctx.address().downgrade(),
        };
        actix_web::rt::spawn(run_connection(self.state.clone(), connection, rx, sink));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Ends the session task's frame stream
        self.inbound.take();
        debug!(connection_id = self.connection_id, "WebSocket actor stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for BridgeSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => self.forward(InboundFrame::Binary(data.to_vec()), ctx),
            Ok(ws::Message::Text(text)) => self.forward(InboundFrame::Text(text.to_string()), ctx),
            Ok(ws::Message::Continuation(item)) => {
                if let Some(frame) = self.fragments.push(item) {
                    self.forward(frame, ctx);
                }
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = self.connection_id, ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = self.connection_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for BridgeSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        self.write(msg.0, ctx);
    }
}

impl Handler<CloseSocket> for BridgeSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseSocket, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// Session-side handle on the socket actor.
///
/// Holds a weak address so a finished socket is never kept alive by its
/// session task.
struct ActorSink {
    addr: WeakAddr<BridgeSocket>,
}

impl MessageSink for ActorSink {
    async fn send(&mut self, message: ServerMessage) -> Result<(), SinkClosed> {
        let addr = self.addr.upgrade().ok_or(SinkClosed)?;
        addr.send(Outbound(message)).await.map_err(|_| SinkClosed)
    }

    async fn close(&mut self) {
        if let Some(addr) = self.addr.upgrade() {
            let _ = addr.send(CloseSocket).await;
        }
    }
}

/// WebSocket endpoint handler.
///
/// Plain HTTP requests that are not upgrades are refused here with the
/// handshake error response.
pub async fn bridge_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    ws::handshake(&req)?;

    let connection = Connection::new(state.next_connection_id(), req.peer_addr());
    info!(
        connection_id = connection.id,
        peer = %connection.peer_label(),
        path = req.path(),
        "New WebSocket connection request"
    );

    ws::start(BridgeSocket::new(state.get_ref().clone(), connection), &req, stream)
}
