//! Per-connection state machine: `Connecting -> Open -> Closed`.
//!
//! The socket task translates transport activity into `ConnectionEvent`s and
//! feeds them here one at a time, so a connection's events are always
//! handled in arrival order.

use axum::body::Bytes;
use tokio_util::sync::CancellationToken;

use super::broadcast::Broadcaster;
use super::protocol;
use super::ConnectionSender;
use crate::registry::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Frame(Bytes),
    Closed,
    TransportError(String),
}

pub struct Session {
    id: ConnectionId,
    phase: Phase,
    broadcaster: Broadcaster,
    sender: ConnectionSender,
    closed: CancellationToken,
}

impl Session {
    pub fn new(
        id: ConnectionId,
        broadcaster: Broadcaster,
        sender: ConnectionSender,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id,
            phase: Phase::Connecting,
            broadcaster,
            sender,
            closed,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Apply one event and return the resulting phase.
    pub fn handle(&mut self, event: ConnectionEvent) -> Phase {
        match (self.phase, event) {
            (Phase::Connecting, ConnectionEvent::Connected) => self.open(),
            (Phase::Open, ConnectionEvent::Frame(data)) => {
                protocol::route_frame(
                    &data,
                    &self.id,
                    self.broadcaster.registry(),
                    &self.broadcaster,
                );
            }
            (Phase::Open, ConnectionEvent::Closed) => self.close(),
            (Phase::Open, ConnectionEvent::TransportError(error)) => {
                tracing::warn!(connection_id = %self.id, error = %error, "WebSocket transport error");
                self.close();
            }
            // Never registered, so there is nothing to remove or announce.
            (Phase::Connecting, ConnectionEvent::Closed | ConnectionEvent::TransportError(_)) => {
                self.phase = Phase::Closed;
            }
            (Phase::Connecting, ConnectionEvent::Frame(_)) => {
                tracing::debug!(connection_id = %self.id, "Frame before open dropped");
            }
            (Phase::Open, ConnectionEvent::Connected) => {
                tracing::warn!(connection_id = %self.id, "Duplicate connect event ignored");
            }
            (Phase::Closed, event) => {
                tracing::trace!(connection_id = %self.id, ?event, "Event after close ignored");
            }
        }
        self.phase
    }

    fn open(&mut self) {
        let registry = self.broadcaster.registry();
        if let Err(e) = registry.register(self.id, self.sender.clone(), self.closed.clone()) {
            // Abort this connection's setup only; the existing entry is left alone.
            tracing::error!(connection_id = %self.id, error = %e, "Connection setup aborted");
            self.phase = Phase::Closed;
            return;
        }
        self.phase = Phase::Open;

        tracing::info!(
            connection_id = %self.id,
            total = registry.len(),
            "Participant connected"
        );

        if !self.broadcaster.send_init(&self.id) {
            self.close();
        }
    }

    fn close(&mut self) {
        self.phase = Phase::Closed;
        let registry = self.broadcaster.registry();
        // The entry may already be gone if a broadcast evicted this connection;
        // that path has announced the departure.
        if registry.remove(&self.id).is_some() {
            self.broadcaster.participant_left(&self.id);
            tracing::info!(
                connection_id = %self.id,
                total = registry.len(),
                "Participant disconnected"
            );
        }
    }
}
