//! JSON wire protocol and inbound frame routing.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::registry::{ConnectionId, Coordinates, ParticipantState, Registry};
use crate::ws::broadcast::Broadcaster;

/// Frames accepted from clients, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "UPDATE_LOCATION")]
    UpdateLocation { lat: f64, lng: f64 },
    /// Any other `type`. Ignored so newer clients can talk to older servers.
    #[serde(other)]
    Unknown,
}

/// Frames sent to clients, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    Init {
        #[serde(rename = "userId")]
        user_id: ConnectionId,
        users: Vec<ParticipantState>,
    },
    UserUpdated {
        user: ParticipantState,
    },
    UserLeft {
        #[serde(rename = "userId")]
        user_id: ConnectionId,
    },
}

impl OutboundMessage {
    /// Serialize once into a text frame that can be cloned per recipient.
    pub fn to_frame(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize outbound message");
                None
            }
        }
    }
}

/// Why an inbound frame was dropped.
#[derive(Debug)]
pub enum FrameError {
    /// Not JSON, missing `type`, or a known `type` with missing/mistyped fields.
    Malformed(serde_json::Error),
    /// Coordinates that are not finite or lie outside lat ±90 / lng ±180.
    InvalidCoordinates { lat: f64, lng: f64 },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Malformed(e) => write!(f, "Malformed frame: {}", e),
            FrameError::InvalidCoordinates { lat, lng } => {
                write!(f, "Coordinates out of range: lat={}, lng={}", lat, lng)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// A validated inbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    UpdateLocation(Coordinates),
    Ignore,
}

/// Parse and validate one inbound payload.
pub fn decode_frame(data: &[u8]) -> Result<Command, FrameError> {
    let message: InboundMessage = serde_json::from_slice(data).map_err(FrameError::Malformed)?;
    match message {
        InboundMessage::UpdateLocation { lat, lng } => Coordinates::new(lat, lng)
            .map(Command::UpdateLocation)
            .ok_or(FrameError::InvalidCoordinates { lat, lng }),
        InboundMessage::Unknown => Ok(Command::Ignore),
    }
}

/// Handle one inbound payload from `sender_id`.
///
/// Bad frames are logged and dropped; the connection stays open. A valid
/// location update is written to the registry and the resulting state is
/// broadcast to everyone else.
pub fn route_frame(
    data: &[u8],
    sender_id: &ConnectionId,
    registry: &Registry,
    broadcaster: &Broadcaster,
) {
    let command = match decode_frame(data) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!(
                connection_id = %sender_id,
                error = %e,
                payload = %String::from_utf8_lossy(&data[..data.len().min(100)]),
                "Dropping inbound frame"
            );
            return;
        }
    };

    match command {
        Command::UpdateLocation(position) => {
            if let Some(updated) = registry.update_position(sender_id, position) {
                broadcaster.participant_updated(&updated);
            }
        }
        Command::Ignore => {
            tracing::trace!(connection_id = %sender_id, "Ignoring unknown message type");
        }
    }
}
