//! Authoritative in-memory store of connected participants.
//!
//! One entry per open connection, keyed by a `ConnectionId` minted at connect
//! time. Entries live in a sharded `DashMap`, so connections touching
//! different entries never contend on a single lock, and every read or write
//! of one entry happens under that entry's shard lock (no torn reads).

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use axum::extract::ws::Message;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{DeliveryError, RegistryError};
use crate::ws::ConnectionSender;

/// Opaque per-connection identifier. A fresh random UUID per connection,
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A latitude/longitude pair. Always stored and replaced as a unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Accepts only finite values within the WGS84 ranges.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }
}

/// Public view of one participant, as sent to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantState {
    pub id: ConnectionId,
    /// `None` until the first location update.
    pub position: Option<Coordinates>,
    pub connected_at: DateTime<Utc>,
}

impl ParticipantState {
    pub fn lat(&self) -> Option<f64> {
        self.position.map(|p| p.lat)
    }

    pub fn lng(&self) -> Option<f64> {
        self.position.map(|p| p.lng)
    }
}

/// Wire shape: `{ "id", "lat", "lng", "connectedAt" }` with millisecond
/// precision ISO-8601 timestamps.
impl Serialize for ParticipantState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire {
            id: ConnectionId,
            lat: Option<f64>,
            lng: Option<f64>,
            #[serde(rename = "connectedAt")]
            connected_at: String,
        }

        Wire {
            id: self.id,
            lat: self.lat(),
            lng: self.lng(),
            connected_at: self
                .connected_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
        .serialize(serializer)
    }
}

/// A registry entry: participant state plus the handles needed to reach and
/// to close the connection.
#[derive(Debug)]
struct Entry {
    state: ParticipantState,
    sender: ConnectionSender,
    closed: CancellationToken,
    /// Frames fanned out before INIT was queued. `Some` until `open`.
    backlog: Option<Vec<Message>>,
}

/// Shared registry handle. Cloning is cheap and every clone sees the same
/// entries; each server instance constructs its own.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Arc<DashMap<ConnectionId, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry with no position and the current time.
    ///
    /// `closed` is cancelled when the entry is removed, which tells the
    /// owning connection task to shut down.
    pub fn register(
        &self,
        id: ConnectionId,
        sender: ConnectionSender,
        closed: CancellationToken,
    ) -> Result<ParticipantState, RegistryError> {
        match self.entries.entry(id) {
            MapEntry::Occupied(_) => Err(RegistryError::DuplicateId(id)),
            MapEntry::Vacant(slot) => {
                let state = ParticipantState {
                    id,
                    position: None,
                    connected_at: Utc::now(),
                };
                slot.insert(Entry {
                    state: state.clone(),
                    sender,
                    closed,
                    backlog: Some(Vec::new()),
                });
                tracing::debug!(connection_id = %id, "Participant registered");
                Ok(state)
            }
        }
    }

    /// Overwrite both coordinates and return the resulting state.
    /// Returns `None` if the connection has already been removed.
    pub fn update_position(
        &self,
        id: &ConnectionId,
        position: Coordinates,
    ) -> Option<ParticipantState> {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.state.position = Some(position);
                Some(entry.state.clone())
            }
            None => {
                tracing::debug!(
                    connection_id = %id,
                    "Position update for unregistered connection ignored"
                );
                None
            }
        }
    }

    /// Remove the entry and signal its connection to close.
    /// Only the first caller gets `Some`; later calls are no-ops.
    pub fn remove(&self, id: &ConnectionId) -> Option<ParticipantState> {
        let (_, entry) = self.entries.remove(id)?;
        entry.closed.cancel();
        tracing::debug!(connection_id = %id, "Participant removed");
        Some(entry.state)
    }

    /// Copy of every participant except `excluding`.
    pub fn snapshot(&self, excluding: Option<&ConnectionId>) -> Vec<ParticipantState> {
        self.entries
            .iter()
            .filter(|entry| Some(entry.key()) != excluding)
            .map(|entry| entry.value().state.clone())
            .collect()
    }

    /// Ids of every participant except `excluding`, captured at call time.
    /// Fan-out runs over this list, not over the live map.
    pub fn recipient_ids(&self, excluding: Option<&ConnectionId>) -> Vec<ConnectionId> {
        self.entries
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| Some(id) != excluding)
            .collect()
    }

    /// Hand one frame to a participant without waiting.
    ///
    /// Until the participant's INIT is queued the frame is held in the
    /// entry's backlog, so INIT is always the first frame it receives.
    pub fn deliver(&self, id: &ConnectionId, frame: Message) -> Result<(), DeliveryError> {
        let mut guard = self.entries.get_mut(id).ok_or(DeliveryError::NotRegistered)?;
        let entry = &mut *guard;
        let limit = entry.sender.max_capacity().saturating_sub(1);
        match entry.backlog.as_mut() {
            Some(backlog) if backlog.len() >= limit => Err(DeliveryError::QueueFull),
            Some(backlog) => {
                backlog.push(frame);
                Ok(())
            }
            None => entry.sender.try_send(frame).map_err(DeliveryError::from),
        }
    }

    /// Queue `init` followed by any backlog, then deliver directly from now on.
    ///
    /// The caller builds `init` from a snapshot taken after `register`. Every
    /// event that raced with that snapshot is either already reflected in it
    /// or sits in the backlog, so replaying the backlog after INIT never
    /// leaves the client with a stale view.
    pub fn open(&self, id: &ConnectionId, init: Message) -> Result<(), DeliveryError> {
        let mut entry = self.entries.get_mut(id).ok_or(DeliveryError::NotRegistered)?;
        let backlog = entry.backlog.take().unwrap_or_default();
        entry.sender.try_send(init)?;
        for frame in backlog {
            entry.sender.try_send(frame)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &ConnectionId) -> Option<ParticipantState> {
        self.entries.get(id).map(|entry| entry.state.clone())
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
