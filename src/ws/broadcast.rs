use std::collections::VecDeque;

use super::protocol::OutboundMessage;
use crate::error::DeliveryError;
use crate::registry::{ConnectionId, ParticipantState, Registry};

/// Delivers outbound events to registered participants.
///
/// Sends never wait: each recipient has a bounded queue, and a full or closed
/// queue evicts that recipient (remove + `USER_LEFT` to the rest). One stalled
/// client can therefore never hold up delivery to the others.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Registry,
}

impl Broadcaster {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Send `INIT` to a newly registered participant only, followed by
    /// whatever was fanned out to it since registration.
    /// Returns false if the frames could not be queued.
    pub fn send_init(&self, recipient: &ConnectionId) -> bool {
        let message = OutboundMessage::Init {
            user_id: *recipient,
            users: self.registry.snapshot(Some(recipient)),
        };
        let Some(frame) = message.to_frame() else {
            return false;
        };
        match self.registry.open(recipient, frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    connection_id = %recipient,
                    reason = %e,
                    "Failed to deliver INIT"
                );
                false
            }
        }
    }

    /// Broadcast `USER_UPDATED` to everyone except the participant itself.
    pub fn participant_updated(&self, participant: &ParticipantState) {
        self.fan_out(
            OutboundMessage::UserUpdated {
                user: participant.clone(),
            },
            participant.id,
        );
    }

    /// Broadcast `USER_LEFT` to every remaining participant.
    pub fn participant_left(&self, id: &ConnectionId) {
        self.fan_out(OutboundMessage::UserLeft { user_id: *id }, *id);
    }

    /// Deliver `message` to a snapshot of current recipients, then deliver
    /// the `USER_LEFT` events for anyone evicted along the way.
    fn fan_out(&self, message: OutboundMessage, excluding: ConnectionId) {
        let mut pending = VecDeque::from([(message, excluding)]);

        while let Some((message, excluding)) = pending.pop_front() {
            let Some(frame) = message.to_frame() else {
                continue;
            };

            for recipient in self.registry.recipient_ids(Some(&excluding)) {
                let e = match self.registry.deliver(&recipient, frame.clone()) {
                    Ok(()) | Err(DeliveryError::NotRegistered) => continue,
                    Err(e) => e,
                };
                // Only the caller that actually removes the entry announces it.
                if self.registry.remove(&recipient).is_some() {
                    tracing::warn!(
                        connection_id = %recipient,
                        reason = %e,
                        remaining = self.registry.len(),
                        "Evicting unreachable participant"
                    );
                    pending.push_back((
                        OutboundMessage::UserLeft {
                            user_id: recipient,
                        },
                        recipient,
                    ));
                }
            }
        }
    }
}
