use crate::registry::ConnectionId;

/// Error type for registry operations.
///
/// Only registration can fail. Updates and removals on a missing id are
/// expected races with a concurrent close and are reported as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateId(ConnectionId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateId(id) => {
                write!(f, "Connection {} is already registered", id)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Why a frame could not be handed to a participant's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The queue (or the pre-INIT backlog) is full: the recipient is stalled.
    QueueFull,
    /// The connection's writer has gone away.
    ChannelClosed,
    /// The entry was removed concurrently.
    NotRegistered,
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::QueueFull => write!(f, "outbound queue full"),
            DeliveryError::ChannelClosed => write!(f, "connection closed"),
            DeliveryError::NotRegistered => write!(f, "connection not registered"),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl<T> From<tokio::sync::mpsc::error::TrySendError<T>> for DeliveryError {
    fn from(e: tokio::sync::mpsc::error::TrySendError<T>) -> Self {
        match e {
            tokio::sync::mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => DeliveryError::ChannelClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_id_message_names_connection() {
        let id = ConnectionId::new();
        let err = RegistryError::DuplicateId(id);
        assert!(err.to_string().contains(&id.to_string()));
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_delivery_error_from_try_send() {
        let (tx, rx) = tokio::sync::mpsc::channel::<u8>(1);
        tx.try_send(1).unwrap();
        assert_eq!(DeliveryError::from(tx.try_send(2).unwrap_err()), DeliveryError::QueueFull);

        drop(rx);
        assert_eq!(DeliveryError::from(tx.try_send(3).unwrap_err()), DeliveryError::ChannelClosed);
    }
}
