pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod lifecycle;
pub mod protocol;

use tokio::sync::mpsc;

/// Sender half of a connection's bounded outbound queue.
/// The registry keeps one clone per participant so broadcasts can reach it.
pub type ConnectionSender = mpsc::Sender<axum::extract::ws::Message>;
