use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::registry::ConnectionId;
use crate::state::AppState;
use crate::ws::lifecycle::{ConnectionEvent, Session};
use crate::ws::ConnectionSender;

/// Run one participant connection to completion.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, drains the bounded outbound queue
/// - Keepalive task: pings the client and closes the connection on missing pongs
/// - Reader loop: turns socket activity into `ConnectionEvent`s for the session
///
/// The `closed` token ends the reader loop from the outside: it is cancelled
/// when the registry entry is removed (eviction), when a write fails or times
/// out, or when the keepalive gives up.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let id = ConnectionId::new();
    let settings = state.settings.clone();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(settings.outbound_queue_capacity);
    let closed = CancellationToken::new();

    let mut session = Session::new(id, state.broadcaster.clone(), tx.clone(), closed.clone());

    // Writer starts first so INIT is flushed as soon as it is queued.
    let writer_handle = tokio::spawn(writer_task(
        ws_sender,
        rx,
        settings.write_timeout,
        closed.clone(),
        id,
    ));

    session.handle(ConnectionEvent::Connected);
    if session.is_closed() {
        writer_handle.abort();
        return;
    }

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let keepalive_handle = settings.ping_interval.map(|ping_interval| {
        tokio::spawn(keepalive_task(
            tx.clone(),
            pong_rx,
            ping_interval,
            settings.pong_timeout,
            closed.clone(),
            id,
        ))
    });

    while !session.is_closed() {
        let event = tokio::select! {
            _ = closed.cancelled() => ConnectionEvent::Closed,
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => ConnectionEvent::Frame(Bytes::from(text)),
                Some(Ok(Message::Binary(data))) => ConnectionEvent::Frame(data),
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(());
                    continue;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.try_send(Message::Pong(data));
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %id, reason = ?frame, "Client initiated close");
                    ConnectionEvent::Closed
                }
                Some(Err(e)) => ConnectionEvent::TransportError(e.to_string()),
                None => ConnectionEvent::Closed,
            },
        };
        session.handle(event);
    }

    // Cleanup: stop helpers and release the outbound queue
    closed.cancel();
    writer_handle.abort();
    if let Some(handle) = keepalive_handle {
        handle.abort();
    }

    tracing::debug!(connection_id = %id, "Connection task stopped");
}

/// Forward queued frames to the socket, bounding each write.
/// A failed or timed-out write closes the connection.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    write_timeout: Duration,
    closed: CancellationToken,
    id: ConnectionId,
) {
    loop {
        let msg = tokio::select! {
            _ = closed.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        match timeout(write_timeout, ws_sender.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket write failed");
                break;
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = %id,
                    timeout_ms = write_timeout.as_millis() as u64,
                    "WebSocket write timed out"
                );
                break;
            }
        }
    }
    closed.cancel();
}

/// Ping periodically; close the connection if a pong does not come back in time.
async fn keepalive_task(
    tx: ConnectionSender,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    ping_interval: Duration,
    pong_timeout: Duration,
    closed: CancellationToken,
    id: ConnectionId,
) {
    let mut ping_timer = interval(ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Pongs that arrived late or unsolicited do not count for this round.
        while pong_rx.try_recv().is_ok() {}

        if tx.try_send(Message::Ping(Bytes::from_static(b"geo"))).is_err() {
            tracing::debug!(connection_id = %id, "Ping not queued, closing connection");
            break;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(connection_id = %id, "Pong timeout, closing connection");
                break;
            }
        }
    }
    closed.cancel();
}

