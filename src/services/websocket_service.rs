//! Lifecycle of one client WebSocket connection: register the role, push a
//! snapshot, feed inbound frames to the dispatcher, prune on disconnect.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dto::ws::ServerMessage;
use crate::state::SharedState;
use crate::state::registry::Role;

use super::dispatcher;

/// Handle the full lifecycle for an individual client connection.
pub async fn handle_socket(state: SharedState, role: Role, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames; it also serializes sends for this connection.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    state.registry().register(role, outbound_tx.clone());
    info!(%role, total = state.registry().len(), "client connected");

    // Late joiners and reconnecting clients resynchronize from a full
    // snapshot rather than event replay.
    let snapshot = ServerMessage::Snapshot {
        state: state.snapshot().await,
    };
    state.registry().send_to(role, &snapshot);

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                dispatcher::dispatch(&state, role, text.as_str()).await;
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%role, error = %err, "websocket error");
                break;
            }
        }
    }

    state.registry().unregister(role, &outbound_tx);
    info!(%role, "client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
