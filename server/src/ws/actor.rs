use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::db::models::UserRow;
use crate::state::AppState;
use crate::ws::presence;
use crate::ws::protocol;
use crate::ws::rooms::RoomKey;

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an admitted WebSocket session.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming messages, dispatches to protocol handlers
///
/// The mpsc channel allows any part of the system to send messages to this
/// session by cloning the sender out of the registry.
///
/// Registration, room joins and the presence broadcast are synchronous and
/// complete before the first inbound frame is read, so no event can observe
/// a half-joined session.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    user: UserRow,
    membership: Vec<RoomKey>,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let session_id = Uuid::now_v7().to_string();

    // Register the session and join the server-assigned rooms
    state
        .sessions
        .register(&session_id, &user.id, &user.shop_id, tx.clone());
    for key in membership {
        state.rooms.join(key, &session_id);
    }

    // Presence changed for the user's home shop — recompute and emit to that
    // shop's room (which now includes this session).
    presence::broadcast_online_users(&state, &user.shop_id);

    tracing::info!(
        session_id = %session_id,
        user_id = %user.id,
        shop_id = %user.shop_id,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            // Send ping
            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            // Wait for pong within timeout
            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    // Pong timeout or channel closed — close connection
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(&text, &tx, &state, &session_id, &user.id);
                }
                Message::Binary(_) => {
                    // The protocol is JSON text frames
                    tracing::debug!(
                        user_id = %user.id,
                        "Received binary message (expected text JSON)"
                    );
                }
                Message::Pong(_) => {
                    // Pong received — notify the ping task
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    // Respond to client pings with pong
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user.id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user.id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended — client disconnected
                tracing::info!(user_id = %user.id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Leave rooms and unregister this session, then sweep any other sessions
    // whose writer channel already died without a clean close. Presence is
    // rebroadcast once per shop that lost at least one session.
    state.rooms.leave_all(&session_id);
    state.sessions.unregister(&session_id);

    let mut affected_shops = vec![user.shop_id.clone()];
    for (dead_session, dead_shop) in state.sessions.prune_closed() {
        state.rooms.leave_all(&dead_session);
        affected_shops.push(dead_shop);
    }
    presence::broadcast_for_shops(&state, affected_shops);

    tracing::info!(
        session_id = %session_id,
        user_id = %user.id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
