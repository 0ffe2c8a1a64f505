//! Emit helpers for server events.
//!
//! All delivery here is best-effort: a failed or impossible send is logged
//! and swallowed, never surfaced to the caller. Persistence correctness must
//! not depend on live delivery.

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use crate::ws::protocol::ServerEvent;
use crate::ws::rooms::{RoomKey, RoomTable};
use crate::ws::SessionRegistry;

/// Serialize an event once for fanout.
fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Send an event to a single session's writer channel.
pub fn send_to_session(tx: &mpsc::UnboundedSender<Message>, event: &ServerEvent) {
    if let Some(msg) = encode(event) {
        let _ = tx.send(msg);
    }
}

/// Emit an event to every live session of a user. Zero live sessions is not
/// an error — the persisted record is recovered on the client's next poll.
pub fn emit_to_user(registry: &SessionRegistry, user_id: &str, event: &ServerEvent) {
    let Some(msg) = encode(event) else { return };
    for sender in registry.senders_for_user(user_id) {
        let _ = sender.send(msg.clone());
    }
}

/// Emit an event to every session currently in a room.
pub fn emit_to_room(
    rooms: &RoomTable,
    registry: &SessionRegistry,
    key: &RoomKey,
    event: &ServerEvent,
) {
    let Some(msg) = encode(event) else { return };
    for session_id in rooms.sessions_in(key) {
        if let Some(sender) = registry.sender_for_session(&session_id) {
            let _ = sender.send(msg.clone());
        }
    }
}
