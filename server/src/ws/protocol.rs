//! JSON wire protocol for the real-time channel.
//!
//! Frames are text messages of the shape `{"event": "...", "data": ...}`.
//! Inbound client events only cover dynamic UI rooms; core room membership
//! (shop, groups, oversight) is server-assigned at admission and not
//! client-controllable.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::db::models::RequestRecord;
use crate::state::AppState;
use crate::ws::broadcast::send_to_session;
use crate::ws::rooms::RoomKey;

/// Events a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    JoinRoom { room: String },
    LeaveRoom { room: String },
}

/// Events the server emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full request payload, delivered to the recipient's live sessions.
    NewMessage(RequestRecord),
    /// Full request payload after an opened/status change, delivered to all
    /// live viewers so they converge without a manual refresh.
    RequestUpdated(RequestRecord),
    /// Online user ids of one shop, emitted to that shop's room only.
    GetOnlineUsers(Vec<String>),
    Error { code: u32, message: String },
}

/// Handle an incoming text frame: decode the client event and apply it.
pub fn handle_text_message(
    text: &str,
    tx: &mpsc::UnboundedSender<axum::extract::ws::Message>,
    state: &AppState,
    session_id: &str,
    user_id: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Failed to decode client event"
            );
            send_to_session(
                tx,
                &ServerEvent::Error {
                    code: 400,
                    message: "Invalid event payload".to_string(),
                },
            );
            return;
        }
    };

    match event {
        ClientEvent::JoinRoom { room } => {
            state.rooms.join(RoomKey::Custom(room), session_id);
        }
        ClientEvent::LeaveRoom { room } => {
            state.rooms.leave(&RoomKey::Custom(room), session_id);
        }
    }
}
