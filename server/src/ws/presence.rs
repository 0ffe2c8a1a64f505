//! Tenant-scoped presence broadcast.
//!
//! On every admission join and every disconnect-triggered removal, the online
//! list of the affected shop(s) is recomputed from the session registry and
//! emitted to that shop's room exclusively. A shop's presence list is never
//! sent to another shop's room — oversight sessions that joined a foreign
//! shop room for monitoring receive that shop's list there, but their own
//! presence only ever counts toward their home shop.

use std::collections::BTreeSet;

use crate::state::AppState;
use crate::ws::broadcast::emit_to_room;
use crate::ws::protocol::ServerEvent;
use crate::ws::rooms::RoomKey;

/// Recompute and emit the online-user list for one shop.
pub fn broadcast_online_users(state: &AppState, shop_id: &str) {
    let online = state.sessions.online_in_shop(shop_id);
    tracing::debug!(shop_id = %shop_id, online = online.len(), "Presence broadcast");
    emit_to_room(
        &state.rooms,
        &state.sessions,
        &RoomKey::Shop(shop_id.to_string()),
        &ServerEvent::GetOnlineUsers(online),
    );
}

/// Broadcast presence for a set of shops, once per shop. Used on disconnect
/// cleanup where pruning dead sessions may touch several shops at once.
pub fn broadcast_for_shops<I>(state: &AppState, shop_ids: I)
where
    I: IntoIterator<Item = String>,
{
    let distinct: BTreeSet<String> = shop_ids.into_iter().collect();
    for shop_id in distinct {
        broadcast_online_users(state, &shop_id);
    }
}
