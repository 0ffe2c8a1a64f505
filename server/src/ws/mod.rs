pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod presence;
pub mod protocol;
pub mod rooms;

use dashmap::DashMap;
use std::collections::BTreeSet;
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// One live transport session. Ephemeral: created on handshake, destroyed on
/// disconnect, never persisted. `shop_id` is the user's home tenant — presence
/// computation filters on it, regardless of which rooms the session joined.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub user_id: String,
    pub shop_id: String,
    pub sender: ConnectionSender,
}

/// Connection registry: all live WebSocket sessions, keyed by session id.
/// A user can have multiple concurrent sessions (multiple devices/tabs).
///
/// Process-wide singleton owned by AppState; authoritative only for live
/// delivery — the persistent store stays the source of truth for the
/// request lifecycle. Lookups scan all sessions: total concurrent session
/// count is small relative to request rate.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert by session id.
    pub fn register(&self, session_id: &str, user_id: &str, shop_id: &str, sender: ConnectionSender) {
        self.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                user_id: user_id.to_string(),
                shop_id: shop_id.to_string(),
                sender,
            },
        );
        tracing::debug!(
            session_id = %session_id,
            user_id = %user_id,
            total = self.sessions.len(),
            "Session registered"
        );
    }

    /// Remove one session. Returns its entry so the caller can recompute
    /// presence for the affected shop.
    pub fn unregister(&self, session_id: &str) -> Option<SessionEntry> {
        let removed = self.sessions.remove(session_id).map(|(_, entry)| entry);
        if removed.is_some() {
            tracing::debug!(session_id = %session_id, "Session unregistered");
        }
        removed
    }

    /// All live sessions of a user as (session_id, shop_id) pairs.
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<(String, String)> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| (entry.key().clone(), entry.value().shop_id.clone()))
            .collect()
    }

    /// Writer channels for every live session of a user.
    pub fn senders_for_user(&self, user_id: &str) -> Vec<ConnectionSender> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().sender.clone())
            .collect()
    }

    pub fn sender_for_session(&self, session_id: &str) -> Option<ConnectionSender> {
        self.sessions.get(session_id).map(|entry| entry.value().sender.clone())
    }

    /// Distinct users with at least one live session whose home shop is
    /// `shop_id`, sorted. Recomputed on every call — never diffed.
    pub fn online_in_shop(&self, shop_id: &str) -> Vec<String> {
        let users: BTreeSet<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().shop_id == shop_id)
            .map(|entry| entry.value().user_id.clone())
            .collect();
        users.into_iter().collect()
    }

    /// Sweep sessions whose writer channel has closed (abrupt disconnects).
    /// Returns the removed (session_id, shop_id) pairs so the caller can
    /// clean up room membership and coalesce presence broadcasts per shop.
    pub fn prune_closed(&self) -> Vec<(String, String)> {
        let dead: Vec<(String, String)> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().sender.is_closed())
            .map(|entry| (entry.key().clone(), entry.value().shop_id.clone()))
            .collect();
        for (session_id, _) in &dead {
            self.sessions.remove(session_id);
        }
        dead
    }
}
