use std::sync::Arc;

use crate::db::DbPool;
use crate::ws::rooms::RoomTable;
use crate::ws::SessionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live WebSocket sessions, keyed by session id
    pub sessions: Arc<SessionRegistry>,
    /// Broadcast room membership
    pub rooms: Arc<RoomTable>,
}
