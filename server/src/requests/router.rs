//! Live delivery of request payloads.
//!
//! Routing runs strictly after successful persistence and is best-effort:
//! a recipient with zero live sessions simply picks the request up on its
//! next poll. Authorization for external targets happens before persistence
//! (`ensure_assigned_warehouse`), so the route functions themselves are pure
//! delivery.

use rusqlite::Connection;

use crate::db::models::RequestRecord;
use crate::db::store;
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::broadcast::emit_to_user;
use crate::ws::protocol::ServerEvent;

/// External routing is allow-listed, not open: the sender's shop must list
/// the target shop in its assigned-warehouse set. The assignment is directed.
pub fn ensure_assigned_warehouse(
    conn: &Connection,
    sender_shop_id: &str,
    target_shop_id: &str,
) -> Result<(), ApiError> {
    if store::is_assigned_warehouse(conn, sender_shop_id, target_shop_id)? {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "shop {} is not an assigned warehouse of shop {}",
            target_shop_id, sender_shop_id
        )))
    }
}

/// Deliver a freshly persisted request to the recipient's live sessions:
/// the receiver user for internal requests, every warehouse-role user of the
/// receiving shop for external ones.
pub async fn route_new(state: &AppState, record: &RequestRecord) {
    for user_id in recipient_user_ids(state, record).await {
        emit_to_user(
            &state.sessions,
            &user_id,
            &ServerEvent::NewMessage(record.clone()),
        );
    }
}

/// Re-deliver a request after its `opened` flag or external status changed,
/// to every live viewer — both the recipient side and the sender — so all
/// of them converge without a manual refresh.
pub async fn route_update(state: &AppState, record: &RequestRecord) {
    let mut targets = recipient_user_ids(state, record).await;
    if !targets.contains(&record.sender_id) {
        targets.push(record.sender_id.clone());
    }
    for user_id in targets {
        emit_to_user(
            &state.sessions,
            &user_id,
            &ServerEvent::RequestUpdated(record.clone()),
        );
    }
}

/// Recipient user ids for a request. The external case needs a store lookup
/// for the receiving shop's warehouse users; a failure there is a delivery
/// failure, logged and swallowed.
async fn recipient_user_ids(state: &AppState, record: &RequestRecord) -> Vec<String> {
    if !record.is_external_request {
        return record.receiver_id.clone().into_iter().collect();
    }

    let Some(receiver_shop_id) = record.receiver_shop_id.clone() else {
        tracing::warn!(request_id = %record.id, "External request without receiver shop");
        return Vec::new();
    };

    let db = state.db.clone();
    let lookup = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| format!("DB lock error: {}", e))?;
        store::warehouse_user_ids(&conn, &receiver_shop_id).map_err(|e| e.to_string())
    })
    .await;

    match lookup {
        Ok(Ok(ids)) => ids,
        Ok(Err(e)) => {
            tracing::warn!(request_id = %record.id, error = %e, "Recipient lookup failed");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(request_id = %record.id, error = %e, "Recipient lookup task failed");
            Vec::new()
        }
    }
}
