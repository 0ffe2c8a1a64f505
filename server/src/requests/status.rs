//! External request status lifecycle.
//!
//! Statuses: pending (written once at creation) -> sending | keeping |
//! rejected. `pending` is never a valid transition target; among the other
//! three, transitions are not restricted. Every hop is recorded in the
//! append-only status_history and the request's current status always equals
//! the last history entry.

use crate::db::models::{ExternalStatus, RequestRecord, Role};
use crate::db::store;
use crate::error::ApiError;
use crate::requests::router;
use crate::state::AppState;

/// Apply a status transition on behalf of `actor_id`.
///
/// Authorization is checked against the request's *receiving* shop: only an
/// active warehouse-role user of that shop may transition it. The actor's
/// role and shop are re-read from the store, not trusted from the token.
///
/// Persistence is append-once: the history insert and the status update
/// commit together, and the subsequent broadcast is best-effort — a delivery
/// failure never re-runs the append.
pub async fn transition(
    state: &AppState,
    request_id: &str,
    new_status: &str,
    actor_id: &str,
    notes: Option<String>,
) -> Result<RequestRecord, ApiError> {
    let status = ExternalStatus::from_str(new_status)
        .ok_or_else(|| ApiError::Validation(format!("unknown status '{}'", new_status)))?;
    if status == ExternalStatus::Pending {
        return Err(ApiError::Validation(
            "pending is the initial status, not a transition target".to_string(),
        ));
    }

    let db = state.db.clone();
    let request_id = request_id.to_string();
    let actor_id = actor_id.to_string();

    let record = tokio::task::spawn_blocking(move || -> Result<RequestRecord, ApiError> {
        let mut conn = db
            .lock()
            .map_err(|e| ApiError::Internal(format!("DB lock error: {}", e).into()))?;

        let request = store::get_request(&conn, &request_id)?
            .ok_or_else(|| ApiError::NotFound(format!("request {} not found", request_id)))?;

        if !request.is_external_request {
            return Err(ApiError::Validation(
                "status transitions apply to external requests only".to_string(),
            ));
        }
        let receiver_shop_id = request.receiver_shop_id.clone().ok_or_else(|| {
            ApiError::Validation("external request has no receiving shop".to_string())
        })?;

        let actor = store::get_user(&conn, &actor_id)?
            .filter(|u| u.active)
            .ok_or(ApiError::Unauthorized)?;
        if actor.role != Role::Warehouse || actor.shop_id != receiver_shop_id {
            return Err(ApiError::Forbidden(
                "only warehouse staff of the receiving shop may update the status".to_string(),
            ));
        }

        let updated = store::append_status(
            &mut conn,
            &request_id,
            status.as_str(),
            &actor.id,
            notes.as_deref(),
        )?
        .ok_or_else(|| ApiError::NotFound(format!("request {} not found", request_id)))?;

        Ok(updated)
    })
    .await??;

    // Best-effort re-broadcast of the updated record
    router::route_update(state, &record).await;

    Ok(record)
}
