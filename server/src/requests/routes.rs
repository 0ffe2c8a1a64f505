//! HTTP surface of the request core: create, open/unopen, status transition,
//! and the pull-based listing clients use to reconcile missed live events.
//!
//! Handlers validate and authorize, persist via the store inside
//! spawn_blocking, and only then hand the persisted record to the router for
//! best-effort live delivery.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::db::models::{RequestItem, RequestRecord, Role, UserRow};
use crate::db::store::{self, NewRequest};
use crate::error::ApiError;
use crate::requests::{router, status};
use crate::state::AppState;

/// Upper bound on line items per request.
const MAX_ITEMS: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    /// Internal request: a same-shop recipient user.
    pub receiver_id: Option<String>,
    /// External request: an assigned warehouse shop.
    pub target_shop_id: Option<String>,
    pub items: Vec<RequestItem>,
    pub giga_id: Option<String>,
    pub buyer: Option<String>,
    pub external_seller: Option<String>,
}

/// Resolved destination of a new request.
enum Target {
    /// Internal: a same-shop recipient user.
    Internal(String),
    /// External: an assigned warehouse shop.
    External(String),
}

#[derive(Debug, Deserialize)]
pub struct SetOpenedBody {
    pub opened: bool,
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub status: String,
    pub notes: Option<String>,
}

/// POST /api/requests
/// Create and route a request. Exactly one of receiverId / targetShopId
/// selects internal vs external; external targets are allow-list checked
/// before anything is persisted.
pub async fn create_request(
    State(state): State<AppState>,
    claims: Claims,
    Json(mut body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<RequestRecord>), ApiError> {
    if body.items.is_empty() {
        return Err(ApiError::Validation("request has no line items".to_string()));
    }
    if body.items.len() > MAX_ITEMS {
        return Err(ApiError::Validation(format!(
            "too many line items (max {})",
            MAX_ITEMS
        )));
    }
    if body.items.iter().any(|i| i.quantity <= 0) {
        return Err(ApiError::Validation("item quantity must be positive".to_string()));
    }
    let target = match (body.receiver_id.take(), body.target_shop_id.take()) {
        (Some(receiver_id), None) => Target::Internal(receiver_id),
        (None, Some(shop_id)) => Target::External(shop_id),
        _ => {
            return Err(ApiError::Validation(
                "exactly one of receiverId or targetShopId is required".to_string(),
            ))
        }
    };

    let db = state.db.clone();
    let sender_id = claims.sub.clone();

    let record = tokio::task::spawn_blocking(move || -> Result<RequestRecord, ApiError> {
        let mut conn = db
            .lock()
            .map_err(|e| ApiError::Internal(format!("DB lock error: {}", e).into()))?;

        let sender = store::get_user(&conn, &sender_id)?
            .filter(|u| u.active)
            .ok_or(ApiError::Unauthorized)?;

        let mut new = NewRequest {
            shop_id: sender.shop_id.clone(),
            sender_id: sender.id.clone(),
            receiver_id: None,
            receiver_shop_id: None,
            giga_id: body.giga_id,
            buyer: body.buyer,
            external_seller: body.external_seller,
            is_external: matches!(target, Target::External(_)),
            items: body.items,
        };

        match target {
            Target::External(target_shop_id) => {
                match store::get_shop(&conn, &target_shop_id)? {
                    Some(shop) if shop.active => {}
                    _ => {
                        return Err(ApiError::Validation(format!(
                            "target shop {} does not exist or is inactive",
                            target_shop_id
                        )))
                    }
                }
                router::ensure_assigned_warehouse(&conn, &sender.shop_id, &target_shop_id)?;
                new.receiver_shop_id = Some(target_shop_id);
            }
            Target::Internal(receiver_id) => {
                let receiver = store::get_user(&conn, &receiver_id)?
                    .filter(|u| u.active)
                    .ok_or_else(|| {
                        ApiError::Validation(format!("receiver {} does not exist", receiver_id))
                    })?;
                if receiver.shop_id != sender.shop_id {
                    return Err(ApiError::Forbidden(
                        "internal requests must stay within the sender's shop".to_string(),
                    ));
                }
                new.receiver_id = Some(receiver.id);
            }
        }

        Ok(store::insert_request(&mut conn, &new)?)
    })
    .await??;

    // Persisted — live delivery is best-effort from here on.
    router::route_new(&state, &record).await;

    Ok((StatusCode::CREATED, Json(record)))
}

/// PUT /api/requests/{id}/opened
/// Flip the opened flag and re-broadcast the record to all live viewers.
pub async fn set_opened(
    State(state): State<AppState>,
    claims: Claims,
    Path(request_id): Path<String>,
    Json(body): Json<SetOpenedBody>,
) -> Result<Json<RequestRecord>, ApiError> {
    let db = state.db.clone();
    let actor_id = claims.sub.clone();
    let id = request_id.clone();

    let record = tokio::task::spawn_blocking(move || -> Result<RequestRecord, ApiError> {
        let conn = db
            .lock()
            .map_err(|e| ApiError::Internal(format!("DB lock error: {}", e).into()))?;

        let actor = store::get_user(&conn, &actor_id)?
            .filter(|u| u.active)
            .ok_or(ApiError::Unauthorized)?;

        let request = store::get_request(&conn, &id)?
            .ok_or_else(|| ApiError::NotFound(format!("request {} not found", id)))?;
        if !is_viewer(&actor, &request) {
            return Err(ApiError::Forbidden(
                "not a participant of this request".to_string(),
            ));
        }

        let updated = store::set_opened(&conn, &id, body.opened)?
            .ok_or_else(|| ApiError::NotFound(format!("request {} not found", id)))?;
        Ok(updated)
    })
    .await??;

    router::route_update(&state, &record).await;

    Ok(Json(record))
}

/// POST /api/requests/{id}/status
/// External status transition, see requests::status.
pub async fn transition_status(
    State(state): State<AppState>,
    claims: Claims,
    Path(request_id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<RequestRecord>, ApiError> {
    let record =
        status::transition(&state, &request_id, &body.status, &claims.sub, body.notes).await?;
    Ok(Json(record))
}

/// GET /api/requests
/// Everything visible to the caller, newest first. This is the reconciliation
/// path for deliveries missed while offline.
pub async fn list_requests(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<RequestRecord>>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let records = tokio::task::spawn_blocking(move || -> Result<Vec<RequestRecord>, ApiError> {
        let conn = db
            .lock()
            .map_err(|e| ApiError::Internal(format!("DB lock error: {}", e).into()))?;
        let user = store::get_user(&conn, &user_id)?
            .filter(|u| u.active)
            .ok_or(ApiError::Unauthorized)?;
        Ok(store::list_requests_for_user(&conn, &user)?)
    })
    .await??;

    Ok(Json(records))
}

/// A user may open/unopen a request if they are on either side of it.
fn is_viewer(user: &UserRow, request: &RequestRecord) -> bool {
    if request.sender_id == user.id {
        return true;
    }
    if request.receiver_id.as_deref() == Some(user.id.as_str()) {
        return true;
    }
    request.is_external_request
        && user.role == Role::Warehouse
        && request.receiver_shop_id.as_deref() == Some(user.shop_id.as_str())
}
