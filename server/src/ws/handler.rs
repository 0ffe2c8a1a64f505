use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::db::models::UserRow;
use crate::state::AppState;
use crate::ws::actor;
use crate::ws::rooms::{self, RoomKey};

/// Query parameters for WebSocket connection.
/// Auth is via query param ?token=JWT.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid
/// 4003 = not admitted (unknown/inactive user or inactive shop)
/// 1011 = internal failure during admission (standard "internal error" code)
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;
const CLOSE_NOT_ADMITTED: u16 = 4003;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter, then runs
/// the admission check (active user in an active shop) before anything
/// touches the session registry. On any failure, upgrades then immediately
/// closes with the appropriate close code — no registry entry, no rooms, no
/// presence event.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // Validate JWT from query parameter
    let claims = match jwt::validate_access_token(&state.jwt_secret, &params.token) {
        Ok(claims) => claims,
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );
            return ws.on_upgrade(move |socket| close_with(socket, close_code, reason));
        }
    };

    // Admission + room membership in one store pass. A store or lock failure
    // here is an internal error, not a refusal — it must not look like 4003.
    let admitted = {
        let db = state.db.clone();
        let user_id = claims.sub.clone();
        tokio::task::spawn_blocking(
            move || -> Result<Option<(UserRow, Vec<RoomKey>)>, String> {
                let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
                let Some(user) =
                    rooms::admit_user(&conn, &user_id).map_err(|e| e.to_string())?
                else {
                    return Ok(None);
                };
                let membership =
                    rooms::membership_for(&conn, &user).map_err(|e| e.to_string())?;
                Ok(Some((user, membership)))
            },
        )
        .await
        .map_err(|e| e.to_string())
        .and_then(|result| result)
    };

    match admitted {
        Ok(Some((user, membership))) => {
            tracing::info!(
                user_id = %user.id,
                shop_id = %user.shop_id,
                "WebSocket connection admitted"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user, membership))
        }
        Ok(None) => {
            tracing::warn!(user_id = %claims.sub, "WebSocket admission refused");
            ws.on_upgrade(move |socket| {
                close_with(socket, CLOSE_NOT_ADMITTED, "Not admitted")
            })
        }
        Err(e) => {
            tracing::error!(user_id = %claims.sub, error = %e, "WebSocket admission failed");
            ws.on_upgrade(move |socket| {
                close_with(socket, CLOSE_INTERNAL_ERROR, "Internal error")
            })
        }
    }
}

/// Upgrade the connection, then immediately close with the error code.
async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let close_frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}
