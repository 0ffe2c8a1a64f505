use axum::{middleware, Router};

use crate::analytics;
use crate::auth::middleware::JwtSecret;
use crate::requests::routes as request_routes;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Request lifecycle (JWT required — Claims extractor validates token)
    let request_routes = Router::new()
        .route("/api/requests", axum::routing::post(request_routes::create_request))
        .route("/api/requests", axum::routing::get(request_routes::list_requests))
        .route(
            "/api/requests/{id}/opened",
            axum::routing::put(request_routes::set_opened),
        )
        .route(
            "/api/requests/{id}/status",
            axum::routing::post(request_routes::transition_status),
        );

    // Analytics (JWT required; "all" scope gated on the oversight role)
    let analytics_routes = Router::new().route(
        "/api/analytics",
        axum::routing::get(analytics::get_analytics),
    );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route(
        "/ws",
        axum::routing::get(ws_handler::ws_upgrade),
    );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(request_routes)
        .merge(analytics_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
