use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws::handler as ws_handler;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub users: usize,
}

/// GET /health: liveness check with the current participant count.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        users: state.registry.len(),
    })
}

/// Build the axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint. The root path is served too, since browser clients
    // connect to the bare host.
    let ws_routes = Router::new()
        .route("/", get(ws_handler::ws_upgrade))
        .route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(health)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
