//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The relay exposes three surfaces: the websocket Room channel, the room
//! content endpoints backing the HTTP store, and a health probe. CORS stays
//! wide open — identity is the surrounding application's concern, not the
//! relay's.

pub mod rooms;
pub mod ws;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

#[must_use]
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws::handle_ws))
        .route(
            "/api/rooms/{id}/content",
            get(rooms::get_content).put(rooms::put_content),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
