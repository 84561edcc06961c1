//! Room content endpoints — the server half of the HTTP store.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;
use uuid::Uuid;

use crate::state::AppState;
use crate::storage::RoomContent;

/// `GET /api/rooms/{id}/content` — 404 when the room was never persisted.
pub async fn get_content(State(state): State<AppState>, Path(room_id): Path<Uuid>) -> Response {
    match state.store.read(room_id).await {
        Ok(Some(content)) => Json(content).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(%room_id, error = %e, "room content read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `PUT /api/rooms/{id}/content` — upsert the full room content.
pub async fn put_content(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Json(content): Json<RoomContent>,
) -> Response {
    match state.store.write(room_id, &content).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(%room_id, error = %e, "room content write failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
