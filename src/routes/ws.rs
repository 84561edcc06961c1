//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade the client is registered in its Room and enters a `select!`
//! loop: inbound text frames are parsed, stamped with the authenticated
//! room and sender ids, and fanned out to Room peers; broadcast frames from
//! peers are forwarded down the socket. The relay never inspects payloads —
//! document merge and presence expiry are entirely client-side concerns.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade with `?room=<uuid>&client=<uuid>`
//! 2. Frames relay in both directions
//! 3. Close → departure notice to peers → deregistration → empty-Room GC

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::relay;
use crate::state::AppState;

const CLIENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(room_id) = params.get("room").and_then(|v| v.parse::<Uuid>().ok()) else {
        return (StatusCode::BAD_REQUEST, "room uuid required").into_response();
    };
    let Some(client_id) = params.get("client").and_then(|v| v.parse::<Uuid>().ok()) else {
        return (StatusCode::BAD_REQUEST, "client uuid required").into_response();
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, room_id, client_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, room_id: Uuid, client_id: Uuid) {
    // Per-connection channel for receiving broadcast frames from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);
    relay::join_room(&state, room_id, client_id, client_tx).await;
    info!(%room_id, %client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        if let Some(reply) = process_inbound_text(&state, room_id, client_id, text.as_str()).await {
                            if send_frame(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Departure notice goes out to peers before the Room can be evicted.
    relay::part_room(&state, room_id, client_id).await;
    info!(%room_id, %client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME RELAY
// =============================================================================

/// Parse one inbound text frame and fan it out to Room peers.
///
/// Returns an error frame for the sender on malformed input; valid frames
/// produce no direct reply. Split from the socket loop so tests can drive
/// the relay without websockets.
pub(crate) async fn process_inbound_text(
    state: &AppState,
    room_id: Uuid,
    client_id: Uuid,
    text: &str,
) -> Option<Frame> {
    let mut frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new())
                .with_data("message", format!("invalid json: {e}"));
            return Some(err);
        }
    };

    // Stamp the authenticated connection identity; clients cannot spoof
    // another session or another Room.
    frame.room_id = Some(room_id);
    frame.from = Some(client_id);

    relay::broadcast(state, room_id, &frame, Some(client_id)).await;
    None
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
