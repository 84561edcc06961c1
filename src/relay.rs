//! Relay service — Room registry, fan-out, and departure notices.
//!
//! DESIGN
//! ======
//! The relay is a dumb pipe with exactly three verbs: a client joins a Room,
//! frames fan out to Room peers, a departing client is announced and
//! removed. Rooms are created on first join and evicted when the last client
//! leaves — the relay keeps no memory of empty Rooms beyond what the
//! durable store holds. Rooms never block each other: the registry lock is
//! held only for map bookkeeping, never across I/O.

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::frame::Frame;
use crate::state::{AppState, RoomState};

/// Register a client's sender in a Room, creating the Room on first join.
/// Returns the number of connected clients after the join.
pub async fn join_room(
    state: &AppState,
    room_id: Uuid,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> usize {
    let mut rooms = state.rooms.write().await;
    let room = rooms.entry(room_id).or_insert_with(RoomState::new);
    room.clients.insert(client_id, tx);
    let count = room.clients.len();
    info!(%room_id, %client_id, clients = count, "client joined room");
    count
}

/// Remove a client, announce the departure to the remaining peers, and
/// evict the Room when it empties.
pub async fn part_room(state: &AppState, room_id: Uuid, client_id: Uuid) {
    let removed = {
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(&room_id) else {
            return;
        };
        let removed = room.clients.remove(&client_id).is_some();
        if room.clients.is_empty() {
            rooms.remove(&room_id);
            info!(%room_id, "evicted empty room");
        }
        removed
    };

    if removed {
        info!(%room_id, %client_id, "client left room");
        broadcast(state, room_id, &Frame::departure(room_id, client_id), Some(client_id)).await;
    }
}

/// Broadcast a frame to all clients in a Room, optionally excluding one.
pub async fn broadcast(state: &AppState, room_id: Uuid, frame: &Frame, exclude: Option<Uuid>) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(&room_id) else {
        return;
    };

    for (client_id, tx) in &room.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(frame.clone());
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
