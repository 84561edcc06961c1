//! Transport — the per-Room message channel the core rides on.
//!
//! DESIGN
//! ======
//! The core needs exactly four events from a transport: connect, disconnect,
//! send, receive. `RoomTransport::connect` yields a `RoomLink` — an outbound
//! sink and an inbound stream of frames; the inbound stream ending IS the
//! disconnect event. Delivery is best-effort with no ordering guarantee
//! across peers; everything above is built to tolerate that.
//!
//! `LocalHub` is the in-process implementation: one registry of Rooms, each
//! a map of client senders, with the same fan-out-excluding-sender and
//! departure-notice semantics the websocket relay provides. Tests drive
//! whole Rooms through it without sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::frame::{Frame, ErrorCode};

// =============================================================================
// TRAIT
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        "E_TRANSPORT"
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// A live connection to a Room's broadcast channel.
///
/// Dropping `outbound` disconnects; `inbound` returning `None` means the
/// other side disconnected us.
pub struct RoomLink {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

#[async_trait]
pub trait RoomTransport: Send + Sync {
    async fn connect(&self) -> Result<RoomLink, TransportError>;
}

// =============================================================================
// LOCAL HUB
// =============================================================================

const CLIENT_CHANNEL_CAPACITY: usize = 256;

type RoomClients = HashMap<Uuid, mpsc::Sender<Frame>>;

#[derive(Default)]
struct HubInner {
    rooms: RwLock<HashMap<Uuid, RoomClients>>,
    offline: AtomicBool,
}

/// In-process Room registry with relay semantics.
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport handle binding one client to one Room.
    #[must_use]
    pub fn transport(&self, room_id: Uuid, client_id: Uuid) -> LocalTransport {
        LocalTransport { hub: self.clone(), room_id, client_id }
    }

    /// Make every subsequent connect fail, simulating a dead network.
    /// Established links keep working.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Server-side disconnect: deregister the client and notify the Room.
    pub async fn kick(&self, room_id: Uuid, client_id: Uuid) {
        self.deregister(room_id, client_id).await;
    }

    pub async fn client_count(&self, room_id: Uuid) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&room_id)
            .map_or(0, HashMap::len)
    }

    async fn connect(&self, room_id: Uuid, client_id: Uuid) -> Result<RoomLink, TransportError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("hub offline".into()));
        }

        let (peer_tx, peer_rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);

        {
            let mut rooms = self.inner.rooms.write().await;
            rooms.entry(room_id).or_default().insert(client_id, peer_tx);
        }
        debug!(%room_id, %client_id, "hub: client connected");

        // Pump the client's outbound frames into the Room. When the client
        // drops its end, deregister and announce the departure.
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                hub.broadcast(room_id, &frame, Some(client_id)).await;
            }
            hub.deregister(room_id, client_id).await;
        });

        Ok(RoomLink { outbound: out_tx, inbound: peer_rx })
    }

    async fn broadcast(&self, room_id: Uuid, frame: &Frame, exclude: Option<Uuid>) {
        let rooms = self.inner.rooms.read().await;
        let Some(clients) = rooms.get(&room_id) else {
            return;
        };
        for (client_id, tx) in clients {
            if exclude == Some(*client_id) {
                continue;
            }
            // Best-effort: a slow client's frames are dropped, not queued.
            let _ = tx.try_send(frame.clone());
        }
    }

    async fn deregister(&self, room_id: Uuid, client_id: Uuid) {
        let removed = {
            let mut rooms = self.inner.rooms.write().await;
            let Some(clients) = rooms.get_mut(&room_id) else {
                return;
            };
            let removed = clients.remove(&client_id).is_some();
            if clients.is_empty() {
                // No server-side memory of empty Rooms.
                rooms.remove(&room_id);
                debug!(%room_id, "hub: room evicted");
            }
            removed
        };

        if removed {
            debug!(%room_id, %client_id, "hub: client departed");
            self.broadcast(room_id, &Frame::departure(room_id, client_id), Some(client_id))
                .await;
        }
    }
}

/// One client's handle onto a `LocalHub` Room.
pub struct LocalTransport {
    hub: LocalHub,
    room_id: Uuid,
    client_id: Uuid,
}

#[async_trait]
impl RoomTransport for LocalTransport {
    async fn connect(&self) -> Result<RoomLink, TransportError> {
        self.hub.connect(self.room_id, self.client_id).await
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
