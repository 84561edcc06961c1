//! Shared relay state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the durable store and the map of live Rooms. A Room is nothing but
//! the set of connected client senders — the relay never interprets document
//! or presence payloads, so there is nothing else to keep.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::frame::Frame;
use crate::storage::DurableStore;

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-Room live state: connected clients keyed by client id.
pub struct RoomState {
    /// `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
}

impl RoomState {
    #[must_use]
    pub fn new() -> Self {
        Self { clients: HashMap::new() }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum — all inner fields
/// are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<Uuid, RoomState>>>,
    pub store: Arc<dyn DurableStore>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), store }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
