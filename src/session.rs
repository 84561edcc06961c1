//! Session identity and join order.
//!
//! DESIGN
//! ======
//! A `Session` is one client's live connection to a Room: a fresh connection
//! id, the identity handed over by the surrounding application, and the join
//! stamp acquired at connect time that fixes this session's seniority for
//! leader election. Identity is tagged onto presence and element authorship,
//! never validated here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::JoinStamp;

/// Who the local user is, as supplied by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
    /// Seed for the rendering layer's color assignment; opaque here.
    pub color_seed: u32,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: Uuid, display_name: impl Into<String>, color_seed: u32) -> Self {
        Self { user_id, display_name: display_name.into(), color_seed }
    }
}

/// One client's connection to a Room.
#[derive(Debug, Clone)]
pub struct Session {
    pub client_id: Uuid,
    pub identity: Identity,
    pub join_stamp: JoinStamp,
}

impl Session {
    /// Create a session and stamp its join order immediately.
    #[must_use]
    pub fn connect(identity: Identity) -> Self {
        let client_id = Uuid::new_v4();
        Self { client_id, identity, join_stamp: JoinStamp::acquire(client_id) }
    }

    /// Session with a fixed join stamp, for tests and replays.
    #[must_use]
    pub fn with_stamp(identity: Identity, join_stamp: JoinStamp) -> Self {
        Self { client_id: join_stamp.client_id, identity, join_stamp }
    }
}
