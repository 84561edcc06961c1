//! Presence channel — ephemeral per-session broadcast state.
//!
//! ARCHITECTURE
//! ============
//! Every session owns exactly one presence record and is its only writer;
//! peers' records are replicas kept fresh by full-record announcements.
//! Nothing here touches the replicated document and nothing is persisted.
//!
//! DESIGN
//! ======
//! Announcements are fire-and-forget with no delivery or ordering guarantee,
//! so freshness is decided by the reader: a per-sender sequence number
//! rejects out-of-order announcements, and staleness is a pure timestamp
//! comparison at view time. Cursors older than 5 s, selections older than
//! 10 s, and chat received more than 10 s ago read as absent whether or not
//! the sender ever retracts them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::{JoinStamp, now_ms};
use crate::session::{Identity, Session};

// =============================================================================
// RECORD FIELDS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    pub x: f64,
    pub y: f64,
    pub viewport: String,
    pub at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionState {
    pub element_ids: Vec<String>,
    pub viewport: String,
    pub at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    pub text: String,
    pub at: i64,
}

/// A session's advertised belief about who leads the Room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderClaim {
    pub leader_id: Uuid,
    pub leader_name: String,
    /// Wall-clock millis at election; orders competing claims.
    pub elected_at_version: i64,
    pub total_sessions: usize,
}

impl LeaderClaim {
    /// Deterministic precedence between competing claims: earliest election
    /// wins, claimant id breaks exact ties.
    #[must_use]
    pub fn precedence(&self) -> (i64, Uuid) {
        (self.elected_at_version, self.leader_id)
    }
}

/// The ephemeral, broadcast-only part of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub cursor: Option<CursorState>,
    pub selection: Option<SelectionState>,
    pub chat: Option<ChatState>,
    pub leader_claim: Option<LeaderClaim>,
}

/// One full-record announcement on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerAnnounce {
    pub client_id: Uuid,
    pub identity: Identity,
    pub join_stamp: JoinStamp,
    /// Sender-monotonic; readers drop announcements that arrive out of order.
    pub seq: u64,
    pub record: PresenceRecord,
}

// =============================================================================
// READ-SIDE VIEWS
// =============================================================================

/// A peer's presence after expiry has been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceView {
    pub client_id: Uuid,
    pub identity: Identity,
    pub join_stamp: JoinStamp,
    pub cursor: Option<CursorState>,
    pub selection: Option<SelectionState>,
    pub chat: Option<ChatState>,
    pub leader_claim: Option<LeaderClaim>,
}

/// Election input: one row per connected session, claims included, no expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub client_id: Uuid,
    pub display_name: String,
    pub join_stamp: JoinStamp,
    pub leader_claim: Option<LeaderClaim>,
}

/// Expiry thresholds applied by every reader.
#[derive(Debug, Clone, Copy)]
pub struct PresenceTtl {
    pub cursor_ms: i64,
    pub selection_ms: i64,
    pub chat_ms: i64,
}

impl Default for PresenceTtl {
    fn default() -> Self {
        Self { cursor_ms: 5_000, selection_ms: 10_000, chat_ms: 10_000 }
    }
}

/// How an incoming announcement landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerChange {
    /// First announcement from this client.
    Joined,
    Updated,
    /// Out-of-order or duplicate; ignored.
    Stale,
}

// =============================================================================
// CHANNEL
// =============================================================================

struct PeerSlot {
    announce: PeerAnnounce,
    /// Local receipt time of the current chat entry; drives chat expiry.
    chat_received_at: Option<i64>,
}

type Subscriber = Box<dyn Fn(&HashMap<Uuid, PresenceView>) + Send>;

/// The Room-scoped presence map: the local record plus every peer replica.
pub struct PresenceChannel {
    local: PeerAnnounce,
    peers: HashMap<Uuid, PeerSlot>,
    subscribers: Vec<Subscriber>,
    ttl: PresenceTtl,
}

impl PresenceChannel {
    #[must_use]
    pub fn new(session: &Session, ttl: PresenceTtl) -> Self {
        Self {
            local: PeerAnnounce {
                client_id: session.client_id,
                identity: session.identity.clone(),
                join_stamp: session.join_stamp,
                seq: 0,
                record: PresenceRecord::default(),
            },
            peers: HashMap::new(),
            subscribers: Vec::new(),
            ttl,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.local.client_id
    }

    // =========================================================================
    // LOCAL PUBLISH (single writer: this session only)
    // =========================================================================

    /// Replace the local cursor and return the announcement to broadcast.
    pub fn publish_cursor(&mut self, x: f64, y: f64, viewport: impl Into<String>) -> PeerAnnounce {
        self.local.record.cursor =
            Some(CursorState { x, y, viewport: viewport.into(), at: now_ms() });
        self.bump()
    }

    /// Replace the local selection and return the announcement to broadcast.
    pub fn publish_selection(
        &mut self,
        element_ids: Vec<String>,
        viewport: impl Into<String>,
    ) -> PeerAnnounce {
        self.local.record.selection =
            Some(SelectionState { element_ids, viewport: viewport.into(), at: now_ms() });
        self.bump()
    }

    /// Replace the local chat bubble and return the announcement to broadcast.
    pub fn publish_chat(&mut self, text: impl Into<String>) -> PeerAnnounce {
        self.local.record.chat = Some(ChatState { text: text.into(), at: now_ms() });
        self.bump()
    }

    /// Courtesy retraction after the chat display window; readers would have
    /// expired the entry on their own.
    pub fn clear_chat(&mut self) -> Option<PeerAnnounce> {
        if self.local.record.chat.is_none() {
            return None;
        }
        self.local.record.chat = None;
        Some(self.bump())
    }

    /// Advertise, update, or retract (`None`) the local leader claim.
    pub fn set_leader_claim(&mut self, claim: Option<LeaderClaim>) -> PeerAnnounce {
        self.local.record.leader_claim = claim;
        self.bump()
    }

    #[must_use]
    pub fn local_claim(&self) -> Option<&LeaderClaim> {
        self.local.record.leader_claim.as_ref()
    }

    /// Current announcement without a sequence bump, for answering a
    /// newcomer that needs to learn the existing roster.
    #[must_use]
    pub fn local_announce(&self) -> PeerAnnounce {
        self.local.clone()
    }

    /// Fresh announcement for (re)connecting: the bumped sequence makes
    /// peers that missed our departure still register the update.
    pub fn re_announce(&mut self) -> PeerAnnounce {
        self.bump()
    }

    fn bump(&mut self) -> PeerAnnounce {
        self.local.seq += 1;
        self.local.clone()
    }

    // =========================================================================
    // PEER REPLICAS
    // =========================================================================

    /// Apply a peer's announcement and notify subscribers on change.
    pub fn apply_peer(&mut self, announce: PeerAnnounce) -> PeerChange {
        if announce.client_id == self.local.client_id {
            return PeerChange::Stale;
        }

        let now = now_ms();
        let change = match self.peers.get_mut(&announce.client_id) {
            Some(slot) => {
                if announce.seq <= slot.announce.seq {
                    return PeerChange::Stale;
                }
                if announce.record.chat != slot.announce.record.chat {
                    slot.chat_received_at = announce.record.chat.as_ref().map(|_| now);
                }
                slot.announce = announce;
                PeerChange::Updated
            }
            None => {
                let chat_received_at = announce.record.chat.as_ref().map(|_| now);
                self.peers
                    .insert(announce.client_id, PeerSlot { announce, chat_received_at });
                PeerChange::Joined
            }
        };

        self.notify(now);
        change
    }

    /// Drop a departed peer. Retracts its record and any leader claim it
    /// advertised, which is what triggers re-election upstream.
    pub fn remove_peer(&mut self, client_id: Uuid) -> bool {
        let removed = self.peers.remove(&client_id).is_some();
        if removed {
            self.notify(now_ms());
        }
        removed
    }

    /// Forget every peer replica; used when the transport is re-established
    /// and the roster rebuilds from fresh announcements.
    pub fn clear_peers(&mut self) {
        if !self.peers.is_empty() {
            self.peers.clear();
            self.notify(now_ms());
        }
    }

    /// Connected-session count including the local session.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.peers.len() + 1
    }

    // =========================================================================
    // READ SIDE
    // =========================================================================

    /// Register a listener invoked with the full peer map on every change.
    pub fn subscribe(&mut self, callback: impl Fn(&HashMap<Uuid, PresenceView>) + Send + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    /// Materialize all peers with expiry applied at `now`.
    #[must_use]
    pub fn peers_view(&self, now: i64) -> HashMap<Uuid, PresenceView> {
        self.peers
            .values()
            .map(|slot| (slot.announce.client_id, self.view_of(slot, now)))
            .collect()
    }

    fn view_of(&self, slot: &PeerSlot, now: i64) -> PresenceView {
        let record = &slot.announce.record;
        let cursor = record
            .cursor
            .clone()
            .filter(|c| now - c.at <= self.ttl.cursor_ms);
        let selection = record
            .selection
            .clone()
            .filter(|s| now - s.at <= self.ttl.selection_ms);
        let chat = record.chat.clone().filter(|_| {
            slot.chat_received_at
                .is_some_and(|received| now - received <= self.ttl.chat_ms)
        });

        PresenceView {
            client_id: slot.announce.client_id,
            identity: slot.announce.identity.clone(),
            join_stamp: slot.announce.join_stamp,
            cursor,
            selection,
            chat,
            leader_claim: record.leader_claim.clone(),
        }
    }

    /// Election input: the local session plus every known peer.
    #[must_use]
    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = self
            .peers
            .values()
            .map(|slot| RosterEntry {
                client_id: slot.announce.client_id,
                display_name: slot.announce.identity.display_name.clone(),
                join_stamp: slot.announce.join_stamp,
                leader_claim: slot.announce.record.leader_claim.clone(),
            })
            .collect();
        entries.push(RosterEntry {
            client_id: self.local.client_id,
            display_name: self.local.identity.display_name.clone(),
            join_stamp: self.local.join_stamp,
            leader_claim: self.local.record.leader_claim.clone(),
        });
        entries
    }

    fn notify(&self, now: i64) {
        if self.subscribers.is_empty() {
            return;
        }
        let view = self.peers_view(now);
        for subscriber in &self.subscribers {
            subscriber(&view);
        }
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
