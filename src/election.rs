//! Leader election — derives one persister per Room from join order.
//!
//! ARCHITECTURE
//! ============
//! Leadership is computed, never stored: each session derives the leader
//! from the join stamps visible in presence, cross-checked against any
//! leader claim a peer already advertises. The elected session publishes a
//! versioned claim through its own presence record; when it disconnects the
//! claim vanishes with the record and the survivors re-derive.
//!
//! DESIGN
//! ======
//! - Fast path: a claim whose leader is still connected is adopted as-is,
//!   so a newcomer never displaces a long-standing leader.
//! - Stabilization: before electing, the session resamples the connected
//!   count at a fixed interval until two consecutive samples agree or a
//!   sample cap is hit, absorbing reload storms of near-simultaneous joins.
//! - Duplicate claims from a racing election heal through an idempotent
//!   reconciliation pass on every presence change: the claim with the worse
//!   precedence is retracted by its own publisher.
//! - Re-election on membership change is debounced so a burst of joins and
//!   leaves coalesces into one recomputation.
//!
//! TRADE-OFFS
//! ==========
//! Join stamps are wall-clock based (see `clock`); sessions whose clocks
//! drift beyond the random epsilon may transiently disagree, and the
//! reconciliation pass is what restores a single leader.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::now_ms;
use crate::frame::Frame;
use crate::presence::{LeaderClaim, PresenceChannel, RosterEntry};

// =============================================================================
// TYPES
// =============================================================================

/// Where a session stands in the election lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Unelected,
    Stabilizing,
    Leader,
    Follower,
}

/// The session's current belief about Room leadership.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderInfo {
    pub state: ElectionState,
    pub leader_id: Option<Uuid>,
    pub leader_name: Option<String>,
    pub elected_at_version: Option<i64>,
}

impl LeaderInfo {
    #[must_use]
    pub fn unelected() -> Self {
        Self { state: ElectionState::Unelected, leader_id: None, leader_name: None, elected_at_version: None }
    }

    /// `true` when this session believes it leads the Room.
    #[must_use]
    pub fn is_led_by(&self, client_id: Uuid) -> bool {
        self.leader_id == Some(client_id)
    }
}

/// Wake-up reasons for the elector task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionSignal {
    /// A session joined or left; re-derive after the debounce window.
    Membership,
    /// A presence record changed; run the reconciliation pass only.
    Presence,
}

/// Timing knobs, sourced from `SyncConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ElectionTuning {
    pub stabilization_interval_ms: u64,
    pub stabilization_max_samples: u32,
    pub debounce_ms: u64,
}

// =============================================================================
// DECISION FUNCTIONS
// =============================================================================

/// Claims whose named leader is still part of the roster.
#[must_use]
pub fn valid_claims(roster: &[RosterEntry]) -> Vec<&LeaderClaim> {
    roster
        .iter()
        .filter_map(|entry| entry.leader_claim.as_ref())
        .filter(|claim| roster.iter().any(|entry| entry.client_id == claim.leader_id))
        .collect()
}

/// The claim every session should converge on, if any: best precedence
/// among the valid claims.
#[must_use]
pub fn adoptable_claim(roster: &[RosterEntry]) -> Option<LeaderClaim> {
    valid_claims(roster)
        .into_iter()
        .min_by_key(|claim| claim.precedence())
        .cloned()
}

/// The session that wins a fresh election: earliest join stamp.
#[must_use]
pub fn earliest_joiner(roster: &[RosterEntry]) -> Option<&RosterEntry> {
    roster.iter().min_by_key(|entry| entry.join_stamp)
}

// =============================================================================
// ELECTOR TASK
// =============================================================================

pub struct Elector {
    room_id: Uuid,
    client_id: Uuid,
    display_name: String,
    presence: Arc<Mutex<PresenceChannel>>,
    outbound: mpsc::Sender<Frame>,
    leader_tx: watch::Sender<LeaderInfo>,
    tuning: ElectionTuning,
}

impl Elector {
    #[must_use]
    pub fn new(
        room_id: Uuid,
        client_id: Uuid,
        display_name: String,
        presence: Arc<Mutex<PresenceChannel>>,
        outbound: mpsc::Sender<Frame>,
        leader_tx: watch::Sender<LeaderInfo>,
        tuning: ElectionTuning,
    ) -> Self {
        Self { room_id, client_id, display_name, presence, outbound, leader_tx, tuning }
    }

    /// Run the elector until the signal channel closes. One initial cycle,
    /// then debounced cycles on membership changes and reconciliation on
    /// presence changes.
    pub fn spawn(self, mut signals: mpsc::Receiver<ElectionSignal>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_cycle().await;

            while let Some(signal) = signals.recv().await {
                match signal {
                    ElectionSignal::Presence => self.reconcile().await,
                    ElectionSignal::Membership => {
                        // Coalesce the burst, then recompute once.
                        tokio::time::sleep(std::time::Duration::from_millis(self.tuning.debounce_ms)).await;
                        while signals.try_recv().is_ok() {}
                        self.run_cycle().await;
                    }
                }
            }
        })
    }

    async fn run_cycle(&self) {
        // Fast path: someone already leads and is still here.
        let roster = self.presence.lock().await.roster();
        if let Some(claim) = adoptable_claim(&roster) {
            self.adopt(&claim).await;
            return;
        }

        self.update(LeaderInfo {
            state: ElectionState::Stabilizing,
            leader_id: None,
            leader_name: None,
            elected_at_version: None,
        });
        self.stabilize(roster.len()).await;

        // Re-read after the wait; a claim may have arrived meanwhile.
        let roster = self.presence.lock().await.roster();
        if let Some(claim) = adoptable_claim(&roster) {
            self.adopt(&claim).await;
            return;
        }

        let Some(winner) = earliest_joiner(&roster) else {
            return;
        };

        if winner.client_id == self.client_id {
            let claim = LeaderClaim {
                leader_id: self.client_id,
                leader_name: self.display_name.clone(),
                elected_at_version: now_ms(),
                total_sessions: roster.len(),
            };
            let announce = {
                let mut presence = self.presence.lock().await;
                presence.set_leader_claim(Some(claim.clone()))
            };
            self.broadcast(&announce).await;
            info!(room_id = %self.room_id, version = claim.elected_at_version, "elected self as room leader");
            self.update(LeaderInfo {
                state: ElectionState::Leader,
                leader_id: Some(self.client_id),
                leader_name: Some(self.display_name.clone()),
                elected_at_version: Some(claim.elected_at_version),
            });
        } else {
            debug!(room_id = %self.room_id, leader_id = %winner.client_id, "following earliest joiner");
            self.update(LeaderInfo {
                state: ElectionState::Follower,
                leader_id: Some(winner.client_id),
                leader_name: Some(winner.display_name.clone()),
                elected_at_version: None,
            });
        }
    }

    /// Resample the connected count until it holds still or the cap is hit.
    async fn stabilize(&self, initial: usize) {
        let mut prev = initial;
        for _ in 0..self.tuning.stabilization_max_samples {
            tokio::time::sleep(std::time::Duration::from_millis(self.tuning.stabilization_interval_ms)).await;
            let count = self.presence.lock().await.session_count();
            if count == prev {
                return;
            }
            prev = count;
        }
    }

    /// Idempotent duplicate-claim cleanup, run on every presence change.
    /// Converging on the best claim retracts any losing claim of our own.
    async fn reconcile(&self) {
        let roster = self.presence.lock().await.roster();
        if let Some(claim) = adoptable_claim(&roster) {
            self.adopt(&claim).await;
        }
    }

    /// Converge on `claim`. A local claim that is not the adopted one lost a
    /// race and is retracted here; re-running with the same inputs is a no-op.
    async fn adopt(&self, claim: &LeaderClaim) {
        let retraction = {
            let mut presence = self.presence.lock().await;
            let lost_race = presence
                .local_claim()
                .is_some_and(|own| own.precedence() != claim.precedence());
            if lost_race {
                Some(presence.set_leader_claim(None))
            } else {
                None
            }
        };
        if let Some(announce) = retraction {
            info!(room_id = %self.room_id, "retracting duplicate leader claim");
            self.broadcast(&announce).await;
        }

        let state = if claim.leader_id == self.client_id {
            ElectionState::Leader
        } else {
            ElectionState::Follower
        };
        self.update(LeaderInfo {
            state,
            leader_id: Some(claim.leader_id),
            leader_name: Some(claim.leader_name.clone()),
            elected_at_version: Some(claim.elected_at_version),
        });
    }

    fn update(&self, info: LeaderInfo) {
        self.leader_tx.send_if_modified(|current| {
            if *current == info {
                false
            } else {
                *current = info;
                true
            }
        });
    }

    async fn broadcast(&self, announce: &crate::presence::PeerAnnounce) {
        let Ok(payload) = serde_json::to_value(announce) else {
            return;
        };
        let _ = self
            .outbound
            .send(Frame::announce(self.room_id, payload).with_from(self.client_id))
            .await;
    }
}

#[cfg(test)]
#[path = "election_test.rs"]
mod tests;
