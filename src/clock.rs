//! Causal stamps and join-order stamps.
//!
//! DESIGN
//! ======
//! Two clocks with two jobs. `LamportClock` orders document operations: every
//! local op gets a fresh stamp, every remote stamp advances the local counter,
//! so causally-later ops always carry larger stamps. `JoinStamp` orders
//! sessions for leader election: wall-clock milliseconds plus a random
//! fractional offset plus the client id, giving a strict total order even for
//! same-millisecond joins.
//!
//! TRADE-OFFS
//! ==========
//! Join ordering trusts loosely synchronized wall clocks. Sessions whose
//! clocks disagree by more than the random epsilon can disagree on seniority;
//! a relay-assigned sequence number would remove that dependency at the cost
//! of a round trip. The election layer tolerates the ambiguity by reconciling
//! duplicate leader claims instead of preventing them.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// CAUSAL STAMPS
// =============================================================================

/// A causal stamp for one document operation.
///
/// Ordering is `lamport` first, `actor` second, so any two stamps from any
/// two sessions compare deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub lamport: u64,
    pub actor: Uuid,
}

/// Per-replica Lamport counter.
#[derive(Debug, Clone)]
pub struct LamportClock {
    actor: Uuid,
    counter: u64,
}

impl LamportClock {
    #[must_use]
    pub fn new(actor: Uuid) -> Self {
        Self { actor, counter: 0 }
    }

    /// Issue a fresh stamp for a local operation.
    pub fn tick(&mut self) -> Stamp {
        self.counter += 1;
        Stamp { lamport: self.counter, actor: self.actor }
    }

    /// Advance past a remote stamp so later local ops dominate it.
    pub fn observe(&mut self, stamp: Stamp) {
        if stamp.lamport > self.counter {
            self.counter = stamp.lamport;
        }
    }

    #[must_use]
    pub fn actor(&self) -> Uuid {
        self.actor
    }
}

// =============================================================================
// JOIN STAMPS
// =============================================================================

/// Session seniority marker, acquired once at connect time.
///
/// Derived comparison order is field order: wall-clock millis, then the
/// random offset, then the client id as the final tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JoinStamp {
    pub unix_ms: i64,
    pub offset: u32,
    pub client_id: Uuid,
}

impl JoinStamp {
    /// Stamp the local session's join as early as possible after connect.
    #[must_use]
    pub fn acquire(client_id: Uuid) -> Self {
        Self { unix_ms: now_ms(), offset: rand::rng().random(), client_id }
    }

    /// Fixed stamp for tests and replays.
    #[must_use]
    pub fn at(unix_ms: i64, offset: u32, client_id: Uuid) -> Self {
        Self { unix_ms, offset, client_id }
    }
}

// =============================================================================
// TESTS
// =============================================================================
