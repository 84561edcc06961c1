//! Last-writer-wins register under causal stamps.

use serde::{Deserialize, Serialize};

use crate::clock::Stamp;

/// A single value that converges to the write with the largest stamp.
///
/// Stamp comparison is total (lamport, then actor), so two replicas applying
/// the same set of writes in any order end with the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lww<T> {
    value: T,
    stamp: Stamp,
}

impl<T> Lww<T> {
    #[must_use]
    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }

    #[must_use]
    pub fn get(&self) -> &T {
        &self.value
    }

    #[must_use]
    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Apply a write. Returns `true` if the write won and the value changed
    /// owner; a stale write (smaller or equal stamp) is a no-op.
    pub fn apply(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }
}
