//! Dense fractional position keys for the element sequence.
//!
//! DESIGN
//! ======
//! A position is a byte string compared lexicographically. Between any two
//! distinct positions another position always exists, so concurrent inserts
//! never force a re-index of neighbors. Allocation walks both bounds digit by
//! digit and emits the midpoint at the first gap.

use serde::{Deserialize, Serialize};

/// An allocation key in the element sequence. Opaque outside this module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(Vec<u8>);

impl Position {
    /// Allocate a position strictly between `lo` and `hi`.
    ///
    /// `None` bounds mean the start or end of the sequence. When both bounds
    /// are present, `lo` must be strictly less than `hi`.
    #[must_use]
    pub fn between(lo: Option<&Position>, hi: Option<&Position>) -> Position {
        if let (Some(lo), Some(hi)) = (lo, hi) {
            debug_assert!(lo < hi, "position bounds out of order");
        }

        let a: &[u8] = lo.map_or(&[], |p| &p.0);
        let b: &[u8] = hi.map_or(&[], |p| &p.0);

        let mut digits = Vec::with_capacity(a.len() + 1);
        let mut i = 0;
        loop {
            let x = u16::from(a.get(i).copied().unwrap_or(0));
            // A missing upper digit is an open bound at this depth.
            let y = b.get(i).map_or(256, |d| u16::from(*d));
            if y > x + 1 {
                digits.push(u8::try_from((x + y) / 2).unwrap_or(u8::MAX));
                return Position(digits);
            }
            digits.push(u8::try_from(x).unwrap_or(u8::MAX));
            i += 1;
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}
