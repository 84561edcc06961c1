//! Ordered element sequence CRDT.
//!
//! DESIGN
//! ======
//! Entries are keyed by `(Position, Stamp)`: the position orders the
//! sequence, the insertion stamp breaks position collisions between
//! concurrent inserts, so every replica iterates entries identically.
//! Deletes and replaces address elements by id and resolve against
//! concurrent writes with per-entry LWW registers; a delete is a tombstone
//! (`None`) that stays in the history.
//!
//! Duplicate element ids can enter the sequence when two sessions race the
//! same logical insert. The history keeps both entries; `materialize`
//! collapses them, first occurrence wins.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::clock::Stamp;

use super::Element;
use super::lww::Lww;
use super::pos::Position;

type EntryKey = (Position, Stamp);

#[derive(Debug, Clone)]
struct Entry {
    element_id: String,
    record: Lww<Option<Element>>,
}

/// The ordered, insertion-stable element container.
#[derive(Debug, Clone, Default)]
pub struct ElementSequence {
    entries: BTreeMap<EntryKey, Entry>,
    by_id: HashMap<String, Vec<EntryKey>>,
}

impl ElementSequence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Integrate an insert. Re-integration of the same `(pos, stamp)` key is
    /// a no-op so replayed operations cannot duplicate entries.
    pub fn insert(&mut self, pos: Position, element: Element, stamp: Stamp) -> bool {
        let key = (pos, stamp);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.by_id
            .entry(element.id.clone())
            .or_default()
            .push(key.clone());
        self.entries.insert(
            key,
            Entry { element_id: element.id.clone(), record: Lww::new(Some(element), stamp) },
        );
        true
    }

    /// Tombstone every entry carrying `element_id`. Returns `true` if any
    /// entry changed; `false` also covers an id this replica has never seen,
    /// which callers defer and retry after later integrations.
    pub fn delete(&mut self, element_id: &str, stamp: Stamp) -> bool {
        let Some(keys) = self.by_id.get(element_id) else {
            return false;
        };
        let mut changed = false;
        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                changed |= entry.record.apply(None, stamp);
            }
        }
        changed
    }

    /// Whole-record replace for every live or tombstoned entry of the id.
    /// Returns `false` for an unknown id (caller defers).
    pub fn replace(&mut self, element: &Element, stamp: Stamp) -> bool {
        let Some(keys) = self.by_id.get(&element.id) else {
            return false;
        };
        let mut changed = false;
        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                changed |= entry.record.apply(Some(element.clone()), stamp);
            }
        }
        changed
    }

    #[must_use]
    pub fn contains_id(&self, element_id: &str) -> bool {
        self.by_id.contains_key(element_id)
    }

    /// Ordered live elements with duplicate ids collapsed, first seen wins.
    #[must_use]
    pub fn materialize(&self) -> Vec<Element> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        for entry in self.entries.values() {
            let Some(element) = entry.record.get() else {
                continue;
            };
            if seen.insert(entry.element_id.as_str()) {
                out.push(element.clone());
            }
        }
        out
    }

    /// Count of live, deduplicated elements.
    #[must_use]
    pub fn live_len(&self) -> usize {
        let mut seen: HashSet<&str> = HashSet::new();
        self.entries
            .values()
            .filter(|e| e.record.get().is_some() && seen.insert(e.element_id.as_str()))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries
            .values()
            .all(|e| e.record.get().is_none())
    }

    /// Position bounds for inserting before materialized index `index`.
    ///
    /// Bounds come from the underlying entries (tombstones included) so a
    /// fresh position never collides with a deleted neighbor's key.
    #[must_use]
    pub fn bounds_for_index(&self, index: usize) -> (Option<Position>, Option<Position>) {
        // Walk entries in order, counting only the visible ones.
        let mut seen: HashSet<&str> = HashSet::new();
        let mut visible = 0usize;
        let mut prev_pos: Option<Position> = None;
        for (key, entry) in &self.entries {
            let is_visible = entry.record.get().is_some() && seen.insert(entry.element_id.as_str());
            if is_visible {
                if visible == index {
                    return (prev_pos, Some(key.0.clone()));
                }
                visible += 1;
            }
            prev_pos = Some(key.0.clone());
        }
        (prev_pos, None)
    }

    /// Position bound for appending at the tail.
    #[must_use]
    pub fn tail_bound(&self) -> Option<Position> {
        self.entries.keys().next_back().map(|(pos, _)| pos.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn stamp(lamport: u64, actor: u128) -> Stamp {
        Stamp { lamport, actor: Uuid::from_u128(actor) }
    }

    fn elem(id: &str) -> Element {
        Element::new(id, "box", json!({}))
    }

    fn seq_with(ids: &[&str]) -> ElementSequence {
        let mut seq = ElementSequence::new();
        let mut lamport = 0;
        for id in ids {
            lamport += 1;
            let pos = Position::between(seq.tail_bound().as_ref(), None);
            seq.insert(pos, elem(id), stamp(lamport, 1));
        }
        seq
    }

    fn ids(seq: &ElementSequence) -> Vec<String> {
        seq.materialize().into_iter().map(|e| e.id).collect()
    }

    #[test]
    fn append_preserves_order() {
        let seq = seq_with(&["a", "b", "c"]);
        assert_eq!(ids(&seq), ["a", "b", "c"]);
        assert_eq!(seq.live_len(), 3);
    }

    #[test]
    fn insert_between_neighbors() {
        let mut seq = seq_with(&["a", "c"]);
        let (lo, hi) = seq.bounds_for_index(1);
        let pos = Position::between(lo.as_ref(), hi.as_ref());
        seq.insert(pos, elem("b"), stamp(10, 2));
        assert_eq!(ids(&seq), ["a", "b", "c"]);
    }

    #[test]
    fn delete_tombstones_but_keeps_history() {
        let mut seq = seq_with(&["a", "b"]);
        assert!(seq.delete("a", stamp(9, 1)));
        assert_eq!(ids(&seq), ["b"]);
        assert!(seq.contains_id("a"));
        assert!(!seq.is_empty());
    }

    #[test]
    fn delete_unknown_id_reports_unapplied() {
        let mut seq = seq_with(&["a"]);
        assert!(!seq.delete("ghost", stamp(9, 1)));
    }

    #[test]
    fn replace_respects_causal_order() {
        let mut seq = seq_with(&["a"]);
        let mut newer = elem("a");
        newer.props = json!({"w": 100});
        assert!(seq.replace(&newer, stamp(5, 1)));

        // A concurrent older write loses.
        let mut older = elem("a");
        older.props = json!({"w": 1});
        assert!(!seq.replace(&older, stamp(4, 9)));

        assert_eq!(seq.materialize()[0].props, json!({"w": 100}));
    }

    #[test]
    fn delete_beats_older_replace_and_loses_to_newer() {
        let mut seq = seq_with(&["a"]);
        assert!(seq.delete("a", stamp(5, 1)));
        assert!(!seq.replace(&elem("a"), stamp(4, 2)));
        assert_eq!(seq.live_len(), 0);

        // A causally-later replace resurrects the record.
        assert!(seq.replace(&elem("a"), stamp(6, 2)));
        assert_eq!(ids(&seq), ["a"]);
    }

    #[test]
    fn duplicate_ids_collapse_first_seen() {
        let mut seq = ElementSequence::new();
        let p1 = Position::between(None, None);
        let p2 = Position::between(Some(&p1), None);
        seq.insert(p1, elem("dup"), stamp(1, 1));
        seq.insert(p2, elem("dup"), stamp(1, 2));

        assert_eq!(seq.live_len(), 1);
        assert_eq!(ids(&seq), ["dup"]);
    }

    #[test]
    fn delete_covers_every_duplicate_entry() {
        let mut seq = ElementSequence::new();
        let p1 = Position::between(None, None);
        let p2 = Position::between(Some(&p1), None);
        seq.insert(p1, elem("dup"), stamp(1, 1));
        seq.insert(p2, elem("dup"), stamp(1, 2));

        assert!(seq.delete("dup", stamp(3, 1)));
        assert!(seq.is_empty());
    }

    #[test]
    fn concurrent_inserts_converge_across_replicas() {
        // Same two inserts, integrated in opposite orders.
        let base = Position::between(None, None);
        let pos_x = Position::between(Some(&base), None);
        let ops = [
            (pos_x.clone(), elem("x"), stamp(2, 1)),
            (pos_x, elem("y"), stamp(2, 2)),
        ];

        let mut left = ElementSequence::new();
        let mut right = ElementSequence::new();
        for (pos, element, stamp) in &ops {
            left.insert(pos.clone(), element.clone(), *stamp);
        }
        for (pos, element, stamp) in ops.iter().rev() {
            right.insert(pos.clone(), element.clone(), *stamp);
        }

        assert_eq!(ids(&left), ids(&right));
        assert_eq!(left.live_len(), 2);
    }

    #[test]
    fn reinsert_same_key_is_noop() {
        let mut seq = ElementSequence::new();
        let pos = Position::between(None, None);
        assert!(seq.insert(pos.clone(), elem("a"), stamp(1, 1)));
        assert!(!seq.insert(pos, elem("a"), stamp(1, 1)));
        assert_eq!(seq.live_len(), 1);
    }
}
