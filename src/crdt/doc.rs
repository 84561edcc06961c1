//! Replicated document — transactions, integration, and observation.
//!
//! DESIGN
//! ======
//! One `ReplicatedDocument` per session per Room. Local edits arrive as
//! intent (`EditOp`), get stamped against the session's Lamport clock, apply
//! in place, and queue in the outbox for replication. Remote transactions
//! integrate idempotently in any delivery order; operations that address an
//! element this replica has not seen yet are deferred and retried after each
//! later integration instead of being dropped.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here fails: with no transport attached the outbox simply grows,
//! and local edits keep applying. Draining is the Room driver's concern.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::clock::{LamportClock, Stamp};

use super::list::ElementSequence;
use super::lww::Lww;
use super::pos::Position;
use super::{DocOp, DocumentView, EditOp, Transaction};

/// Outcome of applying one stamped operation.
enum OpApply {
    /// Applied; `true` when the materialized view may have changed.
    Applied(bool),
    /// References an element id this replica has not integrated yet.
    Deferred,
}

/// A session's replica of the Room document.
pub struct ReplicatedDocument {
    clock: LamportClock,
    sequence: ElementSequence,
    settings: HashMap<String, Lww<serde_json::Value>>,
    /// Transaction ids already integrated; makes replays no-ops.
    applied: HashSet<Uuid>,
    /// Every integrated transaction in arrival order, local and remote.
    /// Shipped to newcomers so late joiners converge on missed history.
    log: Vec<Transaction>,
    /// Operations waiting for their target element to arrive.
    deferred: Vec<DocOp>,
    /// Local transactions not yet handed to the transport.
    outbox: VecDeque<Transaction>,
    observers: Vec<Box<dyn Fn(&DocumentView) + Send>>,
}

impl ReplicatedDocument {
    #[must_use]
    pub fn new(actor: Uuid) -> Self {
        Self {
            clock: LamportClock::new(actor),
            sequence: ElementSequence::new(),
            settings: HashMap::new(),
            applied: HashSet::new(),
            log: Vec::new(),
            deferred: Vec::new(),
            outbox: VecDeque::new(),
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn actor(&self) -> Uuid {
        self.clock.actor()
    }

    // =========================================================================
    // LOCAL EDITS
    // =========================================================================

    /// Apply a batch of local edits as one atomic transaction.
    ///
    /// Observers fire exactly once, after the whole batch; the transaction is
    /// queued for replication and also returned for callers that relay it
    /// themselves.
    pub fn apply(&mut self, edits: Vec<EditOp>) -> Option<Transaction> {
        if edits.is_empty() {
            return None;
        }

        let mut ops = Vec::with_capacity(edits.len());
        for edit in edits {
            let stamp = self.clock.tick();
            let op = self.stamp_edit(edit, stamp);
            // Apply as we go so later inserts in the batch see earlier ones.
            if let OpApply::Deferred = self.apply_op(&op) {
                self.deferred.push(op.clone());
            }
            ops.push(op);
        }

        let txn = Transaction { id: Uuid::new_v4(), origin: self.actor(), ops };
        self.applied.insert(txn.id);
        self.log.push(txn.clone());
        self.outbox.push_back(txn.clone());
        self.notify();
        Some(txn)
    }

    /// Apply a batch only if `guard` still holds at application time.
    ///
    /// Used by bootstrap to re-check emptiness immediately before inserting
    /// loaded content, closing the window against a concurrent first-joiner
    /// whose load already merged.
    pub fn apply_guarded(
        &mut self,
        guard: impl FnOnce(&DocumentView) -> bool,
        edits: Vec<EditOp>,
    ) -> Option<Transaction> {
        if !guard(&self.snapshot()) {
            return None;
        }
        self.apply(edits)
    }

    fn stamp_edit(&self, edit: EditOp, stamp: Stamp) -> DocOp {
        match edit {
            EditOp::InsertAt { index, element } => {
                let (lo, hi) = self.sequence.bounds_for_index(index);
                let pos = Position::between(lo.as_ref(), hi.as_ref());
                DocOp::Insert { pos, element, stamp }
            }
            EditOp::Append { element } => {
                let pos = Position::between(self.sequence.tail_bound().as_ref(), None);
                DocOp::Insert { pos, element, stamp }
            }
            EditOp::Delete { element_id } => DocOp::Delete { element_id, stamp },
            EditOp::Replace { element } => DocOp::Replace { element, stamp },
            EditOp::SetSetting { key, value } => DocOp::SetSetting { key, value, stamp },
        }
    }

    // =========================================================================
    // REMOTE INTEGRATION
    // =========================================================================

    /// Integrate a transaction received from a peer.
    ///
    /// Returns `true` when the materialized view changed. Replays of an
    /// already-integrated transaction return `false` and change nothing.
    pub fn integrate(&mut self, txn: &Transaction) -> bool {
        if self.applied.contains(&txn.id) {
            return false;
        }

        let mut changed = false;
        for op in &txn.ops {
            self.clock.observe(op.stamp());
            match self.apply_op(op) {
                OpApply::Applied(c) => changed |= c,
                OpApply::Deferred => self.deferred.push(op.clone()),
            }
        }
        changed |= self.retry_deferred();
        self.applied.insert(txn.id);
        self.log.push(txn.clone());

        if changed {
            self.notify();
        }
        changed
    }

    fn apply_op(&mut self, op: &DocOp) -> OpApply {
        match op {
            DocOp::Insert { pos, element, stamp } => {
                OpApply::Applied(self.sequence.insert(pos.clone(), element.clone(), *stamp))
            }
            DocOp::Delete { element_id, stamp } => {
                if self.sequence.contains_id(element_id) {
                    OpApply::Applied(self.sequence.delete(element_id, *stamp))
                } else {
                    OpApply::Deferred
                }
            }
            DocOp::Replace { element, stamp } => {
                if self.sequence.contains_id(&element.id) {
                    OpApply::Applied(self.sequence.replace(element, *stamp))
                } else {
                    OpApply::Deferred
                }
            }
            DocOp::SetSetting { key, value, stamp } => {
                let applied = match self.settings.get_mut(key) {
                    Some(reg) => reg.apply(value.clone(), *stamp),
                    None => {
                        self.settings
                            .insert(key.clone(), Lww::new(value.clone(), *stamp));
                        true
                    }
                };
                OpApply::Applied(applied)
            }
        }
    }

    /// Re-run deferred ops until no further progress. Ops that apply leave
    /// the buffer; the rest keep waiting for their insert.
    fn retry_deferred(&mut self) -> bool {
        let mut changed = false;
        loop {
            if self.deferred.is_empty() {
                return changed;
            }
            let pending = std::mem::take(&mut self.deferred);
            let before = pending.len();
            for op in pending {
                match self.apply_op(&op) {
                    OpApply::Applied(c) => changed |= c,
                    OpApply::Deferred => self.deferred.push(op),
                }
            }
            if self.deferred.len() == before {
                return changed;
            }
        }
    }

    // =========================================================================
    // VIEWS & OBSERVERS
    // =========================================================================

    /// Current materialized state for read-only consumers.
    #[must_use]
    pub fn snapshot(&self) -> DocumentView {
        DocumentView {
            elements: self.sequence.materialize(),
            settings: self
                .settings
                .iter()
                .map(|(k, reg)| (k.clone(), reg.get().clone()))
                .collect(),
        }
    }

    /// `true` when no live element exists (settings do not count).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Register a listener invoked once per merged change-set with the
    /// materialized state.
    pub fn observe(&mut self, callback: impl Fn(&DocumentView) + Send + 'static) {
        self.observers.push(Box::new(callback));
    }

    fn notify(&self) {
        if self.observers.is_empty() {
            return;
        }
        let view = self.snapshot();
        for observer in &self.observers {
            observer(&view);
        }
    }

    // =========================================================================
    // REPLICATION OUTBOX
    // =========================================================================

    /// Drain transactions waiting for the transport.
    pub fn take_outbox(&mut self) -> Vec<Transaction> {
        self.outbox.drain(..).collect()
    }

    /// Put unsent transactions back at the front, preserving order.
    pub fn requeue(&mut self, txns: Vec<Transaction>) {
        for txn in txns.into_iter().rev() {
            self.outbox.push_front(txn);
        }
    }

    #[must_use]
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Full integrated history for catching a newcomer up. Integration is
    /// idempotent on the receiving side, so over-sending is safe.
    #[must_use]
    pub fn history(&self) -> Vec<Transaction> {
        self.log.clone()
    }
}

#[cfg(test)]
#[path = "doc_test.rs"]
mod tests;
