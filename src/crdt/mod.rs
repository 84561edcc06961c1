//! Replicated document engine.
//!
//! ARCHITECTURE
//! ============
//! A Room's shared state is one `ReplicatedDocument`: an ordered element
//! sequence plus a settings map, both conflict-free under concurrent edits.
//! Sessions mutate through transactions; remote transactions integrate in any
//! delivery order and all replicas converge to the same materialized view.
//!
//! Submodules: `pos` allocates sequence positions, `lww` is the register
//! primitive, `list` is the ordered container, `doc` ties both together with
//! transactions, observers, and the replication outbox.

pub mod doc;
pub mod list;
pub mod lww;
pub mod pos;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Stamp;
pub use doc::ReplicatedDocument;
pub use list::ElementSequence;
pub use lww::Lww;
pub use pos::Position;

// =============================================================================
// ELEMENTS
// =============================================================================

/// One positioned page element. The core treats `props` as opaque; only the
/// id participates in merge semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub kind: String,
    pub props: serde_json::Value,
    /// User who authored the last full write, for attribution only.
    pub author: Option<Uuid>,
}

impl Element {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>, props: serde_json::Value) -> Self {
        Self { id: id.into(), kind: kind.into(), props, author: None }
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// A local edit intent. Stamps are assigned when the document applies it.
#[derive(Debug, Clone)]
pub enum EditOp {
    /// Insert before the element currently at `index` in the materialized
    /// view; an index past the end appends.
    InsertAt { index: usize, element: Element },
    Append { element: Element },
    Delete { element_id: String },
    Replace { element: Element },
    SetSetting { key: String, value: serde_json::Value },
}

/// A stamped, replicable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DocOp {
    Insert { pos: Position, element: Element, stamp: Stamp },
    Delete { element_id: String, stamp: Stamp },
    Replace { element: Element, stamp: Stamp },
    SetSetting { key: String, value: serde_json::Value, stamp: Stamp },
}

impl DocOp {
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        match self {
            DocOp::Insert { stamp, .. }
            | DocOp::Delete { stamp, .. }
            | DocOp::Replace { stamp, .. }
            | DocOp::SetSetting { stamp, .. } => *stamp,
        }
    }
}

/// An atomic batch of operations from one session.
///
/// The id makes integration idempotent: a transaction replayed by the
/// transport is recognized and skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub origin: Uuid,
    pub ops: Vec<DocOp>,
}

// =============================================================================
// MATERIALIZED VIEW
// =============================================================================

/// The deduplicated, ordered view handed to observers and read-only
/// consumers. Never exposes tombstones or duplicate element ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentView {
    pub elements: Vec<Element>,
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl DocumentView {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
