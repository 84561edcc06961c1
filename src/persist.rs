//! Leader persistence — debounced flush of the materialized document.
//!
//! DESIGN
//! ======
//! Only the elected Leader writes. Document changes set a dirty flag; a
//! ticker flushes at most once per interval (the production default keeps
//! writes at least a second apart), so bursts of edits coalesce into one
//! write.
//!
//! ERROR HANDLING
//! ==============
//! The dirty flag clears only after a successful write. A failed write
//! leaves it set and the next tick retries; writes repeat, edits are never
//! silently dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};
use uuid::Uuid;

use crate::crdt::ReplicatedDocument;
use crate::election::LeaderInfo;
use crate::storage::{DurableStore, RoomContent, StoreError};

/// Write the current materialized document to the store.
pub async fn flush_document(
    doc: &Arc<Mutex<ReplicatedDocument>>,
    store: &dyn DurableStore,
    room_id: Uuid,
) -> Result<(), StoreError> {
    let content = RoomContent::from(doc.lock().await.snapshot());
    store.write(room_id, &content).await
}

pub struct Persister {
    pub room_id: Uuid,
    pub client_id: Uuid,
    pub doc: Arc<Mutex<ReplicatedDocument>>,
    pub store: Arc<dyn DurableStore>,
    pub leader_rx: watch::Receiver<LeaderInfo>,
    pub interval_ms: u64,
}

impl Persister {
    /// Run the flush loop until the dirty channel closes.
    pub fn spawn(self, mut dirty_rx: mpsc::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(self.interval_ms.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut dirty = false;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if dirty && self.try_flush().await {
                            dirty = false;
                        }
                    }
                    signal = dirty_rx.recv() => match signal {
                        Some(()) => dirty = true,
                        None => {
                            // Channel closed: one last flush, then stop.
                            if dirty {
                                self.try_flush().await;
                            }
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Flush if this session currently leads. Returns `true` when the dirty
    /// flag may be cleared.
    async fn try_flush(&self) -> bool {
        if !self.leader_rx.borrow().is_led_by(self.client_id) {
            // Not ours to persist; keep the flag for a later leadership.
            return false;
        }
        match flush_document(&self.doc, self.store.as_ref(), self.room_id).await {
            Ok(()) => {
                debug!(room_id = %self.room_id, "persisted room content");
                true
            }
            Err(e) => {
                error!(room_id = %self.room_id, error = %e, "room persist failed; will retry");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "persist_test.rs"]
mod tests;
