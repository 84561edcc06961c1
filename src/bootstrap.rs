//! Bootstrap & reconnection — first load and transport recovery.
//!
//! DESIGN
//! ======
//! Bootstrap answers one question per Room open: does durable content need
//! loading? A non-empty document short-circuits. An empty one triggers a
//! store read, and the insert re-checks emptiness inside the same document
//! transaction — two first-joiners racing the load cannot stack the content
//! twice, and any surviving same-id race collapses at materialization.
//!
//! Reconnection is a capped loop: a fixed backoff before each attempt, at
//! most `max_retries` automatic attempts, then the session degrades to
//! local-only mode (edits queue, no presence, no leader participation)
//! until a manual retry arrives.
//!
//! ERROR HANDLING
//! ==============
//! A failed or empty store read is a valid blank Room, reported as a status,
//! never an error. Transport failures surface only as the degraded flag.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::crdt::{EditOp, ReplicatedDocument};
use crate::storage::{DurableStore, RoomContent};
use crate::transport::{RoomLink, RoomTransport};

// =============================================================================
// BOOTSTRAP
// =============================================================================

/// How a Room open sourced its initial document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The replicated document already carried elements; no read performed,
    /// or a concurrent loader won the insert race.
    AlreadyPopulated,
    /// Durable content was loaded into the document.
    Loaded,
    /// The store had nothing; the Room starts blank.
    Blank,
    /// The store read failed; the Room starts blank and unpersisted.
    BlankAfterError,
}

/// Local edits that reproduce `content` in an empty document.
#[must_use]
pub fn content_edits(content: RoomContent) -> Vec<EditOp> {
    let mut edits: Vec<EditOp> = content
        .elements
        .into_iter()
        .map(|element| EditOp::Append { element })
        .collect();
    edits.extend(
        content
            .settings
            .into_iter()
            .map(|(key, value)| EditOp::SetSetting { key, value }),
    );
    edits
}

/// Decide whether durable content must seed the document, and seed it.
pub async fn bootstrap_document(
    doc: &Arc<Mutex<ReplicatedDocument>>,
    store: &dyn DurableStore,
    room_id: Uuid,
) -> BootstrapOutcome {
    if !doc.lock().await.is_empty() {
        return BootstrapOutcome::AlreadyPopulated;
    }

    let content = match store.read(room_id).await {
        Ok(Some(content)) if !content.is_empty() => content,
        Ok(_) => {
            info!(%room_id, "bootstrap: store empty, starting blank");
            return BootstrapOutcome::Blank;
        }
        Err(e) => {
            warn!(%room_id, error = %e, "bootstrap: store read failed, starting blank");
            return BootstrapOutcome::BlankAfterError;
        }
    };

    let element_count = content.elements.len();
    let loaded = {
        let mut doc = doc.lock().await;
        // EDGE: a peer's load may have merged during our store read; the
        // guard re-checks emptiness inside the same application step.
        doc.apply_guarded(|view| view.is_empty(), content_edits(content))
            .is_some()
    };

    if loaded {
        info!(%room_id, elements = element_count, "bootstrap: loaded durable content");
        BootstrapOutcome::Loaded
    } else {
        BootstrapOutcome::AlreadyPopulated
    }
}

// =============================================================================
// RECONNECTION
// =============================================================================

/// Fixed-backoff, capped-retry reconnection policy.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

/// Re-establish a Room link after transport loss.
///
/// Runs `max_retries` attempts spaced by the backoff window; when the cap is
/// exceeded the degraded flag goes up and the loop parks until a manual
/// retry arrives, then starts a fresh round. Returns `None` when the manual
/// channel closes (the Room is shutting down). Cancellation-safe: aborting
/// the caller drops any pending sleep or connect.
pub async fn reacquire_link(
    transport: &dyn RoomTransport,
    policy: ReconnectPolicy,
    degraded: &watch::Sender<bool>,
    manual_retry: &mut mpsc::Receiver<()>,
) -> Option<RoomLink> {
    loop {
        for attempt in 1..=policy.max_retries {
            tokio::time::sleep(std::time::Duration::from_millis(policy.backoff_ms)).await;
            match transport.connect().await {
                Ok(link) => {
                    degraded.send_replace(false);
                    info!(attempt, "transport reconnected");
                    return Some(link);
                }
                Err(e) => {
                    warn!(attempt, max = policy.max_retries, error = %e, "reconnect attempt failed");
                }
            }
        }

        degraded.send_replace(true);
        info!("reconnect cap exceeded; degraded to local-only mode");
        manual_retry.recv().await?;
        info!("manual retry requested");
    }
}

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod tests;
