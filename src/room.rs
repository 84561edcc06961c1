//! Room client — one session's live attachment to a shared page.
//!
//! ARCHITECTURE
//! ============
//! `RoomClient::open` wires the whole collaboration core for one Room:
//! - a driver task owning the transport link: inbound dispatch by syscall
//!   prefix, outbound forwarding, outbox draining, and reconnection;
//! - the elector task deriving leadership from presence;
//! - the persister task flushing the document while this session leads;
//! - a bootstrap task deciding whether durable content seeds the document.
//!
//! All tasks are owned by the client and aborted on `close()`, so no timer
//! or pending retry outlives the Room.
//!
//! LIFECYCLE
//! =========
//! 1. Connect (or start offline) → announce presence → bootstrap check
//! 2. Local edits apply immediately and replicate via the outbox
//! 3. Remote frames integrate / update peers / trigger re-election
//! 4. Transport loss → capped reconnect → degraded local-only mode
//! 5. `close()` → final leader flush → tasks aborted → departure broadcast

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bootstrap::{self, BootstrapOutcome, ReconnectPolicy};
use crate::config::SyncConfig;
use crate::crdt::{DocumentView, EditOp, ReplicatedDocument, Transaction};
use crate::election::{ElectionSignal, Elector, LeaderInfo};
use crate::frame::{FRAME_ANNOUNCE, FRAME_CLIENT_ID, FRAME_TXN, Frame};
use crate::persist::{self, Persister};
use crate::presence::{PeerAnnounce, PeerChange, PresenceChannel, PresenceView};
use crate::session::Session;
use crate::storage::DurableStore;
use crate::transport::{RoomLink, RoomTransport};

const OUTBOUND_CAPACITY: usize = 256;
const SIGNAL_CAPACITY: usize = 64;

// =============================================================================
// CLIENT
// =============================================================================

/// A session's handle on one collaborative Room.
pub struct RoomClient {
    room_id: Uuid,
    session: Session,
    config: SyncConfig,
    doc: Arc<Mutex<ReplicatedDocument>>,
    presence: Arc<Mutex<PresenceChannel>>,
    store: Arc<dyn DurableStore>,
    outbound_tx: mpsc::Sender<Frame>,
    flush_tx: mpsc::Sender<()>,
    manual_retry_tx: mpsc::Sender<()>,
    degraded_rx: watch::Receiver<bool>,
    leader_rx: watch::Receiver<LeaderInfo>,
    bootstrap_rx: watch::Receiver<Option<BootstrapOutcome>>,
    chat_timer: Mutex<Option<JoinHandle<()>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RoomClient {
    /// Open a Room: connect the transport, announce the session, and start
    /// the driver, elector, persister, and bootstrap tasks. The session is
    /// created by the caller (its client id also keys the transport).
    ///
    /// Never fails: if the first connect is refused the client starts in the
    /// reconnect path and, past the retry cap, in degraded local-only mode.
    pub async fn open(
        room_id: Uuid,
        session: Session,
        transport: Arc<dyn RoomTransport>,
        store: Arc<dyn DurableStore>,
        config: SyncConfig,
    ) -> Self {
        let client_id = session.client_id;

        let doc = Arc::new(Mutex::new(ReplicatedDocument::new(client_id)));
        let presence = Arc::new(Mutex::new(PresenceChannel::new(&session, config.presence_ttl())));

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (flush_tx, flush_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let (dirty_tx, dirty_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let (election_tx, election_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let (manual_retry_tx, manual_retry_rx) = mpsc::channel(4);
        let (degraded_tx, degraded_rx) = watch::channel(false);
        let (leader_tx, leader_rx) = watch::channel(LeaderInfo::unelected());
        let (bootstrap_tx, bootstrap_rx) = watch::channel(None);

        // Every merged change-set marks the document dirty for the persister.
        {
            let dirty = dirty_tx.clone();
            doc.lock().await.observe(move |_| {
                let _ = dirty.try_send(());
            });
        }

        let initial_link = match transport.connect().await {
            Ok(link) => Some(link),
            Err(e) => {
                warn!(%room_id, error = %e, "initial connect failed; starting in reconnect path");
                None
            }
        };

        let driver = Driver {
            room_id,
            client_id,
            doc: doc.clone(),
            presence: presence.clone(),
            transport,
            outbound_rx,
            flush_rx,
            election_tx: election_tx.clone(),
            degraded_tx,
            manual_retry_rx,
            policy: ReconnectPolicy {
                max_retries: config.reconnect_max_retries,
                backoff_ms: config.reconnect_backoff_ms,
            },
        };

        let elector = Elector::new(
            room_id,
            client_id,
            session.identity.display_name.clone(),
            presence.clone(),
            outbound_tx.clone(),
            leader_tx,
            config.election_tuning(),
        );

        let persister = Persister {
            room_id,
            client_id,
            doc: doc.clone(),
            store: store.clone(),
            leader_rx: leader_rx.clone(),
            interval_ms: config.persist_interval_ms,
        };

        let bootstrap_task = {
            let doc = doc.clone();
            let store = store.clone();
            let flush = flush_tx.clone();
            tokio::spawn(async move {
                let outcome = bootstrap::bootstrap_document(&doc, store.as_ref(), room_id).await;
                bootstrap_tx.send_replace(Some(outcome));
                // Loaded content replicates like any other transaction.
                let _ = flush.try_send(());
            })
        };

        let tasks = vec![
            tokio::spawn(driver.run(initial_link)),
            elector.spawn(election_rx),
            persister.spawn(dirty_rx),
            bootstrap_task,
        ];

        info!(%room_id, %client_id, "room opened");
        Self {
            room_id,
            session,
            config,
            doc,
            presence,
            store,
            outbound_tx,
            flush_tx,
            manual_retry_tx,
            degraded_rx,
            leader_rx,
            bootstrap_rx,
            chat_timer: Mutex::new(None),
            tasks,
        }
    }

    // =========================================================================
    // DOCUMENT
    // =========================================================================

    /// Apply a batch of edits atomically and schedule replication. Written
    /// elements are tagged with the session's user identity unless the
    /// caller already attributed them.
    pub async fn apply(&self, mut edits: Vec<EditOp>) -> Option<Transaction> {
        let author = self.session.identity.user_id;
        for edit in &mut edits {
            match edit {
                EditOp::InsertAt { element, .. }
                | EditOp::Append { element }
                | EditOp::Replace { element } => {
                    if element.author.is_none() {
                        element.author = Some(author);
                    }
                }
                EditOp::Delete { .. } | EditOp::SetSetting { .. } => {}
            }
        }

        let txn = self.doc.lock().await.apply(edits);
        if txn.is_some() {
            let _ = self.flush_tx.try_send(());
        }
        txn
    }

    /// Current materialized document state.
    pub async fn snapshot(&self) -> DocumentView {
        self.doc.lock().await.snapshot()
    }

    /// Register a document observer (one call per merged change-set).
    pub async fn observe(&self, callback: impl Fn(&DocumentView) + Send + 'static) {
        self.doc.lock().await.observe(callback);
    }

    // =========================================================================
    // PRESENCE
    // =========================================================================

    /// Register a presence subscriber (full peer map on every change).
    pub async fn subscribe(&self, callback: impl Fn(&HashMap<Uuid, PresenceView>) + Send + 'static) {
        self.presence.lock().await.subscribe(callback);
    }

    /// Peers with expiry applied as of now.
    pub async fn peers(&self) -> HashMap<Uuid, PresenceView> {
        self.presence.lock().await.peers_view(crate::clock::now_ms())
    }

    pub async fn publish_cursor(&self, x: f64, y: f64, viewport: impl Into<String>) {
        let announce = self.presence.lock().await.publish_cursor(x, y, viewport);
        self.send_announce(announce);
    }

    pub async fn publish_selection(&self, element_ids: Vec<String>, viewport: impl Into<String>) {
        let announce = self
            .presence
            .lock()
            .await
            .publish_selection(element_ids, viewport);
        self.send_announce(announce);
    }

    /// Publish a chat bubble and schedule the courtesy retraction after the
    /// display window; readers expire it on their own regardless.
    pub async fn publish_chat(&self, text: impl Into<String>) {
        let announce = self.presence.lock().await.publish_chat(text);
        self.send_announce(announce);

        let presence = self.presence.clone();
        let outbound = self.outbound_tx.clone();
        let room_id = self.room_id;
        let client_id = self.session.client_id;
        let ttl_ms = u64::try_from(self.config.chat_ttl_ms).unwrap_or(0);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(ttl_ms)).await;
            let cleared = presence.lock().await.clear_chat();
            if let Some(announce) = cleared {
                if let Ok(payload) = serde_json::to_value(&announce) {
                    let _ = outbound.try_send(Frame::announce(room_id, payload).with_from(client_id));
                }
            }
        });

        if let Some(stale) = self.chat_timer.lock().await.replace(timer) {
            stale.abort();
        }
    }

    fn send_announce(&self, announce: PeerAnnounce) {
        let Ok(payload) = serde_json::to_value(&announce) else {
            return;
        };
        // Fire-and-forget: presence loss is tolerated by design.
        let _ = self
            .outbound_tx
            .try_send(Frame::announce(self.room_id, payload).with_from(self.session.client_id));
    }

    // =========================================================================
    // STATUS
    // =========================================================================

    #[must_use]
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.session.client_id
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Degraded-mode flag: `true` after the reconnect cap is exceeded.
    #[must_use]
    pub fn degraded(&self) -> watch::Receiver<bool> {
        self.degraded_rx.clone()
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        *self.degraded_rx.borrow()
    }

    /// This session's current belief about Room leadership.
    #[must_use]
    pub fn leader(&self) -> watch::Receiver<LeaderInfo> {
        self.leader_rx.clone()
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.leader_rx.borrow().is_led_by(self.session.client_id)
    }

    /// `None` until the bootstrap decision lands.
    #[must_use]
    pub fn bootstrap_status(&self) -> watch::Receiver<Option<BootstrapOutcome>> {
        self.bootstrap_rx.clone()
    }

    /// Ask the reconnect loop for one more round after it gave up.
    pub fn retry_now(&self) {
        let _ = self.manual_retry_tx.try_send(());
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    /// Tear the Room down: flush once more if leading, then cancel every
    /// background task. Dropping the link makes the relay announce our
    /// departure to peers.
    pub async fn close(self) {
        if self.is_leader() {
            if let Err(e) = persist::flush_document(&self.doc, self.store.as_ref(), self.room_id).await {
                warn!(room_id = %self.room_id, error = %e, "final flush failed; content stays unpersisted");
            }
        }

        if let Some(timer) = self.chat_timer.lock().await.take() {
            timer.abort();
        }
        for task in &self.tasks {
            task.abort();
        }
        info!(room_id = %self.room_id, client_id = %self.session.client_id, "room closed");
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// Owns the live link: dispatches inbound frames, forwards outbound ones,
/// drains the document outbox, and runs the reconnect policy on loss.
struct Driver {
    room_id: Uuid,
    client_id: Uuid,
    doc: Arc<Mutex<ReplicatedDocument>>,
    presence: Arc<Mutex<PresenceChannel>>,
    transport: Arc<dyn RoomTransport>,
    outbound_rx: mpsc::Receiver<Frame>,
    flush_rx: mpsc::Receiver<()>,
    election_tx: mpsc::Sender<ElectionSignal>,
    degraded_tx: watch::Sender<bool>,
    manual_retry_rx: mpsc::Receiver<()>,
    policy: ReconnectPolicy,
}

impl Driver {
    async fn run(mut self, initial: Option<RoomLink>) {
        let mut link = initial;
        loop {
            let Some(mut active) = link.take() else {
                match bootstrap::reacquire_link(
                    self.transport.as_ref(),
                    self.policy,
                    &self.degraded_tx,
                    &mut self.manual_retry_rx,
                )
                .await
                {
                    Some(fresh) => link = Some(fresh),
                    None => return,
                }
                continue;
            };

            self.on_connected(&mut active).await;
            self.drive(&mut active).await;
            warn!(room_id = %self.room_id, "room transport lost");
            self.on_disconnected().await;
        }
    }

    /// Pump one live connection until it drops.
    async fn drive(&mut self, link: &mut RoomLink) {
        loop {
            tokio::select! {
                inbound = link.inbound.recv() => match inbound {
                    Some(frame) => self.handle_inbound(link, frame).await,
                    None => return,
                },
                Some(frame) = self.outbound_rx.recv() => {
                    if link.outbound.send(frame).await.is_err() {
                        return;
                    }
                }
                Some(()) = self.flush_rx.recv() => {
                    if !self.drain_outbox(link).await {
                        return;
                    }
                }
            }
        }
    }

    /// Fresh link: announce ourselves, replicate anything queued while
    /// offline, and re-derive leadership from the rebuilding roster.
    async fn on_connected(&mut self, link: &mut RoomLink) {
        let announce = self.presence.lock().await.re_announce();
        self.send_announce(link, &announce).await;
        self.drain_outbox(link).await;
        let _ = self.election_tx.send(ElectionSignal::Membership).await;
    }

    /// Peers are unknowable while offline; drop the replicas so the roster
    /// rebuilds from fresh announcements after reconnect.
    async fn on_disconnected(&mut self) {
        self.presence.lock().await.clear_peers();
        let _ = self.election_tx.send(ElectionSignal::Membership).await;
    }

    async fn handle_inbound(&mut self, link: &mut RoomLink, frame: Frame) {
        match frame.prefix() {
            "doc" => self.handle_doc(frame).await,
            "presence" => self.handle_presence(link, frame).await,
            other => debug!(prefix = other, "ignoring unknown frame prefix"),
        }
    }

    async fn handle_doc(&mut self, frame: Frame) {
        let Some(value) = frame.data.get(FRAME_TXN) else {
            return;
        };
        match serde_json::from_value::<Transaction>(value.clone()) {
            Ok(txn) => {
                self.doc.lock().await.integrate(&txn);
            }
            Err(e) => warn!(error = %e, "discarding malformed transaction frame"),
        }
    }

    async fn handle_presence(&mut self, link: &mut RoomLink, frame: Frame) {
        match frame.op() {
            "update" => {
                let Some(value) = frame.data.get(FRAME_ANNOUNCE) else {
                    return;
                };
                let announce = match serde_json::from_value::<PeerAnnounce>(value.clone()) {
                    Ok(announce) => announce,
                    Err(e) => {
                        warn!(error = %e, "discarding malformed presence frame");
                        return;
                    }
                };

                let change = self.presence.lock().await.apply_peer(announce);
                match change {
                    PeerChange::Joined => {
                        // The newcomer cannot know the roster or the history
                        // yet; answer with our announcement and our log.
                        self.send_own_announce(link).await;
                        self.send_history(link).await;
                        let _ = self.election_tx.send(ElectionSignal::Membership).await;
                    }
                    PeerChange::Updated => {
                        let _ = self.election_tx.send(ElectionSignal::Presence).await;
                    }
                    PeerChange::Stale => {}
                }
            }
            "leave" => {
                let Some(client_id) = frame
                    .data
                    .get(FRAME_CLIENT_ID)
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<Uuid>().ok())
                else {
                    return;
                };
                if self.presence.lock().await.remove_peer(client_id) {
                    let _ = self.election_tx.send(ElectionSignal::Membership).await;
                }
            }
            other => debug!(op = other, "ignoring unknown presence op"),
        }
    }

    /// Ship the integrated history to catch a newcomer up on transactions
    /// broadcast before it joined. Receivers integrate idempotently, so
    /// duplicate deliveries from several peers are harmless.
    async fn send_history(&self, link: &mut RoomLink) {
        let history = self.doc.lock().await.history();
        for txn in history {
            let Ok(payload) = serde_json::to_value(&txn) else {
                continue;
            };
            let frame = Frame::commit(self.room_id, payload).with_from(self.client_id);
            if link.outbound.send(frame).await.is_err() {
                return;
            }
        }
    }

    async fn send_own_announce(&self, link: &mut RoomLink) {
        let announce = self.presence.lock().await.local_announce();
        self.send_announce(link, &announce).await;
    }

    async fn send_announce(&self, link: &mut RoomLink, announce: &PeerAnnounce) {
        let Ok(payload) = serde_json::to_value(announce) else {
            return;
        };
        let _ = link
            .outbound
            .send(Frame::announce(self.room_id, payload).with_from(self.client_id))
            .await;
    }

    /// Ship queued transactions. Returns `false` on transport failure, with
    /// the unsent tail requeued in order.
    async fn drain_outbox(&self, link: &mut RoomLink) -> bool {
        let txns = self.doc.lock().await.take_outbox();
        for (index, txn) in txns.iter().enumerate() {
            let Ok(payload) = serde_json::to_value(txn) else {
                continue;
            };
            let frame = Frame::commit(self.room_id, payload).with_from(self.client_id);
            if link.outbound.send(frame).await.is_err() {
                self.doc.lock().await.requeue(txns[index..].to_vec());
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
