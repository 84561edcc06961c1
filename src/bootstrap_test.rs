use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::timeout;
use uuid::Uuid;

use super::*;
use crate::crdt::Element;
use crate::storage::{MemoryStore, StoreError};
use crate::transport::LocalHub;

struct FailingStore;

#[async_trait]
impl DurableStore for FailingStore {
    async fn read(&self, _room_id: Uuid) -> Result<Option<RoomContent>, StoreError> {
        Err(StoreError::Unavailable("store down".into()))
    }

    async fn write(&self, _room_id: Uuid, _content: &RoomContent) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store down".into()))
    }
}

fn shared_doc() -> Arc<Mutex<ReplicatedDocument>> {
    Arc::new(Mutex::new(ReplicatedDocument::new(Uuid::new_v4())))
}

fn stored_content() -> RoomContent {
    RoomContent {
        elements: vec![
            Element::new("hero", "section", json!({"y": 0})),
            Element::new("footer", "section", json!({"y": 800})),
        ],
        settings: [("canvas_height".to_string(), json!(1200))].into(),
    }
}

#[tokio::test]
async fn populated_document_skips_store_read() {
    let doc = shared_doc();
    doc.lock().await.apply(vec![EditOp::Append {
        element: Element::new("existing", "box", json!({})),
    }]);

    // A store that would fail loudly if consulted.
    let outcome = bootstrap_document(&doc, &FailingStore, Uuid::new_v4()).await;
    assert_eq!(outcome, BootstrapOutcome::AlreadyPopulated);
}

#[tokio::test]
async fn empty_document_loads_durable_content() {
    let doc = shared_doc();
    let store = MemoryStore::new();
    let room_id = Uuid::new_v4();
    store.seed(room_id, stored_content()).await;

    let outcome = bootstrap_document(&doc, &store, room_id).await;
    assert_eq!(outcome, BootstrapOutcome::Loaded);

    let view = doc.lock().await.snapshot();
    let ids: Vec<&str> = view.elements.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["hero", "footer"]);
    assert_eq!(view.settings.get("canvas_height"), Some(&json!(1200)));

    // The load is a transaction like any other, queued for replication.
    assert_eq!(doc.lock().await.outbox_len(), 1);
}

#[tokio::test]
async fn empty_store_means_valid_blank_room() {
    let doc = shared_doc();
    let store = MemoryStore::new();

    let outcome = bootstrap_document(&doc, &store, Uuid::new_v4()).await;
    assert_eq!(outcome, BootstrapOutcome::Blank);
    assert!(doc.lock().await.is_empty());
}

#[tokio::test]
async fn store_failure_degrades_to_blank_not_fatal() {
    let doc = shared_doc();
    let outcome = bootstrap_document(&doc, &FailingStore, Uuid::new_v4()).await;
    assert_eq!(outcome, BootstrapOutcome::BlankAfterError);
    assert!(doc.lock().await.is_empty());
}

#[tokio::test]
async fn guard_stops_second_loader_after_merge() {
    let room_id = Uuid::new_v4();
    let store = MemoryStore::new();
    store.seed(room_id, stored_content()).await;

    let first = shared_doc();
    let outcome = bootstrap_document(&first, &store, room_id).await;
    assert_eq!(outcome, BootstrapOutcome::Loaded);

    // The first loader's transaction reaches the second session between its
    // emptiness check and its insert; the guard catches it.
    let second = shared_doc();
    let loaded_txn = first.lock().await.take_outbox().remove(0);
    second.lock().await.integrate(&loaded_txn);

    let outcome = bootstrap_document(&second, &store, room_id).await;
    assert_eq!(outcome, BootstrapOutcome::AlreadyPopulated);
    assert_eq!(second.lock().await.snapshot().elements.len(), 2);
}

#[tokio::test]
async fn same_millisecond_loaders_converge_to_single_copy() {
    let room_id = Uuid::new_v4();
    let store = MemoryStore::new();
    store.seed(room_id, stored_content()).await;

    // Neither session sees the other's load before inserting.
    let first = shared_doc();
    let second = shared_doc();
    assert_eq!(bootstrap_document(&first, &store, room_id).await, BootstrapOutcome::Loaded);
    assert_eq!(bootstrap_document(&second, &store, room_id).await, BootstrapOutcome::Loaded);

    let from_first = first.lock().await.take_outbox();
    let from_second = second.lock().await.take_outbox();
    for txn in &from_second {
        first.lock().await.integrate(txn);
    }
    for txn in &from_first {
        second.lock().await.integrate(txn);
    }

    let left = first.lock().await.snapshot();
    let right = second.lock().await.snapshot();
    assert_eq!(left, right);

    let ids: Vec<&str> = left.elements.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["hero", "footer"], "content must appear exactly once");
}

// =============================================================================
// RECONNECTION
// =============================================================================

fn policy() -> ReconnectPolicy {
    ReconnectPolicy { max_retries: 3, backoff_ms: 20 }
}

#[tokio::test]
async fn reconnect_degrades_after_capped_attempts_then_manual_retry_recovers() {
    let hub = LocalHub::new();
    hub.set_offline(true);
    let transport = hub.transport(Uuid::new_v4(), Uuid::new_v4());

    let (degraded_tx, degraded_rx) = watch::channel(false);
    let (manual_tx, mut manual_rx) = mpsc::channel(1);

    let reacquire = reacquire_link(&transport, policy(), &degraded_tx, &mut manual_rx);
    tokio::pin!(reacquire);

    // The capped attempts all fail; the loop parks in degraded mode.
    assert!(
        timeout(Duration::from_millis(500), &mut reacquire)
            .await
            .is_err(),
        "loop must park awaiting manual retry"
    );
    assert!(*degraded_rx.borrow());

    // Network returns, consumer pushes the manual retry button.
    hub.set_offline(false);
    manual_tx.send(()).await.unwrap();

    let link = timeout(Duration::from_millis(500), &mut reacquire)
        .await
        .expect("manual retry should reconnect")
        .expect("link");
    assert!(!*degraded_rx.borrow());
    drop(link);
}

#[tokio::test]
async fn reconnect_returns_none_when_room_tears_down() {
    let hub = LocalHub::new();
    hub.set_offline(true);
    let transport = hub.transport(Uuid::new_v4(), Uuid::new_v4());

    let (degraded_tx, _degraded_rx) = watch::channel(false);
    let (manual_tx, mut manual_rx) = mpsc::channel::<()>(1);
    drop(manual_tx);

    let result = timeout(
        Duration::from_millis(500),
        reacquire_link(&transport, policy(), &degraded_tx, &mut manual_rx),
    )
    .await
    .expect("should give up promptly");
    assert!(result.is_none());
}
