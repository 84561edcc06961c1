use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use super::*;
use crate::crdt::Element;
use crate::session::Identity;
use crate::storage::{MemoryStore, RoomContent};
use crate::transport::LocalHub;

/// Poll an async condition until it holds or the deadline passes.
macro_rules! eventually {
    ($what:expr, $cond:expr) => {{
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            if $cond {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {}",
                $what
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }};
}

struct Rig {
    hub: LocalHub,
    store: Arc<MemoryStore>,
    room_id: Uuid,
}

impl Rig {
    fn new() -> Self {
        Self { hub: LocalHub::new(), store: Arc::new(MemoryStore::new()), room_id: Uuid::new_v4() }
    }

    async fn join(&self, name: &str) -> RoomClient {
        self.join_with(name, SyncConfig::fast()).await
    }

    async fn join_with(&self, name: &str, config: SyncConfig) -> RoomClient {
        let session = Session::connect(Identity::new(Uuid::new_v4(), name, 1));
        let transport = Arc::new(self.hub.transport(self.room_id, session.client_id));
        let client = RoomClient::open(self.room_id, session, transport, self.store.clone(), config).await;
        // Join stamps are millisecond-grained; spacing the joins keeps
        // seniority deterministic for the assertions below.
        tokio::time::sleep(Duration::from_millis(5)).await;
        client
    }
}

fn elem(id: &str) -> Element {
    Element::new(id, "box", json!({}))
}

async fn ids(client: &RoomClient) -> Vec<String> {
    client
        .snapshot()
        .await
        .elements
        .into_iter()
        .map(|e| e.id)
        .collect()
}

#[tokio::test]
async fn concurrent_edits_replicate_and_converge() {
    let rig = Rig::new();
    let a = rig.join("a").await;
    let b = rig.join("b").await;

    a.apply(vec![EditOp::Append { element: elem("from-a") }]).await;
    b.apply(vec![
        EditOp::Append { element: elem("from-b") },
        EditOp::SetSetting { key: "canvas_height".into(), value: json!(1400) },
    ])
    .await;

    eventually!("both sessions hold both edits", {
        let left = a.snapshot().await;
        let right = b.snapshot().await;
        left == right && left.elements.len() == 2
    });
    assert_eq!(
        a.snapshot().await.settings.get("canvas_height"),
        Some(&json!(1400))
    );
    // Elements carry the writing session's user identity.
    assert!(
        a.snapshot()
            .await
            .elements
            .iter()
            .all(|e| e.author.is_some())
    );

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn late_joiner_catches_up_on_missed_history() {
    let rig = Rig::new();
    let a = rig.join("a").await;

    a.apply(vec![EditOp::Append { element: elem("early-1") }]).await;
    a.apply(vec![EditOp::Append { element: elem("early-2") }]).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Nothing was persisted yet; the history exchange alone must cover this.
    let b = rig.join("b").await;
    eventually!("late joiner converges", ids(&b).await == ids(&a).await && ids(&b).await.len() == 2);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn cursors_and_selections_reach_peers() {
    let rig = Rig::new();
    let a = rig.join("a").await;
    let b = rig.join("b").await;

    a.publish_cursor(42.0, 7.0, "canvas").await;
    a.publish_selection(vec!["el-1".into()], "canvas").await;

    eventually!("peer sees cursor and selection", {
        let peers = b.peers().await;
        peers.get(&a.client_id()).is_some_and(|view| {
            view.cursor.as_ref().is_some_and(|c| (c.x - 42.0).abs() < f64::EPSILON)
                && view.selection.as_ref().is_some_and(|s| s.element_ids == ["el-1"])
        })
    });

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn chat_bubble_is_cleared_after_display_window() {
    let rig = Rig::new();
    let config = SyncConfig { chat_ttl_ms: 120, ..SyncConfig::fast() };
    let a = rig.join_with("a", config).await;
    let b = rig.join_with("b", config).await;

    a.publish_chat("look here").await;
    eventually!("peer sees chat", {
        b.peers()
            .await
            .get(&a.client_id())
            .is_some_and(|view| view.chat.as_ref().is_some_and(|c| c.text == "look here"))
    });

    eventually!("chat expires", {
        b.peers()
            .await
            .get(&a.client_id())
            .is_some_and(|view| view.chat.is_none())
    });

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn exactly_one_leader_and_all_sessions_agree() {
    let rig = Rig::new();
    let a = rig.join("a").await;
    let b = rig.join("b").await;
    let c = rig.join("c").await;

    eventually!("all sessions agree on the earliest joiner", {
        a.is_leader()
            && b.leader().borrow().leader_id == Some(a.client_id())
            && c.leader().borrow().leader_id == Some(a.client_id())
    });
    assert!(!b.is_leader());
    assert!(!c.is_leader());

    a.close().await;
    b.close().await;
    c.close().await;
}

#[tokio::test]
async fn leader_disconnect_promotes_next_earliest_joiner() {
    let rig = Rig::new();
    let a = rig.join("a").await;
    let b = rig.join("b").await;
    let c = rig.join("c").await;

    eventually!("initial leader elected", a.is_leader());

    a.close().await;

    eventually!("next earliest joiner takes over", {
        b.is_leader() && c.leader().borrow().leader_id == Some(b.client_id())
    });

    b.close().await;
    c.close().await;
}

#[tokio::test]
async fn simultaneous_first_joiners_load_durable_content_once() {
    let rig = Rig::new();
    rig.store
        .seed(
            rig.room_id,
            RoomContent {
                elements: vec![elem("hero"), elem("footer")],
                settings: [("canvas_height".to_string(), json!(1200))].into(),
            },
        )
        .await;

    // Same-instant opens: neither session can see the other's load first.
    let session_a = Session::connect(Identity::new(Uuid::new_v4(), "a", 1));
    let session_b = Session::connect(Identity::new(Uuid::new_v4(), "b", 1));
    let transport_a = Arc::new(rig.hub.transport(rig.room_id, session_a.client_id));
    let transport_b = Arc::new(rig.hub.transport(rig.room_id, session_b.client_id));
    let (a, b) = tokio::join!(
        RoomClient::open(rig.room_id, session_a, transport_a, rig.store.clone(), SyncConfig::fast()),
        RoomClient::open(rig.room_id, session_b, transport_b, rig.store.clone(), SyncConfig::fast()),
    );

    eventually!("both sessions settle on a single copy", {
        let left = a.snapshot().await;
        left == b.snapshot().await && left.elements.len() == 2
    });
    assert_eq!(ids(&a).await, ["hero", "footer"]);
    assert!(a.bootstrap_status().borrow().is_some());
    assert!(b.bootstrap_status().borrow().is_some());

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn degraded_mode_still_accepts_local_edits() {
    let rig = Rig::new();
    rig.hub.set_offline(true);
    let a = rig.join("a").await;

    // Three failed retries, then the degraded flag goes up.
    eventually!("client degrades after capped retries", a.is_degraded());

    a.apply(vec![EditOp::Append { element: elem("offline-edit") }]).await;
    assert_eq!(ids(&a).await, ["offline-edit"]);

    // Manual retry after the network returns.
    rig.hub.set_offline(false);
    a.retry_now();
    eventually!("client recovers", !a.is_degraded());

    // The queued edit replicates to a fresh peer.
    let b = rig.join("b").await;
    eventually!("queued edit reaches the peer", ids(&b).await == ["offline-edit"]);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn leader_persists_merged_document_to_store() {
    let rig = Rig::new();
    let a = rig.join("a").await;
    let b = rig.join("b").await;

    eventually!("leader elected", a.is_leader());
    b.apply(vec![EditOp::Append { element: elem("from-follower") }]).await;

    eventually!("leader flushed the merged document", rig.store.write_count() >= 1);
    eventually!("store holds the follower's element", {
        rig.store
            .read(rig.room_id)
            .await
            .unwrap()
            .is_some_and(|content| content.elements.iter().any(|e| e.id == "from-follower"))
    });

    a.close().await;
    b.close().await;
}
