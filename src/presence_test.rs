use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use uuid::Uuid;

use super::*;
use crate::clock::JoinStamp;
use crate::session::{Identity, Session};

fn session(name: &str) -> Session {
    Session::connect(Identity::new(Uuid::new_v4(), name, 1))
}

fn channel(name: &str) -> PresenceChannel {
    PresenceChannel::new(&session(name), PresenceTtl::default())
}

/// Announce from a standalone peer channel into `target`.
fn cross_publish(peer: &mut PresenceChannel, target: &mut PresenceChannel) -> PeerChange {
    target.apply_peer(peer.publish_cursor(1.0, 2.0, "canvas"))
}

#[test]
fn publish_bumps_seq_and_sets_timestamp() {
    let mut channel = channel("ada");
    let first = channel.publish_cursor(10.0, 20.0, "canvas");
    let second = channel.publish_cursor(11.0, 20.0, "canvas");

    assert_eq!(first.seq + 1, second.seq);
    assert!(second.record.cursor.as_ref().is_some_and(|c| c.at > 0));
}

#[test]
fn apply_peer_distinguishes_join_and_update() {
    let mut reader = channel("reader");
    let mut peer = channel("peer");

    assert_eq!(cross_publish(&mut peer, &mut reader), PeerChange::Joined);
    assert_eq!(cross_publish(&mut peer, &mut reader), PeerChange::Updated);
    assert_eq!(reader.session_count(), 2);
}

#[test]
fn out_of_order_announce_is_dropped() {
    let mut reader = channel("reader");
    let mut peer = channel("peer");

    let older = peer.publish_cursor(1.0, 1.0, "canvas");
    let newer = peer.publish_cursor(9.0, 9.0, "canvas");

    assert_eq!(reader.apply_peer(newer), PeerChange::Joined);
    assert_eq!(reader.apply_peer(older), PeerChange::Stale);

    let view = reader.peers_view(now_ms());
    let cursor = view[&peer.client_id()].cursor.as_ref().expect("cursor");
    assert!((cursor.x - 9.0).abs() < f64::EPSILON);
}

#[test]
fn own_announce_echo_is_ignored() {
    let mut channel = channel("ada");
    let echo = channel.publish_cursor(1.0, 1.0, "canvas");
    assert_eq!(channel.apply_peer(echo), PeerChange::Stale);
    assert_eq!(channel.session_count(), 1);
}

#[test]
fn cursor_expires_after_five_seconds() {
    let mut reader = channel("reader");
    let mut peer = channel("peer");
    let announce = peer.publish_cursor(5.0, 5.0, "canvas");
    let published_at = announce.record.cursor.as_ref().expect("cursor").at;
    reader.apply_peer(announce);

    let fresh = reader.peers_view(published_at + 4_999);
    assert!(fresh[&peer.client_id()].cursor.is_some());

    let stale = reader.peers_view(published_at + 5_001);
    assert!(stale[&peer.client_id()].cursor.is_none());
}

#[test]
fn selection_expires_after_ten_seconds() {
    let mut reader = channel("reader");
    let mut peer = channel("peer");
    let announce = peer.publish_selection(vec!["el-1".into(), "el-2".into()], "canvas");
    let published_at = announce.record.selection.as_ref().expect("selection").at;
    reader.apply_peer(announce);

    let fresh = reader.peers_view(published_at + 9_000);
    assert_eq!(
        fresh[&peer.client_id()]
            .selection
            .as_ref()
            .map(|s| s.element_ids.len()),
        Some(2)
    );

    let stale = reader.peers_view(published_at + 10_001);
    assert!(stale[&peer.client_id()].selection.is_none());
}

#[test]
fn chat_expires_from_receipt_even_without_retraction() {
    let mut reader = channel("reader");
    let mut peer = channel("peer");
    reader.apply_peer(peer.publish_chat("hello"));
    let received_at = now_ms();

    let fresh = reader.peers_view(received_at + 9_000);
    assert_eq!(
        fresh[&peer.client_id()].chat.as_ref().map(|c| c.text.as_str()),
        Some("hello")
    );

    // The sender never cleared its copy; the reader clears on its own.
    let stale = reader.peers_view(received_at + 10_500);
    assert!(stale[&peer.client_id()].chat.is_none());
}

#[test]
fn sender_courtesy_clear_retracts_chat() {
    let mut reader = channel("reader");
    let mut peer = channel("peer");
    reader.apply_peer(peer.publish_chat("hello"));

    let cleared = peer.clear_chat().expect("chat was set");
    reader.apply_peer(cleared);
    assert!(reader.peers_view(now_ms())[&peer.client_id()].chat.is_none());

    assert!(peer.clear_chat().is_none());
}

#[test]
fn remove_peer_retracts_record_and_claim() {
    let mut reader = channel("reader");
    let mut peer = channel("peer");
    let claim = LeaderClaim {
        leader_id: peer.client_id(),
        leader_name: "peer".into(),
        elected_at_version: now_ms(),
        total_sessions: 2,
    };
    reader.apply_peer(peer.set_leader_claim(Some(claim)));
    assert!(
        reader
            .roster()
            .iter()
            .any(|entry| entry.leader_claim.is_some())
    );

    assert!(reader.remove_peer(peer.client_id()));
    assert_eq!(reader.session_count(), 1);
    assert!(
        reader
            .roster()
            .iter()
            .all(|entry| entry.leader_claim.is_none())
    );
    assert!(!reader.remove_peer(peer.client_id()));
}

#[test]
fn subscribers_fire_on_every_peer_change() {
    let mut reader = channel("reader");
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    reader.subscribe(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let mut peer = channel("peer");
    cross_publish(&mut peer, &mut reader);
    cross_publish(&mut peer, &mut reader);
    reader.remove_peer(peer.client_id());

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn roster_includes_self_and_orders_by_stamp_externally() {
    let local = Session::with_stamp(
        Identity::new(Uuid::new_v4(), "local", 1),
        JoinStamp::at(2_000, 0, Uuid::new_v4()),
    );
    let mut channel = PresenceChannel::new(&local, PresenceTtl::default());

    let peer = Session::with_stamp(
        Identity::new(Uuid::new_v4(), "elder", 1),
        JoinStamp::at(1_000, 0, Uuid::new_v4()),
    );
    let mut peer_channel = PresenceChannel::new(&peer, PresenceTtl::default());
    channel.apply_peer(peer_channel.publish_cursor(0.0, 0.0, "canvas"));

    let mut roster = channel.roster();
    roster.sort_by_key(|entry| entry.join_stamp);
    assert_eq!(roster.len(), 2);
    assert_eq!(roster[0].display_name, "elder");
    assert_eq!(roster[1].display_name, "local");
}
