//! Failure isolation and recovery across a ring.

mod common;

use std::sync::Arc;

use ringflow::eval::{ConstEvaluator, KeywordEvaluator};
use ringflow::store::{MemoryStore, PacketState, PacketStore};
use ringflow::{PeerConfig, RingError, RingPacket};
use ringflow_testkit::{
    claim, name, peer, ring, FailingEvaluator, FaultyStore, RecordingEvaluator, RingFixture,
};

use common::{const_peer, drive, eager_recovery, peer_with};

#[tokio::test]
async fn test_evaluation_failure_is_retried_next_cycle() {
    let store = Arc::new(MemoryStore::new());
    let broken = peer_with(
        &peer("a"),
        &store,
        Arc::new(FailingEvaluator),
        PeerConfig::default(),
    );
    broken.init().await.unwrap();
    store.ensure_namespace(&peer("b")).await.unwrap();
    broken
        .originate(&name("data"), ring(&["a", "b"]), "x")
        .await
        .unwrap();

    let report = broken.poll().await.unwrap();
    assert_eq!(report.evaluation_failures, 1);
    assert_eq!(report.claimed, 1);
    let status = broken.status().await.unwrap();
    assert!(status.claimed.is_empty());
    assert_eq!(status.pending, vec![name("data")]);
    assert!(store.list_pending(&peer("b")).await.unwrap().is_empty());

    // The very next cycle, with a working evaluator, processes it.
    let fixed = const_peer(&peer("a"), &store, true, PeerConfig::default());
    let report = fixed.poll().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.forwarded, 1);

    let at_b = claim(store.as_ref(), &peer("b"), &name("data")).await;
    let packet = store.read(&at_b).await.unwrap();
    assert_eq!(packet.counter, 1);
    assert_eq!(packet.current_index, 0);
}

#[tokio::test]
async fn test_delivery_failure_is_retried_next_cycle_without_reevaluation() {
    let store = Arc::new(FaultyStore::new(MemoryStore::new()));
    let recorder = Arc::new(RecordingEvaluator::new(ConstEvaluator(true)));
    let a = peer_with(&peer("a"), &store, recorder.clone(), PeerConfig::default());
    a.init().await.unwrap();
    store.ensure_namespace(&peer("b")).await.unwrap();
    a.originate(&name("data"), ring(&["a", "b"]), "x").await.unwrap();

    store.block_deliveries_to(&peer("b"));
    let report = a.poll().await.unwrap();
    assert_eq!(report.delivery_failures, 1);
    assert_eq!(recorder.calls().len(), 1);

    let status = a.status().await.unwrap();
    assert_eq!(status.claimed.len(), 1);
    assert!(status.claimed[0].staged);

    store.unblock_deliveries_to(&peer("b"));
    let report = a.poll().await.unwrap();
    assert_eq!(report.recovered, 1);
    assert_eq!(report.forwarded, 1);
    assert_eq!(recorder.calls().len(), 1);

    let at_b = claim(store.as_ref(), &peer("b"), &name("data")).await;
    assert_eq!(store.read(&at_b).await.unwrap().counter, 1);
}

#[tokio::test]
async fn test_delivery_keeps_retrying_while_target_is_down() {
    let store = Arc::new(FaultyStore::new(MemoryStore::new()));
    let a = const_peer(&peer("a"), &store, true, PeerConfig::default());
    a.init().await.unwrap();
    store.ensure_namespace(&peer("b")).await.unwrap();
    a.originate(&name("data"), ring(&["a", "b"]), "x").await.unwrap();

    store.block_deliveries_to(&peer("b"));
    assert_eq!(a.poll().await.unwrap().delivery_failures, 1);
    assert_eq!(a.poll().await.unwrap().delivery_failures, 1);

    store.unblock_deliveries_to(&peer("b"));
    let report = a.poll().await.unwrap();
    assert_eq!(report.recovered, 1);
    assert_eq!(report.failures(), 0);
    assert_eq!(store.list_pending(&peer("b")).await.unwrap().len(), 1);
    assert!(a.status().await.unwrap().claimed.is_empty());
}

#[tokio::test]
async fn test_one_bad_packet_does_not_stop_the_others() {
    let store = Arc::new(FaultyStore::new(MemoryStore::new()));
    let a = const_peer(&peer("a"), &store, false, PeerConfig::default());
    a.init().await.unwrap();
    store.ensure_namespace(&peer("b")).await.unwrap();
    store.ensure_namespace(&peer("c")).await.unwrap();

    a.originate(&name("to-b"), ring(&["a", "b"]), "x").await.unwrap();
    a.originate(&name("to-c"), ring(&["a", "c"]), "x").await.unwrap();
    a.originate(&name("solo"), ring(&["a"]), "x").await.unwrap();
    store
        .inner()
        .insert_raw(&peer("a"), PacketState::Pending, &name("junk"), &b"not json"[..])
        .unwrap();
    store.block_deliveries_to(&peer("b"));

    let report = a.poll().await.unwrap();
    assert_eq!(report.claimed, 4);
    assert_eq!(report.forwarded, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.delivery_failures, 1);
    assert_eq!(report.corrupt, 1);
    assert_eq!(report.failures(), 2);

    assert_eq!(store.list_pending(&peer("c")).await.unwrap().len(), 1);
    assert_eq!(a.status().await.unwrap().claimed.len(), 2);
}

#[tokio::test]
async fn test_storage_exhaustion_aborts_the_cycle() {
    let store = Arc::new(FaultyStore::new(MemoryStore::new()));
    let a = const_peer(&peer("a"), &store, false, PeerConfig::default());
    a.init().await.unwrap();
    a.originate(&name("data"), ring(&["a"]), "x").await.unwrap();

    store.set_exhausted(true);
    let err = a.poll().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, RingError::Store(_)));

    store.set_exhausted(false);
    assert_eq!(a.status().await.unwrap().pending, vec![name("data")]);
}

#[tokio::test]
async fn test_conflicting_packet_at_target_is_delivery_failure() {
    let store = Arc::new(MemoryStore::new());
    let a = const_peer(&peer("a"), &store, false, PeerConfig::default());
    a.init().await.unwrap();
    store.ensure_namespace(&peer("b")).await.unwrap();

    let theirs = RingPacket::new(ring(&["b", "z"]), "another query");
    store.submit(&peer("b"), &name("data"), &theirs).await.unwrap();
    a.originate(&name("data"), ring(&["a", "b"]), "x").await.unwrap();

    let report = a.poll().await.unwrap();
    assert_eq!(report.delivery_failures, 1);

    // The occupant is untouched.
    let at_b = claim(store.as_ref(), &peer("b"), &name("data")).await;
    assert_eq!(store.read(&at_b).await.unwrap(), theirs);
}

#[tokio::test]
async fn test_crash_after_delivery_is_detected_on_recovery() {
    let fixture = RingFixture::new(&["a", "b"]);
    let store = fixture.fs_store();
    fixture.init(store.as_ref()).await;

    // State left by a peer that crashed between writing the target copy
    // and removing its own.
    let packet = RingPacket::new(fixture.ring(), "x");
    let processed = packet.advanced(true);
    store.submit(&peer("a"), &name("data"), &packet).await.unwrap();
    let claimed = claim(store.as_ref(), &peer("a"), &name("data")).await;
    store.write(&claimed, &processed).await.unwrap();
    store.submit(&peer("b"), &name("data"), &processed).await.unwrap();

    let a = const_peer(&peer("a"), &store, true, eager_recovery());
    let report = a.poll().await.unwrap();
    assert_eq!(report.recovered, 1);
    assert_eq!(report.forwarded, 1);
    assert!(a.status().await.unwrap().claimed.is_empty());

    let pending_at_b = store.list_pending(&peer("b")).await.unwrap();
    assert_eq!(pending_at_b.len(), 1);
    let at_b = claim(store.as_ref(), &peer("b"), &name("data")).await;
    assert_eq!(store.read(&at_b).await.unwrap(), processed);
}

#[tokio::test]
async fn test_recovery_on_sqlite_finishes_the_ring() {
    let fixture = RingFixture::new(&["a", "b"]);
    let store = fixture.sqlite_store();
    fixture.init(store.as_ref()).await;

    let packet = RingPacket::new(fixture.ring(), "x");
    store.submit(&peer("a"), &name("data"), &packet).await.unwrap();
    // Claimed by a poller that then vanished.
    claim(store.as_ref(), &peer("a"), &name("data")).await;

    let peers = vec![
        const_peer(&peer("a"), &store, true, eager_recovery()),
        const_peer(&peer("b"), &store, true, eager_recovery()),
    ];
    let report = drive(&peers).await;
    assert_eq!(report.requeued, 1);
    assert_eq!(report.completed, 1);

    let done = store.read_done(&peer("b"), &name("data")).await.unwrap().unwrap();
    assert_eq!(done.counter, 2);
    assert_eq!(done.hops_completed(), 2);
}

#[tokio::test]
async fn test_short_circuit_across_a_hop() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Arc::new(RecordingEvaluator::new(KeywordEvaluator));
    let a = ringflow::Peer::new(
        peer("a"),
        Arc::clone(&store),
        recorder.clone(),
        Arc::new(ringflow::eval::StaticSecrets::new(["raining", "sunny", "snow"])),
        PeerConfig {
            max_tokens: std::num::NonZeroUsize::new(2).unwrap(),
            ..PeerConfig::default()
        },
    );
    a.init().await.unwrap();
    a.originate(&name("data"), ring(&["a"]), "is it raining today in london")
        .await
        .unwrap();

    let report = a.poll().await.unwrap();
    assert_eq!(report.matched, 1);

    // "is it" against all three secrets, then "raining today" matches first.
    let calls = recorder.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(
        calls.last().unwrap(),
        &("raining today".to_string(), "raining".to_string())
    );
}
