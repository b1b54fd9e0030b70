//! Concurrent pollers over one namespace.
//!
//! Two processes running the same peer (an overlapping cron schedule, say)
//! must never process a packet twice.

mod common;

use std::sync::Arc;

use ringflow::eval::ConstEvaluator;
use ringflow::store::{ClaimResult, PacketHandle, PacketStore};
use ringflow::{PeerConfig, RingPacket};
use ringflow_testkit::{name, peer, RecordingEvaluator, RingFixture};

use common::{const_peer, peer_with};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_claims_on_filesystem_have_one_winner() {
    let fixture = RingFixture::new(&["a", "b"]);
    let store = fixture.fs_store();
    fixture.init(store.as_ref()).await;

    for round in 0..25 {
        let packet_name = name(&format!("race-{round}"));
        let packet = RingPacket::new(fixture.ring(), "x");
        store.submit(&peer("a"), &packet_name, &packet).await.unwrap();

        let handle = PacketHandle::new(peer("a"), packet_name);
        let (left, right) = tokio::join!(
            tokio::spawn({
                let store = Arc::clone(&store);
                let handle = handle.clone();
                async move { store.claim(&handle).await.unwrap() }
            }),
            tokio::spawn({
                let store = Arc::clone(&store);
                let handle = handle.clone();
                async move { store.claim(&handle).await.unwrap() }
            }),
        );
        let outcomes = [left.unwrap(), right.unwrap()];
        let winners = outcomes
            .iter()
            .filter(|o| matches!(o, ClaimResult::Claimed(_)))
            .count();
        assert_eq!(winners, 1, "round {round}: {outcomes:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_polls_process_each_packet_once() {
    let fixture = RingFixture::new(&["a", "b"]);
    let store = fixture.fs_store();
    fixture.init(store.as_ref()).await;

    let left_eval = Arc::new(RecordingEvaluator::new(ConstEvaluator(true)));
    let right_eval = Arc::new(RecordingEvaluator::new(ConstEvaluator(true)));
    let left = peer_with(&peer("a"), &store, left_eval.clone(), PeerConfig::default());
    let right = peer_with(&peer("a"), &store, right_eval.clone(), PeerConfig::default());

    let count = 20;
    for i in 0..count {
        left.originate(&name(&format!("packet-{i:02}")), fixture.ring(), "x")
            .await
            .unwrap();
    }

    let (l, r) = tokio::join!(left.poll(), right.poll());
    let (l, r) = (l.unwrap(), r.unwrap());

    assert_eq!(l.forwarded + r.forwarded, count);
    assert_eq!(l.claimed + r.claimed, count);
    assert_eq!(l.failures() + r.failures(), 0);
    assert_eq!(left_eval.calls().len() + right_eval.calls().len(), count);

    // Every packet arrived at b exactly once, counted once.
    let b = const_peer(&peer("b"), &store, false, PeerConfig::default());
    let status = b.status().await.unwrap();
    assert_eq!(status.pending.len(), count);
    b.poll().await.unwrap();
    for packet_name in store.list_done(&peer("b")).await.unwrap() {
        let done = store
            .read_done(&peer("b"), &packet_name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.counter, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_polls_on_sqlite() {
    let fixture = RingFixture::new(&["a", "b"]);
    // Separate connections, as two processes would have.
    let first = fixture.sqlite_store();
    let second = fixture.sqlite_store();
    fixture.init(first.as_ref()).await;

    let left = const_peer(&peer("a"), &first, false, PeerConfig::default());
    let right = const_peer(&peer("a"), &second, false, PeerConfig::default());
    for i in 0..10 {
        left.originate(&name(&format!("packet-{i}")), fixture.ring(), "x")
            .await
            .unwrap();
    }

    let (l, r) = tokio::join!(left.poll(), right.poll());
    let (l, r) = (l.unwrap(), r.unwrap());
    assert_eq!(l.forwarded + r.forwarded, 10);
    assert_eq!(first.list_pending(&peer("b")).await.unwrap().len(), 10);
}
