//! Shared helpers for ringflow integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ringflow::eval::{ConstEvaluator, PredicateEvaluator, StaticSecrets};
use ringflow::store::PacketStore;
use ringflow::{Peer, PeerConfig, PeerId, PollReport};

/// A peer whose predicate always answers `verdict`.
pub fn const_peer<S: PacketStore + 'static>(
    id: &PeerId,
    store: &Arc<S>,
    verdict: bool,
    config: PeerConfig,
) -> Peer<S> {
    peer_with(id, store, Arc::new(ConstEvaluator(verdict)), config)
}

pub fn peer_with<S: PacketStore + 'static>(
    id: &PeerId,
    store: &Arc<S>,
    evaluator: Arc<dyn PredicateEvaluator>,
    config: PeerConfig,
) -> Peer<S> {
    Peer::new(
        id.clone(),
        Arc::clone(store),
        evaluator,
        Arc::new(StaticSecrets::new(["the secret"])),
        config,
    )
}

/// Config with recovery applying to every claim immediately.
pub fn eager_recovery() -> PeerConfig {
    PeerConfig {
        stale_after: Some(Duration::ZERO),
        ..PeerConfig::default()
    }
}

/// Poll every peer in turn until a full round claims nothing.
///
/// Returns the summed report. Panics if the ring does not settle.
pub async fn drive<S: PacketStore + 'static>(peers: &[Peer<S>]) -> PollReport {
    let mut total = PollReport::default();
    for _ in 0..64 {
        let mut progress = 0;
        for peer in peers {
            let report = peer.poll().await.unwrap();
            progress += report.claimed + report.recovered + report.requeued;
            add(&mut total, &report);
        }
        if progress == 0 {
            return total;
        }
    }
    panic!("ring did not settle");
}

fn add(total: &mut PollReport, report: &PollReport) {
    total.claimed += report.claimed;
    total.claim_lost += report.claim_lost;
    total.matched += report.matched;
    total.forwarded += report.forwarded;
    total.completed += report.completed;
    total.corrupt += report.corrupt;
    total.evaluation_failures += report.evaluation_failures;
    total.delivery_failures += report.delivery_failures;
    total.recovered += report.recovered;
    total.requeued += report.requeued;
}
