//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use ringflow_core::{PeerId, RingPacket};

/// Generate a peer id shaped like an email address.
pub fn peer_id() -> impl Strategy<Value = PeerId> {
    "[a-z][a-z0-9]{0,7}@[a-z]{1,6}\\.org".prop_map(|s| PeerId::new(s).unwrap())
}

/// Generate a ring of distinct peers with up to `max_len` members.
pub fn ring(max_len: usize) -> impl Strategy<Value = Vec<PeerId>> {
    prop::collection::btree_set(peer_id(), 0..=max_len)
        .prop_map(|set: BTreeSet<PeerId>| set.into_iter().collect())
        .prop_shuffle()
}

/// Generate a query of whitespace-separated words.
pub fn query() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,8}", 0..40).prop_map(|words| words.join(" "))
}

/// Generate a valid packet at any point of its journey.
pub fn packet() -> impl Strategy<Value = RingPacket> {
    (ring(6), -1i64..8, query())
        .prop_flat_map(|(ring, index, query)| {
            let max_counter = (index + 1) as u64;
            (Just(ring), 0..=max_counter, Just(index), Just(query))
        })
        .prop_map(|(ring, counter, current_index, query)| RingPacket {
            ring,
            counter,
            current_index,
            query,
            id: String::new(),
        })
}

/// Generate a fresh packet together with one verdict per ring member.
pub fn ring_with_verdicts(max_len: usize) -> impl Strategy<Value = (Vec<PeerId>, Vec<bool>)> {
    ring(max_len).prop_flat_map(|ring| {
        let len = ring.len();
        (Just(ring), prop::collection::vec(any::<bool>(), len))
    })
}
