//! RingPacket: the record that travels around the ring.
//!
//! One packet is one in-flight instance of the workflow. It carries the
//! fixed participant list, the shared counter, the position index and the
//! query every peer evaluates.
//!
//! ## Wire Contract
//!
//! ```text
//! {"ring": ["a", "b"], "data": 0, "current_index": -1, "query": "...", "id": "9f2c..."}
//! ```
//!
//! `data` is the counter. On decode, `prompt` is accepted in place of
//! `query`, and missing `data` / `current_index` default to `0` / `-1`.
//! `id` tells apart two runs submitted under the same name. Packets from
//! writers that predate it carry none and are told apart by ring and
//! query alone.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::PeerId;

/// Index of a packet that no peer has processed yet.
pub const INITIAL_INDEX: i64 = -1;

fn initial_index() -> i64 {
    INITIAL_INDEX
}

/// The packet record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingPacket {
    /// Ordered participants. Fixed at creation.
    pub ring: Vec<PeerId>,

    /// Counter of hops where the predicate matched.
    #[serde(rename = "data", default)]
    pub counter: u64,

    /// Position index. Grows by exactly one per hop.
    #[serde(default = "initial_index")]
    pub current_index: i64,

    /// Query evaluated by every peer. Never mutated.
    #[serde(alias = "prompt")]
    pub query: String,

    /// Instance id, set once at creation. Empty on legacy packets.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

/// A fresh random instance id.
fn instance_id() -> String {
    use rand::Rng;
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

impl RingPacket {
    /// Create a fresh packet: counter 0, index -1, a new instance id.
    pub fn new(ring: Vec<PeerId>, query: impl Into<String>) -> Self {
        Self {
            ring,
            counter: 0,
            current_index: INITIAL_INDEX,
            query: query.into(),
            id: instance_id(),
        }
    }

    /// Number of hops this packet has completed.
    pub fn hops_completed(&self) -> i64 {
        self.current_index - INITIAL_INDEX
    }

    /// Check the invariants every stored packet must satisfy.
    ///
    /// - `current_index >= -1`
    /// - `counter <= hops completed`
    pub fn validate(&self) -> Result<()> {
        if self.current_index < INITIAL_INDEX {
            return Err(CoreError::IndexUnderflow(self.current_index));
        }
        let hops = self.hops_completed();
        if i64::try_from(self.counter).map_or(true, |c| c > hops) {
            return Err(CoreError::CounterAhead {
                data: self.counter,
                hops,
            });
        }
        Ok(())
    }

    /// Apply one hop: advance the index and count a match.
    ///
    /// This is the only mutation a packet ever sees.
    pub fn advanced(&self, matched: bool) -> Self {
        Self {
            ring: self.ring.clone(),
            counter: self.counter + u64::from(matched),
            current_index: self.current_index + 1,
            query: self.query.clone(),
            id: self.id.clone(),
        }
    }

    /// Whether two packets are copies of the same workflow instance.
    ///
    /// Ring, query and id never change, so equal values identify the
    /// instance at any hop.
    pub fn same_lineage(&self, other: &RingPacket) -> bool {
        self.id == other.id && self.ring == other.ring && self.query == other.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(ids: &[&str]) -> Vec<PeerId> {
        ids.iter().map(|s| PeerId::new(*s).unwrap()).collect()
    }

    #[test]
    fn test_new_packet_starts_before_ring() {
        let packet = RingPacket::new(ring(&["a", "b"]), "x");
        assert_eq!(packet.counter, 0);
        assert_eq!(packet.current_index, -1);
        assert_eq!(packet.hops_completed(), 0);
        packet.validate().unwrap();
    }

    #[test]
    fn test_advanced_counts_match() {
        let packet = RingPacket::new(ring(&["a"]), "x");

        let hit = packet.advanced(true);
        assert_eq!(hit.counter, 1);
        assert_eq!(hit.current_index, 0);

        let miss = packet.advanced(false);
        assert_eq!(miss.counter, 0);
        assert_eq!(miss.current_index, 0);

        // Source untouched.
        assert_eq!(packet.current_index, -1);
    }

    #[test]
    fn test_validate_rejects_counter_ahead() {
        let mut packet = RingPacket::new(ring(&["a", "b"]), "x");
        packet.counter = 1;
        assert!(matches!(
            packet.validate(),
            Err(CoreError::CounterAhead { data: 1, hops: 0 })
        ));

        packet.current_index = 0;
        packet.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_index_underflow() {
        let mut packet = RingPacket::new(ring(&["a"]), "x");
        packet.current_index = -2;
        assert!(matches!(packet.validate(), Err(CoreError::IndexUnderflow(-2))));
    }

    #[test]
    fn test_same_lineage_ignores_progress() {
        let packet = RingPacket::new(ring(&["a", "b"]), "x");
        let later = packet.advanced(true);
        assert!(packet.same_lineage(&later));

        let other = RingPacket::new(ring(&["a", "b"]), "y");
        assert!(!packet.same_lineage(&other));
    }

    #[test]
    fn test_resubmitted_packet_is_a_new_instance() {
        let first = RingPacket::new(ring(&["a", "b"]), "x");
        let second = RingPacket::new(ring(&["a", "b"]), "x");
        assert_ne!(first.id, second.id);
        assert!(!first.same_lineage(&second));
        assert!(!first.advanced(true).same_lineage(&second));
    }

    #[test]
    fn test_legacy_packets_compare_by_ring_and_query() {
        let mut old = RingPacket::new(ring(&["a", "b"]), "x");
        old.id.clear();
        let mut copy = old.advanced(false);
        assert!(old.same_lineage(&copy));

        copy.id = instance_id();
        assert!(!old.same_lineage(&copy));
    }
}
