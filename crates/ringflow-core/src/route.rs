//! Hop conventions and routing decisions.
//!
//! Two conventions for `current_index` exist in deployed rings:
//!
//! ```text
//! LastCompleted (default)          NextTarget
//! index = position of the last     index = position of the peer the
//!         peer that finished a hop         packet is sent to next
//!
//! next peer = ring[index + 1]      next peer = ring[index]
//! terminal when index + 1 >= len   terminal when index >= len
//! N peers -> N hops                N peers -> N + 1 hops (origin first)
//! ```
//!
//! Both advance the index by exactly one per hop; they only differ in how
//! the index maps onto ring positions.

use serde::{Deserialize, Serialize};

use crate::packet::RingPacket;
use crate::types::PeerId;

/// Mapping from `current_index` to ring positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HopConvention {
    #[default]
    LastCompleted,
    NextTarget,
}

/// Where a packet goes after a hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// The ring is exhausted; retire the packet.
    Terminal,
    /// Hand the packet to this peer's pending state.
    Forward(PeerId),
}

impl HopConvention {
    /// Ring position of the peer due to receive the packet next.
    pub fn next_position(self, packet: &RingPacket) -> i64 {
        match self {
            HopConvention::LastCompleted => packet.current_index + 1,
            HopConvention::NextTarget => packet.current_index,
        }
    }

    /// Whether no further hop is due.
    pub fn is_terminal(self, packet: &RingPacket) -> bool {
        let len = i64::try_from(packet.ring.len()).unwrap_or(i64::MAX);
        self.next_position(packet) >= len
    }

    /// Route a packet that has just completed a hop.
    pub fn decide(self, packet: &RingPacket) -> RouteDecision {
        let next = usize::try_from(self.next_position(packet))
            .ok()
            .and_then(|pos| packet.ring.get(pos));
        match next {
            Some(peer) => RouteDecision::Forward(peer.clone()),
            None => RouteDecision::Terminal,
        }
    }

    /// Peer whose pending state receives a freshly created packet.
    ///
    /// Under `LastCompleted` that is the first ring member. Under
    /// `NextTarget` the originator performs the first hop itself. An empty
    /// ring under `LastCompleted` stays with the originator, which retires
    /// it without a hop.
    pub fn first_holder<'a>(self, packet: &'a RingPacket, origin: &'a PeerId) -> &'a PeerId {
        match self {
            HopConvention::LastCompleted => packet.ring.first().unwrap_or(origin),
            HopConvention::NextTarget => origin,
        }
    }
}
