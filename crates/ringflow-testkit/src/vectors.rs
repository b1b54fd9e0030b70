//! Wire vectors for packet files.
//!
//! These are packet bodies as other ring participants write them
//! (Python's `json.dump` spacing, `prompt` instead of `query`, missing
//! fields). Every implementation must read them the same way and route
//! them to the same next peer.

use ringflow_core::{Codec, HopConvention, PeerId, RingPacket, RouteDecision};

/// A wire vector.
#[derive(Debug, Clone)]
pub struct WireVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Body exactly as found in a pending folder.
    pub json: &'static str,
    pub ring: &'static [&'static str],
    pub data: u64,
    pub current_index: i64,
    pub query: &'static str,
    /// Next peer after one hop under `LastCompleted`; `None` when that hop
    /// retires the packet.
    pub next_after_hop: Option<&'static str>,
}

impl WireVector {
    /// The packet this body decodes to.
    pub fn expected(&self) -> RingPacket {
        RingPacket {
            ring: self
                .ring
                .iter()
                .map(|id| PeerId::new(*id).unwrap())
                .collect(),
            counter: self.data,
            current_index: self.current_index,
            query: self.query.to_string(),
            id: String::new(),
        }
    }
}

/// Get all wire vectors.
pub fn all_vectors() -> Vec<WireVector> {
    vec![
        WireVector {
            name: "fresh two-peer ring",
            json: r#"{"ring": ["alice@openmined.org", "bob@openmined.org"], "data": 0, "current_index": -1, "query": "is it raining in london"}"#,
            ring: &["alice@openmined.org", "bob@openmined.org"],
            data: 0,
            current_index: -1,
            query: "is it raining in london",
            next_after_hop: Some("bob@openmined.org"),
        },
        WireVector {
            name: "midway with prompt alias",
            json: r#"{"ring": ["a@x.org", "b@x.org", "c@x.org"], "data": 1, "current_index": 0, "prompt": "who likes tea"}"#,
            ring: &["a@x.org", "b@x.org", "c@x.org"],
            data: 1,
            current_index: 0,
            query: "who likes tea",
            next_after_hop: Some("c@x.org"),
        },
        WireVector {
            name: "defaults for missing fields",
            json: r#"{"ring": ["solo@x.org"], "query": "anything"}"#,
            ring: &["solo@x.org"],
            data: 0,
            current_index: -1,
            query: "anything",
            next_after_hop: None,
        },
        WireVector {
            name: "unknown fields ignored",
            json: r#"{"ring": ["a@x.org", "b@x.org"], "data": 0, "current_index": -1, "query": "q", "sent_by": "a@x.org", "ts": 1700000000}"#,
            ring: &["a@x.org", "b@x.org"],
            data: 0,
            current_index: -1,
            query: "q",
            next_after_hop: Some("b@x.org"),
        },
        WireVector {
            name: "compact encoding",
            json: r#"{"ring":["a@x.org","b@x.org"],"data":2,"current_index":1,"query":"done"}"#,
            ring: &["a@x.org", "b@x.org"],
            data: 2,
            current_index: 1,
            query: "done",
            next_after_hop: None,
        },
    ]
}

/// Bodies that must be rejected as corrupt.
pub fn corrupt_vectors() -> Vec<(&'static str, &'static [u8])> {
    vec![
        ("not json", b"{oops"),
        ("empty file", b""),
        ("missing ring", br#"{"data": 0, "current_index": -1, "query": "q"}"#),
        ("missing query", br#"{"ring": ["a"], "data": 0, "current_index": -1}"#),
        ("index below start", br#"{"ring": ["a"], "data": 0, "current_index": -2, "query": "q"}"#),
        ("counter ahead of hops", br#"{"ring": ["a", "b"], "data": 2, "current_index": 0, "query": "q"}"#),
        ("negative counter", br#"{"ring": ["a"], "data": -1, "current_index": 0, "query": "q"}"#),
        ("invalid peer id", br#"{"ring": ["../etc"], "data": 0, "current_index": -1, "query": "q"}"#),
    ]
}

/// Verify every vector decodes and routes as expected.
pub fn verify_all_vectors() -> Result<(), String> {
    for vector in all_vectors() {
        let packet = Codec::Json
            .decode(vector.json.as_bytes())
            .map_err(|e| format!("{}: {}", vector.name, e))?;
        if packet != vector.expected() {
            return Err(format!("{}: decoded {:?}", vector.name, packet));
        }

        let next = match HopConvention::LastCompleted.decide(&packet.advanced(false)) {
            RouteDecision::Forward(peer) => Some(peer),
            RouteDecision::Terminal => None,
        };
        if next.as_ref().map(PeerId::as_str) != vector.next_after_hop {
            return Err(format!("{}: routed to {:?}", vector.name, next));
        }
    }

    for (name, body) in corrupt_vectors() {
        if Codec::Json.decode(body).is_ok() {
            return Err(format!("{}: decoded but should be corrupt", name));
        }
    }
    Ok(())
}
