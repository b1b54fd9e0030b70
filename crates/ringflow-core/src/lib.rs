//! # Ringflow Core
//!
//! Pure primitives for the ringflow handoff protocol: packets, peers,
//! wire encoding, query chunking, and hop routing decisions.
//!
//! This crate contains no I/O, no storage, no evaluation backends. It is
//! pure computation over the packet record that travels around a ring.
//!
//! ## Key Types
//!
//! - [`RingPacket`] - The mutable record handed from peer to peer
//! - [`PeerId`] - Identity of a ring participant (a namespace on the shared root)
//! - [`PacketName`] - Name of a packet inside a peer namespace
//! - [`Codec`] - Wire encoding (JSON by default, CBOR optional)
//! - [`HopConvention`] - How `current_index` maps onto ring positions
//!
//! ## Chunking
//!
//! Long queries are split into whitespace-token chunks with [`chunk`]. The
//! returned iterator is lazy and can be cloned to restart it.

pub mod chunk;
pub mod codec;
pub mod error;
pub mod packet;
pub mod route;
pub mod types;

pub use chunk::{chunk, Chunks, DEFAULT_MAX_TOKENS};
pub use codec::Codec;
pub use error::{CoreError, Result};
pub use packet::RingPacket;
pub use route::{HopConvention, RouteDecision};
pub use types::{PacketName, PeerId};
