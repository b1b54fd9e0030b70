//! # Ringflow
//!
//! A decentralized ring workflow: a packet (a counter, a query and an
//! ordered list of peers) is handed one hop at a time through the ring.
//! Each peer evaluates a local predicate against the query, bumps the
//! counter on a match, advances the index and forwards the packet, or
//! retires it when the ring is exhausted.
//!
//! Peers never talk to each other. Each owns a namespace with pending,
//! claimed and done states on a shared store, and the atomic `claim` is
//! the only point of coordination.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ringflow::{Peer, PeerConfig};
//! use ringflow::core::{PacketName, PeerId};
//! use ringflow::eval::{DirSecrets, KeywordEvaluator};
//! use ringflow::store::FsStore;
//!
//! async fn example() -> ringflow::Result<()> {
//!     let store = Arc::new(FsStore::new("/srv/datasites"));
//!     let me = PeerId::new("alice@example.org")?;
//!
//!     let peer = Peer::new(
//!         me.clone(),
//!         store,
//!         Arc::new(KeywordEvaluator),
//!         Arc::new(DirSecrets::new("/etc/ringflow/secrets")),
//!         PeerConfig::default(),
//!     );
//!     peer.init().await?;
//!
//!     let ring = vec![me, PeerId::new("bob@example.org")?];
//!     peer.originate(&PacketName::new("data")?, ring, "is it raining").await?;
//!
//!     let report = peer.poll().await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `ringflow::core` - Packet, identifiers, codec, chunker, hop conventions
//! - `ringflow::store` - PacketStore and its backends
//! - `ringflow::eval` - Predicate evaluators and secret sources

pub mod config;
pub mod context;
pub mod error;
pub mod peer;
pub mod processor;
mod recovery;
pub mod router;

// Re-export component crates
pub use ringflow_core as core;
pub use ringflow_eval as eval;
pub use ringflow_store as store;

// Re-export main types for convenience
pub use config::{ConfigError, RingConfig};
pub use context::PeerContext;
pub use error::{FailureKind, Result, RingError};
pub use peer::{HopOutcome, Peer, PeerConfig, PeerStatus, PollReport};
pub use processor::{ClaimProcessor, Processed};
pub use router::{Routed, Router};

pub use ringflow_core::{HopConvention, PacketName, PeerId, RingPacket};
