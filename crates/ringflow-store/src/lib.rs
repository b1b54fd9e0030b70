//! # Ringflow Store
//!
//! Claimable packet namespaces. Every peer owns a namespace with three
//! disjoint states, and a packet lives in exactly one state of exactly one
//! namespace at any time:
//!
//! ```text
//!            claim               move_to_done
//! pending ----------> claimed -----------------> done
//!    ^                   |
//!    |     deliver       |        release (recovery)
//!    +-------------------+----------------------> pending
//!   (other peer)
//! ```
//!
//! ## Key Types
//!
//! - [`PacketStore`] - The async trait every backend implements
//! - [`FsStore`] - Folders on a shared, synchronized filesystem
//! - [`SqliteStore`] - One SQLite database shared by all peers
//! - [`MemoryStore`] - In-process namespaces for tests
//! - [`ClaimResult`] - Outcome of the atomic claim
//! - [`DeliverResult`] / [`DoneResult`] - Outcomes of the routing moves
//!
//! ## Design Notes
//!
//! - **Exclusive claim**: `claim` is the only concurrency primitive. Two
//!   callers racing on the same handle get one `Claimed`, one `ClaimFailed`.
//! - **Staged writes**: the processed packet is staged next to the claimed
//!   one. A claimed packet with a staged body has already been evaluated,
//!   so re-driving it never evaluates (or counts) twice.
//! - **Idempotent delivery**: a re-driven delivery that finds its own
//!   earlier copy at the target reports `AlreadyDelivered` instead of
//!   writing a second copy.

pub mod error;
pub mod fs;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use fs::{FsStore, Layout};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    ClaimResult, ClaimedEntry, ClaimedPacket, DeliverResult, DoneResult, PacketHandle,
    PacketState, PacketStore,
};
