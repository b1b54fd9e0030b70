//! PacketStore trait: the abstract claimable namespace.
//!
//! Any backend works as long as it keeps two promises: `claim` is an
//! exclusive compare-and-swap from pending to claimed, and cross-namespace
//! moves make the destination durable before the source disappears.

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use ringflow_core::{Codec, PacketName, PeerId, RingPacket};

use crate::error::{Result, StoreError};

/// The three disjoint states of a peer namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketState {
    Pending,
    Claimed,
    Done,
}

impl PacketState {
    pub const ALL: [PacketState; 3] = [PacketState::Pending, PacketState::Claimed, PacketState::Done];

    pub const fn as_str(self) -> &'static str {
        match self {
            PacketState::Pending => "pending",
            PacketState::Claimed => "claimed",
            PacketState::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PacketState::Pending),
            "claimed" => Some(PacketState::Claimed),
            "done" => Some(PacketState::Done),
            _ => None,
        }
    }
}

impl fmt::Display for PacketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A packet seen in a pending listing. Does not imply ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PacketHandle {
    pub peer: PeerId,
    pub name: PacketName,
}

impl PacketHandle {
    pub fn new(peer: PeerId, name: PacketName) -> Self {
        Self { peer, name }
    }
}

impl fmt::Display for PacketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.peer, self.name)
    }
}

/// Proof of ownership of a claimed packet.
///
/// Only stores hand these out: from a successful `claim`, or from
/// `list_claimed` during recovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimedPacket {
    peer: PeerId,
    name: PacketName,
}

impl ClaimedPacket {
    pub(crate) fn new(peer: PeerId, name: PacketName) -> Self {
        Self { peer, name }
    }

    /// The peer whose namespace holds the packet.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn name(&self) -> &PacketName {
        &self.name
    }
}

impl fmt::Display for ClaimedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.peer, self.name)
    }
}

/// Outcome of [`PacketStore::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// This caller now owns the packet.
    Claimed(ClaimedPacket),
    /// The packet was no longer pending (another poller won, or it moved on).
    ClaimFailed,
}

/// A claimed packet as seen by recovery.
#[derive(Debug, Clone)]
pub struct ClaimedEntry {
    pub packet: ClaimedPacket,
    /// When the packet entered the claimed state.
    pub claimed_at: SystemTime,
    /// Whether a processed body has been staged.
    pub staged: bool,
}

/// Outcome of [`PacketStore::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverResult {
    /// Written to the target's pending state.
    Delivered,
    /// The target already holds this packet at this hop or later. Nothing
    /// was written; the local copy was removed.
    AlreadyDelivered,
    /// An older copy of the same packet in the target's pending state was
    /// overwritten.
    Replaced,
}

/// Outcome of [`PacketStore::move_to_done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneResult {
    Moved,
    /// Already retired earlier; the leftover claimed copy was removed.
    AlreadyDone,
    /// A finished packet of an earlier run under the same name was
    /// overwritten.
    Replaced,
}

/// The PacketStore trait: async interface to the claimable namespaces.
///
/// A store instance reaches every peer's namespace on its backing root;
/// operations are scoped by the peer they name (or that a
/// [`ClaimedPacket`] carries).
///
/// # Design Notes
///
/// - **Snapshots**: listings are finite snapshots; re-listing restarts.
/// - **Claim**: atomic; exactly one concurrent caller gets `Claimed`.
/// - **Write**: stages the processed body without changing state.
/// - **Routing moves**: `deliver` and `move_to_done` forward the staged body
///   when present, else the claimed body unchanged.
#[async_trait]
pub trait PacketStore: Send + Sync {
    /// Encoding used for stored bodies.
    fn codec(&self) -> Codec;

    // ─────────────────────────────────────────────────────────────────────────
    // Namespace Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create the peer's three states if missing. Idempotent.
    async fn ensure_namespace(&self, peer: &PeerId) -> Result<()>;

    /// List packets in the peer's pending state, ordered by name.
    async fn list_pending(&self, peer: &PeerId) -> Result<Vec<PacketHandle>>;

    /// List packets in the peer's claimed state, ordered by name.
    async fn list_claimed(&self, peer: &PeerId) -> Result<Vec<ClaimedEntry>>;

    /// List packet names in the peer's done state, ordered by name.
    async fn list_done(&self, peer: &PeerId) -> Result<Vec<PacketName>>;

    /// Place a new packet in a peer's pending state.
    ///
    /// Fails with `Conflict` if the name is already pending or claimed there.
    async fn submit(&self, peer: &PeerId, name: &PacketName, packet: &RingPacket) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Ownership Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Atomically move a packet from pending to claimed.
    async fn claim(&self, handle: &PacketHandle) -> Result<ClaimResult>;

    /// Decode the claimed body. Fails with `CorruptPacket` on malformed content.
    async fn read(&self, claimed: &ClaimedPacket) -> Result<RingPacket>;

    /// Decode the staged body, if one has been written.
    async fn read_staged(&self, claimed: &ClaimedPacket) -> Result<Option<RingPacket>>;

    /// Stage the processed packet. Replaces any earlier staged body.
    async fn write(&self, claimed: &ClaimedPacket, packet: &RingPacket) -> Result<()>;

    /// Move a claimed packet back to pending. Returns false if it had
    /// already left the claimed state. Refuses packets with a staged body.
    async fn release(&self, claimed: &ClaimedPacket) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Routing Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Retire a claimed packet into the local done state.
    ///
    /// A finished packet of another instance under the same name is
    /// overwritten.
    async fn move_to_done(&self, claimed: &ClaimedPacket) -> Result<DoneResult>;

    /// Relocate a claimed packet into `target`'s pending state.
    ///
    /// The target copy is durable before the local copy is removed. A crash
    /// in between leaves the packet claimed locally, and re-driving the
    /// delivery is detected by the stable packet name and instance. A
    /// finished packet of another instance at the target does not block it.
    async fn deliver(&self, claimed: &ClaimedPacket, target: &PeerId) -> Result<DeliverResult>;

    /// Decode a retired packet.
    async fn read_done(&self, peer: &PeerId, name: &PacketName) -> Result<Option<RingPacket>>;
}

/// What to do when the destination already holds a same-named packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Occupancy {
    /// Our packet, at this hop or later: nothing to write.
    Duplicate,
    /// Our packet, at an earlier hop, in a slot we may overwrite.
    Stale,
    /// Somebody else's packet, or an earlier copy we must not touch.
    Foreign(String),
}

/// Compare an incoming packet with the one already at its destination.
pub(crate) fn occupancy(
    incoming: &RingPacket,
    existing: &RingPacket,
    overwrite_stale: bool,
) -> Occupancy {
    if !incoming.same_lineage(existing) {
        return Occupancy::Foreign("a different packet has this name".into());
    }
    if existing.current_index >= incoming.current_index {
        return Occupancy::Duplicate;
    }
    if overwrite_stale {
        Occupancy::Stale
    } else {
        Occupancy::Foreign(format!(
            "an earlier copy (index {}) is already there",
            existing.current_index
        ))
    }
}

/// Decode a stored body, attributing failures to the packet.
pub(crate) fn decode_body(
    codec: Codec,
    peer: &PeerId,
    name: &PacketName,
    bytes: &[u8],
) -> Result<RingPacket> {
    codec.decode(bytes).map_err(|e| StoreError::CorruptPacket {
        peer: peer.clone(),
        name: name.clone(),
        reason: e.to_string(),
    })
}

/// Decode an existing destination body for an occupancy check.
///
/// An undecodable occupant cannot be ours, so it is treated as foreign.
pub(crate) fn occupant_check(
    codec: Codec,
    incoming: &RingPacket,
    existing: &[u8],
    overwrite_stale: bool,
) -> Occupancy {
    match codec.decode(existing) {
        Ok(existing) => occupancy(incoming, &existing, overwrite_stale),
        Err(e) => Occupancy::Foreign(format!("occupant is unreadable: {}", e)),
    }
}
