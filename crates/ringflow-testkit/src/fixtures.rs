//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: a temporary shared root that
//! every peer of a ring can reach, and short constructors for identifiers.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use ringflow_core::{Codec, PacketName, PeerId};
use ringflow_store::{
    ClaimResult, ClaimedPacket, FsStore, PacketHandle, PacketStore, SqliteStore,
};

/// Build a peer id, panicking on invalid input.
pub fn peer(id: &str) -> PeerId {
    PeerId::new(id).unwrap()
}

/// Build a packet name, panicking on invalid input.
pub fn name(name: &str) -> PacketName {
    PacketName::new(name).unwrap()
}

/// Build a ring from ids.
pub fn ring(ids: &[&str]) -> Vec<PeerId> {
    ids.iter().map(|id| peer(id)).collect()
}

/// A ring of peers sharing a temporary root directory.
///
/// The directory is removed when the fixture is dropped.
pub struct RingFixture {
    dir: TempDir,
    members: Vec<PeerId>,
}

impl RingFixture {
    pub fn new(members: &[&str]) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            members: ring(members),
        }
    }

    /// The shared root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Ring members in order.
    pub fn ring(&self) -> Vec<PeerId> {
        self.members.clone()
    }

    pub fn member(&self, index: usize) -> &PeerId {
        &self.members[index]
    }

    /// A filesystem store over the shared root.
    pub fn fs_store(&self) -> Arc<FsStore> {
        Arc::new(FsStore::new(self.root()))
    }

    /// A CBOR-encoded filesystem store over the shared root.
    pub fn fs_store_cbor(&self) -> Arc<FsStore> {
        Arc::new(FsStore::new(self.root()).with_codec(Codec::Cbor))
    }

    /// A SQLite store in a database file under the shared root.
    ///
    /// Each call opens a new connection to the same database, as separate
    /// peer processes would.
    pub fn sqlite_store(&self) -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open(self.root().join("ringflow.db")).unwrap())
    }

    /// Create every member's namespace.
    pub async fn init<S: PacketStore + ?Sized>(&self, store: &S) {
        for member in &self.members {
            store.ensure_namespace(member).await.unwrap();
        }
    }
}

/// Claim `name` in `owner`'s pending state, panicking if the claim fails.
pub async fn claim<S: PacketStore + ?Sized>(
    store: &S,
    owner: &PeerId,
    name: &PacketName,
) -> ClaimedPacket {
    match store
        .claim(&PacketHandle::new(owner.clone(), name.clone()))
        .await
        .unwrap()
    {
        ClaimResult::Claimed(claimed) => claimed,
        ClaimResult::ClaimFailed => panic!("claim of {}/{} failed", owner, name),
    }
}
