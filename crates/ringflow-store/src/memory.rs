//! In-memory implementation of the PacketStore trait.
//!
//! This is primarily for testing. Clones share the same namespaces, so
//! several peers of one process can pass packets through a single store.
//! Every operation runs under one lock, which makes each of them atomic.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use ringflow_core::{Codec, PacketName, PeerId, RingPacket};

use crate::error::{Result, StoreError};
use crate::traits::{
    decode_body, occupant_check, ClaimResult, ClaimedEntry, ClaimedPacket, DeliverResult,
    DoneResult, Occupancy, PacketHandle, PacketState, PacketStore,
};

type Key = (PeerId, PacketState, PacketName);

/// In-memory store implementation.
///
/// All data is lost when the last clone is dropped.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
    codec: Codec,
}

#[derive(Default)]
struct MemoryStoreInner {
    namespaces: BTreeSet<PeerId>,
    packets: BTreeMap<Key, StoredPacket>,
}

struct StoredPacket {
    body: Bytes,
    /// Processed body, claimed state only.
    staged: Option<Bytes>,
    updated_at: SystemTime,
}

impl StoredPacket {
    fn new(body: Bytes) -> Self {
        Self {
            body,
            staged: None,
            updated_at: SystemTime::now(),
        }
    }

    /// The body a routing move carries forward.
    fn outgoing(&self) -> &Bytes {
        self.staged.as_ref().unwrap_or(&self.body)
    }
}

impl MemoryStoreInner {
    fn require_namespace(&self, peer: &PeerId) -> Result<()> {
        if self.namespaces.contains(peer) {
            Ok(())
        } else {
            Err(StoreError::NamespaceMissing(peer.clone()))
        }
    }

    fn names<'a>(
        &'a self,
        peer: &'a PeerId,
        state: PacketState,
    ) -> impl Iterator<Item = (&'a PacketName, &'a StoredPacket)> + 'a {
        self.packets
            .iter()
            .filter(move |((p, s, _), _)| p == peer && *s == state)
            .map(|((_, _, name), stored)| (name, stored))
    }
}

fn key(peer: &PeerId, state: PacketState, name: &PacketName) -> Key {
    (peer.clone(), state, name.clone())
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Place raw bytes in any state, bypassing encoding. Used to simulate
    /// corrupt files and interrupted moves.
    pub fn insert_raw(
        &self,
        peer: &PeerId,
        state: PacketState,
        name: &PacketName,
        body: impl Into<Bytes>,
    ) -> Result<()> {
        let mut inner = self.write_inner()?;
        inner.namespaces.insert(peer.clone());
        inner
            .packets
            .insert(key(peer, state, name), StoredPacket::new(body.into()));
        Ok(())
    }

    /// Place raw bytes as the staged body of a claimed packet.
    pub fn insert_staged_raw(
        &self,
        peer: &PeerId,
        name: &PacketName,
        body: impl Into<Bytes>,
    ) -> Result<()> {
        let mut inner = self.write_inner()?;
        let stored = inner
            .packets
            .get_mut(&key(peer, PacketState::Claimed, name))
            .ok_or_else(|| StoreError::NotClaimed {
                peer: peer.clone(),
                name: name.clone(),
            })?;
        stored.staged = Some(body.into());
        Ok(())
    }

    fn read_inner(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }
}

fn not_claimed(claimed: &ClaimedPacket) -> StoreError {
    StoreError::NotClaimed {
        peer: claimed.peer().clone(),
        name: claimed.name().clone(),
    }
}

#[async_trait]
impl PacketStore for MemoryStore {
    fn codec(&self) -> Codec {
        self.codec
    }

    async fn ensure_namespace(&self, peer: &PeerId) -> Result<()> {
        self.write_inner()?.namespaces.insert(peer.clone());
        Ok(())
    }

    async fn list_pending(&self, peer: &PeerId) -> Result<Vec<PacketHandle>> {
        let inner = self.read_inner()?;
        inner.require_namespace(peer)?;
        Ok(inner
            .names(peer, PacketState::Pending)
            .map(|(name, _)| PacketHandle::new(peer.clone(), name.clone()))
            .collect())
    }

    async fn list_claimed(&self, peer: &PeerId) -> Result<Vec<ClaimedEntry>> {
        let inner = self.read_inner()?;
        inner.require_namespace(peer)?;
        Ok(inner
            .names(peer, PacketState::Claimed)
            .map(|(name, stored)| ClaimedEntry {
                packet: ClaimedPacket::new(peer.clone(), name.clone()),
                claimed_at: stored.updated_at,
                staged: stored.staged.is_some(),
            })
            .collect())
    }

    async fn list_done(&self, peer: &PeerId) -> Result<Vec<PacketName>> {
        let inner = self.read_inner()?;
        inner.require_namespace(peer)?;
        Ok(inner
            .names(peer, PacketState::Done)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn submit(&self, peer: &PeerId, name: &PacketName, packet: &RingPacket) -> Result<()> {
        let bytes = self.codec.encode(packet).map_err(StoreError::Encoding)?;

        let mut inner = self.write_inner()?;
        inner.require_namespace(peer)?;
        for state in [PacketState::Pending, PacketState::Claimed] {
            if inner.packets.contains_key(&key(peer, state, name)) {
                return Err(StoreError::Conflict {
                    peer: peer.clone(),
                    name: name.clone(),
                    reason: format!("name is already {}", state),
                });
            }
        }
        inner.packets.insert(
            key(peer, PacketState::Pending, name),
            StoredPacket::new(Bytes::from(bytes)),
        );
        Ok(())
    }

    async fn claim(&self, handle: &PacketHandle) -> Result<ClaimResult> {
        let mut inner = self.write_inner()?;
        let to = key(&handle.peer, PacketState::Claimed, &handle.name);
        if inner.packets.contains_key(&to) {
            return Ok(ClaimResult::ClaimFailed);
        }

        match inner
            .packets
            .remove(&key(&handle.peer, PacketState::Pending, &handle.name))
        {
            Some(stored) => {
                inner.packets.insert(to, StoredPacket::new(stored.body));
                Ok(ClaimResult::Claimed(ClaimedPacket::new(
                    handle.peer.clone(),
                    handle.name.clone(),
                )))
            }
            None => Ok(ClaimResult::ClaimFailed),
        }
    }

    async fn read(&self, claimed: &ClaimedPacket) -> Result<RingPacket> {
        let inner = self.read_inner()?;
        let stored = inner
            .packets
            .get(&key(claimed.peer(), PacketState::Claimed, claimed.name()))
            .ok_or_else(|| not_claimed(claimed))?;
        decode_body(self.codec, claimed.peer(), claimed.name(), &stored.body)
    }

    async fn read_staged(&self, claimed: &ClaimedPacket) -> Result<Option<RingPacket>> {
        let inner = self.read_inner()?;
        let stored = inner
            .packets
            .get(&key(claimed.peer(), PacketState::Claimed, claimed.name()))
            .ok_or_else(|| not_claimed(claimed))?;
        stored
            .staged
            .as_ref()
            .map(|bytes| decode_body(self.codec, claimed.peer(), claimed.name(), bytes))
            .transpose()
    }

    async fn write(&self, claimed: &ClaimedPacket, packet: &RingPacket) -> Result<()> {
        let bytes = self.codec.encode(packet).map_err(StoreError::Encoding)?;

        let mut inner = self.write_inner()?;
        let stored = inner
            .packets
            .get_mut(&key(claimed.peer(), PacketState::Claimed, claimed.name()))
            .ok_or_else(|| not_claimed(claimed))?;
        stored.staged = Some(Bytes::from(bytes));
        Ok(())
    }

    async fn release(&self, claimed: &ClaimedPacket) -> Result<bool> {
        let (peer, name) = (claimed.peer(), claimed.name());
        let mut inner = self.write_inner()?;

        let from = key(peer, PacketState::Claimed, name);
        let Some(stored) = inner.packets.get(&from) else {
            return Ok(false);
        };
        if stored.staged.is_some() {
            return Err(StoreError::Conflict {
                peer: peer.clone(),
                name: name.clone(),
                reason: "packet has a staged body".into(),
            });
        }
        let to = key(peer, PacketState::Pending, name);
        if inner.packets.contains_key(&to) {
            return Err(StoreError::Conflict {
                peer: peer.clone(),
                name: name.clone(),
                reason: "name is already pending".into(),
            });
        }

        if let Some(stored) = inner.packets.remove(&from) {
            inner.packets.insert(to, StoredPacket::new(stored.body));
        }
        Ok(true)
    }

    async fn move_to_done(&self, claimed: &ClaimedPacket) -> Result<DoneResult> {
        let (peer, name) = (claimed.peer(), claimed.name());
        let mut inner = self.write_inner()?;

        let from = key(peer, PacketState::Claimed, name);
        let to = key(peer, PacketState::Done, name);

        let Some(stored) = inner.packets.get(&from) else {
            if inner.packets.contains_key(&to) {
                return Ok(DoneResult::AlreadyDone);
            }
            return Err(not_claimed(claimed));
        };
        let body = stored.outgoing().clone();
        let packet = decode_body(self.codec, peer, name, &body)?;

        let mut replaced = false;
        if let Some(existing) = inner.packets.get(&to) {
            match occupant_check(self.codec, &packet, &existing.body, true) {
                Occupancy::Duplicate => {
                    inner.packets.remove(&from);
                    return Ok(DoneResult::AlreadyDone);
                }
                Occupancy::Stale => {
                    return Err(StoreError::Conflict {
                        peer: peer.clone(),
                        name: name.clone(),
                        reason: "an earlier copy is already done".into(),
                    });
                }
                Occupancy::Foreign(reason) => {
                    tracing::info!(%peer, %name, %reason, "replacing finished packet of an earlier run");
                    replaced = true;
                }
            }
        }

        inner.packets.remove(&from);
        inner.packets.insert(to, StoredPacket::new(body));
        Ok(if replaced {
            DoneResult::Replaced
        } else {
            DoneResult::Moved
        })
    }

    async fn deliver(&self, claimed: &ClaimedPacket, target: &PeerId) -> Result<DeliverResult> {
        let (peer, name) = (claimed.peer(), claimed.name());
        let mut inner = self.write_inner()?;

        let from = key(peer, PacketState::Claimed, name);
        let body = inner
            .packets
            .get(&from)
            .map(|stored| stored.outgoing().clone())
            .ok_or_else(|| not_claimed(claimed))?;
        let packet = decode_body(self.codec, peer, name, &body)?;
        inner.require_namespace(target)?;

        let mut replaced = false;
        for state in PacketState::ALL {
            if state == PacketState::Claimed && target == peer {
                continue;
            }
            let Some(existing) = inner.packets.get(&key(target, state, name)) else {
                continue;
            };
            match occupant_check(self.codec, &packet, &existing.body, state == PacketState::Pending) {
                Occupancy::Duplicate => {
                    inner.packets.remove(&from);
                    return Ok(DeliverResult::AlreadyDelivered);
                }
                // A finished run does not hold the name.
                _ if state == PacketState::Done => {}
                Occupancy::Stale => replaced = true,
                Occupancy::Foreign(reason) => {
                    return Err(StoreError::Conflict {
                        peer: target.clone(),
                        name: name.clone(),
                        reason: format!("{} ({})", reason, state),
                    });
                }
            }
        }

        inner.packets.remove(&from);
        inner
            .packets
            .insert(key(target, PacketState::Pending, name), StoredPacket::new(body));

        Ok(if replaced {
            DeliverResult::Replaced
        } else {
            DeliverResult::Delivered
        })
    }

    async fn read_done(&self, peer: &PeerId, name: &PacketName) -> Result<Option<RingPacket>> {
        let inner = self.read_inner()?;
        inner
            .packets
            .get(&key(peer, PacketState::Done, name))
            .map(|stored| decode_body(self.codec, peer, name, &stored.body))
            .transpose()
    }
}
