//! A store wrapper that injects failures.

use std::collections::HashSet;
use std::io::{Error, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ringflow_core::{Codec, PacketName, PeerId, RingPacket};
use ringflow_store::{
    ClaimResult, ClaimedEntry, ClaimedPacket, DeliverResult, DoneResult, PacketHandle,
    PacketStore, Result, StoreError,
};

/// Delegates to an inner store, failing selected operations on demand.
///
/// - Deliveries to a blocked target fail with a non-fatal I/O error, as an
///   unreachable peer folder would.
/// - With storage exhaustion switched on, every listing and write fails
///   with `StorageFull`, which is fatal.
#[derive(Debug, Default)]
pub struct FaultyStore<S> {
    inner: S,
    blocked: Mutex<HashSet<PeerId>>,
    exhausted: AtomicBool,
}

impl<S> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            blocked: Mutex::new(HashSet::new()),
            exhausted: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Make deliveries to `target` fail.
    pub fn block_deliveries_to(&self, target: &PeerId) {
        self.blocked.lock().unwrap().insert(target.clone());
    }

    /// Make deliveries to `target` succeed again.
    pub fn unblock_deliveries_to(&self, target: &PeerId) {
        self.blocked.lock().unwrap().remove(target);
    }

    /// Simulate a full disk.
    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }

    fn check_space(&self) -> Result<()> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(StoreError::Io(Error::from(ErrorKind::StorageFull)));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: PacketStore> PacketStore for FaultyStore<S> {
    fn codec(&self) -> Codec {
        self.inner.codec()
    }

    async fn ensure_namespace(&self, peer: &PeerId) -> Result<()> {
        self.check_space()?;
        self.inner.ensure_namespace(peer).await
    }

    async fn list_pending(&self, peer: &PeerId) -> Result<Vec<PacketHandle>> {
        self.check_space()?;
        self.inner.list_pending(peer).await
    }

    async fn list_claimed(&self, peer: &PeerId) -> Result<Vec<ClaimedEntry>> {
        self.check_space()?;
        self.inner.list_claimed(peer).await
    }

    async fn list_done(&self, peer: &PeerId) -> Result<Vec<PacketName>> {
        self.inner.list_done(peer).await
    }

    async fn submit(&self, peer: &PeerId, name: &PacketName, packet: &RingPacket) -> Result<()> {
        self.check_space()?;
        self.inner.submit(peer, name, packet).await
    }

    async fn claim(&self, handle: &PacketHandle) -> Result<ClaimResult> {
        self.check_space()?;
        self.inner.claim(handle).await
    }

    async fn read(&self, claimed: &ClaimedPacket) -> Result<RingPacket> {
        self.inner.read(claimed).await
    }

    async fn read_staged(&self, claimed: &ClaimedPacket) -> Result<Option<RingPacket>> {
        self.inner.read_staged(claimed).await
    }

    async fn write(&self, claimed: &ClaimedPacket, packet: &RingPacket) -> Result<()> {
        self.check_space()?;
        self.inner.write(claimed, packet).await
    }

    async fn release(&self, claimed: &ClaimedPacket) -> Result<bool> {
        self.check_space()?;
        self.inner.release(claimed).await
    }

    async fn move_to_done(&self, claimed: &ClaimedPacket) -> Result<DoneResult> {
        self.check_space()?;
        self.inner.move_to_done(claimed).await
    }

    async fn deliver(&self, claimed: &ClaimedPacket, target: &PeerId) -> Result<DeliverResult> {
        self.check_space()?;
        if self.blocked.lock().unwrap().contains(target) {
            return Err(StoreError::Io(Error::new(
                ErrorKind::ConnectionRefused,
                format!("namespace of {} is unreachable", target),
            )));
        }
        self.inner.deliver(claimed, target).await
    }

    async fn read_done(&self, peer: &PeerId, name: &PacketName) -> Result<Option<RingPacket>> {
        self.inner.read_done(peer, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{name, peer};
    use ringflow_store::MemoryStore;

    #[tokio::test]
    async fn test_blocked_delivery_fails_and_keeps_claim() {
        let store = FaultyStore::new(MemoryStore::new());
        let packet = RingPacket::new(vec![peer("a"), peer("b")], "x");
        store.ensure_namespace(&peer("a")).await.unwrap();
        store.ensure_namespace(&peer("b")).await.unwrap();
        store.submit(&peer("a"), &name("p"), &packet).await.unwrap();
        let claimed = match store
            .claim(&PacketHandle::new(peer("a"), name("p")))
            .await
            .unwrap()
        {
            ClaimResult::Claimed(c) => c,
            ClaimResult::ClaimFailed => panic!("claim failed"),
        };

        store.block_deliveries_to(&peer("b"));
        let err = store.deliver(&claimed, &peer("b")).await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(store.list_claimed(&peer("a")).await.unwrap().len(), 1);

        store.unblock_deliveries_to(&peer("b"));
        assert_eq!(
            store.deliver(&claimed, &peer("b")).await.unwrap(),
            DeliverResult::Delivered
        );
    }

    #[tokio::test]
    async fn test_exhausted_is_fatal() {
        let store = FaultyStore::new(MemoryStore::new());
        store.set_exhausted(true);
        let err = store.list_pending(&peer("a")).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
