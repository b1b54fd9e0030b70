//! SQLite implementation of the PacketStore trait.
//!
//! A single database file holds every peer's namespace, so peers on one
//! host (or sharing the file over a lock-respecting filesystem) can form a
//! ring without directory synchronization. Uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.
//!
//! Claim is one conditional UPDATE; `deliver` and `move_to_done` each run
//! in a single IMMEDIATE transaction, so routing moves are atomic here
//! rather than merely crash-recoverable.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use ringflow_core::{Codec, PacketName, PeerId, RingPacket};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{
    decode_body, occupant_check, ClaimResult, ClaimedEntry, ClaimedPacket, DeliverResult,
    DoneResult, Occupancy, PacketHandle, PacketState, PacketStore,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    codec: Codec,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            codec: Codec::Json,
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Run a blocking operation on the connection.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

fn require_namespace(conn: &Connection, peer: &PeerId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM namespaces WHERE peer = ?1)",
        params![peer.as_str()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NamespaceMissing(peer.clone()))
    }
}

fn exists(conn: &Connection, peer: &PeerId, state: PacketState, name: &PacketName) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM packets WHERE peer = ?1 AND state = ?2 AND name = ?3)",
        params![peer.as_str(), state.as_str(), name.as_str()],
        |row| row.get(0),
    )?)
}

fn get_body(
    conn: &Connection,
    peer: &PeerId,
    state: PacketState,
    name: &PacketName,
) -> Result<Option<(Vec<u8>, Option<Vec<u8>>)>> {
    Ok(conn
        .query_row(
            "SELECT body, staged FROM packets WHERE peer = ?1 AND state = ?2 AND name = ?3",
            params![peer.as_str(), state.as_str(), name.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn delete(conn: &Connection, peer: &PeerId, state: PacketState, name: &PacketName) -> Result<()> {
    conn.execute(
        "DELETE FROM packets WHERE peer = ?1 AND state = ?2 AND name = ?3",
        params![peer.as_str(), state.as_str(), name.as_str()],
    )?;
    Ok(())
}

fn list_names(conn: &Connection, peer: &PeerId, state: PacketState) -> Result<Vec<PacketName>> {
    require_namespace(conn, peer)?;
    let mut stmt =
        conn.prepare("SELECT name FROM packets WHERE peer = ?1 AND state = ?2 ORDER BY name")?;
    let names = stmt
        .query_map(params![peer.as_str(), state.as_str()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    names.into_iter().map(parse_name).collect()
}

fn parse_name(raw: String) -> Result<PacketName> {
    PacketName::try_from(raw).map_err(|e| StoreError::InvalidData(e.to_string()))
}

fn millis_to_time(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

fn not_claimed(claimed: &ClaimedPacket) -> StoreError {
    StoreError::NotClaimed {
        peer: claimed.peer().clone(),
        name: claimed.name().clone(),
    }
}

#[async_trait]
impl PacketStore for SqliteStore {
    fn codec(&self) -> Codec {
        self.codec
    }

    async fn ensure_namespace(&self, peer: &PeerId) -> Result<()> {
        let peer = peer.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO namespaces (peer, created_at) VALUES (?1, ?2)",
                params![peer.as_str(), now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_pending(&self, peer: &PeerId) -> Result<Vec<PacketHandle>> {
        let peer = peer.clone();
        self.blocking(move |conn| {
            Ok(list_names(conn, &peer, PacketState::Pending)?
                .into_iter()
                .map(|name| PacketHandle::new(peer.clone(), name))
                .collect())
        })
        .await
    }

    async fn list_claimed(&self, peer: &PeerId) -> Result<Vec<ClaimedEntry>> {
        let peer = peer.clone();
        self.blocking(move |conn| {
            require_namespace(conn, &peer)?;
            let mut stmt = conn.prepare(
                "SELECT name, updated_at, staged IS NOT NULL FROM packets
                 WHERE peer = ?1 AND state = ?2 ORDER BY name",
            )?;
            let rows = stmt
                .query_map(params![peer.as_str(), PacketState::Claimed.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(name, updated_at, staged)| {
                    Ok(ClaimedEntry {
                        packet: ClaimedPacket::new(peer.clone(), parse_name(name)?),
                        claimed_at: millis_to_time(updated_at),
                        staged,
                    })
                })
                .collect()
        })
        .await
    }

    async fn list_done(&self, peer: &PeerId) -> Result<Vec<PacketName>> {
        let peer = peer.clone();
        self.blocking(move |conn| list_names(conn, &peer, PacketState::Done))
            .await
    }

    async fn submit(&self, peer: &PeerId, name: &PacketName, packet: &RingPacket) -> Result<()> {
        let bytes = self.codec.encode(packet).map_err(StoreError::Encoding)?;
        let (peer, name) = (peer.clone(), name.clone());

        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_namespace(&tx, &peer)?;
            for state in [PacketState::Pending, PacketState::Claimed] {
                if exists(&tx, &peer, state, &name)? {
                    return Err(StoreError::Conflict {
                        peer: peer.clone(),
                        name: name.clone(),
                        reason: format!("name is already {}", state),
                    });
                }
            }
            tx.execute(
                "INSERT INTO packets (peer, state, name, body, staged, updated_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
                params![
                    peer.as_str(),
                    PacketState::Pending.as_str(),
                    name.as_str(),
                    bytes,
                    now_millis()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn claim(&self, handle: &PacketHandle) -> Result<ClaimResult> {
        let handle = handle.clone();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE packets SET state = ?3, updated_at = ?4
                 WHERE peer = ?1 AND state = ?5 AND name = ?2
                   AND NOT EXISTS (
                       SELECT 1 FROM packets WHERE peer = ?1 AND state = ?3 AND name = ?2
                   )",
                params![
                    handle.peer.as_str(),
                    handle.name.as_str(),
                    PacketState::Claimed.as_str(),
                    now_millis(),
                    PacketState::Pending.as_str()
                ],
            )?;
            Ok(if changed == 1 {
                ClaimResult::Claimed(ClaimedPacket::new(handle.peer, handle.name))
            } else {
                ClaimResult::ClaimFailed
            })
        })
        .await
    }

    async fn read(&self, claimed: &ClaimedPacket) -> Result<RingPacket> {
        let claimed = claimed.clone();
        let codec = self.codec;
        self.blocking(move |conn| {
            let (body, _) = get_body(conn, claimed.peer(), PacketState::Claimed, claimed.name())?
                .ok_or_else(|| not_claimed(&claimed))?;
            decode_body(codec, claimed.peer(), claimed.name(), &body)
        })
        .await
    }

    async fn read_staged(&self, claimed: &ClaimedPacket) -> Result<Option<RingPacket>> {
        let claimed = claimed.clone();
        let codec = self.codec;
        self.blocking(move |conn| {
            let (_, staged) = get_body(conn, claimed.peer(), PacketState::Claimed, claimed.name())?
                .ok_or_else(|| not_claimed(&claimed))?;
            staged
                .map(|bytes| decode_body(codec, claimed.peer(), claimed.name(), &bytes))
                .transpose()
        })
        .await
    }

    async fn write(&self, claimed: &ClaimedPacket, packet: &RingPacket) -> Result<()> {
        let bytes = self.codec.encode(packet).map_err(StoreError::Encoding)?;
        let claimed = claimed.clone();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE packets SET staged = ?4 WHERE peer = ?1 AND state = ?2 AND name = ?3",
                params![
                    claimed.peer().as_str(),
                    PacketState::Claimed.as_str(),
                    claimed.name().as_str(),
                    bytes
                ],
            )?;
            if changed == 0 {
                return Err(not_claimed(&claimed));
            }
            Ok(())
        })
        .await
    }

    async fn release(&self, claimed: &ClaimedPacket) -> Result<bool> {
        let claimed = claimed.clone();
        self.blocking(move |conn| {
            let (peer, name) = (claimed.peer(), claimed.name());
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some((_, staged)) = get_body(&tx, peer, PacketState::Claimed, name)? else {
                return Ok(false);
            };
            if staged.is_some() {
                return Err(StoreError::Conflict {
                    peer: peer.clone(),
                    name: name.clone(),
                    reason: "packet has a staged body".into(),
                });
            }
            if exists(&tx, peer, PacketState::Pending, name)? {
                return Err(StoreError::Conflict {
                    peer: peer.clone(),
                    name: name.clone(),
                    reason: "name is already pending".into(),
                });
            }

            tx.execute(
                "UPDATE packets SET state = ?4, updated_at = ?5
                 WHERE peer = ?1 AND state = ?2 AND name = ?3",
                params![
                    peer.as_str(),
                    PacketState::Claimed.as_str(),
                    name.as_str(),
                    PacketState::Pending.as_str(),
                    now_millis()
                ],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn move_to_done(&self, claimed: &ClaimedPacket) -> Result<DoneResult> {
        let claimed = claimed.clone();
        let codec = self.codec;
        self.blocking(move |conn| {
            let (peer, name) = (claimed.peer(), claimed.name());
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some((body, staged)) = get_body(&tx, peer, PacketState::Claimed, name)? else {
                if exists(&tx, peer, PacketState::Done, name)? {
                    return Ok(DoneResult::AlreadyDone);
                }
                return Err(not_claimed(&claimed));
            };
            let outgoing = staged.unwrap_or(body);
            let packet = decode_body(codec, peer, name, &outgoing)?;

            let mut replaced = false;
            if let Some((existing, _)) = get_body(&tx, peer, PacketState::Done, name)? {
                match occupant_check(codec, &packet, &existing, true) {
                    Occupancy::Duplicate => {
                        delete(&tx, peer, PacketState::Claimed, name)?;
                        tx.commit()?;
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

            delete(&tx, peer, PacketState::Claimed, name)?;
            tx.execute(
                "INSERT OR REPLACE INTO packets (peer, state, name, body, staged, updated_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
                params![
                    peer.as_str(),
                    PacketState::Done.as_str(),
                    name.as_str(),
                    outgoing,
                    now_millis()
                ],
            )?;
            tx.commit()?;
            Ok(if replaced {
                DoneResult::Replaced
            } else {
                DoneResult::Moved
            })
        })
        .await
    }

    async fn deliver(&self, claimed: &ClaimedPacket, target: &PeerId) -> Result<DeliverResult> {
        let claimed = claimed.clone();
        let target = target.clone();
        let codec = self.codec;
        self.blocking(move |conn| {
            let (peer, name) = (claimed.peer(), claimed.name());
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let (body, staged) = get_body(&tx, peer, PacketState::Claimed, name)?
                .ok_or_else(|| not_claimed(&claimed))?;
            let outgoing = staged.unwrap_or(body);
            let packet = decode_body(codec, peer, name, &outgoing)?;
            require_namespace(&tx, &target)?;

            let mut replaced = false;
            for state in PacketState::ALL {
                if state == PacketState::Claimed && &target == peer {
                    continue;
                }
                let Some((existing, _)) = get_body(&tx, &target, state, name)? else {
                    continue;
                };
                match occupant_check(codec, &packet, &existing, state == PacketState::Pending) {
                    Occupancy::Duplicate => {
                        delete(&tx, peer, PacketState::Claimed, name)?;
                        tx.commit()?;
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

            delete(&tx, peer, PacketState::Claimed, name)?;
            tx.execute(
                "INSERT OR REPLACE INTO packets (peer, state, name, body, staged, updated_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
                params![
                    target.as_str(),
                    PacketState::Pending.as_str(),
                    name.as_str(),
                    outgoing,
                    now_millis()
                ],
            )?;
            tx.commit()?;

            Ok(if replaced {
                DeliverResult::Replaced
            } else {
                DeliverResult::Delivered
            })
        })
        .await
    }

    async fn read_done(&self, peer: &PeerId, name: &PacketName) -> Result<Option<RingPacket>> {
        let (peer, name) = (peer.clone(), name.clone());
        let codec = self.codec;
        self.blocking(move |conn| {
            get_body(conn, &peer, PacketState::Done, &name)?
                .map(|(body, _)| decode_body(codec, &peer, &name, &body))
                .transpose()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(s: &str) -> PeerId {
        PeerId::new(s).unwrap()
    }

    fn name(s: &str) -> PacketName {
        PacketName::new(s).unwrap()
    }

    /// One instance: every call returns a copy of the same packet.
    fn packet() -> RingPacket {
        RingPacket {
            id: "p-1".into(),
            ..RingPacket::new(vec![peer("a"), peer("b")], "x")
        }
    }

    async fn store_with(peers: &[&str]) -> SqliteStore {
        let store = SqliteStore::open_memory().unwrap();
        for p in peers {
            store.ensure_namespace(&peer(p)).await.unwrap();
        }
        store
    }

    async fn claim_one(store: &SqliteStore, owner: &str, n: &str) -> ClaimedPacket {
        match store
            .claim(&PacketHandle::new(peer(owner), name(n)))
            .await
            .unwrap()
        {
            ClaimResult::Claimed(c) => c,
            ClaimResult::ClaimFailed => panic!("claim failed"),
        }
    }

    #[tokio::test]
    async fn test_submit_and_list() {
        let store = store_with(&["a"]).await;
        store.submit(&peer("a"), &name("b"), &packet()).await.unwrap();
        store.submit(&peer("a"), &name("a"), &packet()).await.unwrap();

        let handles = store.list_pending(&peer("a")).await.unwrap();
        let names: Vec<_> = handles.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_missing_namespace() {
        let store = store_with(&[]).await;
        assert!(matches!(
            store.list_pending(&peer("a")).await,
            Err(StoreError::NamespaceMissing(_))
        ));
        assert!(matches!(
            store.submit(&peer("a"), &name("p"), &packet()).await,
            Err(StoreError::NamespaceMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = store_with(&["a"]).await;
        store.submit(&peer("a"), &name("p"), &packet()).await.unwrap();

        let handle = PacketHandle::new(peer("a"), name("p"));
        assert!(matches!(store.claim(&handle).await.unwrap(), ClaimResult::Claimed(_)));
        assert_eq!(store.claim(&handle).await.unwrap(), ClaimResult::ClaimFailed);
    }

    #[tokio::test]
    async fn test_hop_and_retire() {
        let store = store_with(&["a", "b"]).await;
        store.submit(&peer("a"), &name("p"), &packet()).await.unwrap();

        let claimed = claim_one(&store, "a", "p").await;
        let first = store.read(&claimed).await.unwrap().advanced(true);
        store.write(&claimed, &first).await.unwrap();
        assert_eq!(store.read_staged(&claimed).await.unwrap(), Some(first.clone()));
        assert_eq!(
            store.deliver(&claimed, &peer("b")).await.unwrap(),
            DeliverResult::Delivered
        );

        let at_b = claim_one(&store, "b", "p").await;
        let second = store.read(&at_b).await.unwrap().advanced(false);
        store.write(&at_b, &second).await.unwrap();
        assert_eq!(store.move_to_done(&at_b).await.unwrap(), DoneResult::Moved);
        assert_eq!(store.move_to_done(&at_b).await.unwrap(), DoneResult::AlreadyDone);

        assert_eq!(store.list_done(&peer("b")).await.unwrap(), vec![name("p")]);
        let done = store.read_done(&peer("b"), &name("p")).await.unwrap().unwrap();
        assert_eq!(done.counter, 1);
        assert_eq!(done.current_index, 1);
    }

    #[tokio::test]
    async fn test_second_run_under_same_name_retires() {
        let store = store_with(&["a", "b"]).await;
        let earlier = RingPacket::new(vec![peer("a"), peer("b")], "x");
        for run in [earlier, packet()] {
            store.submit(&peer("a"), &name("p"), &run).await.unwrap();
            let claimed = claim_one(&store, "a", "p").await;
            store.write(&claimed, &run.advanced(true)).await.unwrap();
            assert_eq!(
                store.deliver(&claimed, &peer("b")).await.unwrap(),
                DeliverResult::Delivered
            );
            let at_b = claim_one(&store, "b", "p").await;
            store.write(&at_b, &run.advanced(true).advanced(true)).await.unwrap();
            store.move_to_done(&at_b).await.unwrap();
        }

        let done = store.read_done(&peer("b"), &name("p")).await.unwrap().unwrap();
        assert_eq!(done.id, packet().id);
        assert_eq!(done.counter, 2);
    }

    #[tokio::test]
    async fn test_redelivery_after_crash() {
        let store = store_with(&["a", "b"]).await;
        let next = packet().advanced(false);
        store.submit(&peer("b"), &name("p"), &next).await.unwrap();

        store.submit(&peer("a"), &name("p"), &packet()).await.unwrap();
        let claimed = claim_one(&store, "a", "p").await;
        store.write(&claimed, &next).await.unwrap();

        assert_eq!(
            store.deliver(&claimed, &peer("b")).await.unwrap(),
            DeliverResult::AlreadyDelivered
        );
        assert!(store.list_claimed(&peer("a")).await.unwrap().is_empty());
        assert_eq!(store.list_pending(&peer("b")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_claimed_reports_staging() {
        let store = store_with(&["a"]).await;
        store.submit(&peer("a"), &name("p"), &packet()).await.unwrap();
        store.submit(&peer("a"), &name("q"), &packet()).await.unwrap();

        let p = claim_one(&store, "a", "p").await;
        claim_one(&store, "a", "q").await;
        store.write(&p, &packet().advanced(true)).await.unwrap();

        let entries = store.list_claimed(&peer("a")).await.unwrap();
        let flags: Vec<_> = entries
            .iter()
            .map(|e| (e.packet.name().as_str(), e.staged))
            .collect();
        assert_eq!(flags, vec![("p", true), ("q", false)]);
    }

    #[tokio::test]
    async fn test_release_and_write_after_move() {
        let store = store_with(&["a"]).await;
        store.submit(&peer("a"), &name("p"), &packet()).await.unwrap();
        let claimed = claim_one(&store, "a", "p").await;

        assert!(store.release(&claimed).await.unwrap());
        assert!(matches!(
            store.write(&claimed, &packet()).await,
            Err(StoreError::NotClaimed { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.ensure_namespace(&peer("a")).await.unwrap();
            store.submit(&peer("a"), &name("p"), &packet()).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.list_pending(&peer("a")).await.unwrap().len(), 1);
    }
}
