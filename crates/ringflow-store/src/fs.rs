//! Filesystem implementation of the PacketStore trait.
//!
//! Each peer owns a folder on a shared, synchronized root:
//!
//! ```text
//! <root>/<peer>/app_pipelines/llm-ring/
//!     input/    pending   <name>.json
//!     running/  claimed   <name>.json  (+ <name>.json.staged once processed)
//!     done/     done      <name>.json
//! ```
//!
//! Moves within a namespace are single `rename` calls, which is what makes
//! `claim` exclusive. Writes into any folder go through a hidden temp file
//! that is synced and then renamed into place, so readers never observe a
//! partial body. Files that do not look like packets are ignored.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use ringflow_core::{Codec, PacketName, PeerId, RingPacket};

use crate::error::{Result, StoreError};
use crate::traits::{
    decode_body, occupant_check, ClaimResult, ClaimedEntry, ClaimedPacket, DeliverResult,
    DoneResult, Occupancy, PacketHandle, PacketState, PacketStore,
};

const STAGED_SUFFIX: &str = "staged";

/// Folder names of a peer namespace, relative to `<root>/<peer>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Application folder inside the peer's folder.
    pub app: PathBuf,
    pub pending: String,
    pub claimed: String,
    pub done: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            app: PathBuf::from("app_pipelines").join("llm-ring"),
            pending: "input".to_string(),
            claimed: "running".to_string(),
            done: "done".to_string(),
        }
    }
}

impl Layout {
    /// Folder name for a state.
    pub fn dir_name(&self, state: PacketState) -> &str {
        match state {
            PacketState::Pending => &self.pending,
            PacketState::Claimed => &self.claimed,
            PacketState::Done => &self.done,
        }
    }
}

/// Filesystem-backed store.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    layout: Layout,
    codec: Codec,
}

impl FsStore {
    /// Open a store on a shared root with the default layout and JSON bodies.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            layout: Layout::default(),
            codec: Codec::Json,
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder holding a peer's three states.
    pub fn namespace_dir(&self, peer: &PeerId) -> PathBuf {
        self.root.join(peer.as_str()).join(&self.layout.app)
    }

    pub fn state_dir(&self, peer: &PeerId, state: PacketState) -> PathBuf {
        self.namespace_dir(peer).join(self.layout.dir_name(state))
    }

    /// Path of a packet body in a given state.
    pub fn packet_path(&self, peer: &PeerId, state: PacketState, name: &PacketName) -> PathBuf {
        self.state_dir(peer, state)
            .join(format!("{}.{}", name, self.codec.extension()))
    }

    fn staged_path(&self, peer: &PeerId, name: &PacketName) -> PathBuf {
        self.state_dir(peer, PacketState::Claimed).join(format!(
            "{}.{}.{}",
            name,
            self.codec.extension(),
            STAGED_SUFFIX
        ))
    }

    fn parse_file_name(&self, file_name: &str) -> Option<PacketName> {
        if file_name.starts_with('.') {
            return None;
        }
        let stem = file_name
            .strip_suffix(self.codec.extension())?
            .strip_suffix('.')?;
        PacketName::new(stem).ok()
    }

    async fn list_names(&self, peer: &PeerId, state: PacketState) -> Result<Vec<PacketName>> {
        let dir = self.state_dir(peer, state);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NamespaceMissing(peer.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            match self.parse_file_name(file_name) {
                Some(name) => names.push(name),
                None => tracing::trace!(peer = %peer, %state, file = file_name, "ignoring non-packet file"),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Body to forward: the staged one if processing finished, else the claimed one.
    async fn outgoing_body(&self, claimed: &ClaimedPacket) -> Result<Option<(Vec<u8>, bool)>> {
        let (peer, name) = (claimed.peer(), claimed.name());
        if let Some(bytes) = read_optional(&self.staged_path(peer, name)).await? {
            return Ok(Some((bytes, true)));
        }
        Ok(read_optional(&self.packet_path(peer, PacketState::Claimed, name))
            .await?
            .map(|bytes| (bytes, false)))
    }

    /// Drop the local claimed copy after it has been forwarded.
    ///
    /// The claimed body goes first: an orphaned staged file is inert, while
    /// a claimed body without its staged twin would be evaluated again.
    async fn discard_local(&self, claimed: &ClaimedPacket) -> Result<()> {
        let (peer, name) = (claimed.peer(), claimed.name());
        remove_if_exists(&self.packet_path(peer, PacketState::Claimed, name)).await?;
        remove_if_exists(&self.staged_path(peer, name)).await?;
        Ok(())
    }

    fn not_claimed(claimed: &ClaimedPacket) -> StoreError {
        StoreError::NotClaimed {
            peer: claimed.peer().clone(),
            name: claimed.name().clone(),
        }
    }
}

#[async_trait]
impl PacketStore for FsStore {
    fn codec(&self) -> Codec {
        self.codec
    }

    async fn ensure_namespace(&self, peer: &PeerId) -> Result<()> {
        for state in PacketState::ALL {
            fs::create_dir_all(self.state_dir(peer, state)).await?;
        }
        Ok(())
    }

    async fn list_pending(&self, peer: &PeerId) -> Result<Vec<PacketHandle>> {
        Ok(self
            .list_names(peer, PacketState::Pending)
            .await?
            .into_iter()
            .map(|name| PacketHandle::new(peer.clone(), name))
            .collect())
    }

    async fn list_claimed(&self, peer: &PeerId) -> Result<Vec<ClaimedEntry>> {
        let mut entries = Vec::new();
        for name in self.list_names(peer, PacketState::Claimed).await? {
            let path = self.packet_path(peer, PacketState::Claimed, &name);
            let claimed_at = match fs::metadata(&path).await {
                Ok(meta) => meta.modified()?,
                // Routed away since the listing.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let staged = fs::try_exists(self.staged_path(peer, &name)).await?;
            entries.push(ClaimedEntry {
                packet: ClaimedPacket::new(peer.clone(), name),
                claimed_at,
                staged,
            });
        }
        Ok(entries)
    }

    async fn list_done(&self, peer: &PeerId) -> Result<Vec<PacketName>> {
        self.list_names(peer, PacketState::Done).await
    }

    async fn submit(&self, peer: &PeerId, name: &PacketName, packet: &RingPacket) -> Result<()> {
        let pending_dir = self.state_dir(peer, PacketState::Pending);
        if !fs::try_exists(&pending_dir).await? {
            return Err(StoreError::NamespaceMissing(peer.clone()));
        }
        for state in [PacketState::Pending, PacketState::Claimed] {
            if fs::try_exists(self.packet_path(peer, state, name)).await? {
                return Err(StoreError::Conflict {
                    peer: peer.clone(),
                    name: name.clone(),
                    reason: format!("name is already {}", state),
                });
            }
        }

        let bytes = self.codec.encode(packet).map_err(StoreError::Encoding)?;
        let dest = self.packet_path(peer, PacketState::Pending, name);
        write_atomic(&pending_dir, &dest, &bytes).await?;
        Ok(())
    }

    async fn claim(&self, handle: &PacketHandle) -> Result<ClaimResult> {
        let from = self.packet_path(&handle.peer, PacketState::Pending, &handle.name);
        let to = self.packet_path(&handle.peer, PacketState::Claimed, &handle.name);

        // link(2) refuses an existing destination, so a stuck claim is never
        // clobbered and exactly one racing caller creates the claimed entry.
        match fs::hard_link(&from, &to).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(packet = %handle, "claimed slot occupied, not claiming");
                return Ok(ClaimResult::ClaimFailed);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ClaimResult::ClaimFailed);
            }
            Err(e) => return Err(e.into()),
        }
        remove_if_exists(&from).await?;

        // The link keeps the old mtime; recovery ages claims by it.
        if let Err(e) = touch(to).await {
            tracing::warn!(packet = %handle, error = %e, "failed to stamp claim time");
        }

        Ok(ClaimResult::Claimed(ClaimedPacket::new(
            handle.peer.clone(),
            handle.name.clone(),
        )))
    }

    async fn read(&self, claimed: &ClaimedPacket) -> Result<RingPacket> {
        let path = self.packet_path(claimed.peer(), PacketState::Claimed, claimed.name());
        let bytes = read_optional(&path)
            .await?
            .ok_or_else(|| Self::not_claimed(claimed))?;
        decode_body(self.codec, claimed.peer(), claimed.name(), &bytes)
    }

    async fn read_staged(&self, claimed: &ClaimedPacket) -> Result<Option<RingPacket>> {
        match read_optional(&self.staged_path(claimed.peer(), claimed.name())).await? {
            Some(bytes) => decode_body(self.codec, claimed.peer(), claimed.name(), &bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn write(&self, claimed: &ClaimedPacket, packet: &RingPacket) -> Result<()> {
        let (peer, name) = (claimed.peer(), claimed.name());
        if !fs::try_exists(self.packet_path(peer, PacketState::Claimed, name)).await? {
            return Err(Self::not_claimed(claimed));
        }
        let bytes = self.codec.encode(packet).map_err(StoreError::Encoding)?;
        write_atomic(
            &self.state_dir(peer, PacketState::Claimed),
            &self.staged_path(peer, name),
            &bytes,
        )
        .await?;
        Ok(())
    }

    async fn release(&self, claimed: &ClaimedPacket) -> Result<bool> {
        let (peer, name) = (claimed.peer(), claimed.name());
        if fs::try_exists(self.staged_path(peer, name)).await? {
            return Err(StoreError::Conflict {
                peer: peer.clone(),
                name: name.clone(),
                reason: "packet has a staged body".into(),
            });
        }
        let to = self.packet_path(peer, PacketState::Pending, name);
        if fs::try_exists(&to).await? {
            return Err(StoreError::Conflict {
                peer: peer.clone(),
                name: name.clone(),
                reason: "name is already pending".into(),
            });
        }

        match fs::rename(self.packet_path(peer, PacketState::Claimed, name), &to).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn move_to_done(&self, claimed: &ClaimedPacket) -> Result<DoneResult> {
        let (peer, name) = (claimed.peer(), claimed.name());
        let done_path = self.packet_path(peer, PacketState::Done, name);

        let Some((body, staged)) = self.outgoing_body(claimed).await? else {
            if fs::try_exists(&done_path).await? {
                return Ok(DoneResult::AlreadyDone);
            }
            return Err(Self::not_claimed(claimed));
        };
        let packet = decode_body(self.codec, peer, name, &body)?;

        let mut replaced = false;
        if let Some(existing) = read_optional(&done_path).await? {
            match occupant_check(self.codec, &packet, &existing, true) {
                Occupancy::Duplicate => {
                    self.discard_local(claimed).await?;
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

        if staged {
            fs::rename(self.staged_path(peer, name), &done_path).await?;
            remove_if_exists(&self.packet_path(peer, PacketState::Claimed, name)).await?;
        } else {
            match fs::rename(self.packet_path(peer, PacketState::Claimed, name), &done_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Self::not_claimed(claimed));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(if replaced {
            DoneResult::Replaced
        } else {
            DoneResult::Moved
        })
    }

    async fn deliver(&self, claimed: &ClaimedPacket, target: &PeerId) -> Result<DeliverResult> {
        let (peer, name) = (claimed.peer(), claimed.name());
        let (body, _) = self
            .outgoing_body(claimed)
            .await?
            .ok_or_else(|| Self::not_claimed(claimed))?;
        let packet = decode_body(self.codec, peer, name, &body)?;

        let target_dir = self.state_dir(target, PacketState::Pending);
        if !fs::try_exists(&target_dir).await? {
            return Err(StoreError::NamespaceMissing(target.clone()));
        }

        let mut replaced = false;
        for state in PacketState::ALL {
            // Delivering to ourselves: our own claimed copy is the source.
            if state == PacketState::Claimed && target == peer {
                continue;
            }
            let Some(existing) = read_optional(&self.packet_path(target, state, name)).await? else {
                continue;
            };
            match occupant_check(self.codec, &packet, &existing, state == PacketState::Pending) {
                Occupancy::Duplicate => {
                    self.discard_local(claimed).await?;
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

        let dest = self.packet_path(target, PacketState::Pending, name);
        write_atomic(&target_dir, &dest, &body).await?;
        self.discard_local(claimed).await?;

        Ok(if replaced {
            DeliverResult::Replaced
        } else {
            DeliverResult::Delivered
        })
    }

    async fn read_done(&self, peer: &PeerId, name: &PacketName) -> Result<Option<RingPacket>> {
        match read_optional(&self.packet_path(peer, PacketState::Done, name)).await? {
            Some(bytes) => decode_body(self.codec, peer, name, &bytes).map(Some),
            None => Ok(None),
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write `bytes` to `dest` through a synced temp file in `dir`.
async fn write_atomic(dir: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let base = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("packet");
    let tmp = dir.join(format!(
        ".{}.{}-{}.tmp",
        base,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = fs::File::create(&tmp).await?;
    let written = async {
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    let renamed = match written {
        Ok(()) => fs::rename(&tmp, dest).await,
        Err(e) => Err(e),
    };
    if renamed.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    renamed
}

/// Set a file's modification time to now.
async fn touch(path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now())
    })
    .await
    .map_err(|e| StoreError::Task(e.to_string()))??;
    Ok(())
}
