//! The peer: one participant's poll cycle.
//!
//! ```text
//! poll
//!  ├─ ensure own namespace                       (fatal on error)
//!  ├─ recovery: failed or stale claims → route / finish / release
//!  └─ list pending                               (fatal on error)
//!      └─ per packet, in parallel up to max_concurrent:
//!          claim → read → [terminal? → done]
//!                → load secrets → process (deadline) → stage → route
//! ```
//!
//! A per-packet failure is logged with the packet's name and failure kind
//! and counted in the [`PollReport`]. The packet is due again next cycle:
//! an unevaluated claim goes back to pending, a staged one is re-routed by
//! the next recovery pass. Corrupt packets stay claimed for inspection.
//! Only fatal store errors end the cycle early.

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use ringflow_core::{HopConvention, PacketName, PeerId, RingPacket, DEFAULT_MAX_TOKENS};
use ringflow_eval::{PredicateEvaluator, SecretSource};
use ringflow_store::{
    ClaimResult, ClaimedEntry, ClaimedPacket, PacketHandle, PacketStore,
};

use crate::context::PeerContext;
use crate::error::{FailureKind, Result, RingError};
use crate::processor::ClaimProcessor;
use crate::recovery;
use crate::router::{Router, Routed};

/// Runtime settings for a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub convention: HopConvention,
    /// Whitespace tokens per evaluated chunk.
    pub max_tokens: NonZeroUsize,
    /// Packets processed in parallel within one cycle.
    pub max_concurrent: usize,
    /// Deadline for evaluating one packet.
    pub hop_timeout: Duration,
    /// Age after which a claim is considered abandoned. `None` disables
    /// recovery of claims this peer did not fail itself.
    pub stale_after: Option<Duration>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            convention: HopConvention::default(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_concurrent: 4,
            hop_timeout: Duration::from_secs(300),
            stale_after: Some(Duration::from_secs(900)),
        }
    }
}

/// What happened to one packet this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopOutcome {
    /// Another poller claimed it first.
    ClaimLost,
    /// Processed and routed.
    Hopped { matched: bool, routed: Routed },
    /// Found already terminal in pending and retired without processing.
    Retired,
}

/// Counts for one poll cycle.
///
/// `forwarded` and `completed` include packets moved on by recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Packets this cycle claimed.
    pub claimed: usize,
    /// Claims lost to a concurrent poller.
    pub claim_lost: usize,
    /// Hops whose predicate matched.
    pub matched: usize,
    pub forwarded: usize,
    pub completed: usize,
    pub corrupt: usize,
    pub evaluation_failures: usize,
    pub delivery_failures: usize,
    /// Stale claims routed on or finished by recovery.
    pub recovered: usize,
    /// Stale claims released back to pending.
    pub requeued: usize,
}

impl PollReport {
    pub(crate) fn record(&mut self, outcome: &HopOutcome) {
        match outcome {
            HopOutcome::ClaimLost => self.claim_lost += 1,
            HopOutcome::Hopped { matched, routed } => {
                self.claimed += 1;
                if *matched {
                    self.matched += 1;
                }
                self.record_routed(routed);
            }
            HopOutcome::Retired => {
                self.claimed += 1;
                self.completed += 1;
            }
        }
    }

    pub(crate) fn record_routed(&mut self, routed: &Routed) {
        match routed {
            Routed::Terminal(_) => self.completed += 1,
            Routed::Forwarded { .. } => self.forwarded += 1,
        }
    }

    pub(crate) fn record_failure(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::Corrupt => self.corrupt += 1,
            FailureKind::Evaluation => self.evaluation_failures += 1,
            FailureKind::Delivery => self.delivery_failures += 1,
        }
    }

    /// Per-packet failures of any kind.
    pub fn failures(&self) -> usize {
        self.corrupt + self.evaluation_failures + self.delivery_failures
    }
}

impl fmt::Display for PollReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "claimed {}, forwarded {}, completed {}, matched {}, lost {}, \
             recovered {}, requeued {}, failed {} (corrupt {}, evaluation {}, delivery {})",
            self.claimed,
            self.forwarded,
            self.completed,
            self.matched,
            self.claim_lost,
            self.recovered,
            self.requeued,
            self.failures(),
            self.corrupt,
            self.evaluation_failures,
            self.delivery_failures,
        )
    }
}

/// A peer's namespace at a glance.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub pending: Vec<PacketName>,
    pub claimed: Vec<ClaimedEntry>,
    pub done: Vec<PacketName>,
}

/// One ring participant.
pub struct Peer<S: PacketStore + 'static> {
    worker: Worker<S>,
    config: PeerConfig,
}

/// Everything a per-packet task needs, cheap to clone into it.
pub(crate) struct Worker<S: PacketStore + 'static> {
    pub(crate) ctx: PeerContext,
    pub(crate) store: Arc<S>,
    pub(crate) router: Router<S>,
    processor: ClaimProcessor,
    secrets: Arc<dyn SecretSource>,
    hop_timeout: Duration,
    /// Staged claims whose routing failed, due again next cycle.
    retry: Arc<Mutex<HashSet<PacketName>>>,
}

impl<S: PacketStore + 'static> Clone for Worker<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            store: Arc::clone(&self.store),
            router: self.router.clone(),
            processor: self.processor.clone(),
            secrets: Arc::clone(&self.secrets),
            hop_timeout: self.hop_timeout,
            retry: Arc::clone(&self.retry),
        }
    }
}

impl<S: PacketStore + 'static> Peer<S> {
    /// Create a peer over a store shared with the rest of the ring.
    pub fn new(
        id: PeerId,
        store: Arc<S>,
        evaluator: Arc<dyn PredicateEvaluator>,
        secrets: Arc<dyn SecretSource>,
        config: PeerConfig,
    ) -> Self {
        let ctx = PeerContext::new(id).with_convention(config.convention);
        Self {
            worker: Worker {
                ctx,
                router: Router::new(Arc::clone(&store)),
                store,
                processor: ClaimProcessor::new(evaluator, config.max_tokens),
                secrets,
                hop_timeout: config.hop_timeout,
                retry: Arc::default(),
            },
            config,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.worker.ctx.peer
    }

    pub fn context(&self) -> &PeerContext {
        &self.worker.ctx
    }

    pub fn store(&self) -> &S {
        &self.worker.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Namespace Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create this peer's namespace if missing.
    pub async fn init(&self) -> Result<()> {
        self.worker.store.ensure_namespace(self.id()).await?;
        Ok(())
    }

    /// Start a new packet on `ring`.
    ///
    /// The packet is placed in the pending state of whichever peer must
    /// process it first under the configured convention. Returns that peer.
    pub async fn originate(
        &self,
        name: &PacketName,
        ring: Vec<PeerId>,
        query: impl Into<String>,
    ) -> Result<PeerId> {
        let packet = RingPacket::new(ring, query);
        let holder = self
            .config
            .convention
            .first_holder(&packet, self.id())
            .clone();
        self.worker.store.submit(&holder, name, &packet).await?;
        tracing::info!(
            peer = %self.id(),
            packet = %name,
            first = %holder,
            ring_len = packet.ring.len(),
            "packet originated"
        );
        Ok(holder)
    }

    /// Snapshot of this peer's namespace.
    pub async fn status(&self) -> Result<PeerStatus> {
        let store = &self.worker.store;
        Ok(PeerStatus {
            pending: store
                .list_pending(self.id())
                .await?
                .into_iter()
                .map(|h| h.name)
                .collect(),
            claimed: store.list_claimed(self.id()).await?,
            done: store.list_done(self.id()).await?,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Poll Cycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one poll cycle.
    pub async fn poll(&self) -> Result<PollReport> {
        let mut report = PollReport::default();
        let store = &self.worker.store;

        store.ensure_namespace(self.id()).await?;

        recovery::recover(&self.worker, self.config.stale_after, &mut report).await?;

        let handles = store.list_pending(self.id()).await?;
        tracing::debug!(peer = %self.id(), pending = handles.len(), "poll cycle started");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for handle in handles {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| RingError::Task(e.to_string()))?;
            let worker = self.worker.clone();
            tasks.spawn(async move {
                let name = handle.name.clone();
                let outcome = worker.handle(handle).await;
                drop(permit);
                (name, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (name, outcome) = joined.map_err(|e| RingError::Task(e.to_string()))?;
            match outcome {
                Ok(outcome) => report.record(&outcome),
                Err(e) if e.is_fatal() => {
                    tracing::error!(peer = %self.id(), packet = %name, error = %e, "store failure, aborting poll cycle");
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    let kind = e.failure_kind();
                    tracing::warn!(peer = %self.id(), packet = %name, %kind, error = %e, "hop failed");
                    report.claimed += 1;
                    report.record_failure(kind);
                }
            }
        }

        tracing::info!(peer = %self.id(), %report, "poll cycle finished");
        Ok(report)
    }
}

impl<S: PacketStore + 'static> Worker<S> {
    async fn handle(&self, handle: PacketHandle) -> Result<HopOutcome> {
        match self.store.claim(&handle).await? {
            ClaimResult::Claimed(claimed) => match self.hop(&claimed).await {
                Err(e) if !e.is_fatal() && e.failure_kind() != FailureKind::Corrupt => {
                    self.retry_next_cycle(&claimed).await;
                    Err(e)
                }
                outcome => outcome,
            },
            ClaimResult::ClaimFailed => {
                tracing::debug!(peer = %self.ctx.peer, packet = %handle.name, "claim lost");
                Ok(HopOutcome::ClaimLost)
            }
        }
    }

    /// Make a failed claim due again next cycle.
    ///
    /// Without a staged body the packet goes back to pending. A staged body
    /// holds a verdict already spent, so it stays claimed and is queued for
    /// re-routing instead. If neither works, stale recovery picks it up.
    async fn retry_next_cycle(&self, claimed: &ClaimedPacket) {
        let released = match self.store.read_staged(claimed).await {
            Ok(Some(_)) => {
                self.retry_later(claimed.name().clone()).await;
                return;
            }
            Ok(None) => self.store.release(claimed).await,
            Err(e) => Err(e),
        };
        match released {
            Ok(true) => {
                tracing::debug!(peer = %self.ctx.peer, packet = %claimed.name(), "released failed claim for retry");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(peer = %self.ctx.peer, packet = %claimed.name(), error = %e, "could not release failed claim");
            }
        }
    }

    pub(crate) async fn retry_later(&self, name: PacketName) {
        self.retry.lock().await.insert(name);
    }

    /// Drain the names queued by [`Worker::retry_later`].
    pub(crate) async fn take_retries(&self) -> HashSet<PacketName> {
        std::mem::take(&mut *self.retry.lock().await)
    }

    /// Process and route a packet this peer has just claimed.
    async fn hop(&self, claimed: &ClaimedPacket) -> Result<HopOutcome> {
        let packet = self.store.read(claimed).await?;

        // The terminal state is immutable: never evaluate a finished packet.
        if self.ctx.convention.is_terminal(&packet) {
            let result = self.store.move_to_done(claimed).await?;
            tracing::info!(peer = %self.ctx.peer, packet = %claimed.name(), ?result, "terminal packet retired unchanged");
            return Ok(HopOutcome::Retired);
        }

        let secrets = self.secrets.load().await?;
        let processed = tokio::time::timeout(
            self.hop_timeout,
            self.processor.process(&packet, &secrets),
        )
        .await
        .map_err(|_| RingError::HopTimeout(self.hop_timeout))??;

        tracing::debug!(
            peer = %self.ctx.peer,
            packet = %claimed.name(),
            matched = processed.matched,
            evaluations = processed.evaluations,
            "packet evaluated"
        );

        self.store.write(claimed, &processed.packet).await?;
        let routed = self
            .router
            .route(&self.ctx, claimed, &processed.packet)
            .await?;

        Ok(HopOutcome::Hopped {
            matched: processed.matched,
            routed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringflow_eval::{ConstEvaluator, StaticSecrets};
    use ringflow_store::{MemoryStore, PacketState};

    fn peer(s: &str) -> PeerId {
        PeerId::new(s).unwrap()
    }

    fn name(s: &str) -> PacketName {
        PacketName::new(s).unwrap()
    }

    fn make_peer(id: &str, store: &Arc<MemoryStore>, verdict: bool) -> Peer<MemoryStore> {
        Peer::new(
            peer(id),
            Arc::clone(store),
            Arc::new(ConstEvaluator(verdict)),
            Arc::new(StaticSecrets::new(["secret"])),
            PeerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_poll_empty_namespace() {
        let store = Arc::new(MemoryStore::new());
        let a = make_peer("a", &store, false);
        let report = a.poll().await.unwrap();
        assert_eq!(report, PollReport::default());
    }

    #[tokio::test]
    async fn test_originate_lands_at_first_member() {
        let store = Arc::new(MemoryStore::new());
        let origin = make_peer("origin", &store, false);
        let a = make_peer("a", &store, false);
        a.init().await.unwrap();

        let holder = origin
            .originate(&name("data"), vec![peer("a"), peer("b")], "x")
            .await
            .unwrap();
        assert_eq!(holder, peer("a"));
        assert_eq!(a.status().await.unwrap().pending, vec![name("data")]);
    }

    #[tokio::test]
    async fn test_terminal_packet_in_pending_is_retired_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let a = make_peer("a", &store, true);
        a.init().await.unwrap();

        let finished = RingPacket::new(vec![peer("a")], "x").advanced(false);
        store.submit(&peer("a"), &name("p"), &finished).await.unwrap();

        let report = a.poll().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.matched, 0);
        assert_eq!(
            store.read_done(&peer("a"), &name("p")).await.unwrap(),
            Some(finished)
        );
    }

    #[tokio::test]
    async fn test_hop_timeout_is_evaluation_failure() {
        let store = Arc::new(MemoryStore::new());
        let a = Peer::new(
            peer("a"),
            Arc::clone(&store),
            Arc::new(ringflow_testkit::SlowEvaluator::new(Duration::from_secs(60))),
            Arc::new(StaticSecrets::new(["s"])),
            PeerConfig {
                hop_timeout: Duration::from_millis(50),
                ..PeerConfig::default()
            },
        );
        a.init().await.unwrap();
        store
            .submit(&peer("a"), &name("p"), &RingPacket::new(vec![peer("a")], "x"))
            .await
            .unwrap();

        let report = a.poll().await.unwrap();
        assert_eq!(report.evaluation_failures, 1);

        // Back in pending, unchanged, for the next cycle.
        let status = a.status().await.unwrap();
        assert!(status.claimed.is_empty());
        assert_eq!(status.pending, vec![name("p")]);
        assert!(status.done.is_empty());
    }

    #[tokio::test]
    async fn test_report_display() {
        let mut report = PollReport::default();
        report.record_failure(FailureKind::Corrupt);
        report.record(&HopOutcome::ClaimLost);
        let text = report.to_string();
        assert!(text.contains("lost 1"));
        assert!(text.contains("corrupt 1"));
        assert_eq!(report.failures(), 1);
    }

    #[tokio::test]
    async fn test_missing_own_namespace_is_created() {
        let store = Arc::new(MemoryStore::new());
        let a = make_peer("a", &store, false);
        a.poll().await.unwrap();
        assert!(store.list_pending(&peer("a")).await.unwrap().is_empty());
        store
            .insert_raw(&peer("a"), PacketState::Done, &name("old"), &b"{}"[..])
            .unwrap();
        assert_eq!(a.status().await.unwrap().done, vec![name("old")]);
    }
}
