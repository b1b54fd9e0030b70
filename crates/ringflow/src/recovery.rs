//! Recovery of abandoned and failed claims.
//!
//! A peer that crashes mid-hop leaves its packet in the claimed state, and
//! a staged packet whose routing failed stays there too. At the start of
//! each cycle, claims this peer queued for retry and claims older than the
//! stale threshold are resolved by what they hold:
//!
//! | claimed entry                          | action                          |
//! |----------------------------------------|---------------------------------|
//! | staged body present                    | route it (already evaluated)    |
//! | same packet already retired locally    | finish the interrupted retire   |
//! | corrupt body                           | leave it for inspection         |
//! | anything else                          | release to pending              |
//!
//! Released packets are picked up by the same cycle's claim pass.

use std::time::{Duration, SystemTime};

use ringflow_store::{ClaimedEntry, DoneResult, PacketStore, StoreError};

use crate::error::{FailureKind, Result};
use crate::peer::{PollReport, Worker};
use crate::router::Routed;

#[derive(Debug)]
enum Action {
    Rerouted(Routed),
    Finished(DoneResult),
    Requeued,
    Skipped,
}

pub(crate) async fn recover<S: PacketStore + 'static>(
    worker: &Worker<S>,
    stale_after: Option<Duration>,
    report: &mut PollReport,
) -> Result<()> {
    let retries = worker.take_retries().await;
    if stale_after.is_none() && retries.is_empty() {
        return Ok(());
    }

    let peer = &worker.ctx.peer;
    let entries = worker.store.list_claimed(peer).await?;
    let now = SystemTime::now();

    for entry in entries {
        let age = now.duration_since(entry.claimed_at).unwrap_or(Duration::ZERO);
        let name = entry.packet.name().clone();
        let stale = stale_after.is_some_and(|limit| age >= limit);
        if !stale && !retries.contains(&name) {
            continue;
        }

        match recover_one(worker, &entry).await {
            Ok(Action::Rerouted(routed)) => {
                tracing::info!(%peer, packet = %name, ?routed, "recovered staged packet");
                report.recovered += 1;
                report.record_routed(&routed);
            }
            Ok(Action::Finished(result)) => {
                tracing::info!(%peer, packet = %name, ?result, "finished interrupted retire");
                report.recovered += 1;
            }
            Ok(Action::Requeued) => {
                tracing::info!(%peer, packet = %name, age_secs = age.as_secs(), "released stale claim");
                report.requeued += 1;
            }
            Ok(Action::Skipped) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let kind = e.failure_kind();
                tracing::warn!(%peer, packet = %name, %kind, error = %e, "recovery failed");
                report.record_failure(kind);
                if entry.staged && kind != FailureKind::Corrupt {
                    worker.retry_later(name).await;
                }
            }
        }
    }
    Ok(())
}

async fn recover_one<S: PacketStore + 'static>(
    worker: &Worker<S>,
    entry: &ClaimedEntry,
) -> Result<Action> {
    let store = &worker.store;
    let claimed = &entry.packet;

    if entry.staged {
        match store.read_staged(claimed).await {
            Ok(Some(staged)) => {
                let routed = worker.router.route(&worker.ctx, claimed, &staged).await?;
                return Ok(Action::Rerouted(routed));
            }
            // Staged body vanished since the listing: treat as unstaged.
            Ok(None) => {}
            Err(StoreError::CorruptPacket { .. }) => {
                tracing::debug!(packet = %claimed, "staged body is corrupt, leaving for inspection");
                return Ok(Action::Skipped);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let packet = match store.read(claimed).await {
        Ok(packet) => packet,
        Err(StoreError::CorruptPacket { .. }) => {
            tracing::debug!(packet = %claimed, "claimed body is corrupt, leaving for inspection");
            return Ok(Action::Skipped);
        }
        Err(StoreError::NotClaimed { .. }) => return Ok(Action::Skipped),
        Err(e) => return Err(e.into()),
    };

    match store.read_done(claimed.peer(), claimed.name()).await {
        Ok(Some(done))
            if done.same_lineage(&packet) && done.current_index >= packet.current_index =>
        {
            return Ok(Action::Finished(store.move_to_done(claimed).await?));
        }
        Ok(_) | Err(StoreError::CorruptPacket { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    if store.release(claimed).await? {
        Ok(Action::Requeued)
    } else {
        Ok(Action::Skipped)
    }
}
