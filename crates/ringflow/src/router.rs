//! The router: terminal vs. next hop, and the move that goes with it.

use std::sync::Arc;

use ringflow_core::{PeerId, RingPacket, RouteDecision};
use ringflow_store::{ClaimedPacket, DeliverResult, DoneResult, PacketStore, Result};

use crate::context::PeerContext;

/// Where a routed packet ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Retired into the local done state.
    Terminal(DoneResult),
    /// Handed to the next peer's pending state.
    Forwarded { next: PeerId, result: DeliverResult },
}

/// Routes processed packets through a store.
pub struct Router<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for Router<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: PacketStore + ?Sized> Router<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Route a claimed packet whose processed body has been staged.
    ///
    /// A next peer equal to the local one is delivered like any other, into
    /// the local pending state, and comes back through a later claim.
    pub async fn route(
        &self,
        ctx: &PeerContext,
        claimed: &ClaimedPacket,
        updated: &RingPacket,
    ) -> Result<Routed> {
        match ctx.convention.decide(updated) {
            RouteDecision::Terminal => {
                let result = self.store.move_to_done(claimed).await?;
                tracing::info!(
                    peer = %ctx.peer,
                    packet = %claimed.name(),
                    counter = updated.counter,
                    ?result,
                    "ring complete, packet retired"
                );
                Ok(Routed::Terminal(result))
            }
            RouteDecision::Forward(next) => {
                let result = self.store.deliver(claimed, &next).await?;
                tracing::info!(
                    peer = %ctx.peer,
                    packet = %claimed.name(),
                    %next,
                    index = updated.current_index,
                    ?result,
                    "packet forwarded"
                );
                Ok(Routed::Forwarded { next, result })
            }
        }
    }
}
