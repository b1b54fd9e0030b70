//! The explicit context a peer's components run in.

use ringflow_core::{HopConvention, PeerId};

/// Who this peer is and how it reads `current_index`.
///
/// Passed to components at construction instead of living in globals, so
/// several peers can run in one process (tests, simulations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerContext {
    pub peer: PeerId,
    pub convention: HopConvention,
}

impl PeerContext {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            convention: HopConvention::default(),
        }
    }

    pub fn with_convention(mut self, convention: HopConvention) -> Self {
        self.convention = convention;
        self
    }
}
