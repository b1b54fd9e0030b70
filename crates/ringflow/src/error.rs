//! Error types for ringflow.

use std::fmt;
use std::time::Duration;

use ringflow_core::CoreError;
use ringflow_eval::EvalError;
use ringflow_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while running a peer.
#[derive(Debug, Error)]
pub enum RingError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The predicate evaluator or secret supply failed.
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Invalid identifiers or packet data.
    #[error("packet error: {0}")]
    Core(#[from] CoreError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Evaluation did not finish within the per-hop deadline.
    #[error("evaluation exceeded the hop deadline of {0:?}")]
    HopTimeout(Duration),

    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Task(String),
}

/// How a per-packet failure is counted and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The body could not be decoded; the packet stays claimed for inspection.
    Corrupt,
    /// Evaluation failed or timed out; the packet goes back to pending, unmodified.
    Evaluation,
    /// Staging or routing failed; the packet is retried next cycle.
    Delivery,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Corrupt => "corrupt",
            FailureKind::Evaluation => "evaluation",
            FailureKind::Delivery => "delivery",
        })
    }
}

impl RingError {
    /// Whether the error ends the whole poll cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            RingError::Store(e) => e.is_fatal(),
            RingError::Task(_) => true,
            _ => false,
        }
    }

    /// Classification of a per-packet failure.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RingError::Store(StoreError::CorruptPacket { .. }) => FailureKind::Corrupt,
            RingError::Eval(_) | RingError::HopTimeout(_) => FailureKind::Evaluation,
            _ => FailureKind::Delivery,
        }
    }
}

/// Result type for ringflow operations.
pub type Result<T> = std::result::Result<T, RingError>;
