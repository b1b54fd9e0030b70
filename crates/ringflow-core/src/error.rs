//! Error types for ringflow core.

use thiserror::Error;

/// Errors raised while building, validating, or decoding packets.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid peer id {0:?}: {1}")]
    InvalidPeerId(String, &'static str),

    #[error("invalid packet name {0:?}: {1}")]
    InvalidPacketName(String, &'static str),

    #[error("current_index {0} is below -1")]
    IndexUnderflow(i64),

    #[error("counter {data} exceeds hops processed ({hops})")]
    CounterAhead { data: u64, hops: i64 },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
