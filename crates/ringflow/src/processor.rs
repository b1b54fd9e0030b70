//! The claim processor: one hop's evaluation.

use std::num::NonZeroUsize;
use std::sync::Arc;

use ringflow_core::{chunk, RingPacket};
use ringflow_eval::{PredicateEvaluator, Result, Secret};

/// Result of processing one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    /// The packet after this hop: index advanced, counter bumped on a match.
    pub packet: RingPacket,
    pub matched: bool,
    /// Number of evaluator calls made.
    pub evaluations: usize,
}

/// Drives a packet's query through the evaluator.
///
/// Chunks are visited in order and, within a chunk, secrets in the order
/// given. The first `true` stops both loops. Nothing is written here: the
/// returned packet is the only effect, so a failed or cancelled evaluation
/// can simply be run again.
#[derive(Clone)]
pub struct ClaimProcessor {
    evaluator: Arc<dyn PredicateEvaluator>,
    max_tokens: NonZeroUsize,
}

impl ClaimProcessor {
    pub fn new(evaluator: Arc<dyn PredicateEvaluator>, max_tokens: NonZeroUsize) -> Self {
        Self {
            evaluator,
            max_tokens,
        }
    }

    pub async fn process(&self, packet: &RingPacket, secrets: &[Secret]) -> Result<Processed> {
        let mut evaluations = 0;
        let mut matched = false;

        'chunks: for piece in chunk(&packet.query, self.max_tokens) {
            for secret in secrets {
                evaluations += 1;
                if self.evaluator.evaluate(&piece, secret).await? {
                    matched = true;
                    break 'chunks;
                }
            }
        }

        Ok(Processed {
            packet: packet.advanced(matched),
            matched,
            evaluations,
        })
    }
}
