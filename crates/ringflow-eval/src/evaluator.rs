//! The predicate evaluator capability.

use async_trait::async_trait;

use crate::error::Result;
use crate::secrets::Secret;

/// Decides whether a chunk of a query matches one of the peer's secrets.
///
/// Implementations may be slow (model inference). Callers bound them with a
/// deadline and drop the future on expiry, so implementations must not leave
/// work running once dropped.
#[async_trait]
pub trait PredicateEvaluator: Send + Sync {
    /// Evaluate one (chunk, secret) pair.
    async fn evaluate(&self, chunk: &str, secret: &Secret) -> Result<bool>;
}

/// Interpret free-form model output as a verdict.
///
/// True iff "true" appears anywhere, case-insensitively. Models asked to
/// answer "TRUE or FALSE" tend to wrap the answer in extra text.
pub fn parse_verdict(output: &str) -> bool {
    output.to_lowercase().contains("true")
}

/// Evaluator that always returns the same verdict.
#[derive(Debug, Clone, Copy)]
pub struct ConstEvaluator(pub bool);

#[async_trait]
impl PredicateEvaluator for ConstEvaluator {
    async fn evaluate(&self, _chunk: &str, _secret: &Secret) -> Result<bool> {
        Ok(self.0)
    }
}

/// Evaluator that matches when the chunk contains the secret,
/// case-insensitively. Empty secrets never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordEvaluator;

#[async_trait]
impl PredicateEvaluator for KeywordEvaluator {
    async fn evaluate(&self, chunk: &str, secret: &Secret) -> Result<bool> {
        let needle = secret.expose().trim().to_lowercase();
        if needle.is_empty() {
            return Ok(false);
        }
        Ok(chunk.to_lowercase().contains(&needle))
    }
}
