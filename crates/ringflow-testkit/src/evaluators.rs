//! Deterministic predicate evaluators.
//!
//! Stand-ins for model-backed evaluators: fixed scripts, call recording,
//! forced failures and artificial latency.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ringflow_eval::{EvalError, PredicateEvaluator, Result, Secret};

/// Returns verdicts from a script in call order, then `false`.
#[derive(Debug, Default)]
pub struct ScriptedEvaluator {
    script: Mutex<VecDeque<bool>>,
}

impl ScriptedEvaluator {
    pub fn new(verdicts: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(verdicts.into_iter().collect()),
        }
    }

    /// Verdicts not consumed yet.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl PredicateEvaluator for ScriptedEvaluator {
    async fn evaluate(&self, _chunk: &str, _secret: &Secret) -> Result<bool> {
        Ok(self.script.lock().unwrap().pop_front().unwrap_or(false))
    }
}

/// Wraps an evaluator and records every (chunk, secret) pair it sees.
#[derive(Debug, Default)]
pub struct RecordingEvaluator<E> {
    inner: E,
    calls: Mutex<Vec<(String, String)>>,
}

impl<E> RecordingEvaluator<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Pairs evaluated so far, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl<E: PredicateEvaluator> PredicateEvaluator for RecordingEvaluator<E> {
    async fn evaluate(&self, chunk: &str, secret: &Secret) -> Result<bool> {
        self.calls
            .lock()
            .unwrap()
            .push((chunk.to_string(), secret.expose().to_string()));
        self.inner.evaluate(chunk, secret).await
    }
}

/// Always fails, as an unreachable model backend would.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingEvaluator;

#[async_trait]
impl PredicateEvaluator for FailingEvaluator {
    async fn evaluate(&self, _chunk: &str, _secret: &Secret) -> Result<bool> {
        Err(EvalError::Backend("model backend unavailable".into()))
    }
}

/// Sleeps before answering `false`. Used to trip hop deadlines.
#[derive(Debug, Clone, Copy)]
pub struct SlowEvaluator {
    delay: Duration,
}

impl SlowEvaluator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PredicateEvaluator for SlowEvaluator {
    async fn evaluate(&self, _chunk: &str, _secret: &Secret) -> Result<bool> {
        tokio::time::sleep(self.delay).await;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringflow_eval::ConstEvaluator;

    #[tokio::test]
    async fn test_scripted_runs_out_to_false() {
        let eval = ScriptedEvaluator::new([true, false]);
        let s = Secret::new("s");
        assert!(eval.evaluate("x", &s).await.unwrap());
        assert!(!eval.evaluate("x", &s).await.unwrap());
        assert_eq!(eval.remaining(), 0);
        assert!(!eval.evaluate("x", &s).await.unwrap());
    }

    #[tokio::test]
    async fn test_recording_passes_through() {
        let eval = RecordingEvaluator::new(ConstEvaluator(true));
        assert!(eval.evaluate("chunk", &Secret::new("key")).await.unwrap());
        assert_eq!(eval.calls(), vec![("chunk".to_string(), "key".to_string())]);
    }

    #[tokio::test]
    async fn test_failing() {
        let err = FailingEvaluator
            .evaluate("x", &Secret::new("s"))
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Backend(_)));
    }
}
