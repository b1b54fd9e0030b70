//! # Ringflow Eval
//!
//! The capabilities a peer consumes while processing a hop: the predicate
//! evaluator and the secret supply. Neither has any ring logic; the
//! processor in the `ringflow` crate decides how they are combined.
//!
//! ## Key Types
//!
//! - [`PredicateEvaluator`] - `evaluate(chunk, secret) -> bool`
//! - [`CommandEvaluator`] - Runs an external command per pair (model inference)
//! - [`ConstEvaluator`] / [`KeywordEvaluator`] - Deterministic stand-ins
//! - [`SecretSource`] - Supplies the peer's secrets at process time
//! - [`DirSecrets`] / [`StaticSecrets`] - Directory-backed and fixed sources

pub mod command;
pub mod error;
pub mod evaluator;
pub mod secrets;

pub use command::CommandEvaluator;
pub use error::{EvalError, Result};
pub use evaluator::{parse_verdict, ConstEvaluator, KeywordEvaluator, PredicateEvaluator};
pub use secrets::{DirSecrets, Secret, SecretSource, StaticSecrets};
