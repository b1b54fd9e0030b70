//! Error types for the eval module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while evaluating a predicate or loading secrets.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The evaluator command could not be started.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The evaluator command ran but reported failure.
    #[error("'{command}' exited with {}: {stderr}", exit_status(.code))]
    Exited {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// I/O error talking to the evaluator.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The evaluator request could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A secrets location could not be read.
    #[error("failed to read secrets from {path}: {source}")]
    Secrets {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backend-specific failure (for evaluators outside this crate).
    #[error("evaluator backend error: {0}")]
    Backend(String),
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// Result type for eval operations.
pub type Result<T> = std::result::Result<T, EvalError>;
