//! Predicate evaluation through an external command.
//!
//! The command is started once per (chunk, secret) pair and receives
//!
//! ```text
//! {"chunk": "...", "secret": "..."}
//! ```
//!
//! on stdin. Its stdout is read as a verdict with [`parse_verdict`]; a
//! non-zero exit is an error. This is how a peer plugs in model inference
//! without the ring knowing anything about the model.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::error::{EvalError, Result};
use crate::evaluator::{parse_verdict, PredicateEvaluator};
use crate::secrets::Secret;

#[derive(Serialize)]
struct Request<'a> {
    chunk: &'a str,
    secret: &'a str,
}

/// Runs an external command for every evaluation.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandEvaluator {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl PredicateEvaluator for CommandEvaluator {
    async fn evaluate(&self, chunk: &str, secret: &Secret) -> Result<bool> {
        let request = serde_json::to_vec(&Request {
            chunk,
            secret: secret.expose(),
        })?;

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future (deadline expiry) must not leave the model running.
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| EvalError::Spawn {
            command: self.program.clone(),
            source,
        })?;

        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&request).await {
                // The command may answer without reading its input.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;

        if !output.status.success() {
            return Err(EvalError::Exited {
                command: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let verdict = parse_verdict(&String::from_utf8_lossy(&output.stdout));
        tracing::trace!(command = %self.program, verdict, "evaluator command finished");
        Ok(verdict)
    }
}
