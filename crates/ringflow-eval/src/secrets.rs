//! Secret supply.
//!
//! Secrets are loaded fresh for every packet, so a peer can add or rotate
//! secrets between poll cycles without restarting anything.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{EvalError, Result};

/// A secret string. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The secret's content.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Provides a peer's secrets at process time.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Secret>>;
}

/// Secrets read from the `*.txt` files of a directory.
///
/// Each file holds one secret; content is trimmed and empty files are
/// skipped. Files are read in file-name order. A missing directory is an
/// empty set.
#[derive(Debug, Clone)]
pub struct DirSecrets {
    dir: PathBuf,
}

impl DirSecrets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SecretSource for DirSecrets {
    async fn load(&self) -> Result<Vec<Secret>> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| EvalError::Secrets { path, source }
        };

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "no secrets directory");
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_err(&self.dir)(e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&self.dir))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if entry.file_type().await.map_err(io_err(&path))?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut secrets = Vec::with_capacity(paths.len());
        for path in paths {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(io_err(&path))?;
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                secrets.push(Secret::new(trimmed));
            }
        }
        Ok(secrets)
    }
}

/// A fixed set of secrets.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets(Vec<Secret>);

impl StaticSecrets {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(secrets.into_iter().map(Secret::new).collect())
    }
}

#[async_trait]
impl SecretSource for StaticSecrets {
    async fn load(&self) -> Result<Vec<Secret>> {
        Ok(self.0.clone())
    }
}
