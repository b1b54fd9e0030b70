//! Configuration for a ringflow peer.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. `--config` on the command line
//!   2. $RINGFLOW_CONFIG
//!   3. $XDG_CONFIG_HOME/ringflow/config.toml
//!   4. ~/.config/ringflow/config.toml

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ringflow_core::{Codec, HopConvention, PeerId};
use ringflow_eval::CommandEvaluator;
use ringflow_store::Layout;

use crate::peer::PeerConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    pub peer: PeerSection,
    pub layout: LayoutConfig,
    pub store: StoreConfig,
    pub chunking: ChunkingConfig,
    pub evaluator: EvaluatorConfig,
    pub secrets: SecretsConfig,
    pub poll: PollConfig,
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSection {
    /// This peer's identity, usually an email address. Required.
    pub id: String,
    /// Shared root holding every peer's folder.
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Application folder inside each peer's folder.
    pub app: PathBuf,
    pub pending: String,
    pub claimed: String,
    pub done: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Fs,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    /// Database file for the sqlite backend. Defaults to `<root>/ringflow.db`.
    pub sqlite_path: Option<PathBuf>,
    pub codec: Codec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Whitespace tokens per chunk.
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Program run once per (chunk, secret) pair. Required for polling.
    pub command: String,
    pub args: Vec<String>,
    /// Directory the program runs in. Defaults to the peer's own.
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Directory of `*.txt` secret files.
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Packets processed in parallel within one cycle.
    pub max_concurrent: usize,
    /// Deadline for evaluating one packet.
    pub hop_timeout_secs: u64,
    pub convention: HopConvention,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    /// Claims older than this are considered abandoned.
    pub stale_after_secs: u64,
}

impl Default for PeerSection {
    fn default() -> Self {
        Self {
            id: String::new(),
            root: data_dir().join("datasites"),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        let layout = Layout::default();
        Self {
            app: layout.app,
            pending: layout.pending,
            claimed: layout.claimed,
            done: layout.done,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Fs,
            sqlite_path: None,
            codec: Codec::Json,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: ringflow_core::DEFAULT_MAX_TOKENS.get(),
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            dir: config_dir().join("secrets"),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            hop_timeout_secs: 300,
            convention: HopConvention::default(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_after_secs: 900,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ringflow")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("ringflow")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RingConfig {
    /// Load config: env vars → file → defaults.
    ///
    /// `explicit` takes precedence over the environment and XDG locations.
    /// An explicit path that does not exist is an error; a missing default
    /// file means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::file_path);
        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            RingConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path when none is given explicitly.
    pub fn file_path() -> PathBuf {
        std::env::var("RINGFLOW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write this config to `path` unless a file already exists there.
    /// Returns whether a file was written.
    pub fn write_if_missing(&self, path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(true)
    }

    /// Apply RINGFLOW_* overrides from `lookup` (the process environment in
    /// production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RINGFLOW_PEER__ID") {
            self.peer.id = v;
        }
        if let Some(v) = lookup("RINGFLOW_PEER__ROOT") {
            self.peer.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("RINGFLOW_STORE__BACKEND") {
            match v.to_ascii_lowercase().as_str() {
                "fs" => self.store.backend = Backend::Fs,
                "sqlite" => self.store.backend = Backend::Sqlite,
                other => tracing::warn!(value = other, "ignoring unknown RINGFLOW_STORE__BACKEND"),
            }
        }
        if let Some(v) = lookup("RINGFLOW_EVALUATOR__COMMAND") {
            self.evaluator.command = v;
        }
        if let Some(v) = lookup("RINGFLOW_SECRETS__DIR") {
            self.secrets.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RINGFLOW_CHUNKING__MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                self.chunking.max_tokens = n;
            }
        }
    }

    /// Check the values a peer cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.peer_id()?;
        if self.chunking.max_tokens == 0 {
            return Err(ConfigError::Invalid("chunking.max_tokens must be at least 1".into()));
        }
        if self.poll.max_concurrent == 0 {
            return Err(ConfigError::Invalid("poll.max_concurrent must be at least 1".into()));
        }
        if self.poll.hop_timeout_secs == 0 {
            return Err(ConfigError::Invalid("poll.hop_timeout_secs must be at least 1".into()));
        }
        if self.recovery.enabled && self.recovery.stale_after_secs <= self.poll.hop_timeout_secs {
            // Otherwise recovery could requeue a packet that is still being evaluated.
            return Err(ConfigError::Invalid(
                "recovery.stale_after_secs must exceed poll.hop_timeout_secs".into(),
            ));
        }

        let l = &self.layout;
        let names = [&l.pending, &l.claimed, &l.done];
        if names.iter().any(|n| n.is_empty()) {
            return Err(ConfigError::Invalid("layout folder names must not be empty".into()));
        }
        if l.pending == l.claimed || l.pending == l.done || l.claimed == l.done {
            return Err(ConfigError::Invalid("layout folder names must be distinct".into()));
        }
        Ok(())
    }

    /// The configured peer identity.
    pub fn peer_id(&self) -> Result<PeerId, ConfigError> {
        if self.peer.id.trim().is_empty() {
            return Err(ConfigError::Invalid("peer.id is not set".into()));
        }
        PeerId::new(self.peer.id.as_str()).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn layout(&self) -> Layout {
        Layout {
            app: self.layout.app.clone(),
            pending: self.layout.pending.clone(),
            claimed: self.layout.claimed.clone(),
            done: self.layout.done.clone(),
        }
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.store
            .sqlite_path
            .clone()
            .unwrap_or_else(|| self.peer.root.join("ringflow.db"))
    }

    /// The evaluator described by the `[evaluator]` section.
    pub fn command_evaluator(&self) -> CommandEvaluator {
        let evaluator = CommandEvaluator::new(
            self.evaluator.command.clone(),
            self.evaluator.args.iter().cloned(),
        );
        match &self.evaluator.working_dir {
            Some(dir) => evaluator.with_working_dir(dir),
            None => evaluator,
        }
    }

    /// Runtime settings for a [`Peer`](crate::Peer).
    pub fn peer_config(&self) -> Result<PeerConfig, ConfigError> {
        let max_tokens = NonZeroUsize::new(self.chunking.max_tokens)
            .ok_or_else(|| ConfigError::Invalid("chunking.max_tokens must be at least 1".into()))?;
        Ok(PeerConfig {
            convention: self.poll.convention,
            max_tokens,
            max_concurrent: self.poll.max_concurrent.max(1),
            hop_timeout: Duration::from_secs(self.poll.hop_timeout_secs),
            stale_after: self
                .recovery
                .enabled
                .then(|| Duration::from_secs(self.recovery.stale_after_secs)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> RingConfig {
        let mut config = RingConfig::default();
        config.peer.id = "alice@example.org".into();
        config
    }

    #[test]
    fn test_defaults() {
        let config = RingConfig::default();
        assert_eq!(config.layout.pending, "input");
        assert_eq!(config.layout.claimed, "running");
        assert_eq!(config.layout.done, "done");
        assert_eq!(config.chunking.max_tokens, 4000);
        assert_eq!(config.store.backend, Backend::Fs);
        assert_eq!(config.poll.convention, HopConvention::LastCompleted);
        assert!(config.recovery.enabled);
    }

    #[test]
    fn test_parse_partial_file() {
        let config: RingConfig = toml::from_str(
            r#"
            [peer]
            id = "bob@example.org"
            root = "/srv/datasites"

            [store]
            backend = "sqlite"
            codec = "cbor"

            [poll]
            convention = "next_target"
            "#,
        )
        .unwrap();

        assert_eq!(config.peer.id, "bob@example.org");
        assert_eq!(config.peer.root, PathBuf::from("/srv/datasites"));
        assert_eq!(config.store.backend, Backend::Sqlite);
        assert_eq!(config.store.codec, Codec::Cbor);
        assert_eq!(config.poll.convention, HopConvention::NextTarget);
        assert_eq!(config.poll.max_concurrent, 4);
        assert_eq!(config.sqlite_path(), PathBuf::from("/srv/datasites/ringflow.db"));
    }

    #[test]
    fn test_evaluator_section() {
        let config: RingConfig = toml::from_str(
            r#"
            [evaluator]
            command = "/usr/bin/judge"
            args = ["--model", "small"]
            working_dir = "/srv/models"
            "#,
        )
        .unwrap();

        assert_eq!(config.evaluator.working_dir, Some(PathBuf::from("/srv/models")));
        assert_eq!(config.command_evaluator().program(), "/usr/bin/judge");
        assert_eq!(RingConfig::default().command_evaluator().program(), "");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RINGFLOW_PEER__ID", "carol@example.org"),
            ("RINGFLOW_STORE__BACKEND", "SQLITE"),
            ("RINGFLOW_CHUNKING__MAX_TOKENS", "12"),
            ("RINGFLOW_EVALUATOR__COMMAND", "/usr/bin/judge"),
        ]
        .into_iter()
        .collect();

        let mut config = RingConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.peer.id, "carol@example.org");
        assert_eq!(config.store.backend, Backend::Sqlite);
        assert_eq!(config.chunking.max_tokens, 12);
        assert_eq!(config.evaluator.command, "/usr/bin/judge");
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(RingConfig::default().validate().is_err());

        let mut c = valid();
        c.chunking.max_tokens = 0;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.poll.max_concurrent = 0;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.layout.done = c.layout.pending.clone();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.recovery.stale_after_secs = c.poll.hop_timeout_secs;
        assert!(c.validate().is_err());
        c.recovery.enabled = false;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = valid();
        assert!(config.write_if_missing(&path).unwrap());
        assert!(!config.write_if_missing(&path).unwrap());

        let loaded = RingConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RingConfig::load(Some(&dir.path().join("absent.toml"))),
            Err(ConfigError::ReadFailed(..))
        ));
    }

    #[test]
    fn test_peer_config() {
        let mut c = valid();
        c.recovery.enabled = false;
        let peer = c.peer_config().unwrap();
        assert_eq!(peer.max_tokens.get(), 4000);
        assert_eq!(peer.hop_timeout, Duration::from_secs(300));
        assert!(peer.stale_after.is_none());
    }
}
