//! Error types for the store module.

use ringflow_core::{CoreError, PacketName, PeerId};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[source] CoreError),

    /// A stored packet body failed to decode or validate.
    #[error("corrupt packet {peer}/{name}: {reason}")]
    CorruptPacket {
        peer: PeerId,
        name: PacketName,
        reason: String,
    },

    /// The caller's claim no longer holds (the packet left the claimed state).
    #[error("packet {peer}/{name} is not claimed")]
    NotClaimed { peer: PeerId, name: PacketName },

    /// A same-named packet that is not this one occupies the destination.
    #[error("conflict at {peer}/{name}: {reason}")]
    Conflict {
        peer: PeerId,
        name: PacketName,
        reason: String,
    },

    /// The peer's namespace does not exist (not set up, or unreachable).
    #[error("namespace for peer {0} does not exist")]
    NamespaceMissing(PeerId),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Whether the store layer itself is exhausted or unusable.
    ///
    /// Fatal errors abort a poll cycle instead of being isolated to one
    /// packet: nothing else in the cycle can succeed either.
    pub fn is_fatal(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            StoreError::Io(e) => matches!(
                e.kind(),
                ErrorKind::StorageFull
                    | ErrorKind::ReadOnlyFilesystem
                    | ErrorKind::StaleNetworkFileHandle
                    | ErrorKind::OutOfMemory
            ),
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DiskFull
                    | rusqlite::ErrorCode::ReadOnly
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::OutOfMemory
                    | rusqlite::ErrorCode::DatabaseCorrupt
            ),
            StoreError::Task(_) => true,
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_disk_full_is_fatal() {
        assert!(StoreError::Io(Error::from(ErrorKind::StorageFull)).is_fatal());
        assert!(StoreError::Io(Error::from(ErrorKind::ReadOnlyFilesystem)).is_fatal());
    }

    #[test]
    fn test_per_packet_errors_are_not_fatal() {
        let peer = PeerId::new("a").unwrap();
        let name = PacketName::new("p").unwrap();

        assert!(!StoreError::Io(Error::from(ErrorKind::NotFound)).is_fatal());
        assert!(!StoreError::NamespaceMissing(peer.clone()).is_fatal());
        assert!(!StoreError::CorruptPacket {
            peer,
            name,
            reason: "bad".into()
        }
        .is_fatal());
    }
}
