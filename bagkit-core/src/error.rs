//! Error types for bagkit

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for bag operations
pub type Result<T> = std::result::Result<T, BagError>;

/// Bag error types
///
/// Errors are `Clone` so that a writer in the terminal failed state can hand
/// the original failure back on every later call.
#[derive(Error, Debug, Clone)]
pub enum BagError {
    /// IO operation failed on the underlying storage
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// Channel reused with a different message type
    #[error("Type conflict on channel {channel}: existing type {existing}, requested {requested}")]
    TypeConflict {
        channel: String,
        existing: String,
        requested: String,
    },

    /// Payload is inconsistent with its declared type or layout
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// A record could not be decoded
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// A chunk failed its checksum or could not be decompressed
    #[error("Corrupt chunk at offset {pos}: {reason}")]
    ChunkCorrupt { pos: u64, reason: String },

    /// The bag has no index (never closed, or crashed)
    #[error("Index missing: {0}")]
    IndexMissing(String),

    /// The index section is present but malformed
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    /// Operation on a closed writer
    #[error("Bag is closed")]
    BagClosed,

    /// Another writer holds the file lock
    #[error("Bag is locked by another writer: {0:?}")]
    Locked(PathBuf),

    /// File does not start with the bag magic
    #[error("Not a bag file")]
    NotABag,

    /// Header carries a format version this build cannot read
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// Unknown compression tag
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(u8),

    /// Compression name not recognized
    #[error("Unknown compression: {0:?}")]
    UnknownCompression(String),

    /// Message does not fit in a single chunk
    #[error("Message of {size} bytes exceeds the {limit} byte chunk limit")]
    MessageTooLarge { size: usize, limit: usize },

    /// Channel not present in the bag
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
}

impl From<std::io::Error> for BagError {
    fn from(e: std::io::Error) -> Self {
        BagError::Io(Arc::new(e))
    }
}

impl BagError {
    /// Check if error indicates corrupt bytes on disk
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            BagError::CorruptRecord(_)
                | BagError::ChunkCorrupt { .. }
                | BagError::IndexCorrupt(_)
        )
    }

    /// Check if a reader can skip the offending unit and keep going
    pub fn is_recoverable(&self) -> bool {
        self.is_corruption() || matches!(self, BagError::IndexMissing(_))
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        BagError::CorruptRecord(msg.into())
    }

    pub(crate) fn chunk_corrupt(pos: u64, reason: impl Into<String>) -> Self {
        BagError::ChunkCorrupt {
            pos,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_shared() {
        let err = BagError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        let again = err.clone();
        match (&err, &again) {
            (BagError::Io(a), BagError::Io(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected io errors"),
        }
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_classification() {
        assert!(BagError::chunk_corrupt(10, "crc").is_corruption());
        assert!(BagError::IndexMissing("no index".into()).is_recoverable());
        assert!(!BagError::BagClosed.is_recoverable());
    }
}
