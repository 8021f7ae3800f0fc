//! Bag writer
//!
//! A writer owns one bag file from creation until close. Messages are
//! buffered into chunks; each sealed chunk is appended together with its
//! index, and the index section is written when the bag is closed.

mod bag_writer;

pub use bag_writer::BagWriter;

use crate::chunk::Compression;

/// When the writer forces data to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// fsync once, when the bag is closed
    #[default]
    OnClose,
    /// fsync after every sealed chunk and on close (safest, slowest)
    EveryChunk,
    /// Never fsync (OS decides, fastest, least safe)
    Never,
}

/// Bag writer configuration
#[derive(Debug, Clone)]
pub struct BagOptions {
    /// Compression applied to chunks
    pub compression: Compression,
    /// Uncompressed size at which the open chunk is sealed
    pub chunk_threshold: usize,
    /// Sync policy
    pub sync_policy: SyncPolicy,
}

impl Default for BagOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            chunk_threshold: crate::config::DEFAULT_CHUNK_THRESHOLD,
            sync_policy: SyncPolicy::default(),
        }
    }
}

impl BagOptions {
    /// Set the chunk compression
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the chunk sealing threshold in bytes
    pub fn with_chunk_threshold(mut self, bytes: usize) -> Self {
        self.chunk_threshold = bytes.max(1);
        self
    }

    /// Set the sync policy
    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = BagOptions::default();
        assert_eq!(options.compression, Compression::None);
        assert_eq!(options.chunk_threshold, 4 * 1024 * 1024);
        assert_eq!(options.sync_policy, SyncPolicy::OnClose);
    }

    #[test]
    fn test_builder() {
        let options = BagOptions::default()
            .with_compression(Compression::Bz2)
            .with_chunk_threshold(0)
            .with_sync_policy(SyncPolicy::EveryChunk);
        assert_eq!(options.compression, Compression::Bz2);
        assert_eq!(options.chunk_threshold, 1);
        assert_eq!(options.sync_policy, SyncPolicy::EveryChunk);
    }
}
