//! Index builder
//!
//! Each sealed chunk is followed by a `ChunkIndex` record listing, per
//! connection, the timestamp and offset of every message in the chunk. On
//! close the per-chunk indexes are folded into the index section: one
//! `ChunkInfo` per chunk plus a global `IndexData` record.

use crate::chunk::{scan_messages, Compression};
use crate::codec::ChunkRecord;
use crate::{BagError, ChunkPos, ConnectionId, Result, TimeRange, Timestamp};
use std::collections::{BTreeMap, HashMap};

/// Location of one message inside its chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkIndexEntry {
    /// Message timestamp
    pub time: Timestamp,
    /// Offset of the message record in the uncompressed chunk
    pub offset: u32,
}

/// Per-connection index of a single chunk
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkIndex {
    /// File position of the chunk record
    pub chunk_pos: ChunkPos,
    /// Entries per connection, sorted by time (ties by write order)
    pub entries: BTreeMap<ConnectionId, Vec<ChunkIndexEntry>>,
}

impl ChunkIndex {
    /// Total number of indexed messages
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Check if the chunk indexes no messages
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Message count per connection
    pub fn message_counts(&self) -> BTreeMap<ConnectionId, u32> {
        self.entries
            .iter()
            .map(|(conn, entries)| (*conn, entries.len() as u32))
            .collect()
    }
}

/// Chunk summary stored in the index section
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInfo {
    /// File position of the chunk record
    pub chunk_pos: ChunkPos,
    /// Earliest message timestamp
    pub start_time: Timestamp,
    /// Latest message timestamp
    pub end_time: Timestamp,
    /// Compression of the chunk payload
    pub compression: Compression,
    /// Size of the compressed payload
    pub compressed_size: u32,
    /// Size of the payload once decompressed
    pub uncompressed_size: u32,
    /// Messages per connection in this chunk
    pub message_counts: BTreeMap<ConnectionId, u32>,
}

impl ChunkInfo {
    /// Summarize a chunk and its index
    pub fn new(chunk_pos: ChunkPos, chunk: &ChunkRecord, index: &ChunkIndex) -> Self {
        Self {
            chunk_pos,
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            compression: chunk.compression,
            compressed_size: chunk.data.len() as u32,
            uncompressed_size: chunk.uncompressed_size,
            message_counts: index.message_counts(),
        }
    }

    /// Total messages in the chunk
    pub fn message_count(&self) -> u64 {
        self.message_counts.values().map(|&n| n as u64).sum()
    }

    /// Inclusive time bounds of the chunk
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    /// Check if the chunk holds messages of any of `connections`
    pub fn has_any(&self, connections: &[ConnectionId]) -> bool {
        connections
            .iter()
            .any(|conn| self.message_counts.get(conn).copied().unwrap_or(0) > 0)
    }
}

/// Location of one message in the bag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// File position of the owning chunk
    pub chunk_pos: ChunkPos,
    /// Message timestamp
    pub time: Timestamp,
    /// Offset of the message record in the uncompressed chunk
    pub offset: u32,
}

/// Global per-connection index, in chunk append order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexData {
    pub connections: BTreeMap<ConnectionId, Vec<IndexEntry>>,
}

/// Collects index entries for the open chunk
#[derive(Debug, Clone, Default)]
pub struct ChunkIndexBuilder {
    entries: BTreeMap<ConnectionId, Vec<ChunkIndexEntry>>,
}

impl ChunkIndexBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message written to the open chunk
    pub fn record(&mut self, connection_id: ConnectionId, time: Timestamp, offset: u32) {
        self.entries
            .entry(connection_id)
            .or_default()
            .push(ChunkIndexEntry { time, offset });
    }

    /// Check if nothing has been recorded since the last flush
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Produce the index for the chunk stored at `chunk_pos` and reset
    pub fn flush(&mut self, chunk_pos: ChunkPos) -> ChunkIndex {
        let mut entries = std::mem::take(&mut self.entries);
        for list in entries.values_mut() {
            // Stable sort keeps write order for equal timestamps
            list.sort_by_key(|e| e.time);
        }
        ChunkIndex { chunk_pos, entries }
    }
}

/// Reconstruct a chunk's index by scanning its decompressed records
pub fn rebuild_chunk_index(chunk_pos: ChunkPos, data: &[u8]) -> Result<ChunkIndex> {
    let mut builder = ChunkIndexBuilder::new();
    for item in scan_messages(data) {
        let (offset, record) = item?;
        builder.record(record.connection_id, record.timestamp, offset);
    }
    Ok(builder.flush(chunk_pos))
}

/// A chunk summary paired with its index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub info: ChunkInfo,
    pub index: ChunkIndex,
}

/// Index of a whole bag, chunks in append order
#[derive(Debug, Clone, Default)]
pub struct BagIndex {
    chunks: Vec<IndexedChunk>,
}

impl BagIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sealed chunk
    pub fn add_chunk(&mut self, info: ChunkInfo, index: ChunkIndex) {
        self.chunks.push(IndexedChunk { info, index });
    }

    /// Chunks in append order
    pub fn chunks(&self) -> &[IndexedChunk] {
        &self.chunks
    }

    /// Number of chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Summaries of every chunk
    pub fn chunk_infos(&self) -> impl Iterator<Item = &ChunkInfo> {
        self.chunks.iter().map(|c| &c.info)
    }

    /// Total messages across all chunks
    pub fn message_count(&self) -> u64 {
        self.chunks.iter().map(|c| c.info.message_count()).sum()
    }

    /// Messages per connection across all chunks
    pub fn message_counts(&self) -> BTreeMap<ConnectionId, u64> {
        let mut counts = BTreeMap::new();
        for chunk in &self.chunks {
            for (conn, n) in &chunk.info.message_counts {
                *counts.entry(*conn).or_insert(0) += *n as u64;
            }
        }
        counts
    }

    /// Earliest and latest timestamps in the bag
    pub fn time_bounds(&self) -> Option<(Timestamp, Timestamp)> {
        let start = self.chunks.iter().map(|c| c.info.start_time).min()?;
        let end = self.chunks.iter().map(|c| c.info.end_time).max()?;
        Some((start, end))
    }

    /// Concatenate per-connection entries of all chunks in append order
    pub fn finalize(&self) -> IndexData {
        let mut connections: BTreeMap<ConnectionId, Vec<IndexEntry>> = BTreeMap::new();
        for chunk in &self.chunks {
            let chunk_pos = chunk.index.chunk_pos;
            for (conn, entries) in &chunk.index.entries {
                connections
                    .entry(*conn)
                    .or_default()
                    .extend(entries.iter().map(|e| IndexEntry {
                        chunk_pos,
                        time: e.time,
                        offset: e.offset,
                    }));
            }
        }
        IndexData { connections }
    }

    /// Regroup a persisted index by chunk
    ///
    /// Fails with `IndexCorrupt` if an entry points at an unknown chunk or
    /// the entry counts disagree with the chunk summaries.
    pub fn from_index_data(infos: Vec<ChunkInfo>, data: IndexData) -> Result<Self> {
        let positions: HashMap<ChunkPos, usize> = infos
            .iter()
            .enumerate()
            .map(|(i, info)| (info.chunk_pos, i))
            .collect();
        if positions.len() != infos.len() {
            return Err(BagError::IndexCorrupt("duplicate chunk position".into()));
        }

        let mut chunks: Vec<IndexedChunk> = infos
            .into_iter()
            .map(|info| IndexedChunk {
                index: ChunkIndex {
                    chunk_pos: info.chunk_pos,
                    entries: BTreeMap::new(),
                },
                info,
            })
            .collect();

        for (conn, entries) in data.connections {
            for entry in entries {
                let slot = *positions.get(&entry.chunk_pos).ok_or_else(|| {
                    BagError::IndexCorrupt(format!(
                        "connection {} references unknown chunk at {}",
                        conn, entry.chunk_pos
                    ))
                })?;
                chunks[slot]
                    .index
                    .entries
                    .entry(conn)
                    .or_default()
                    .push(ChunkIndexEntry {
                        time: entry.time,
                        offset: entry.offset,
                    });
            }
        }

        for chunk in &chunks {
            if chunk.index.message_counts() != chunk.info.message_counts {
                return Err(BagError::IndexCorrupt(format!(
                    "entry counts for chunk at {} do not match its summary",
                    chunk.info.chunk_pos
                )));
            }
        }

        Ok(Self { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkWriter;
    use crate::codec::MessageRecord;
    use bytes::Bytes;

    fn ts(sec: i64) -> Timestamp {
        Timestamp::from_secs(sec)
    }

    fn info(pos: ChunkPos, counts: &[(ConnectionId, u32)]) -> ChunkInfo {
        ChunkInfo {
            chunk_pos: pos,
            start_time: ts(0),
            end_time: ts(10),
            compression: Compression::None,
            compressed_size: 0,
            uncompressed_size: 0,
            message_counts: counts.iter().copied().collect(),
        }
    }

    #[test]
    fn test_flush_sorts_stably() {
        let mut builder = ChunkIndexBuilder::new();
        builder.record(0, ts(5), 0);
        builder.record(0, ts(1), 10);
        builder.record(1, ts(3), 20);
        builder.record(0, ts(1), 30);

        let index = builder.flush(64);
        assert!(builder.is_empty());
        assert_eq!(index.chunk_pos, 64);

        let offsets: Vec<u32> = index.entries[&0].iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![10, 30, 0]);
        assert_eq!(index.message_counts()[&1], 1);
    }

    #[test]
    fn test_finalize_and_regroup() {
        let mut bag = BagIndex::new();
        for (pos, base) in [(64u64, 0i64), (512, 100)] {
            let mut builder = ChunkIndexBuilder::new();
            builder.record(0, ts(base + 2), 0);
            builder.record(1, ts(base + 1), 16);
            builder.record(0, ts(base), 32);
            let index = builder.flush(pos);
            bag.add_chunk(info(pos, &[(0, 2), (1, 1)]), index);
        }

        let data = bag.finalize();
        let times: Vec<i64> = data.connections[&0].iter().map(|e| e.time.sec).collect();
        assert_eq!(times, vec![0, 2, 100, 102]);
        assert_eq!(bag.message_count(), 6);
        assert_eq!(bag.message_counts()[&1], 2);

        let infos: Vec<ChunkInfo> = bag.chunk_infos().cloned().collect();
        let restored = BagIndex::from_index_data(infos, data).unwrap();
        assert_eq!(restored.chunks(), bag.chunks());
    }

    #[test]
    fn test_regroup_rejects_unknown_chunk() {
        let mut data = IndexData::default();
        data.connections.insert(
            0,
            vec![IndexEntry {
                chunk_pos: 999,
                time: ts(1),
                offset: 0,
            }],
        );
        let result = BagIndex::from_index_data(vec![info(64, &[(0, 1)])], data);
        assert!(matches!(result, Err(BagError::IndexCorrupt(_))));
    }

    #[test]
    fn test_regroup_rejects_count_mismatch() {
        let result = BagIndex::from_index_data(vec![info(64, &[(0, 3)])], IndexData::default());
        assert!(matches!(result, Err(BagError::IndexCorrupt(_))));
    }

    #[test]
    fn test_rebuild_matches_builder() {
        let mut writer = ChunkWriter::new(Compression::None);
        for (i, sec) in [4i64, 2, 9, 2].into_iter().enumerate() {
            writer.append(&MessageRecord {
                connection_id: (i % 2) as u32,
                timestamp: ts(sec),
                payload: Bytes::from_static(b"data"),
            });
        }
        let sealed = writer.seal().unwrap();
        let expected = sealed.index.clone().flush(64);

        let rebuilt = rebuild_chunk_index(64, &sealed.record.data).unwrap();
        assert_eq!(rebuilt, expected);
        assert_eq!(rebuilt.len(), 4);
    }

    #[test]
    fn test_time_bounds() {
        let mut bag = BagIndex::new();
        assert!(bag.time_bounds().is_none());
        let mut later = info(128, &[]);
        later.start_time = ts(20);
        later.end_time = ts(30);
        bag.add_chunk(info(64, &[]), ChunkIndex::default());
        bag.add_chunk(later, ChunkIndex::default());
        assert_eq!(bag.time_bounds(), Some((ts(0), ts(30))));
    }
}
