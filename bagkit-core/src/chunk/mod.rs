//! Chunk writer and decompression path
//!
//! Messages are buffered as framed `MessageData` records in an open chunk.
//! Sealing compresses the whole buffer as a single unit, so a chunk can
//! always be decompressed on its own.

mod compression;

pub use compression::Compression;

use crate::codec::{decode_frame, ChunkRecord, MessageRecord, OpCode, Record};
use crate::index::ChunkIndexBuilder;
use crate::{BagError, ChunkPos, Result, Timestamp};
use bytes::{Bytes, BytesMut};
use tracing::debug;

/// Largest uncompressed chunk the format can describe
pub const MAX_CHUNK_SIZE: usize = u32::MAX as usize;

/// Buffers message records for the open chunk
pub struct ChunkWriter {
    compression: Compression,
    buffer: BytesMut,
    start_time: Timestamp,
    end_time: Timestamp,
    message_count: u32,
    index: ChunkIndexBuilder,
}

/// A sealed chunk and the index entries of its messages
///
/// The index is flushed once the chunk's file position is known.
pub struct SealedChunk {
    pub record: ChunkRecord,
    pub index: ChunkIndexBuilder,
}

impl ChunkWriter {
    /// Create an empty chunk writer
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            buffer: BytesMut::new(),
            start_time: Timestamp::MAX,
            end_time: Timestamp::MIN,
            message_count: 0,
            index: ChunkIndexBuilder::new(),
        }
    }

    /// Compression applied on seal
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Buffer an encoded message record and index it
    ///
    /// Returns the record's byte offset within the uncompressed chunk.
    pub fn append(&mut self, record: &MessageRecord) -> u32 {
        let offset = self.buffer.len() as u32;
        record.encode_into(&mut self.buffer);
        self.index
            .record(record.connection_id, record.timestamp, offset);

        self.start_time = self.start_time.min(record.timestamp);
        self.end_time = self.end_time.max(record.timestamp);
        self.message_count += 1;

        offset
    }

    /// Check if no messages are buffered
    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }

    /// Uncompressed bytes currently buffered
    pub fn buffered_size(&self) -> usize {
        self.buffer.len()
    }

    /// Number of buffered messages
    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    /// Check whether a record of `len` encoded bytes fits in the open chunk
    ///
    /// Fails with `MessageTooLarge` if it would not fit even in an empty one.
    pub fn room_for(&self, len: usize) -> Result<bool> {
        if len > MAX_CHUNK_SIZE {
            return Err(BagError::MessageTooLarge {
                size: len,
                limit: MAX_CHUNK_SIZE,
            });
        }
        Ok(self.buffer.len() + len <= MAX_CHUNK_SIZE)
    }

    /// Check if the buffer reached the sealing threshold
    pub fn should_seal(&self, threshold: usize) -> bool {
        self.buffer.len() >= threshold
    }

    /// Earliest and latest buffered timestamps, if any
    pub fn time_bounds(&self) -> Option<(Timestamp, Timestamp)> {
        if self.is_empty() {
            None
        } else {
            Some((self.start_time, self.end_time))
        }
    }

    /// Compress the buffered records and start a new empty chunk
    pub fn seal(&mut self) -> Result<SealedChunk> {
        let uncompressed_size =
            u32::try_from(self.buffer.len()).map_err(|_| BagError::MessageTooLarge {
                size: self.buffer.len(),
                limit: MAX_CHUNK_SIZE,
            })?;
        let data = self.compression.compress(&self.buffer)?;
        self.buffer.clear();

        debug!(
            compression = %self.compression,
            messages = self.message_count,
            uncompressed_size,
            compressed_size = data.len(),
            "Sealed chunk"
        );

        let record = ChunkRecord {
            compression: self.compression,
            uncompressed_size,
            start_time: self.start_time,
            end_time: self.end_time,
            message_count: self.message_count,
            data: Bytes::from(data),
        };

        self.start_time = Timestamp::MAX;
        self.end_time = Timestamp::MIN;
        self.message_count = 0;

        Ok(SealedChunk {
            record,
            index: std::mem::take(&mut self.index),
        })
    }
}

/// Decompress a chunk read from position `pos`
///
/// Fails with `ChunkCorrupt` if the payload cannot be decompressed into
/// exactly the recorded size.
pub fn decompress_chunk(chunk: &ChunkRecord, pos: ChunkPos) -> Result<Bytes> {
    chunk
        .compression
        .decompress(&chunk.data, chunk.uncompressed_size as usize)
        .map(Bytes::from)
        .map_err(|reason| BagError::chunk_corrupt(pos, reason))
}

/// Decode the message record at `offset` of a decompressed chunk
pub fn read_message_at(data: &[u8], offset: u32) -> Result<MessageRecord> {
    let start = offset as usize;
    if start >= data.len() {
        return Err(BagError::corrupt(format!(
            "message offset {} outside chunk of {} bytes",
            offset,
            data.len()
        )));
    }
    let (record, _) = MessageRecord::decode(&data[start..])?;
    Ok(record)
}

/// Iterate every message record in a decompressed chunk, in write order
///
/// Yields `(offset, record)`. Stops after the first decoding error.
pub fn scan_messages(data: &[u8]) -> ChunkScanner<'_> {
    ChunkScanner {
        data,
        pos: 0,
        failed: false,
    }
}

/// Iterator returned by [`scan_messages`]
pub struct ChunkScanner<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Iterator for ChunkScanner<'a> {
    type Item = Result<(u32, MessageRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.failed && self.pos < self.data.len() {
            let offset = self.pos as u32;
            let (frame, used) = match decode_frame(&self.data[self.pos..]) {
                Ok(decoded) => decoded,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };
            self.pos += used;

            // Unknown record kinds inside a chunk are skipped
            if frame.op_code() != Some(OpCode::MessageData) {
                continue;
            }
            return Some(match MessageRecord::from_frame(&frame) {
                Ok(record) => Ok((offset, record)),
                Err(e) => {
                    self.failed = true;
                    Err(e)
                }
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(conn: u32, sec: i64, payload: &'static [u8]) -> MessageRecord {
        MessageRecord {
            connection_id: conn,
            timestamp: Timestamp::from_secs(sec),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_tracks_time_bounds() {
        let mut writer = ChunkWriter::new(Compression::None);
        assert!(writer.time_bounds().is_none());

        writer.append(&record(0, 5, b"a"));
        writer.append(&record(1, 2, b"b"));
        writer.append(&record(0, 9, b"c"));

        assert_eq!(
            writer.time_bounds(),
            Some((Timestamp::from_secs(2), Timestamp::from_secs(9)))
        );
    }

    #[test]
    fn test_seal_resets_buffer() {
        let mut writer = ChunkWriter::new(Compression::Lz4);
        let first = writer.append(&record(0, 1, b"hello"));
        let second = writer.append(&record(0, 2, b"world"));
        assert_eq!(first, 0);
        assert!(second > first);

        let sealed = writer.seal().unwrap();
        let chunk = sealed.record;
        assert_eq!(chunk.message_count, 2);
        assert_eq!(chunk.start_time, Timestamp::from_secs(1));
        assert!(writer.is_empty());
        assert_eq!(writer.buffered_size(), 0);

        let data = decompress_chunk(&chunk, 64).unwrap();
        assert_eq!(data.len(), chunk.uncompressed_size as usize);
        assert_eq!(read_message_at(&data, second).unwrap(), record(0, 2, b"world"));

        let index = sealed.index.clone().flush(64);
        assert_eq!(index.entries[&0].len(), 2);
        assert_eq!(index.entries[&0][1].offset, second);
    }

    #[test]
    fn test_room_for() {
        let mut writer = ChunkWriter::new(Compression::None);
        assert!(writer.room_for(MAX_CHUNK_SIZE).unwrap());
        assert!(matches!(
            writer.room_for(MAX_CHUNK_SIZE + 1),
            Err(BagError::MessageTooLarge { limit: MAX_CHUNK_SIZE, .. })
        ));

        let rec = record(0, 1, b"abc");
        writer.append(&rec);
        assert_eq!(writer.buffered_size(), rec.encoded_len());
        assert!(writer.room_for(MAX_CHUNK_SIZE - rec.encoded_len()).unwrap());
        assert!(!writer.room_for(MAX_CHUNK_SIZE).unwrap());
    }

    #[test]
    fn test_threshold() {
        let mut writer = ChunkWriter::new(Compression::None);
        writer.append(&record(0, 1, b"0123456789"));
        assert!(!writer.should_seal(1024));
        assert!(writer.should_seal(writer.buffered_size()));
    }

    #[test]
    fn test_corrupt_chunk() {
        let mut writer = ChunkWriter::new(Compression::Bz2);
        writer.append(&record(0, 1, b"payload"));
        let mut chunk = writer.seal().unwrap().record;
        chunk.data = chunk.data.slice(..chunk.data.len() / 2);

        let result = decompress_chunk(&chunk, 128);
        assert!(matches!(result, Err(BagError::ChunkCorrupt { pos: 128, .. })));
    }

    #[test]
    fn test_scan_messages() {
        let mut writer = ChunkWriter::new(Compression::None);
        let offsets: Vec<u32> = (0..5u32)
            .map(|i| writer.append(&record(i % 2, i as i64, b"x")))
            .collect();
        let chunk = writer.seal().unwrap().record;

        let scanned: Vec<_> = scan_messages(&chunk.data).map(|r| r.unwrap()).collect();
        assert_eq!(scanned.len(), 5);
        assert_eq!(scanned.iter().map(|(o, _)| *o).collect::<Vec<_>>(), offsets);
        assert_eq!(scanned[3].1.connection_id, 1);

        // truncated tail reports one error then stops
        let cut = &chunk.data[..chunk.data.len() - 3];
        let results: Vec<_> = scan_messages(cut).collect();
        assert_eq!(results.len(), 5);
        assert!(results[4].is_err());
    }
}
