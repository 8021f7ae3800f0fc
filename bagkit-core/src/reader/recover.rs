//! Linear-scan recovery for bags without a usable index

use super::LoadedBag;
use crate::chunk::decompress_chunk;
use crate::codec::{read_frame, BagHeader, ChunkRecord, OpCode, OwnedFrame, Record, HEADER_SIZE};
use crate::index::{rebuild_chunk_index, BagIndex, ChunkIndex, ChunkInfo};
use crate::registry::Connection;
use crate::{BagError, ChunkPos, ConnectionId, Result};
use std::collections::BTreeMap;
use std::io::{BufReader, Read, Seek, SeekFrom};
use tracing::{info, warn};

/// State of a linear scan over the record stream
struct Scan {
    /// Connections keyed by id, with the position of their record
    connections: BTreeMap<ConnectionId, (u64, Connection)>,
    index: BagIndex,
    /// Chunk still waiting for its index record
    pending: Option<(ChunkPos, ChunkRecord)>,
    data_end: u64,
}

impl Scan {
    /// Index the pending chunk, rebuilding its index from the records
    ///
    /// An unreadable chunk ends the usable stream at its position.
    fn finish_pending(&mut self) -> Result<()> {
        let Some((pos, chunk)) = self.pending.take() else {
            return Ok(());
        };
        let result = decompress_chunk(&chunk, pos)
            .and_then(|data| rebuild_chunk_index(pos, &data))
            .and_then(|index| self.add_chunk(pos, chunk, index));
        match result {
            Ok(()) => {
                warn!(pos, "Chunk index missing, rebuilt from records");
                Ok(())
            }
            Err(e) => {
                self.truncate_to(pos);
                Err(e)
            }
        }
    }

    fn add_chunk(&mut self, pos: ChunkPos, chunk: ChunkRecord, index: ChunkIndex) -> Result<()> {
        if let Some(conn) = index.entries.keys().find(|&&c| !self.connections.contains_key(&c)) {
            return Err(BagError::corrupt(format!(
                "chunk at {} references unknown connection {}",
                pos, conn
            )));
        }
        self.index
            .add_chunk(ChunkInfo::new(pos, &chunk, &index), index);
        Ok(())
    }

    /// Forget every record at or after `pos`
    fn truncate_to(&mut self, pos: u64) {
        self.data_end = pos;
        self.connections.retain(|_, (at, _)| *at < pos);
    }

    /// Apply one record; returns false once the index section is reached
    fn apply(&mut self, pos: u64, frame: &OwnedFrame) -> Result<bool> {
        let end = pos + frame.encoded_len() as u64;
        let frame = frame.as_frame();

        match frame.op_code() {
            Some(OpCode::Connection) => {
                let conn = Connection::from_frame(&frame)?;
                match self.connections.get(&conn.id) {
                    // copies written into the index section
                    Some((_, existing)) if *existing == conn => {}
                    Some(_) => {
                        return Err(BagError::corrupt(format!(
                            "conflicting definitions of connection {}",
                            conn.id
                        )))
                    }
                    None => {
                        self.connections.insert(conn.id, (pos, conn));
                        self.data_end = end;
                    }
                }
            }
            Some(OpCode::Chunk) => {
                let chunk = ChunkRecord::from_frame(&frame)?;
                self.finish_pending()?;
                self.pending = Some((pos, chunk));
                self.data_end = end;
            }
            Some(OpCode::ChunkIndex) => {
                let index = ChunkIndex::from_frame(&frame)?;
                match self.pending.take() {
                    Some((chunk_pos, chunk)) if chunk_pos == index.chunk_pos => {
                        self.add_chunk(chunk_pos, chunk, index)?;
                        self.data_end = end;
                    }
                    other => {
                        self.pending = other;
                        return Err(BagError::corrupt(format!(
                            "chunk index for {} does not follow its chunk",
                            index.chunk_pos
                        )));
                    }
                }
            }
            Some(OpCode::ChunkInfo) | Some(OpCode::IndexData) => return Ok(false),
            Some(OpCode::MessageData) => {
                return Err(BagError::corrupt("message record outside a chunk"));
            }
            None => self.data_end = end,
        }
        Ok(true)
    }
}

/// Rebuild connections and index by reading every record after the header
///
/// The scan stops at the first truncated or corrupt record, or at the start
/// of an index section. Everything before that point is kept; a chunk whose
/// index record was lost has its index rebuilt from its messages.
pub(super) fn scan<R: Read + Seek>(source: &mut R, header: BagHeader) -> Result<LoadedBag> {
    let mut pos = HEADER_SIZE as u64;
    source.seek(SeekFrom::Start(pos))?;
    let mut stream = BufReader::new(source);

    let mut scan = Scan {
        connections: BTreeMap::new(),
        index: BagIndex::new(),
        pending: None,
        data_end: pos,
    };

    loop {
        let frame = match read_frame(&mut stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) if e.is_corruption() => {
                warn!(pos, error = %e, "Truncated or corrupt record, stopping scan");
                break;
            }
            Err(e) => return Err(e),
        };

        match scan.apply(pos, &frame) {
            Ok(true) => pos += frame.encoded_len() as u64,
            Ok(false) => break,
            Err(e) if e.is_corruption() => {
                warn!(pos, error = %e, "Invalid record, stopping scan");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    if let Err(e) = scan.finish_pending() {
        warn!(error = %e, "Dropping unreadable final chunk");
    }

    info!(
        connections = scan.connections.len(),
        chunks = scan.index.chunk_count(),
        messages = scan.index.message_count(),
        "Recovered bag by linear scan"
    );

    Ok(LoadedBag {
        header,
        connections: scan.connections.into_values().map(|(_, conn)| conn).collect(),
        index: scan.index,
        data_end: scan.data_end,
        recovered: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Compression;
    use crate::codec::MessageRecord;
    use crate::index::ChunkIndexBuilder;
    use crate::{Message, Timestamp, TypeDescriptor};
    use bytes::BytesMut;
    use std::io::Cursor;

    /// Hand-built stream: header, connection, then `chunks` sealed chunks
    fn stream(chunks: usize, with_index: bool) -> (Vec<u8>, Vec<usize>) {
        let mut out = BytesMut::new();
        out.extend_from_slice(&BagHeader::new(Compression::Lz4).to_bytes());
        Connection::new(0, "/numbers", TypeDescriptor::new("std_msgs/Int64", "int64 data"))
            .encode_into(&mut out);

        let mut ends = Vec::new();
        for c in 0..chunks {
            let mut writer = crate::chunk::ChunkWriter::new(Compression::Lz4);
            for i in 0..10i64 {
                let sec = c as i64 * 10 + i;
                writer.append(&MessageRecord {
                    connection_id: 0,
                    timestamp: Timestamp::from_secs(sec),
                    payload: crate::message::encode_payload(&Message::from(sec)),
                });
            }
            let sealed = writer.seal().unwrap();
            let pos = out.len() as u64;
            sealed.record.encode_into(&mut out);
            if with_index {
                let mut builder: ChunkIndexBuilder = sealed.index;
                builder.flush(pos).encode_into(&mut out);
            }
            ends.push(out.len());
        }
        (out.to_vec(), ends)
    }

    fn scan_bytes(data: Vec<u8>) -> LoadedBag {
        let header = BagHeader::from_bytes(&data).unwrap();
        scan(&mut Cursor::new(data), header).unwrap()
    }

    #[test]
    fn test_scan_intact_stream() {
        let (data, ends) = stream(3, true);
        let loaded = scan_bytes(data);
        assert!(loaded.recovered);
        assert_eq!(loaded.connections.len(), 1);
        assert_eq!(loaded.index.chunk_count(), 3);
        assert_eq!(loaded.index.message_count(), 30);
        assert_eq!(loaded.data_end, *ends.last().unwrap() as u64);
    }

    #[test]
    fn test_truncated_tail_keeps_sealed_chunks() {
        let (mut data, ends) = stream(3, true);
        data.truncate(ends[1] + 17);

        let loaded = scan_bytes(data);
        assert_eq!(loaded.index.chunk_count(), 2);
        assert_eq!(loaded.data_end, ends[1] as u64);
    }

    #[test]
    fn test_missing_chunk_index_is_rebuilt() {
        let (data, _) = stream(2, false);
        let loaded = scan_bytes(data);
        assert_eq!(loaded.index.chunk_count(), 2);
        assert_eq!(loaded.index.message_counts()[&0], 20);

        let first = &loaded.index.chunks()[0];
        assert_eq!(first.index.entries[&0].len(), 10);
        assert_eq!(first.info.start_time, Timestamp::from_secs(0));
    }

    #[test]
    fn test_garbage_after_chunks() {
        let (mut data, ends) = stream(2, true);
        data.extend_from_slice(&[0x05, 0xFF, 0xFF, 0x00, 0x00, 1, 2, 3]);

        let loaded = scan_bytes(data);
        assert_eq!(loaded.index.chunk_count(), 2);
        assert_eq!(loaded.data_end, ends[1] as u64);
    }

    #[test]
    fn test_unknown_record_is_skipped() {
        let (mut data, _) = stream(1, true);
        let mut extra = BytesMut::new();
        crate::codec::write_frame(&mut extra, OpCode::Chunk, |_| {});
        // retag as an op code this build does not know, and fix the checksum
        extra[0] = 0x7E;
        let body_end = extra.len() - 4;
        let crc = crc32fast::hash(&extra[..body_end]);
        extra[body_end..].copy_from_slice(&crc.to_le_bytes());
        data.extend_from_slice(&extra);

        let loaded = scan_bytes(data.clone());
        assert_eq!(loaded.index.chunk_count(), 1);
        assert_eq!(loaded.data_end, data.len() as u64);
    }
}
