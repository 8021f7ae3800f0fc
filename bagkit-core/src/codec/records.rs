//! Record kinds and their body encodings

use super::buf::{FieldReader, FieldWriter};
use super::{decode_frame, write_frame, Frame, OpCode, FRAME_OVERHEAD};
use crate::chunk::Compression;
use crate::index::{ChunkIndex, ChunkIndexEntry, ChunkInfo, IndexData, IndexEntry};
use crate::registry::Connection;
use crate::{BagError, ConnectionId, Result, Timestamp};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// A record kind with a framed binary encoding
pub trait Record: Sized {
    /// Op code identifying the record kind
    const OP: OpCode;

    /// Write the record body
    fn encode_body(&self, buf: &mut BytesMut);

    /// Parse the record body
    fn decode_body(body: &[u8]) -> Result<Self>;

    /// Append the framed record to `out`
    fn encode_into(&self, out: &mut BytesMut) {
        write_frame(out, Self::OP, |buf| self.encode_body(buf));
    }

    /// Encode as a standalone framed record
    fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode_into(&mut out);
        out.freeze()
    }

    /// Decode a framed record from the start of `data`
    ///
    /// Returns the record and the number of bytes consumed.
    fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (frame, used) = decode_frame(data)?;
        Ok((Self::from_frame(&frame)?, used))
    }

    /// Decode from an already validated frame
    fn from_frame(frame: &Frame<'_>) -> Result<Self> {
        frame.expect(Self::OP)?;
        Self::decode_body(frame.body)
    }
}

/// One message as stored inside a chunk
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    /// Connection the message was written on
    pub connection_id: ConnectionId,
    /// Message timestamp
    pub timestamp: Timestamp,
    /// Encoded message payload
    pub payload: Bytes,
}

impl MessageRecord {
    /// Size of the framed record
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + 4 + 12 + self.payload.len()
    }
}

impl Record for MessageRecord {
    const OP: OpCode = OpCode::MessageData;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.connection_id);
        buf.put_timestamp(self.timestamp);
        buf.put_slice(&self.payload);
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(body, "MessageData");
        let connection_id = reader.u32()?;
        let timestamp = reader.timestamp()?;
        let payload = Bytes::copy_from_slice(reader.rest());
        Ok(Self {
            connection_id,
            timestamp,
            payload,
        })
    }
}

/// A sealed chunk as stored in the file
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Compression applied to `data`
    pub compression: Compression,
    /// Exact size of the decompressed data
    pub uncompressed_size: u32,
    /// Earliest message timestamp in the chunk
    pub start_time: Timestamp,
    /// Latest message timestamp in the chunk
    pub end_time: Timestamp,
    /// Number of message records in the chunk
    pub message_count: u32,
    /// Compressed message records
    pub data: Bytes,
}

impl Record for ChunkRecord {
    const OP: OpCode = OpCode::Chunk;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u8(self.compression as u8);
        buf.put_u32_le(self.uncompressed_size);
        buf.put_timestamp(self.start_time);
        buf.put_timestamp(self.end_time);
        buf.put_u32_le(self.message_count);
        buf.put_lengthed(&self.data);
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(body, "Chunk");
        let compression = Compression::from_tag(reader.u8()?)?;
        let uncompressed_size = reader.u32()?;
        let start_time = reader.timestamp()?;
        let end_time = reader.timestamp()?;
        let message_count = reader.u32()?;
        let data = Bytes::copy_from_slice(reader.lengthed()?);
        reader.finish()?;
        Ok(Self {
            compression,
            uncompressed_size,
            start_time,
            end_time,
            message_count,
            data,
        })
    }
}

impl Record for Connection {
    const OP: OpCode = OpCode::Connection;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id);
        buf.put_string(&self.channel);
        buf.put_string(&self.descriptor.type_name);
        buf.put_lengthed(&self.descriptor.schema);
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(body, "Connection");
        let id = reader.u32()?;
        let channel = reader.string()?;
        let type_name = reader.string()?;
        let schema = reader.lengthed()?.to_vec();
        reader.finish()?;
        Ok(Connection::new(id, channel, crate::TypeDescriptor { type_name, schema }))
    }
}

/// Guard against counts that cannot possibly fit in the remaining bytes
fn check_count(reader: &FieldReader<'_>, count: usize, entry_size: usize, what: &str) -> Result<()> {
    if count > reader.remaining() / entry_size {
        return Err(BagError::corrupt(format!(
            "{}: {} entries do not fit in {} bytes",
            what,
            count,
            reader.remaining()
        )));
    }
    Ok(())
}

impl Record for ChunkIndex {
    const OP: OpCode = OpCode::ChunkIndex;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.chunk_pos);
        buf.put_u32_le(self.entries.len() as u32);
        for (conn, entries) in &self.entries {
            buf.put_u32_le(*conn);
            buf.put_u32_le(entries.len() as u32);
            for entry in entries {
                buf.put_timestamp(entry.time);
                buf.put_u32_le(entry.offset);
            }
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(body, "ChunkIndex");
        let chunk_pos = reader.u64()?;
        let conn_count = reader.u32()? as usize;
        check_count(&reader, conn_count, 8, "ChunkIndex connections")?;

        let mut entries = BTreeMap::new();
        for _ in 0..conn_count {
            let conn = reader.u32()?;
            let count = reader.u32()? as usize;
            check_count(&reader, count, 16, "ChunkIndex entries")?;
            let mut list = Vec::with_capacity(count);
            for _ in 0..count {
                let time = reader.timestamp()?;
                let offset = reader.u32()?;
                list.push(ChunkIndexEntry { time, offset });
            }
            entries.insert(conn, list);
        }
        reader.finish()?;

        Ok(Self { chunk_pos, entries })
    }
}

impl Record for ChunkInfo {
    const OP: OpCode = OpCode::ChunkInfo;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.chunk_pos);
        buf.put_timestamp(self.start_time);
        buf.put_timestamp(self.end_time);
        buf.put_u8(self.compression as u8);
        buf.put_u32_le(self.compressed_size);
        buf.put_u32_le(self.uncompressed_size);
        buf.put_u32_le(self.message_counts.len() as u32);
        for (conn, count) in &self.message_counts {
            buf.put_u32_le(*conn);
            buf.put_u32_le(*count);
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(body, "ChunkInfo");
        let chunk_pos = reader.u64()?;
        let start_time = reader.timestamp()?;
        let end_time = reader.timestamp()?;
        let compression = Compression::from_tag(reader.u8()?)?;
        let compressed_size = reader.u32()?;
        let uncompressed_size = reader.u32()?;

        let count = reader.u32()? as usize;
        check_count(&reader, count, 8, "ChunkInfo counts")?;
        let mut message_counts = BTreeMap::new();
        for _ in 0..count {
            let conn = reader.u32()?;
            let n = reader.u32()?;
            message_counts.insert(conn, n);
        }
        reader.finish()?;

        Ok(Self {
            chunk_pos,
            start_time,
            end_time,
            compression,
            compressed_size,
            uncompressed_size,
            message_counts,
        })
    }
}

impl Record for IndexData {
    const OP: OpCode = OpCode::IndexData;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.connections.len() as u32);
        for (conn, entries) in &self.connections {
            buf.put_u32_le(*conn);
            buf.put_u32_le(entries.len() as u32);
            for entry in entries {
                buf.put_u64_le(entry.chunk_pos);
                buf.put_timestamp(entry.time);
                buf.put_u32_le(entry.offset);
            }
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(body, "IndexData");
        let conn_count = reader.u32()? as usize;
        check_count(&reader, conn_count, 8, "IndexData connections")?;

        let mut connections = BTreeMap::new();
        for _ in 0..conn_count {
            let conn = reader.u32()?;
            let count = reader.u32()? as usize;
            check_count(&reader, count, 24, "IndexData entries")?;
            let mut list = Vec::with_capacity(count);
            for _ in 0..count {
                let chunk_pos = reader.u64()?;
                let time = reader.timestamp()?;
                let offset = reader.u32()?;
                list.push(IndexEntry {
                    chunk_pos,
                    time,
                    offset,
                });
            }
            connections.insert(conn, list);
        }
        reader.finish()?;

        Ok(Self { connections })
    }
}
