//! Fixed-size bag file header

use super::{FORMAT_VERSION, HEADER_SIZE, MAGIC};
use crate::chunk::Compression;
use crate::{BagError, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Bag file header
///
/// Layout (64 bytes, little-endian):
/// - 8 bytes: magic `#BAGKIT\n`
/// - 4 bytes: format version
/// - 1 byte: compression used for new chunks
/// - 3 bytes: reserved
/// - 8 bytes: file offset of the index section (0 until the bag is closed)
/// - 4 bytes: connection count
/// - 4 bytes: chunk count
/// - 4 bytes: CRC32 of the preceding 32 bytes
/// - zero padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BagHeader {
    /// Format version
    pub version: u32,
    /// Compression applied to chunks written by this bag's writer
    pub compression: Compression,
    /// Offset of the index section, 0 if the bag was never closed
    pub index_pos: u64,
    /// Number of connections recorded in the index
    pub conn_count: u32,
    /// Number of chunks recorded in the index
    pub chunk_count: u32,
}

const CHECKED_LEN: usize = 32;

impl BagHeader {
    /// Header for a freshly created, unindexed bag
    pub fn new(compression: Compression) -> Self {
        Self {
            version: FORMAT_VERSION,
            compression,
            index_pos: 0,
            conn_count: 0,
            chunk_count: 0,
        }
    }

    /// Check if the bag has an index section
    pub fn is_indexed(&self) -> bool {
        self.index_pos != 0
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_slice(&MAGIC);
        buf.put_u32_le(self.version);
        buf.put_u8(self.compression as u8);
        buf.put_bytes(0, 3);
        buf.put_u64_le(self.index_pos);
        buf.put_u32_le(self.conn_count);
        buf.put_u32_le(self.chunk_count);
        let checksum = crc32fast::hash(&buf[..CHECKED_LEN]);
        buf.put_u32_le(checksum);
        buf.put_bytes(0, HEADER_SIZE - buf.len());

        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Deserialize from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE || data[..MAGIC.len()] != MAGIC {
            return Err(BagError::NotABag);
        }

        let mut cursor = &data[MAGIC.len()..HEADER_SIZE];
        let version = cursor.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(BagError::UnsupportedVersion(version));
        }

        let compression = Compression::from_tag(cursor.get_u8())?;
        cursor.advance(3);
        let index_pos = cursor.get_u64_le();
        let conn_count = cursor.get_u32_le();
        let chunk_count = cursor.get_u32_le();

        let expected = cursor.get_u32_le();
        let actual = crc32fast::hash(&data[..CHECKED_LEN]);
        if expected != actual {
            return Err(BagError::corrupt(format!(
                "header checksum mismatch: expected {:#010x}, got {:#010x}",
                expected, actual
            )));
        }

        Ok(Self {
            version,
            compression,
            index_pos,
            conn_count,
            chunk_count,
        })
    }
}
