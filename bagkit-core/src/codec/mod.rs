//! Record codec
//!
//! A bag is a fixed-size header followed by a stream of framed records.
//! Every record uses the same frame:
//!
//! - 1 byte: op code
//! - 4 bytes: body length (excluding op, length and checksum)
//! - N bytes: body
//! - 4 bytes: CRC32 of op, length and body
//!
//! Readers skip records with op codes they do not know by jumping over
//! the body, so newer record kinds stay readable by older builds.

pub(crate) mod buf;
mod header;
mod records;

pub use header::BagHeader;
pub use records::{ChunkRecord, MessageRecord, Record};

use crate::{BagError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read};

/// File magic
pub const MAGIC: [u8; 8] = *b"#BAGKIT\n";

/// Bag file format version
pub const FORMAT_VERSION: u32 = 1;

/// Size of the fixed file header in bytes
pub const HEADER_SIZE: usize = 64;

/// Bytes a frame adds around its body
pub const FRAME_OVERHEAD: usize = 9;

/// Record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Message data (inside chunks only)
    MessageData = 0x02,
    /// Global per-connection index (index section)
    IndexData = 0x04,
    /// Compressed chunk of message records
    Chunk = 0x05,
    /// Chunk summary (index section)
    ChunkInfo = 0x06,
    /// Channel to type binding
    Connection = 0x07,
    /// Per-connection index trailing each chunk
    ChunkIndex = 0x08,
}

impl TryFrom<u8> for OpCode {
    type Error = BagError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x02 => Ok(OpCode::MessageData),
            0x04 => Ok(OpCode::IndexData),
            0x05 => Ok(OpCode::Chunk),
            0x06 => Ok(OpCode::ChunkInfo),
            0x07 => Ok(OpCode::Connection),
            0x08 => Ok(OpCode::ChunkIndex),
            _ => Err(BagError::corrupt(format!("invalid op code {:#04x}", value))),
        }
    }
}

/// A decoded frame borrowing its body
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Raw op code (may be unknown)
    pub op: u8,
    /// Record body
    pub body: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Known op code, if any
    pub fn op_code(&self) -> Option<OpCode> {
        OpCode::try_from(self.op).ok()
    }

    /// Fail unless the frame carries `op`
    pub fn expect(&self, op: OpCode) -> Result<()> {
        if self.op != op as u8 {
            return Err(BagError::corrupt(format!(
                "expected {:?} record, found op {:#04x}",
                op, self.op
            )));
        }
        Ok(())
    }

    /// Total encoded size of the frame
    pub fn encoded_len(&self) -> usize {
        self.body.len() + FRAME_OVERHEAD
    }
}

/// A frame read from a stream
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    /// Raw op code (may be unknown)
    pub op: u8,
    /// Record body
    pub body: Vec<u8>,
}

impl OwnedFrame {
    /// Borrow as a [`Frame`]
    pub fn as_frame(&self) -> Frame<'_> {
        Frame {
            op: self.op,
            body: &self.body,
        }
    }

    /// Total encoded size of the frame
    pub fn encoded_len(&self) -> usize {
        self.body.len() + FRAME_OVERHEAD
    }
}

/// Append a framed record whose body is produced by `write_body`
pub fn write_frame(out: &mut BytesMut, op: OpCode, write_body: impl FnOnce(&mut BytesMut)) {
    let frame_start = out.len();
    out.put_u8(op as u8);
    // Reserve space for length prefix
    out.put_u32_le(0);
    let body_start = out.len();

    write_body(out);

    let len = (out.len() - body_start) as u32;
    out[frame_start + 1..body_start].copy_from_slice(&len.to_le_bytes());

    let checksum = crc32fast::hash(&out[frame_start..]);
    out.put_u32_le(checksum);
}

/// Frame a complete body
pub fn encode_frame(op: OpCode, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + FRAME_OVERHEAD);
    write_frame(&mut buf, op, |b| b.put_slice(body));
    buf.freeze()
}

/// Decode the frame at the start of `data`, validating its checksum
///
/// Returns the frame and the number of bytes it occupies.
pub fn decode_frame(data: &[u8]) -> Result<(Frame<'_>, usize)> {
    if data.len() < FRAME_OVERHEAD {
        return Err(BagError::corrupt("frame too short"));
    }

    let op = data[0];
    let len = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
    let total = len
        .checked_add(FRAME_OVERHEAD)
        .ok_or_else(|| BagError::corrupt("frame length overflow"))?;
    if data.len() < total {
        return Err(BagError::corrupt(format!(
            "incomplete frame: declared {} bytes, {} available",
            total,
            data.len()
        )));
    }

    let body_end = 5 + len;
    let expected = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    let actual = crc32fast::hash(&data[..body_end]);
    if expected != actual {
        return Err(BagError::corrupt(format!(
            "checksum mismatch: expected {:#010x}, got {:#010x}",
            expected, actual
        )));
    }

    Ok((
        Frame {
            op,
            body: &data[5..body_end],
        },
        total,
    ))
}

/// Read one frame from a stream
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary. A frame
/// cut short by the end of the stream, or failing its checksum, is a
/// `CorruptRecord` error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<OwnedFrame>> {
    let mut prefix = [0u8; 5];
    let n = read_full(reader, &mut prefix)?;
    if n == 0 {
        return Ok(None);
    }
    if n < prefix.len() {
        return Err(BagError::corrupt("truncated frame header"));
    }

    let op = prefix[0];
    let len = u32::from_le_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as u64;

    // Grow the body as bytes arrive so a corrupt length cannot force a huge allocation
    let mut body = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut body)?;
    if (body.len() as u64) < len {
        return Err(BagError::corrupt(format!(
            "truncated frame body: declared {} bytes, read {}",
            len,
            body.len()
        )));
    }

    let mut crc = [0u8; 4];
    if read_full(reader, &mut crc)? < crc.len() {
        return Err(BagError::corrupt("truncated frame checksum"));
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&prefix);
    hasher.update(&body);
    let actual = hasher.finalize();
    let expected = u32::from_le_bytes(crc);
    if expected != actual {
        return Err(BagError::corrupt(format!(
            "checksum mismatch: expected {:#010x}, got {:#010x}",
            expected, actual
        )));
    }

    Ok(Some(OwnedFrame { op, body }))
}

/// Like `read_exact`, but reports how many bytes were read before EOF
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
