//! Payload encoding for messages
//!
//! Format:
//! - 1 byte: payload kind (scalar, text, array, opaque)
//! - scalar: 1 byte scalar tag, then the value (little-endian)
//! - text: u32 length + UTF-8 bytes
//! - array: element tag, element count (u32), data offset (u32),
//!   dimension count (u32), dimensions (label, size u32, stride u32),
//!   then `count` elements
//! - opaque: the raw bytes

use super::{ArrayData, ArrayLayout, ArrayMessage, Dimension, ElementType, Message, Scalar, TypeDescriptor};
use crate::codec::buf::{FieldReader, FieldWriter};
use crate::{BagError, Result};
use bytes::{BufMut, Bytes, BytesMut};

const KIND_SCALAR: u8 = 1;
const KIND_TEXT: u8 = 2;
const KIND_ARRAY: u8 = 3;
const KIND_OPAQUE: u8 = 4;

/// Encode a message into its payload bytes
pub fn encode_payload(message: &Message) -> Bytes {
    let mut buf = BytesMut::new();
    match message {
        Message::Scalar(s) => {
            buf.put_u8(KIND_SCALAR);
            encode_scalar(&mut buf, s);
        }
        Message::Text(s) => {
            buf.put_u8(KIND_TEXT);
            buf.put_string(s);
        }
        Message::Array(a) => {
            buf.put_u8(KIND_ARRAY);
            encode_array(&mut buf, a);
        }
        Message::Opaque { bytes, .. } => {
            buf.put_u8(KIND_OPAQUE);
            buf.put_slice(bytes);
        }
    }
    buf.freeze()
}

/// Decode payload bytes written for a connection of type `descriptor`
///
/// Fails with `TypeMismatch` if the payload does not decode to the
/// descriptor's type, or an array's element buffer disagrees with its
/// declared count.
pub fn decode_payload(data: &[u8], descriptor: &TypeDescriptor) -> Result<Message> {
    let mut reader = FieldReader::new(data, "payload");
    let kind = reader.u8()?;

    let message = match kind {
        KIND_SCALAR => {
            let scalar = decode_scalar(&mut reader)?;
            reader.finish()?;
            Message::Scalar(scalar)
        }
        KIND_TEXT => {
            let s = reader.string()?;
            reader.finish()?;
            Message::Text(s)
        }
        KIND_ARRAY => Message::Array(decode_array(&mut reader)?),
        KIND_OPAQUE => {
            return Ok(Message::Opaque {
                descriptor: descriptor.clone(),
                bytes: reader.rest().to_vec(),
            });
        }
        other => {
            return Err(BagError::corrupt(format!("unknown payload kind {}", other)));
        }
    };

    let decoded = message.descriptor();
    if decoded.type_name != descriptor.type_name {
        return Err(BagError::TypeMismatch(format!(
            "payload decodes as {}, connection type is {}",
            decoded.type_name, descriptor.type_name
        )));
    }
    Ok(message)
}

fn encode_scalar(buf: &mut BytesMut, scalar: &Scalar) {
    match *scalar {
        Scalar::Bool(v) => {
            buf.put_u8(0);
            buf.put_u8(v as u8);
        }
        Scalar::Int8(v) => {
            buf.put_u8(1);
            buf.put_i8(v);
        }
        Scalar::Int16(v) => {
            buf.put_u8(2);
            buf.put_i16_le(v);
        }
        Scalar::Int32(v) => {
            buf.put_u8(3);
            buf.put_i32_le(v);
        }
        Scalar::Int64(v) => {
            buf.put_u8(4);
            buf.put_i64_le(v);
        }
        Scalar::UInt8(v) => {
            buf.put_u8(5);
            buf.put_u8(v);
        }
        Scalar::UInt16(v) => {
            buf.put_u8(6);
            buf.put_u16_le(v);
        }
        Scalar::UInt32(v) => {
            buf.put_u8(7);
            buf.put_u32_le(v);
        }
        Scalar::UInt64(v) => {
            buf.put_u8(8);
            buf.put_u64_le(v);
        }
        Scalar::Float32(v) => {
            buf.put_u8(9);
            buf.put_f32_le(v);
        }
        Scalar::Float64(v) => {
            buf.put_u8(10);
            buf.put_f64_le(v);
        }
        Scalar::Time(t) => {
            buf.put_u8(11);
            buf.put_timestamp(t);
        }
    }
}

fn decode_scalar(reader: &mut FieldReader<'_>) -> Result<Scalar> {
    let tag = reader.u8()?;
    Ok(match tag {
        0 => match reader.u8()? {
            0 => Scalar::Bool(false),
            1 => Scalar::Bool(true),
            other => return Err(BagError::corrupt(format!("invalid bool byte {}", other))),
        },
        1 => Scalar::Int8(reader.u8()? as i8),
        2 => Scalar::Int16(reader.u16()? as i16),
        3 => Scalar::Int32(reader.u32()? as i32),
        4 => Scalar::Int64(reader.i64()?),
        5 => Scalar::UInt8(reader.u8()?),
        6 => Scalar::UInt16(reader.u16()?),
        7 => Scalar::UInt32(reader.u32()?),
        8 => Scalar::UInt64(reader.u64()?),
        9 => Scalar::Float32(f32::from_bits(reader.u32()?)),
        10 => Scalar::Float64(f64::from_bits(reader.u64()?)),
        11 => Scalar::Time(reader.timestamp()?),
        other => return Err(BagError::corrupt(format!("unknown scalar tag {}", other))),
    })
}

fn encode_array(buf: &mut BytesMut, array: &ArrayMessage) {
    buf.put_u8(array.element_type() as u8);
    buf.put_u32_le(array.data.len() as u32);
    buf.put_u32_le(array.layout.data_offset);
    buf.put_u32_le(array.layout.dim.len() as u32);
    for dim in &array.layout.dim {
        buf.put_string(&dim.label);
        buf.put_u32_le(dim.size);
        buf.put_u32_le(dim.stride);
    }

    match &array.data {
        ArrayData::Int8(v) => v.iter().for_each(|&x| buf.put_i8(x)),
        ArrayData::Int16(v) => v.iter().for_each(|&x| buf.put_i16_le(x)),
        ArrayData::Int32(v) => v.iter().for_each(|&x| buf.put_i32_le(x)),
        ArrayData::Int64(v) => v.iter().for_each(|&x| buf.put_i64_le(x)),
        ArrayData::UInt8(v) => buf.put_slice(v),
        ArrayData::UInt16(v) => v.iter().for_each(|&x| buf.put_u16_le(x)),
        ArrayData::UInt32(v) => v.iter().for_each(|&x| buf.put_u32_le(x)),
        ArrayData::UInt64(v) => v.iter().for_each(|&x| buf.put_u64_le(x)),
        ArrayData::Float32(v) => v.iter().for_each(|&x| buf.put_f32_le(x)),
        ArrayData::Float64(v) => v.iter().for_each(|&x| buf.put_f64_le(x)),
    }
}

fn decode_array(reader: &mut FieldReader<'_>) -> Result<ArrayMessage> {
    let tag = reader.u8()?;
    let element_type = ElementType::from_tag(tag)
        .ok_or_else(|| BagError::corrupt(format!("unknown element tag {}", tag)))?;
    let count = reader.u32()? as usize;
    let data_offset = reader.u32()?;

    let dim_count = reader.u32()? as usize;
    // each dimension needs at least 12 bytes; reject absurd counts before allocating
    if dim_count > reader.remaining() / 12 {
        return Err(BagError::corrupt(format!("dimension count {} too large", dim_count)));
    }
    let mut dim = Vec::with_capacity(dim_count);
    for _ in 0..dim_count {
        let label = reader.string()?;
        let size = reader.u32()?;
        let stride = reader.u32()?;
        dim.push(Dimension { label, size, stride });
    }

    let width = element_type.width();
    let raw = reader.rest();
    if count.checked_mul(width) != Some(raw.len()) {
        return Err(BagError::TypeMismatch(format!(
            "array declares {} {} elements ({} bytes), payload has {} bytes",
            count,
            element_type.name(),
            count.saturating_mul(width),
            raw.len()
        )));
    }

    let chunks = raw.chunks_exact(width);
    let data = match element_type {
        ElementType::Int8 => ArrayData::Int8(raw.iter().map(|&b| b as i8).collect()),
        ElementType::UInt8 => ArrayData::UInt8(raw.to_vec()),
        ElementType::Int16 => ArrayData::Int16(chunks.map(|c| i16::from_le_bytes([c[0], c[1]])).collect()),
        ElementType::UInt16 => ArrayData::UInt16(chunks.map(|c| u16::from_le_bytes([c[0], c[1]])).collect()),
        ElementType::Int32 => ArrayData::Int32(chunks.map(|c| i32::from_le_bytes(le4(c))).collect()),
        ElementType::UInt32 => ArrayData::UInt32(chunks.map(|c| u32::from_le_bytes(le4(c))).collect()),
        ElementType::Float32 => ArrayData::Float32(chunks.map(|c| f32::from_le_bytes(le4(c))).collect()),
        ElementType::Int64 => ArrayData::Int64(chunks.map(|c| i64::from_le_bytes(le8(c))).collect()),
        ElementType::UInt64 => ArrayData::UInt64(chunks.map(|c| u64::from_le_bytes(le8(c))).collect()),
        ElementType::Float64 => ArrayData::Float64(chunks.map(|c| f64::from_le_bytes(le8(c))).collect()),
    };

    Ok(ArrayMessage {
        layout: ArrayLayout { dim, data_offset },
        data,
    })
}

#[inline]
fn le4(c: &[u8]) -> [u8; 4] {
    [c[0], c[1], c[2], c[3]]
}

#[inline]
fn le8(c: &[u8]) -> [u8; 8] {
    [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]
}
