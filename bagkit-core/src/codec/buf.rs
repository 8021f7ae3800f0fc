//! Checked little-endian field access for record bodies

use crate::{BagError, Result, Timestamp};
use bytes::{Buf, BufMut, BytesMut};

/// Bounds-checked reader over a record body
///
/// Every getter fails with `CorruptRecord` instead of panicking when the
/// body is shorter than the field being read.
pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.len() < n {
            return Err(BagError::corrupt(format!(
                "{}: need {} bytes, {} remaining",
                self.what,
                n,
                self.buf.len()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn timestamp(&mut self) -> Result<Timestamp> {
        let sec = self.i64()?;
        let nsec = self.u32()?;
        if nsec >= 1_000_000_000 {
            return Err(BagError::corrupt(format!(
                "{}: nanoseconds out of range: {}",
                self.what, nsec
            )));
        }
        Ok(Timestamp { sec, nsec })
    }

    /// Take exactly `n` bytes
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Take a u32 length prefix followed by that many bytes
    pub fn lengthed(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }

    pub fn string(&mut self) -> Result<String> {
        let raw = self.lengthed()?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| BagError::corrupt(format!("{}: {}", self.what, e)))
    }

    /// Take everything left
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    /// Fail if trailing bytes remain
    pub fn finish(self) -> Result<()> {
        if !self.buf.is_empty() {
            return Err(BagError::corrupt(format!(
                "{}: {} unexpected trailing bytes",
                self.what,
                self.buf.len()
            )));
        }
        Ok(())
    }
}

/// Field writers matching [`FieldReader`]
pub(crate) trait FieldWriter {
    fn put_timestamp(&mut self, ts: Timestamp);
    fn put_lengthed(&mut self, data: &[u8]);
    fn put_string(&mut self, s: &str);
}

impl FieldWriter for BytesMut {
    fn put_timestamp(&mut self, ts: Timestamp) {
        let ts = ts.normalized();
        self.put_i64_le(ts.sec);
        self.put_u32_le(ts.nsec);
    }

    fn put_lengthed(&mut self, data: &[u8]) {
        self.put_u32_le(data.len() as u32);
        self.put_slice(data);
    }

    fn put_string(&mut self, s: &str) {
        self.put_lengthed(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_buffer_is_corrupt() {
        let data = [1u8, 2, 3];
        let mut reader = FieldReader::new(&data, "test");
        assert!(matches!(reader.u32(), Err(BagError::CorruptRecord(_))));
        // a failed read consumes nothing
        assert_eq!(reader.remaining(), 3);
        assert_eq!(reader.u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_lengthed_fields() {
        let mut buf = BytesMut::new();
        buf.put_string("/chatter");
        buf.put_timestamp(Timestamp::new(7, 9));
        buf.put_u8(0xAB);

        let mut reader = FieldReader::new(&buf, "test");
        assert_eq!(reader.string().unwrap(), "/chatter");
        assert_eq!(reader.timestamp().unwrap(), Timestamp::new(7, 9));
        assert!(reader.finish().is_err());
    }

    #[test]
    fn test_declared_length_past_end() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(100);
        buf.put_slice(b"short");

        let mut reader = FieldReader::new(&buf, "test");
        assert!(matches!(reader.lengthed(), Err(BagError::CorruptRecord(_))));
    }
}
