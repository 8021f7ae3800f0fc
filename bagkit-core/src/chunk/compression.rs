//! Block compression for chunks

use crate::{BagError, Result};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Upper bound on LZ4 block expansion, plus slack for tiny blocks
const LZ4_MAX_RATIO: usize = 255;
const LZ4_SLACK: usize = 64;

/// Output preallocated for bz2 before the stream proves it is that large
const BZ2_PREALLOC_RATIO: usize = 8;

/// Chunk compression algorithm, fixed per bag at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Compression {
    /// Pass-through copy
    #[default]
    None = 0,
    /// bzip2 stream
    Bz2 = 1,
    /// LZ4 block format
    Lz4 = 2,
}

impl Compression {
    /// Parse the on-disk tag
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Bz2),
            2 => Ok(Compression::Lz4),
            other => Err(BagError::UnsupportedCompression(other)),
        }
    }

    /// Short name ("none", "bz2", "lz4")
    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bz2 => "bz2",
            Compression::Lz4 => "lz4",
        }
    }

    /// Compress a chunk buffer as one unit
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Bz2 => {
                let mut encoder = BzEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    bzip2::Compression::default(),
                );
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Compression::Lz4 => Ok(lz4_flex::block::compress(data)),
        }
    }

    /// Decompress into exactly `uncompressed_size` bytes
    ///
    /// `uncompressed_size` comes from disk, so allocation is bounded by what
    /// `data` can actually expand to. On failure returns a description of
    /// what went wrong; the caller attaches the chunk position.
    pub fn decompress(
        &self,
        data: &[u8],
        uncompressed_size: usize,
    ) -> std::result::Result<Vec<u8>, String> {
        let out = match self {
            Compression::None => data.to_vec(),
            Compression::Bz2 => {
                let mut out = Vec::with_capacity(
                    uncompressed_size.min(data.len().saturating_mul(BZ2_PREALLOC_RATIO)),
                );
                // read one byte past the expected size to detect oversized streams
                BzDecoder::new(data)
                    .take(uncompressed_size as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(|e| format!("bz2: {}", e))?;
                out
            }
            Compression::Lz4 => {
                let limit = data.len().saturating_mul(LZ4_MAX_RATIO) + LZ4_SLACK;
                if uncompressed_size > limit {
                    return Err(format!(
                        "lz4: {} bytes cannot expand to {} bytes",
                        data.len(),
                        uncompressed_size
                    ));
                }
                lz4_flex::block::decompress(data, uncompressed_size)
                    .map_err(|e| format!("lz4: {}", e))?
            }
        };

        if out.len() != uncompressed_size {
            return Err(format!(
                "decompressed {} bytes, expected {}",
                out.len(),
                uncompressed_size
            ));
        }
        Ok(out)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = BagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(Compression::None),
            "bz2" | "bzip2" => Ok(Compression::Bz2),
            "lz4" => Ok(Compression::Lz4),
            _ => Err(BagError::UnknownCompression(s.to_string())),
        }
    }
}
