//! bagkit Core - Chunked, Indexed Message Log Files
//!
//! A bag records timestamped, typed messages published on named channels
//! into a single append-only file for later replay and inspection:
//! - Many channels with different message types in one file
//! - Writes may arrive with non-monotonic timestamps
//! - Optional per-chunk compression (none, bz2, lz4)
//! - An index for time-range and per-channel reads without a full scan
//!
//! # Architecture
//!
//! - **Registry**: binds each channel to one message type and a connection id
//! - **Codec**: framed, checksummed binary records
//! - **Chunks**: message records buffered and compressed as one unit
//! - **Index**: per-chunk entries, folded into an index section on close
//! - **Writer / Reader**: the bag file lifecycle, with recovery of bags
//!   that were never closed
//!
//! ```no_run
//! use bagkit_core::{BagOptions, BagReader, BagWriter, Message, Query, Timestamp};
//!
//! # fn main() -> bagkit_core::Result<()> {
//! let mut writer = BagWriter::new("session.bag", BagOptions::default());
//! writer.write("/chatter", &Message::from("hello"), Timestamp::from_secs(1))?;
//! writer.close()?;
//!
//! let reader = BagReader::open("session.bag")?;
//! for message in reader.read(&Query::all().with_channels(["/chatter"])) {
//!     println!("{}", message?.decode()?.as_str().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod codec;
pub mod index;
pub mod message;
pub mod reader;
pub mod registry;
pub mod writer;

mod error;
mod info;
mod types;

pub use chunk::Compression;
pub use error::{BagError, Result};
pub use info::{BagInfo, ChannelInfo, CompressionStats};
pub use message::{ArrayData, ArrayLayout, ArrayMessage, Dimension, Message, Scalar, TypeDescriptor};
pub use reader::{BagReader, MessageView, Messages, Query};
pub use registry::Connection;
pub use types::*;
pub use writer::{BagOptions, BagWriter, SyncPolicy};

/// bagkit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Uncompressed chunk size that triggers sealing (4MB)
    pub const DEFAULT_CHUNK_THRESHOLD: usize = 4 * 1024 * 1024;

    /// Largest uncompressed chunk, and so the largest single message
    pub const MAX_CHUNK_SIZE: usize = crate::chunk::MAX_CHUNK_SIZE;

    /// On-disk format version written by this build
    pub const FORMAT_VERSION: u32 = crate::codec::FORMAT_VERSION;

    /// Size of the fixed file header
    pub const HEADER_SIZE: usize = crate::codec::HEADER_SIZE;
}
