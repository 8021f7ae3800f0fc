//! Bag reader
//!
//! A closed bag is opened through its index section, which lists every
//! connection and chunk. Bags that were never closed (or whose index is
//! damaged) can be opened with a recovering linear scan instead.

mod messages;
mod parallel;
mod query;
mod recover;

pub use messages::{MessageView, Messages};
pub use query::Query;

use crate::codec::{read_frame, BagHeader, ChunkRecord, OpCode, Record, HEADER_SIZE};
use crate::index::{BagIndex, ChunkInfo, IndexData, IndexedChunk};
use crate::info::BagInfo;
use crate::registry::{Connection, ConnectionRegistry};
use crate::{BagError, ChunkPos, Result, Timestamp};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything needed to read or extend a bag
pub(crate) struct LoadedBag {
    pub header: BagHeader,
    pub connections: Vec<Connection>,
    pub index: BagIndex,
    /// End of the record stream, excluding any index section
    pub data_end: u64,
    /// True if the index was rebuilt by a linear scan
    pub recovered: bool,
}

/// Read and validate the file header
fn read_header<R: Read>(source: &mut R) -> Result<BagHeader> {
    let mut buf = [0u8; HEADER_SIZE];
    match source.read_exact(&mut buf) {
        Ok(()) => BagHeader::from_bytes(&buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(BagError::NotABag),
        Err(e) => Err(e.into()),
    }
}

/// Decode the index section of a closed bag
fn read_index<R: Read + Seek>(source: &mut R, header: BagHeader) -> Result<LoadedBag> {
    if !header.is_indexed() {
        return Err(BagError::IndexMissing("bag was not closed".into()));
    }
    let file_len = source.seek(SeekFrom::End(0))?;
    if header.index_pos < HEADER_SIZE as u64 || header.index_pos >= file_len {
        return Err(BagError::IndexMissing(format!(
            "index position {} outside file of {} bytes",
            header.index_pos, file_len
        )));
    }

    source.seek(SeekFrom::Start(header.index_pos))?;
    let mut stream = BufReader::new(source);
    let index_corrupt = |e: BagError| match e {
        BagError::CorruptRecord(msg) => BagError::IndexCorrupt(msg),
        other => other,
    };

    let mut connections = Vec::new();
    let mut infos = Vec::new();
    let data = loop {
        let frame = read_frame(&mut stream)
            .map_err(index_corrupt)?
            .ok_or_else(|| BagError::IndexCorrupt("index section ends before IndexData".into()))?;
        let frame = frame.as_frame();
        match frame.op_code() {
            Some(OpCode::Connection) => {
                connections.push(Connection::from_frame(&frame).map_err(index_corrupt)?)
            }
            Some(OpCode::ChunkInfo) => {
                infos.push(ChunkInfo::from_frame(&frame).map_err(index_corrupt)?)
            }
            Some(OpCode::IndexData) => {
                break IndexData::from_frame(&frame).map_err(index_corrupt)?;
            }
            Some(other) => {
                return Err(BagError::IndexCorrupt(format!(
                    "unexpected {:?} record in index section",
                    other
                )))
            }
            None => continue,
        }
    };

    if connections.len() != header.conn_count as usize || infos.len() != header.chunk_count as usize {
        return Err(BagError::IndexCorrupt(format!(
            "header announces {} connections and {} chunks, index holds {} and {}",
            header.conn_count,
            header.chunk_count,
            connections.len(),
            infos.len()
        )));
    }

    let index = BagIndex::from_index_data(infos, data)?;
    check_connections(&index, connections.len())?;

    Ok(LoadedBag {
        header,
        connections,
        index,
        data_end: header.index_pos,
        recovered: false,
    })
}

/// Fail if any chunk references a connection that does not exist
fn check_connections(index: &BagIndex, conn_count: usize) -> Result<()> {
    for chunk in index.chunks() {
        if let Some(conn) = chunk
            .info
            .message_counts
            .keys()
            .find(|&&conn| conn as usize >= conn_count)
        {
            return Err(BagError::IndexCorrupt(format!(
                "chunk at {} references unknown connection {}",
                chunk.info.chunk_pos, conn
            )));
        }
    }
    Ok(())
}

/// Load a bag's header, connections and index
///
/// With `recover`, a missing or corrupt index falls back to a linear scan
/// of the record stream.
pub(crate) fn load_bag<R: Read + Seek>(source: &mut R, recover: bool) -> Result<LoadedBag> {
    source.seek(SeekFrom::Start(0))?;
    let header = read_header(source)?;

    match read_index(source, header) {
        Ok(loaded) => Ok(loaded),
        Err(e) if recover && e.is_recoverable() => {
            warn!(error = %e, "Bag index unusable, scanning records");
            recover::scan(source, header)
        }
        Err(e) => Err(e),
    }
}

/// Read the chunk record at `pos`
fn read_chunk_at<R: Read + Seek>(source: &mut R, pos: ChunkPos) -> Result<ChunkRecord> {
    source.seek(SeekFrom::Start(pos))?;
    let frame = read_frame(source)
        .and_then(|frame| frame.ok_or_else(|| BagError::corrupt("chunk past end of file")))
        .map_err(|e| messages::in_chunk(pos, e))?;
    ChunkRecord::from_frame(&frame.as_frame()).map_err(|e| messages::in_chunk(pos, e))
}

/// Reads messages from a bag
pub struct BagReader<R = File> {
    source: Mutex<R>,
    header: BagHeader,
    registry: ConnectionRegistry,
    index: BagIndex,
    recovered: bool,
}

impl BagReader<File> {
    /// Open a closed bag through its index
    ///
    /// Fails with `IndexMissing` or `IndexCorrupt` if the bag has no usable
    /// index; see [`open_recover`](Self::open_recover).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = Self::new(File::open(path)?)?;
        info!(path = ?path, chunks = reader.index.chunk_count(), "Opened bag");
        Ok(reader)
    }

    /// Open a bag, scanning its records if the index is missing or corrupt
    ///
    /// Reading stops at the first truncated or corrupt record; every chunk
    /// before it is kept.
    pub fn open_recover(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = Self::new_recover(File::open(path)?)?;
        info!(
            path = ?path,
            chunks = reader.index.chunk_count(),
            recovered = reader.recovered,
            "Opened bag"
        );
        Ok(reader)
    }
}

impl BagReader<Cursor<Vec<u8>>> {
    /// Read a bag held in memory
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Result<Self> {
        Self::new(Cursor::new(data.into()))
    }
}

impl<R: Read + Seek> BagReader<R> {
    /// Read a closed bag from `source`
    pub fn new(mut source: R) -> Result<Self> {
        let loaded = load_bag(&mut source, false)?;
        Self::from_loaded(source, loaded)
    }

    /// Read a bag from `source`, recovering from a missing or corrupt index
    pub fn new_recover(mut source: R) -> Result<Self> {
        let loaded = load_bag(&mut source, true)?;
        Self::from_loaded(source, loaded)
    }

    fn from_loaded(source: R, loaded: LoadedBag) -> Result<Self> {
        Ok(Self {
            source: Mutex::new(source),
            header: loaded.header,
            registry: ConnectionRegistry::from_connections(loaded.connections)?,
            index: loaded.index,
            recovered: loaded.recovered,
        })
    }

    /// File header
    pub fn header(&self) -> &BagHeader {
        &self.header
    }

    /// True if the index was rebuilt by a linear scan
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// All connections, in id order
    pub fn connections(&self) -> &[Arc<Connection>] {
        self.registry.connections()
    }

    /// Connection bound to `channel`
    pub fn connection(&self, channel: &str) -> Result<&Arc<Connection>> {
        self.registry
            .lookup(channel)
            .ok_or_else(|| BagError::UnknownChannel(channel.to_string()))
    }

    /// Chunks with their summaries, in append order
    pub fn chunks(&self) -> &[IndexedChunk] {
        self.index.chunks()
    }

    /// Total number of messages
    pub fn message_count(&self) -> u64 {
        self.index.message_count()
    }

    /// Earliest and latest message timestamps
    pub fn time_bounds(&self) -> Option<(Timestamp, Timestamp)> {
        self.index.time_bounds()
    }

    /// Summary of the bag's contents
    pub fn info(&self) -> BagInfo {
        BagInfo::new(&self.header, self.registry.connections(), &self.index, self.recovered)
    }

    /// Iterate messages matching `query`
    ///
    /// Messages come chunk by chunk in append order, and in timestamp order
    /// (ties by write order) within each chunk. A chunk that cannot be read
    /// produces one error item; iteration then continues with the next chunk.
    pub fn read(&self, query: &Query) -> Messages<'_, R> {
        Messages::new(self, query)
    }

    /// Read every message matching `query`, globally ordered by timestamp
    ///
    /// Selected chunks are decompressed in parallel. Fails on the first chunk
    /// that cannot be read.
    pub fn read_ordered(&self, query: &Query) -> Result<Vec<MessageView>> {
        parallel::read_ordered(self, query)
    }

    /// Read the raw chunk record at `pos` under the source lock
    fn load_chunk(&self, pos: ChunkPos) -> Result<ChunkRecord> {
        let mut source = self.source.lock();
        read_chunk_at(&mut *source, pos)
    }
}
