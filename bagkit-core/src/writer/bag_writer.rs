//! Bag writer state machine

use super::{BagOptions, SyncPolicy};
use crate::chunk::{ChunkWriter, SealedChunk};
use crate::codec::{BagHeader, MessageRecord, Record};
use crate::index::{BagIndex, ChunkInfo};
use crate::message::encode_payload;
use crate::reader::load_bag;
use crate::registry::ConnectionRegistry;
use crate::{BagError, Message, Result, Timestamp};
use bytes::BytesMut;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Writes messages to a bag file
///
/// Lifecycle: `Created` → `Open` (on [`open`](Self::open) or the first
/// [`write`](Self::write)) → `Closed`. Any I/O failure moves the writer to a
/// terminal failed state in which every call returns that failure.
pub struct BagWriter {
    path: PathBuf,
    options: BagOptions,
    state: State,
}

enum State {
    Created,
    Open(Box<OpenBag>),
    Closed,
    Failed(BagError),
}

/// Appends framed records and tracks the stream position
struct RecordSink {
    file: BufWriter<File>,
    pos: u64,
    scratch: BytesMut,
}

impl RecordSink {
    fn append<R: Record>(&mut self, record: &R) -> Result<u64> {
        self.scratch.clear();
        record.encode_into(&mut self.scratch);
        self.file.write_all(&self.scratch)?;

        let start = self.pos;
        self.pos += self.scratch.len() as u64;
        Ok(start)
    }
}

struct OpenBag {
    sink: RecordSink,
    header: BagHeader,
    registry: ConnectionRegistry,
    chunk: ChunkWriter,
    index: BagIndex,
}

/// Open `path` for writing and take the exclusive writer lock
fn lock_file(path: &Path, options: &OpenOptions) -> Result<File> {
    let file = options.open(path)?;
    if let Err(e) = file.try_lock_exclusive() {
        if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
            return Err(BagError::Locked(path.to_path_buf()));
        }
        return Err(e.into());
    }
    Ok(file)
}

impl OpenBag {
    fn create(path: &Path, options: &BagOptions) -> Result<Self> {
        let file = lock_file(
            path,
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false),
        )?;
        // Only truncate once the lock is ours
        file.set_len(0)?;

        let header = BagHeader::new(options.compression);
        let mut file = BufWriter::new(file);
        file.write_all(&header.to_bytes())?;
        file.flush()?;

        info!(path = ?path, compression = %options.compression, "Created bag");

        Ok(Self {
            sink: RecordSink {
                file,
                pos: crate::config::HEADER_SIZE as u64,
                scratch: BytesMut::new(),
            },
            header,
            registry: ConnectionRegistry::new(),
            chunk: ChunkWriter::new(options.compression),
            index: BagIndex::new(),
        })
    }

    fn reopen(path: &Path, options: &BagOptions) -> Result<Self> {
        let file = lock_file(path, OpenOptions::new().read(true).write(true))?;

        let mut source = &file;
        let loaded = load_bag(&mut source, true)?;
        let registry = ConnectionRegistry::from_connections(loaded.connections)?;

        // Drop the old index section (or an unreadable tail) and mark the
        // bag unindexed until the next close
        file.set_len(loaded.data_end)?;
        let header = BagHeader {
            compression: options.compression,
            index_pos: 0,
            conn_count: 0,
            chunk_count: 0,
            ..loaded.header
        };
        let mut file = BufWriter::new(file);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.to_bytes())?;
        file.seek(SeekFrom::Start(loaded.data_end))?;
        file.flush()?;

        info!(
            path = ?path,
            connections = registry.len(),
            chunks = loaded.index.chunk_count(),
            "Reopened bag for append"
        );

        Ok(Self {
            sink: RecordSink {
                file,
                pos: loaded.data_end,
                scratch: BytesMut::new(),
            },
            header,
            registry,
            chunk: ChunkWriter::new(options.compression),
            index: loaded.index,
        })
    }

    fn write(
        &mut self,
        channel: &str,
        message: &Message,
        time: Timestamp,
        options: &BagOptions,
    ) -> Result<()> {
        let mut record = MessageRecord {
            connection_id: 0,
            timestamp: time.normalized(),
            payload: encode_payload(message),
        };
        let fits = self.chunk.room_for(record.encoded_len())?;

        let resolved = self.registry.resolve(channel, &message.descriptor())?;
        if resolved.is_new {
            if let Some(conn) = self.registry.get(resolved.id) {
                self.sink.append(conn.as_ref())?;
            }
        }
        record.connection_id = resolved.id;

        if !fits {
            self.seal_chunk(options.sync_policy)?;
        }
        self.chunk.append(&record);

        if self.chunk.should_seal(options.chunk_threshold) {
            self.seal_chunk(options.sync_policy)?;
        }
        Ok(())
    }

    fn seal_chunk(&mut self, sync_policy: SyncPolicy) -> Result<()> {
        let SealedChunk { record, mut index } = self.chunk.seal()?;
        let chunk_pos = self.sink.append(&record)?;
        let chunk_index = index.flush(chunk_pos);
        self.sink.append(&chunk_index)?;

        self.index
            .add_chunk(ChunkInfo::new(chunk_pos, &record, &chunk_index), chunk_index);

        // Sealed chunks must survive a crash of the writing process
        self.sink.file.flush()?;
        if sync_policy == SyncPolicy::EveryChunk {
            self.sink.file.get_ref().sync_data()?;
        }
        Ok(())
    }

    fn finish(mut self, sync_policy: SyncPolicy) -> Result<BagHeader> {
        if !self.chunk.is_empty() {
            self.seal_chunk(sync_policy)?;
        }

        let index_pos = self.sink.pos;
        for conn in self.registry.connections() {
            self.sink.append(conn.as_ref())?;
        }
        for info in self.index.chunk_infos() {
            self.sink.append(info)?;
        }
        self.sink.append(&self.index.finalize())?;

        self.header.index_pos = index_pos;
        self.header.conn_count = self.registry.len() as u32;
        self.header.chunk_count = self.index.chunk_count() as u32;

        let file = &mut self.sink.file;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.header.to_bytes())?;
        file.flush()?;

        if sync_policy != SyncPolicy::Never {
            file.get_ref().sync_all()?;
        }
        file.get_ref().unlock()?;

        Ok(self.header)
    }
}

impl BagWriter {
    /// Create a writer for a new bag at `path`
    ///
    /// Nothing touches the filesystem until the writer is opened. An existing
    /// file at `path` is replaced.
    pub fn new(path: impl Into<PathBuf>, options: BagOptions) -> Self {
        Self {
            path: path.into(),
            options,
            state: State::Created,
        }
    }

    /// Reopen an existing bag and continue writing after its last chunk
    ///
    /// Works on cleanly closed bags and on bags whose writer crashed; in the
    /// latter case everything up to the last intact chunk is kept.
    pub fn append(path: impl Into<PathBuf>, options: BagOptions) -> Result<Self> {
        let path = path.into();
        let bag = OpenBag::reopen(&path, &options)?;
        Ok(Self {
            path,
            options,
            state: State::Open(Box::new(bag)),
        })
    }

    /// Path of the bag file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writer configuration
    pub fn options(&self) -> &BagOptions {
        &self.options
    }

    /// Check if the writer accepts messages
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    /// Create the file, take the writer lock and write the header
    ///
    /// Does nothing if the writer is already open.
    pub fn open(&mut self) -> Result<()> {
        match &self.state {
            State::Created => {}
            State::Open(_) => return Ok(()),
            State::Closed => return Err(BagError::BagClosed),
            State::Failed(e) => return Err(e.clone()),
        }

        match OpenBag::create(&self.path, &self.options) {
            Ok(bag) => {
                self.state = State::Open(Box::new(bag));
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Write a message on `channel`
    ///
    /// The first write to a channel binds it to the message's type; writing
    /// a different type later fails with `TypeConflict` and leaves the
    /// writer usable. Timestamps may arrive in any order.
    pub fn write(&mut self, channel: &str, message: &Message, time: Timestamp) -> Result<()> {
        self.open()?;
        let State::Open(bag) = &mut self.state else {
            return Err(BagError::BagClosed);
        };
        let result = bag.write(channel, message, time, &self.options);
        result.map_err(|e| self.fail(e))
    }

    /// Seal the open chunk now, regardless of its size
    pub fn flush(&mut self) -> Result<()> {
        let sync_policy = self.options.sync_policy;
        let result = match &mut self.state {
            State::Open(bag) if bag.chunk.is_empty() => Ok(()),
            State::Open(bag) => bag.seal_chunk(sync_policy),
            State::Created => return Ok(()),
            State::Closed => return Err(BagError::BagClosed),
            State::Failed(e) => return Err(e.clone()),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Seal the last chunk, write the index and release the file
    ///
    /// A second call fails with `BagClosed` without touching the file.
    pub fn close(&mut self) -> Result<()> {
        self.open()?;
        let bag = match std::mem::replace(&mut self.state, State::Closed) {
            State::Open(bag) => bag,
            other => {
                self.state = other;
                return Err(BagError::BagClosed);
            }
        };

        match bag.finish(self.options.sync_policy) {
            Ok(header) => {
                info!(
                    path = ?self.path,
                    connections = header.conn_count,
                    chunks = header.chunk_count,
                    "Closed bag"
                );
                Ok(())
            }
            Err(e) => {
                self.state = State::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Record a failure; everything except channel type conflicts,
    /// oversized messages and lock contention is terminal
    fn fail(&mut self, e: BagError) -> BagError {
        if !matches!(
            e,
            BagError::TypeConflict { .. } | BagError::MessageTooLarge { .. } | BagError::Locked(_)
        ) {
            warn!(path = ?self.path, error = %e, "Bag writer failed");
            self.state = State::Failed(e.clone());
        }
        e
    }
}

impl Drop for BagWriter {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!(path = ?self.path, error = %e, "Failed to close bag on drop");
            }
        }
    }
}
