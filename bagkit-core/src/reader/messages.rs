//! Lazy message iteration

use super::{BagReader, Query};
use crate::chunk::{decompress_chunk, read_message_at};
use crate::index::{BagIndex, ChunkIndexEntry};
use crate::registry::{Connection, ConnectionRegistry};
use crate::{BagError, ChunkPos, ConnectionId, Message, Result, TimeRange, Timestamp};
use bytes::Bytes;
use std::io::{Read, Seek};
use std::sync::Arc;

/// A message read from a bag
#[derive(Debug, Clone)]
pub struct MessageView {
    connection: Arc<Connection>,
    timestamp: Timestamp,
    payload: Bytes,
    chunk_pos: ChunkPos,
}

impl MessageView {
    /// Connection the message was written on
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Channel name
    pub fn channel(&self) -> &str {
        &self.connection.channel
    }

    /// Type name of the message
    pub fn type_name(&self) -> &str {
        self.connection.type_name()
    }

    /// Message timestamp
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Encoded payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// File position of the chunk holding the message
    pub fn chunk_pos(&self) -> ChunkPos {
        self.chunk_pos
    }

    /// Decode the payload against the connection's type
    pub fn decode(&self) -> Result<Message> {
        crate::message::decode_payload(&self.payload, &self.connection.descriptor)
    }
}

/// Index entries to read from one chunk, in output order
pub(super) struct ChunkPlan {
    pub pos: ChunkPos,
    pub entries: Vec<(ConnectionId, ChunkIndexEntry)>,
}

/// Pick the chunks and entries a query needs
///
/// Chunks come in append order; entries within a chunk are ordered by
/// timestamp, ties by offset (write order).
pub(super) fn plan_chunks(
    index: &BagIndex,
    connections: &[ConnectionId],
    range: TimeRange,
) -> Vec<ChunkPlan> {
    if connections.is_empty() || range.is_empty() {
        return Vec::new();
    }

    let mut plans = Vec::new();
    for chunk in index.chunks() {
        if !chunk.info.time_range().overlaps(&range) || !chunk.info.has_any(connections) {
            continue;
        }

        let mut entries: Vec<(ConnectionId, ChunkIndexEntry)> = connections
            .iter()
            .filter_map(|conn| chunk.index.entries.get(conn).map(|list| (*conn, list)))
            .flat_map(|(conn, list)| {
                list.iter()
                    .filter(move |e| range.contains(e.time))
                    .map(move |e| (conn, *e))
            })
            .collect();
        if entries.is_empty() {
            continue;
        }
        entries.sort_by_key(|(_, e)| (e.time, e.offset));

        plans.push(ChunkPlan {
            pos: chunk.info.chunk_pos,
            entries,
        });
    }
    plans
}

/// Shared connection handle for `id`
pub(super) fn connection_for(registry: &ConnectionRegistry, id: ConnectionId) -> Result<Arc<Connection>> {
    registry
        .get(id)
        .cloned()
        .ok_or_else(|| BagError::corrupt(format!("unknown connection id {}", id)))
}

/// Decode the message an index entry points at
pub(super) fn view_at(
    connection: Arc<Connection>,
    chunk_pos: ChunkPos,
    data: &[u8],
    entry: &ChunkIndexEntry,
) -> Result<MessageView> {
    let record = read_message_at(data, entry.offset)?;
    if record.connection_id != connection.id || record.timestamp != entry.time {
        return Err(BagError::corrupt(format!(
            "index entry at offset {} does not match its record",
            entry.offset
        )));
    }
    Ok(MessageView {
        connection,
        timestamp: record.timestamp,
        payload: record.payload,
        chunk_pos,
    })
}

/// Attach the chunk position to record-level corruption
pub(super) fn in_chunk(pos: ChunkPos, e: BagError) -> BagError {
    match e {
        BagError::CorruptRecord(reason) => BagError::chunk_corrupt(pos, reason),
        other => other,
    }
}

struct OpenChunk {
    pos: ChunkPos,
    data: Bytes,
    entries: std::vec::IntoIter<(ConnectionId, ChunkIndexEntry)>,
}

/// Iterator over the messages matching a [`Query`]
///
/// Each selected chunk is read and decompressed once, when iteration
/// reaches it.
pub struct Messages<'a, R> {
    reader: &'a BagReader<R>,
    plans: std::vec::IntoIter<ChunkPlan>,
    current: Option<OpenChunk>,
}

impl<'a, R: Read + Seek> Messages<'a, R> {
    pub(super) fn new(reader: &'a BagReader<R>, query: &Query) -> Self {
        let connections = query.select(reader.connections());
        let plans = plan_chunks(&reader.index, &connections, query.time_range());
        Self {
            reader,
            plans: plans.into_iter(),
            current: None,
        }
    }
}

impl<'a, R: Read + Seek> Iterator for Messages<'a, R> {
    type Item = Result<MessageView>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = &mut self.current {
                if let Some((conn, entry)) = chunk.entries.next() {
                    let pos = chunk.pos;
                    let result = connection_for(&self.reader.registry, conn)
                        .and_then(|c| view_at(c, pos, &chunk.data, &entry))
                        .map_err(|e| in_chunk(pos, e));
                    if result.is_err() {
                        // one error per chunk, skip the rest of it
                        self.current = None;
                    }
                    return Some(result);
                }
                self.current = None;
            }

            let plan = self.plans.next()?;
            let loaded = self
                .reader
                .load_chunk(plan.pos)
                .and_then(|chunk| decompress_chunk(&chunk, plan.pos));
            match loaded {
                Ok(data) => {
                    self.current = Some(OpenChunk {
                        pos: plan.pos,
                        data,
                        entries: plan.entries.into_iter(),
                    })
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
