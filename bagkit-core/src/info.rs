//! Bag summary

use crate::chunk::Compression;
use crate::codec::BagHeader;
use crate::index::BagIndex;
use crate::registry::Connection;
use crate::{ConnectionId, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Per-channel statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub id: ConnectionId,
    pub channel: String,
    pub type_name: String,
    pub message_count: u64,
}

/// Chunk sizes for one compression algorithm
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionStats {
    pub compression: Compression,
    pub chunks: usize,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl CompressionStats {
    /// Compressed size as a fraction of the uncompressed size
    pub fn ratio(&self) -> f64 {
        if self.uncompressed_size == 0 {
            1.0
        } else {
            self.compressed_size as f64 / self.uncompressed_size as f64
        }
    }
}

/// Summary of a bag's contents
#[derive(Debug, Clone, Serialize)]
pub struct BagInfo {
    pub version: u32,
    /// True if the index was rebuilt by a linear scan
    pub recovered: bool,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub message_count: u64,
    pub chunk_count: usize,
    /// Channels in connection id order
    pub channels: Vec<ChannelInfo>,
    pub compression: Vec<CompressionStats>,
}

impl BagInfo {
    pub(crate) fn new(
        header: &BagHeader,
        connections: &[Arc<Connection>],
        index: &BagIndex,
        recovered: bool,
    ) -> Self {
        let counts = index.message_counts();
        let channels = connections
            .iter()
            .map(|conn| ChannelInfo {
                id: conn.id,
                channel: conn.channel.clone(),
                type_name: conn.type_name().to_string(),
                message_count: counts.get(&conn.id).copied().unwrap_or(0),
            })
            .collect();

        let mut by_compression: BTreeMap<u8, CompressionStats> = BTreeMap::new();
        for info in index.chunk_infos() {
            let stats = by_compression
                .entry(info.compression as u8)
                .or_insert_with(|| CompressionStats {
                    compression: info.compression,
                    chunks: 0,
                    compressed_size: 0,
                    uncompressed_size: 0,
                });
            stats.chunks += 1;
            stats.compressed_size += info.compressed_size as u64;
            stats.uncompressed_size += info.uncompressed_size as u64;
        }

        let bounds = index.time_bounds();
        Self {
            version: header.version,
            recovered,
            start_time: bounds.map(|(start, _)| start),
            end_time: bounds.map(|(_, end)| end),
            message_count: index.message_count(),
            chunk_count: index.chunk_count(),
            channels,
            compression: by_compression.into_values().collect(),
        }
    }

    /// Time between the first and last message, in seconds
    pub fn duration_secs(&self) -> f64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.duration_since(&start).as_secs_f64(),
            _ => 0.0,
        }
    }

    /// Distinct message type names, sorted
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.channels.iter().map(|c| c.type_name.as_str()).collect();
        types.sort_unstable();
        types.dedup();
        types
    }

    /// Statistics for one channel
    pub fn channel(&self, name: &str) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| c.channel == name)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn format_time(ts: Option<Timestamp>) -> String {
    match ts {
        Some(ts) => match ts.as_datetime() {
            Some(dt) => format!(
                "{}.{:02} ({})",
                dt.format("%b %d %Y %H:%M:%S"),
                ts.nsec / 10_000_000,
                ts
            ),
            None => ts.to_string(),
        },
        None => "-".to_string(),
    }
}

impl fmt::Display for BagInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version:     {}", self.version)?;
        writeln!(f, "duration:    {:.1}s", self.duration_secs())?;
        writeln!(f, "start:       {}", format_time(self.start_time))?;
        writeln!(f, "end:         {}", format_time(self.end_time))?;
        writeln!(f, "messages:    {}", self.message_count)?;
        for stats in &self.compression {
            writeln!(
                f,
                "compression: {} [{}/{} chunks; {:.2}%]",
                stats.compression,
                stats.chunks,
                self.chunk_count,
                stats.ratio() * 100.0
            )?;
        }

        let types = self.types();
        for (i, ty) in types.iter().enumerate() {
            let label = if i == 0 { "types:" } else { "" };
            writeln!(f, "{:<13}{}", label, ty)?;
        }

        let width = self.channels.iter().map(|c| c.channel.len()).max().unwrap_or(0);
        for (i, ch) in self.channels.iter().enumerate() {
            let label = if i == 0 { "channels:" } else { "" };
            writeln!(
                f,
                "{:<13}{:<width$}  {:>6} msgs : {}",
                label,
                ch.channel,
                ch.message_count,
                ch.type_name,
                width = width
            )?;
        }
        Ok(())
    }
}
