//! Message selection

use crate::registry::Connection;
use crate::{ConnectionId, TimeRange, Timestamp};
use std::sync::Arc;

/// Selects messages by channel, type and inclusive time range
///
/// Filters combine with AND. An empty query matches every message.
#[derive(Debug, Clone, Default)]
pub struct Query {
    channels: Option<Vec<String>>,
    types: Option<Vec<String>>,
    range: TimeRange,
}

impl Query {
    /// Match every message
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to the given channels
    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to channels carrying the given type names
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Skip messages before `start`
    pub fn with_start_time(mut self, start: Timestamp) -> Self {
        self.range.start = start;
        self
    }

    /// Skip messages after `end`
    pub fn with_end_time(mut self, end: Timestamp) -> Self {
        self.range.end = end;
        self
    }

    /// Restrict to `[start, end]`
    pub fn with_time_range(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.range = TimeRange::new(start, end);
        self
    }

    /// Inclusive time range of the query
    pub fn time_range(&self) -> TimeRange {
        self.range
    }

    /// Check if a connection passes the channel and type filters
    pub fn matches_connection(&self, conn: &Connection) -> bool {
        let channel_ok = self
            .channels
            .as_ref()
            .map_or(true, |channels| channels.iter().any(|c| *c == conn.channel));
        let type_ok = self
            .types
            .as_ref()
            .map_or(true, |types| types.iter().any(|t| t == conn.type_name()));
        channel_ok && type_ok
    }

    /// Ids of the connections the query selects, ascending
    pub(crate) fn select(&self, connections: &[Arc<Connection>]) -> Vec<ConnectionId> {
        connections
            .iter()
            .filter(|conn| self.matches_connection(conn))
            .map(|conn| conn.id)
            .collect()
    }
}
