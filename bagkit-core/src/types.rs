//! Core types for bagkit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stable identifier of a connection within one bag
pub type ConnectionId = u32;

/// File offset of a chunk record, used as the chunk reference in the index
pub type ChunkPos = u64;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Message timestamp as (seconds, nanoseconds)
///
/// `nsec` is always normalized to `0..1_000_000_000`, so the derived ordering
/// (seconds first, then nanoseconds) is chronological.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub sec: i64,
    /// Nanoseconds within the second
    pub nsec: u32,
}

impl Timestamp {
    /// Earliest representable timestamp
    pub const MIN: Timestamp = Timestamp { sec: i64::MIN, nsec: 0 };

    /// Latest representable timestamp
    pub const MAX: Timestamp = Timestamp {
        sec: i64::MAX,
        nsec: NANOS_PER_SEC - 1,
    };

    /// Create a timestamp, carrying excess nanoseconds into seconds
    pub fn new(sec: i64, nsec: u32) -> Self {
        Self {
            sec: sec.saturating_add((nsec / NANOS_PER_SEC) as i64),
            nsec: nsec % NANOS_PER_SEC,
        }
    }

    /// Same instant with `nsec` carried into `sec`
    ///
    /// The fields are public, so a timestamp built by struct literal may hold
    /// `nsec >= 1_000_000_000`; everything written to a bag goes through here.
    pub fn normalized(self) -> Self {
        Self::new(self.sec, self.nsec)
    }

    /// Create a timestamp from whole seconds
    pub fn from_secs(sec: i64) -> Self {
        Self { sec, nsec: 0 }
    }

    /// Create a timestamp from nanoseconds since the epoch
    pub fn from_nanos(nanos: i128) -> Self {
        let sec = nanos.div_euclid(NANOS_PER_SEC as i128);
        let nsec = nanos.rem_euclid(NANOS_PER_SEC as i128) as u32;
        Self {
            sec: sec.clamp(i64::MIN as i128, i64::MAX as i128) as i64,
            nsec,
        }
    }

    /// Nanoseconds since the epoch
    pub fn as_nanos(&self) -> i128 {
        self.sec as i128 * NANOS_PER_SEC as i128 + self.nsec as i128
    }

    /// Seconds as a float, for display
    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.nsec as f64 * 1e-9
    }

    /// Convert to a UTC date-time, if in chrono's range
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.sec, self.nsec)
    }

    /// Elapsed time from `earlier` to `self`, zero if `earlier` is later
    pub fn duration_since(&self, earlier: &Timestamp) -> Duration {
        let nanos = self.as_nanos() - earlier.as_nanos();
        if nanos <= 0 {
            Duration::ZERO
        } else {
            let secs = (nanos / NANOS_PER_SEC as i128).min(u64::MAX as i128) as u64;
            Duration::new(secs, (nanos % NANOS_PER_SEC as i128) as u32)
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// Time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Range covering every representable timestamp
    pub fn all() -> Self {
        Self::new(Timestamp::MIN, Timestamp::MAX)
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Check if two ranges overlap
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Check if the range is empty (start after end)
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}
