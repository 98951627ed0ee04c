//! Capture clock values and the millisecond key used for correlation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const NANOS_PER_MS: u32 = 1_000_000;

/// Capture clock value as carried in frame headers (seconds + nanoseconds).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaptureStamp {
    pub sec: i64,
    pub nanosec: u32,
}

impl CaptureStamp {
    pub fn new(sec: i64, nanosec: u32) -> Self {
        Self { sec, nanosec }
    }

    /// Read the realtime clock.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                sec: d.as_secs() as i64,
                nanosec: d.subsec_nanos(),
            },
            Err(_) => Self::default(),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self {
            sec: (ms / 1000) as i64,
            nanosec: ((ms % 1000) as u32) * NANOS_PER_MS,
        }
    }

    pub fn key(&self) -> TimestampKey {
        TimestampKey::from(*self)
    }
}

impl fmt::Display for CaptureStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.sec, self.nanosec)
    }
}

/// Millisecond-resolution correlation key.
///
/// Only needs to be unique within the correlator's bounded working set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampKey(u64);

impl TimestampKey {
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Absolute gap between two keys in milliseconds.
    pub fn gap(self, other: TimestampKey) -> u64 {
        self.0.abs_diff(other.0)
    }
}

impl From<CaptureStamp> for TimestampKey {
    fn from(stamp: CaptureStamp) -> Self {
        let sec = u64::try_from(stamp.sec).unwrap_or(0);
        Self(
            sec.saturating_mul(1000)
                .saturating_add(u64::from(stamp.nanosec / NANOS_PER_MS)),
        )
    }
}

impl From<u64> for TimestampKey {
    fn from(ms: u64) -> Self {
        Self(ms)
    }
}

impl fmt::Display for TimestampKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whole-millisecond duration between two stamps (may be negative).
pub fn duration_ms(start: CaptureStamp, end: CaptureStamp) -> i64 {
    (end.sec - start.sec) * 1000 + i64::from(end.nanosec / NANOS_PER_MS)
        - i64::from(start.nanosec / NANOS_PER_MS)
}

/// A (start, end) pair of stamps used for perf annotations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: CaptureStamp,
    pub end: CaptureStamp,
}

impl Span {
    pub fn new(start: CaptureStamp, end: CaptureStamp) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> i64 {
        duration_ms(self.start, self.end)
    }
}
