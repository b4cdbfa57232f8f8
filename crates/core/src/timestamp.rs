//! Nanosecond-resolution timestamp, the unit every tag and WAL entry is
//! ordered by.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nanoseconds since the Unix epoch.
///
/// All on-disk tag timestamps and WAL entries are ordered by this value.
/// `Timestamp` is `Copy` and totally ordered, which is what lets the
/// timeline binary-search (§4.5.2) and the `AsOf`/`History` algorithms
/// (§4.7) work directly off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch itself: `Timestamp(0)`.
    pub const EPOCH: Timestamp = Timestamp(0);
    /// The maximum representable timestamp, used as an open upper bound.
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Construct from a raw nanosecond count.
    pub const fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    /// The current wall-clock time, as nanoseconds since the Unix epoch.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Timestamp(nanos as u64)
    }

    /// The raw nanosecond count.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Render as an RFC3339 string (used in backup filenames and log lines).
    pub fn to_rfc3339(self) -> String {
        let secs = (self.0 / 1_000_000_000) as i64;
        let nanos = (self.0 % 1_000_000_000) as u32;
        DateTime::<Utc>::from_timestamp(secs, nanos)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
    }

    /// A filesystem-safe UTC stamp, e.g. `20260728T091530Z`, used for
    /// backup and quarantine filenames (§4.3.2, §4.3.3).
    pub fn to_compact_utc(self) -> String {
        let secs = (self.0 / 1_000_000_000) as i64;
        let nanos = (self.0 % 1_000_000_000) as u32;
        DateTime::<Utc>::from_timestamp(secs, nanos)
            .map(|dt| dt.format("%Y%m%dT%H%M%SZ").to_string())
            .unwrap_or_else(|| "19700101T000000Z".to_string())
    }

    /// Saturating addition of a duration expressed in nanoseconds.
    pub fn saturating_add_nanos(self, nanos: u64) -> Self {
        Timestamp(self.0.saturating_add(nanos))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_numeric() {
        assert!(Timestamp::from_nanos(1) < Timestamp::from_nanos(2));
        assert!(Timestamp::EPOCH < Timestamp::now());
    }

    #[test]
    fn compact_utc_is_filesystem_safe() {
        let s = Timestamp::from_nanos(1_700_000_000_000_000_000).to_compact_utc();
        assert!(!s.contains(':'));
        assert!(s.ends_with('Z'));
    }
}
