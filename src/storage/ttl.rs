//! Expiry Clock Helpers and the Authoritative Expiry Table
//!
//! Deadlines are absolute `Instant`s on the monotonic clock, so wall-clock
//! adjustments never shorten or extend a TTL. A key is expired once
//! `now >= deadline`.
//!
//! [`ExpiryTable`] is the flat key -> deadline map each shard owns. It is
//! the source of truth for every TTL answer, and its full scan
//! ([`ExpiryTable::due`]) is the linear-scan sweep strategy. The optional
//! heap index in [`crate::storage::heap`] only accelerates finding due keys.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// TTL reply for a key that does not exist (or has already expired).
pub const TTL_NO_KEY: i64 = -2;

/// TTL reply for a key that exists but carries no expiry.
pub const TTL_NO_TTL: i64 = -1;

/// Returns `now + ms`, clamping negative offsets to zero.
///
/// `None` means the deadline does not fit on the monotonic clock.
pub fn deadline_after_ms(now: Instant, ms: i64) -> Option<Instant> {
    let ms = u64::try_from(ms).unwrap_or(0);
    now.checked_add(Duration::from_millis(ms))
}

/// Returns `now + secs` seconds, clamping negative offsets to zero.
///
/// `None` when the offset does not fit in milliseconds either.
pub fn deadline_after_secs(now: Instant, secs: i64) -> Option<Instant> {
    deadline_after_ms(now, secs.max(0).checked_mul(1000)?)
}

#[inline]
pub fn is_expired(deadline: Instant, now: Instant) -> bool {
    now >= deadline
}

/// Milliseconds left until `deadline`, rounded up. Zero once it has passed.
pub fn remaining_ms(deadline: Instant, now: Instant) -> i64 {
    let left = deadline.saturating_duration_since(now);
    let ms = left.as_nanos().div_ceil(1_000_000);
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// Converts a millisecond remainder into whole seconds, rounded up.
pub fn ms_to_secs_ceil(ms: i64) -> i64 {
    if ms <= 0 {
        return ms;
    }
    ms / 1000 + i64::from(ms % 1000 != 0)
}

/// How a shard finds keys that are due for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryMode {
    /// Scan every tracked deadline on each sweep.
    #[default]
    Linear,
    /// Keep a generation-tagged min-heap alongside the table for
    /// logarithmic sweeps and precise wake-ups.
    Heap,
}

impl FromStr for ExpiryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(ExpiryMode::Linear),
            "heap" => Ok(ExpiryMode::Heap),
            other => Err(format!(
                "unknown expiry index '{}', expected 'linear' or 'heap'",
                other
            )),
        }
    }
}

impl fmt::Display for ExpiryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryMode::Linear => write!(f, "linear"),
            ExpiryMode::Heap => write!(f, "heap"),
        }
    }
}

/// Flat key -> deadline map.
#[derive(Debug, Default)]
pub struct ExpiryTable {
    deadlines: HashMap<Bytes, Instant>,
}

impl ExpiryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces the deadline for `key`.
    pub fn set(&mut self, key: Bytes, at: Instant) {
        self.deadlines.insert(key, at);
    }

    /// Removes the deadline for `key`, returning whether one existed.
    pub fn clear(&mut self, key: &[u8]) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn get(&self, key: &[u8]) -> Option<Instant> {
        self.deadlines.get(key).copied()
    }

    /// Whether `key` has a deadline that has passed at `now`.
    #[inline]
    pub fn is_expired(&self, key: &[u8], now: Instant) -> bool {
        self.get(key).is_some_and(|at| is_expired(at, now))
    }

    /// Every key whose deadline is at or before `now`. O(n).
    pub fn due(&self, now: Instant) -> Vec<Bytes> {
        self.deadlines
            .iter()
            .filter(|(_, &at)| is_expired(at, now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Earliest tracked deadline. O(n).
    pub fn next_due(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_clamps_negative() {
        let now = Instant::now();
        assert_eq!(deadline_after_ms(now, -50), Some(now));
        assert_eq!(deadline_after_secs(now, -1), Some(now));
        assert_eq!(
            deadline_after_secs(now, 2),
            Some(now + Duration::from_secs(2))
        );
    }

    #[test]
    fn test_deadline_overflow_is_none() {
        let now = Instant::now();
        assert_eq!(deadline_after_secs(now, i64::MAX), None);
        assert_eq!(deadline_after_secs(now, i64::MAX / 1000 + 1), None);
        assert!(deadline_after_secs(now, -i64::MAX).is_some());
    }

    #[test]
    fn test_remaining_rounds_up() {
        let now = Instant::now();
        let at = now + Duration::from_micros(1500);
        assert_eq!(remaining_ms(at, now), 2);
        assert_eq!(remaining_ms(now + Duration::from_millis(3), now), 3);
        assert_eq!(remaining_ms(now, now + Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_ms_to_secs_ceil() {
        assert_eq!(ms_to_secs_ceil(1), 1);
        assert_eq!(ms_to_secs_ceil(1000), 1);
        assert_eq!(ms_to_secs_ceil(1001), 2);
        assert_eq!(ms_to_secs_ceil(0), 0);
        assert_eq!(ms_to_secs_ceil(TTL_NO_KEY), TTL_NO_KEY);
    }

    #[test]
    fn test_expiry_mode_parse() {
        assert_eq!("linear".parse::<ExpiryMode>(), Ok(ExpiryMode::Linear));
        assert_eq!("HEAP".parse::<ExpiryMode>(), Ok(ExpiryMode::Heap));
        assert!("wheel".parse::<ExpiryMode>().is_err());
        assert_eq!(ExpiryMode::default(), ExpiryMode::Linear);
        assert_eq!(ExpiryMode::Heap.to_string(), "heap");
    }

    #[test]
    fn test_table_due_and_next() {
        let now = Instant::now();
        let mut table = ExpiryTable::new();
        table.set(Bytes::from("a"), now);
        table.set(Bytes::from("b"), now + Duration::from_secs(10));
        table.set(Bytes::from("c"), now + Duration::from_secs(5));

        assert!(table.is_expired(b"a", now));
        assert!(!table.is_expired(b"b", now));
        assert!(!table.is_expired(b"missing", now));

        assert_eq!(table.due(now), vec![Bytes::from("a")]);
        assert_eq!(table.next_due(), Some(now));

        assert!(table.clear(b"a"));
        assert!(!table.clear(b"a"));
        assert_eq!(table.next_due(), Some(now + Duration::from_secs(5)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_table_set_replaces() {
        let now = Instant::now();
        let mut table = ExpiryTable::new();
        table.set(Bytes::from("k"), now);
        table.set(Bytes::from("k"), now + Duration::from_secs(1));
        assert_eq!(table.len(), 1);
        assert!(table.due(now).is_empty());
    }
}
