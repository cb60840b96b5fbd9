//! Statistics primitives for the TRDP simulator runtime.
//!
//! [`Counter`] holds publish/receive counts and [`Stamp`] the time of the
//! last event. Both are lock-free and serialize with serde so status
//! snapshots can be emitted as JSON.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, SubsecRound, Utc};

/// A monotonically increasing counter backed by [`AtomicU64`].
///
/// Only [`Counter::reset`] moves it backwards, which callers use when a new
/// run starts. All operations use [`Ordering::Relaxed`].
pub struct Counter(AtomicU64);

impl Counter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increment by one, returning the new value.
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Read the current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Overwrite the value.
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Back to zero.
    pub fn reset(&self) {
        self.set(0);
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

impl serde::Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Counter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u64::deserialize(deserializer)?;
        let counter = Self::new();
        counter.set(value);
        Ok(counter)
    }
}

const EMPTY: i64 = i64::MIN;

/// Wall-clock time of the most recent event, or nothing yet.
///
/// Stored as microseconds since the Unix epoch in an [`AtomicI64`].
pub struct Stamp(AtomicI64);

impl Stamp {
    /// An empty stamp.
    pub fn new() -> Self {
        Self(AtomicI64::new(EMPTY))
    }

    pub fn record(&self, at: DateTime<Utc>) {
        self.0.store(at.timestamp_micros(), Ordering::Relaxed);
    }

    /// Record the current time (truncated to microseconds) and return it.
    pub fn record_now(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        self.record(now);
        now
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        match self.0.load(Ordering::Relaxed) {
            EMPTY => None,
            micros => DateTime::from_timestamp_micros(micros),
        }
    }

    pub fn clear(&self) {
        self.0.store(EMPTY, Ordering::Relaxed);
    }
}

impl Default for Stamp {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Stamp").field(&self.get()).finish()
    }
}

impl serde::Serialize for Stamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn counter_operations() {
        let c = Counter::new();
        assert_eq!(c.get(), 0);
        assert_eq!(c.inc(), 1);
        c.set(10);
        assert_eq!(c.inc(), 11);
        c.reset();
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn counter_serde() {
        let c = Counter::new();
        c.set(99);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "99");
        let c2: Counter = serde_json::from_str(&json).unwrap();
        assert_eq!(c2.get(), 99);
    }

    #[test]
    fn stamp_starts_empty() {
        let s = Stamp::default();
        assert!(s.get().is_none());
        assert_eq!(serde_json::to_string(&s).unwrap(), "null");
    }

    #[test]
    fn stamp_keeps_microseconds() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
            + chrono::Duration::microseconds(250);
        let s = Stamp::new();
        s.record(at);
        assert_eq!(s.get(), Some(at));
        s.clear();
        assert!(s.get().is_none());
    }

    #[test]
    fn record_now_is_observable() {
        let s = Stamp::new();
        let now = s.record_now();
        assert_eq!(s.get(), Some(now));
    }
}
