//! Clocks and timestamps for token validation
//!
//! Token lifetimes and discovery-cache freshness are both measured in whole
//! seconds since the Unix epoch. Everything that needs "now" asks a [`Clock`],
//! so tests can pin or advance time with a [`TestClock`] instead of sleeping.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unix time
///
/// The number of whole seconds elapsed since 1970-01-01T00:00:00Z. This is
/// the representation used by the `exp`, `nbf`, and `iat` JWT claims.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct UnixTime(pub u64);

impl UnixTime {
    /// The Unix epoch
    pub const EPOCH: UnixTime = UnixTime(0);

    /// Adds a duration, saturating at the maximum representable time
    ///
    /// Sub-second parts of `d` are discarded.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_secs()))
    }

    /// Subtracts a duration, saturating at the epoch
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, d: Duration) -> Self {
        Self(self.0.saturating_sub(d.as_secs()))
    }

    /// The time elapsed from `earlier` to `self`, or zero if `earlier` is later
    #[inline]
    #[must_use]
    pub const fn since(self, earlier: UnixTime) -> Duration {
        Duration::from_secs(self.0.saturating_sub(earlier.0))
    }
}

impl From<SystemTime> for UnixTime {
    /// Converts a system time, clamping times before the epoch to the epoch
    #[inline]
    fn from(t: SystemTime) -> Self {
        let secs = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        UnixTime(secs)
    }
}

impl fmt::Display for UnixTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl Serialize for UnixTime {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl<'de> Deserialize<'de> for UnixTime {
    /// Accepts integer or fractional seconds; fractions are floored
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(UnixTimeVisitor)
    }
}

#[cfg(feature = "serde")]
struct UnixTimeVisitor;

#[cfg(feature = "serde")]
impl serde::de::Visitor<'_> for UnixTimeVisitor {
    type Value = UnixTime;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative number of seconds since the Unix epoch")
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(UnixTime(v))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(UnixTime)
            .map_err(|_| E::invalid_value(serde::de::Unexpected::Signed(v), &self))
    }

    fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if !v.is_finite() || v < 0.0 {
            return Err(E::invalid_value(serde::de::Unexpected::Float(v), &self));
        }

        // Saturates above u64::MAX
        Ok(UnixTime(v.floor() as u64))
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock: fmt::Debug + Send + Sync {
    /// Gets the current time according to this clock
    fn now(&self) -> UnixTime;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    #[inline]
    fn now(&self) -> UnixTime {
        C::now(self)
    }
}

impl<C: Clock + ?Sized> Clock for &'_ C {
    #[inline]
    fn now(&self) -> UnixTime {
        C::now(self)
    }
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime::from(SystemTime::now())
    }
}

/// A manually driven clock
///
/// Clones share the same underlying time, so a test can hand one clone to
/// the code under test and move time forward through another.
#[derive(Clone, Debug, Default)]
pub struct TestClock {
    secs: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a new test clock fixed at `time`
    #[inline]
    #[must_use]
    pub fn new(time: UnixTime) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(time.0)),
        }
    }

    /// Sets the current time
    pub fn set(&self, time: UnixTime) {
        self.secs.store(time.0, Ordering::SeqCst);
    }

    /// Moves the clock forward by `d`
    pub fn advance(&self, d: Duration) {
        self.secs.fetch_add(d.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime(self.secs.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_clones_share_time() {
        let clock = TestClock::new(UnixTime(100));
        let observer = clock.clone();

        clock.advance(Duration::from_secs(30));
        assert_eq!(observer.now(), UnixTime(130));

        observer.set(UnixTime(5));
        assert_eq!(clock.now(), UnixTime(5));
    }

    #[test]
    fn saturating_arithmetic() {
        assert_eq!(
            UnixTime(10).saturating_sub(Duration::from_secs(20)),
            UnixTime::EPOCH
        );
        assert_eq!(
            UnixTime(u64::MAX).saturating_add(Duration::from_secs(1)),
            UnixTime(u64::MAX)
        );
        assert_eq!(UnixTime(50).since(UnixTime(20)), Duration::from_secs(30));
        assert_eq!(UnixTime(20).since(UnixTime(50)), Duration::ZERO);
    }

    #[test]
    fn pre_epoch_system_time_clamps() {
        let before = SystemTime::UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(UnixTime::from(before), UnixTime::EPOCH);
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(System.now() > UnixTime(1_577_836_800));
    }

    #[test]
    #[cfg(feature = "serde")]
    fn serializes_as_bare_seconds() {
        let t: UnixTime = serde_json::from_str("1700000000").unwrap();
        assert_eq!(t, UnixTime(1_700_000_000));
        assert_eq!(serde_json::to_string(&t).unwrap(), "1700000000");
    }

    #[test]
    #[cfg(feature = "serde")]
    fn fractional_seconds_are_floored() {
        let t: UnixTime = serde_json::from_str("1700000000.75").unwrap();
        assert_eq!(t, UnixTime(1_700_000_000));

        let t: UnixTime = serde_json::from_str("1.7e9").unwrap();
        assert_eq!(t, UnixTime(1_700_000_000));
    }

    #[test]
    #[cfg(feature = "serde")]
    fn negative_seconds_are_rejected() {
        assert!(serde_json::from_str::<UnixTime>("-1").is_err());
        assert!(serde_json::from_str::<UnixTime>("-0.5").is_err());
        assert!(serde_json::from_str::<UnixTime>("\"1700000000\"").is_err());
    }
}
