//! Event-time and processing-time primitives.
//!
//! Everything in this crate measures time in milliseconds. [`Timestamp`] is an
//! instant on one of two clocks, distinguished by [`TimeDomain`]: event time,
//! which is assigned by the data itself and bounded below by watermarks, and
//! processing time, which is the wall clock of the worker. [`Duration`] is a
//! signed span between two instants on the same clock.
//!
//! The representable range is deliberately narrower than `i64` milliseconds:
//! [`Timestamp::MAX`] leaves headroom above itself so that the distinguished
//! no-hold sentinel [`Timestamp::NO_HOLD`], one millisecond past the maximum,
//! remains representable and strictly greater than every valid timestamp.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which clock a timer or watermark refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeDomain {
    /// Time assigned by the data, tracked by watermarks.
    EventTime,
    /// The wall clock of the worker processing the data.
    ProcessingTime,
}

/// A millisecond instant in event or processing time.
///
/// Ordered, hashable, and cheap to copy. Arithmetic saturates at
/// [`Timestamp::MIN`] and [`Timestamp::MAX`] rather than wrapping, so
/// subtracting a large skew from an early timestamp clamps to the minimum
/// instead of underflowing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The least representable instant.
    pub const MIN: Timestamp = Timestamp(-9_223_372_036_854_775);
    /// The greatest valid instant.
    pub const MAX: Timestamp = Timestamp(9_223_372_036_854_775);
    /// The sentinel for "this value holds no output watermark".
    ///
    /// One millisecond past [`Timestamp::MAX`]; compares greater than every
    /// valid timestamp and is never produced by saturating arithmetic.
    pub const NO_HOLD: Timestamp = Timestamp(9_223_372_036_854_776);

    /// Builds a timestamp from milliseconds since the epoch.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    /// The instant as milliseconds since the epoch.
    #[inline]
    pub const fn millis(self) -> i64 {
        self.0
    }

    /// Adds a duration, saturating at [`Timestamp::MAX`].
    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let sum = self.0.saturating_add(duration.millis());
        Timestamp(sum.clamp(Self::MIN.0, Self::MAX.0))
    }

    /// Subtracts a duration, saturating at [`Timestamp::MIN`].
    #[inline]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        let diff = self.0.saturating_sub(duration.millis());
        Timestamp(diff.clamp(Self::MIN.0, Self::MAX.0))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if *self == Timestamp::MIN {
            write!(f, "Timestamp::MIN")
        } else if *self == Timestamp::MAX {
            write!(f, "Timestamp::MAX")
        } else if *self == Timestamp::NO_HOLD {
            write!(f, "Timestamp::NO_HOLD")
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}

/// A signed millisecond span.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Duration(i64);

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl Duration {
    /// The empty span.
    pub const ZERO: Duration = Duration(0);

    /// Builds a duration from milliseconds.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Duration(millis)
    }

    /// The span as milliseconds.
    #[inline]
    pub const fn millis(self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_arithmetic_clamps() {
        let early = Timestamp::from_millis(Timestamp::MIN.millis() + 5);
        assert_eq!(early.saturating_sub(Duration::from_millis(100)), Timestamp::MIN);

        let late = Timestamp::from_millis(Timestamp::MAX.millis() - 5);
        assert_eq!(late.saturating_add(Duration::from_millis(100)), Timestamp::MAX);

        // The sentinel is out of reach of saturating arithmetic.
        assert_eq!(Timestamp::MAX.saturating_add(Duration::from_millis(1)), Timestamp::MAX);
        assert!(Timestamp::NO_HOLD > Timestamp::MAX);
    }

    #[test]
    fn ordering_is_by_millis() {
        assert!(Timestamp::from_millis(-3) < Timestamp::from_millis(0));
        assert!(Timestamp::MIN < Timestamp::from_millis(0));
        assert!(Timestamp::from_millis(0) < Timestamp::MAX);
    }
}
