//! Windows, panes, and windowed values.
//!
//! A *window* is a subdivision of an unbounded collection along event time.
//! Every window has a well-known maximum timestamp, from which its
//! garbage-collection deadline is derived by adding the transform's allowed
//! lateness. An element travels together with its event timestamp, the set of
//! windows it belongs to, and pane metadata describing which triggering firing
//! produced it; the combination is a [`WindowedValue`].

use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::Error;
use crate::time::{Duration, Timestamp};

/// A bounded region of event time.
///
/// Implementations must be cheap to clone and hash; the runtime stores small
/// sets of them per element and uses them as map keys for state and timers.
pub trait Window: Clone + Eq + Hash + Debug + Send + 'static {
    /// The greatest timestamp that can belong to this window.
    fn max_timestamp(&self) -> Timestamp;
}

/// The garbage-collection deadline of a window.
///
/// No event-time timer may be set past this instant, and when it passes the
/// runner is free to drop the window's state.
pub fn garbage_collection_time<W: Window>(window: &W, allowed_lateness: Duration) -> Timestamp {
    window.max_timestamp().saturating_add(allowed_lateness)
}

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// The single window spanning all of event time.
///
/// Its maximum timestamp sits one day shy of [`Timestamp::MAX`] so that late
/// data and cleanup timers can still be ordered after it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalWindow;

impl Window for GlobalWindow {
    fn max_timestamp(&self) -> Timestamp {
        Timestamp::from_millis(Timestamp::MAX.millis() - MILLIS_PER_DAY)
    }
}

/// A half-open interval `[start, end)` of event time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntervalWindow {
    /// Inclusive lower bound.
    pub start: Timestamp,
    /// Exclusive upper bound.
    pub end: Timestamp,
}

impl IntervalWindow {
    /// Builds the interval `[start, end)`.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "empty interval window [{:?}, {:?})", start, end);
        IntervalWindow { start, end }
    }
}

impl Window for IntervalWindow {
    fn max_timestamp(&self) -> Timestamp {
        self.end.saturating_sub(Duration::from_millis(1))
    }
}

/// When in a window's lifetime a pane was emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timing {
    /// Before the watermark passed the end of the window.
    Early,
    /// The firing at the watermark.
    OnTime,
    /// After the watermark passed the end of the window.
    Late,
    /// The producer did not record a timing.
    Unknown,
}

/// Metadata about which triggering firing produced a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaneInfo {
    /// When this pane fired relative to the watermark.
    pub timing: Timing,
    /// Whether this is the first pane for its window.
    pub is_first: bool,
    /// Whether this is the last pane for its window.
    pub is_last: bool,
    /// Zero-based index of this pane among its window's firings.
    pub index: i64,
    /// Zero-based index among non-speculative firings, or -1 for early panes.
    pub on_time_index: i64,
}

impl PaneInfo {
    /// The sole on-time pane of a window that fires exactly once.
    pub const ON_TIME: PaneInfo = PaneInfo {
        timing: Timing::OnTime,
        is_first: true,
        is_last: true,
        index: 0,
        on_time_index: 0,
    };

    /// A pane whose provenance is not recorded.
    pub const UNKNOWN: PaneInfo = PaneInfo {
        timing: Timing::Unknown,
        is_first: true,
        is_last: true,
        index: 0,
        on_time_index: 0,
    };

    /// Packs the pane into a single byte for the wire.
    ///
    /// Timing occupies the low two bits, the first/last flags the next two.
    /// Pane indices are not carried; decoded panes report index zero.
    pub fn to_byte(self) -> u8 {
        let timing = match self.timing {
            Timing::Early => 0u8,
            Timing::OnTime => 1,
            Timing::Late => 2,
            Timing::Unknown => 3,
        };
        timing | (u8::from(self.is_first) << 2) | (u8::from(self.is_last) << 3)
    }

    /// Reverses [`PaneInfo::to_byte`].
    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        let timing = match byte & 0b11 {
            0 => Timing::Early,
            1 => Timing::OnTime,
            2 => Timing::Late,
            3 => Timing::Unknown,
            _ => unreachable!(),
        };
        if byte & !0b1111 != 0 {
            return Err(Error::Coder(format!("invalid pane byte {byte:#04x}")));
        }
        Ok(PaneInfo {
            timing,
            is_first: byte & 0b100 != 0,
            is_last: byte & 0b1000 != 0,
            index: 0,
            on_time_index: 0,
        })
    }
}

/// An element paired with its timestamp, window set, and pane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowedValue<T, W: Window> {
    /// The element itself.
    pub value: T,
    /// The element's event timestamp.
    pub timestamp: Timestamp,
    /// The windows the element belongs to. Almost always one or two.
    pub windows: SmallVec<[W; 2]>,
    /// Which firing produced the element.
    pub pane: PaneInfo,
}

impl<T, W: Window> WindowedValue<T, W> {
    /// Builds a windowed value from its parts.
    pub fn new<I>(value: T, timestamp: Timestamp, windows: I, pane: PaneInfo) -> Self
    where
        I: IntoIterator<Item = W>,
    {
        WindowedValue {
            value,
            timestamp,
            windows: windows.into_iter().collect(),
            pane,
        }
    }

    /// Re-wraps a new value in this value's timestamp, windows, and pane.
    pub fn with_value<U>(&self, value: U) -> WindowedValue<U, W> {
        WindowedValue {
            value,
            timestamp: self.timestamp,
            windows: self.windows.clone(),
            pane: self.pane,
        }
    }

    /// Iterates over single-window copies of this value, one per window.
    pub fn explode(&self) -> impl Iterator<Item = WindowedValue<T, W>> + '_
    where
        T: Clone,
    {
        self.windows.iter().map(move |window| WindowedValue {
            value: self.value.clone(),
            timestamp: self.timestamp,
            windows: std::iter::once(window.clone()).collect(),
            pane: self.pane,
        })
    }
}

impl<T> WindowedValue<T, GlobalWindow> {
    /// Wraps a value in the global window at the minimum timestamp.
    pub fn in_global_window(value: T) -> Self {
        WindowedValue::new(value, Timestamp::MIN, [GlobalWindow], PaneInfo::ON_TIME)
    }
}
