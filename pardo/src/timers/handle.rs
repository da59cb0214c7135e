//! The timer-setting surface presented to user code.
//!
//! A [`Timer`] is a transient handle minted by the process context for one
//! declared timer slot in the current key and window. Setting it validates
//! everything eagerly — fire bound by the window's garbage-collection time,
//! output hold bound by the current hold and allowed skew — and then buffers
//! a [`TimerRecord`] in the bundle tracker. Nothing reaches the runner until
//! the bundle finishes.

use std::hash::Hash;

use crate::error::Error;
use crate::time::{Duration, TimeDomain, Timestamp};
use crate::timers::{TimerBundleTracker, TimerRecord};
use crate::window::{PaneInfo, Window};

/// A handle for setting or clearing one timer slot.
///
/// Builder methods refine the pending set; [`Timer::set`],
/// [`Timer::set_relative`], and [`Timer::clear`] consume the handle.
pub struct Timer<'a, K, W: Window> {
    buffer: &'a mut TimerBundleTracker<K, W>,
    family_or_id: String,
    dynamic_tag: String,
    key: K,
    window: W,
    domain: TimeDomain,
    fire_base: Timestamp,
    hold_base: Timestamp,
    pane: PaneInfo,
    gc_time: Timestamp,
    allowed_skew: Duration,
    period: Duration,
    offset: Duration,
    output_timestamp: Option<Timestamp>,
    no_output: bool,
}

impl<'a, K: Clone + Eq + Hash, W: Window> Timer<'a, K, W> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        buffer: &'a mut TimerBundleTracker<K, W>,
        family_or_id: String,
        dynamic_tag: String,
        key: K,
        window: W,
        domain: TimeDomain,
        fire_base: Timestamp,
        hold_base: Timestamp,
        pane: PaneInfo,
        gc_time: Timestamp,
        allowed_skew: Duration,
    ) -> Self {
        Timer {
            buffer,
            family_or_id,
            dynamic_tag,
            key,
            window,
            domain,
            fire_base,
            hold_base,
            pane,
            gc_time,
            allowed_skew,
            period: Duration::ZERO,
            offset: Duration::ZERO,
            output_timestamp: None,
            no_output: false,
        }
    }

    /// Aligns relative targets to the next boundary of `period`.
    pub fn align(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Offsets relative targets by `offset` from the firing base.
    pub fn offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    /// Overrides the output watermark hold of the pending set.
    pub fn with_output_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.output_timestamp = Some(timestamp);
        self.no_output = false;
        self
    }

    /// Disables the output watermark hold of the pending set.
    pub fn with_no_output_timestamp(mut self) -> Self {
        self.no_output = true;
        self
    }

    /// Sets the timer to fire at the given absolute instant.
    pub fn set(self, fire_timestamp: Timestamp) -> Result<(), Error> {
        self.commit(fire_timestamp)
    }

    /// Sets the timer relative to the current firing base, honoring any
    /// configured offset and period alignment.
    pub fn set_relative(self) -> Result<(), Error> {
        let mut target = self.fire_base.saturating_add(self.offset);
        let period = self.period.millis();
        if period > 0 {
            let behind = target.millis().rem_euclid(period);
            if behind != 0 {
                target = target.saturating_add(Duration::from_millis(period - behind));
            }
        }
        self.commit(target)
    }

    /// Clears the timer slot, buffering a tombstone record.
    pub fn clear(self) -> Result<(), Error> {
        self.buffer.record_clear(
            self.key,
            self.window,
            &self.family_or_id,
            &self.dynamic_tag,
            self.domain,
        );
        Ok(())
    }

    fn commit(self, fire_timestamp: Timestamp) -> Result<(), Error> {
        if self.domain == TimeDomain::EventTime && fire_timestamp > self.gc_time {
            return Err(Error::TimestampViolation(format!(
                "cannot set event-time timer `{}` to fire at {:?}: past the window's \
                 garbage-collection time {:?}",
                self.family_or_id, fire_timestamp, self.gc_time,
            )));
        }
        let hold = self.resolve_hold(fire_timestamp)?;
        self.buffer.record_set(TimerRecord {
            key: self.key,
            family_or_id: self.family_or_id,
            dynamic_tag: self.dynamic_tag,
            windows: std::iter::once(self.window).collect(),
            fire_timestamp,
            hold_timestamp: hold,
            pane: self.pane,
            domain: self.domain,
            cleared: false,
        });
        Ok(())
    }

    fn resolve_hold(&self, fire_timestamp: Timestamp) -> Result<Timestamp, Error> {
        if self.no_output {
            return Ok(Timestamp::NO_HOLD);
        }
        let target = self.output_timestamp.unwrap_or(match self.domain {
            TimeDomain::EventTime => fire_timestamp,
            TimeDomain::ProcessingTime => self.hold_base,
        });
        let lower = self.hold_base.saturating_sub(self.allowed_skew);
        if target < lower {
            return Err(Error::TimestampViolation(format!(
                "cannot set timer `{}` with output timestamp {:?}: more than the allowed skew \
                 {:?} before the current hold {:?}",
                self.family_or_id, target, self.allowed_skew, self.hold_base,
            )));
        }
        let upper = match self.domain {
            TimeDomain::EventTime => fire_timestamp,
            TimeDomain::ProcessingTime => self.gc_time,
        };
        if target > upper {
            return Err(Error::TimestampViolation(format!(
                "cannot set timer `{}` with output timestamp {:?}: later than {:?}",
                self.family_or_id, target, upper,
            )));
        }
        Ok(target)
    }
}

/// A handle minting per-tag [`Timer`]s within one declared timer family.
pub struct TimerFamily<'a, K, W: Window> {
    buffer: &'a mut TimerBundleTracker<K, W>,
    family_id: String,
    key: K,
    window: W,
    domain: TimeDomain,
    fire_base: Timestamp,
    hold_base: Timestamp,
    pane: PaneInfo,
    gc_time: Timestamp,
    allowed_skew: Duration,
}

impl<'a, K: Clone + Eq + Hash, W: Window> TimerFamily<'a, K, W> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        buffer: &'a mut TimerBundleTracker<K, W>,
        family_id: String,
        key: K,
        window: W,
        domain: TimeDomain,
        fire_base: Timestamp,
        hold_base: Timestamp,
        pane: PaneInfo,
        gc_time: Timestamp,
        allowed_skew: Duration,
    ) -> Self {
        TimerFamily {
            buffer,
            family_id,
            key,
            window,
            domain,
            fire_base,
            hold_base,
            pane,
            gc_time,
            allowed_skew,
        }
    }

    /// A timer handle for the given dynamic tag.
    pub fn timer(&mut self, dynamic_tag: &str) -> Timer<'_, K, W> {
        Timer::new(
            &mut *self.buffer,
            self.family_id.clone(),
            dynamic_tag.to_owned(),
            self.key.clone(),
            self.window.clone(),
            self.domain,
            self.fire_base,
            self.hold_base,
            self.pane,
            self.gc_time,
            self.allowed_skew,
        )
    }
}
