//! The context object handed to user lifecycle hooks.
//!
//! Every hook receives the same [`ProcessContext`] type; what differs is the
//! [`Phase`] it was minted for. Each phase selects which operations are
//! supported — an element is only present while processing one, a fire
//! timestamp only while handling a timer, plain outputs are unavailable once
//! the bundle is finishing — and unsupported operations fail fast with a
//! message naming the phase. This keeps one flat type where a class hierarchy
//! would otherwise grow a layer per phase.

use std::collections::HashMap;

use crate::error::Error;
use crate::host::{
    BagState, BundleFinalizer, Consumers, FinalizeCallback, SideInputAccessor, StateAccessor,
};
use crate::observe::{SharedEstimator, TrackerHandle};
use crate::time::{Duration, TimeDomain, Timestamp};
use crate::timers::{is_timer_family, Timer, TimerBundleTracker, TimerFamily};
use crate::userfn::TransformFn;
use crate::window::{garbage_collection_time, PaneInfo, WindowedValue};

/// Which lifecycle hook a context was minted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// The start-bundle hook; no element is in scope.
    StartBundle,
    /// The process-element hook.
    Element,
    /// The on-timer hook.
    Timer,
    /// The on-window-expiration hook.
    WindowExpiration,
    /// The finish-bundle hook; outputs must name an explicit window.
    FinishBundle,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Element,
    Timestamp,
    FireTimestamp,
    Window,
    Pane,
    Key,
    Output,
    OutputWindowed,
    State,
    SideInput,
    Timers,
    Tracker,
    Finalize,
}

fn supports(phase: Phase, op: Op) -> bool {
    match phase {
        Phase::StartBundle => matches!(op, Op::Finalize),
        Phase::Element => !matches!(op, Op::OutputWindowed | Op::FireTimestamp),
        Phase::Timer => {
            !matches!(op, Op::Element | Op::OutputWindowed | Op::Tracker)
        }
        Phase::WindowExpiration => matches!(
            op,
            Op::Timestamp | Op::Window | Op::Pane | Op::Key | Op::Output | Op::State | Op::Finalize
        ),
        Phase::FinishBundle => matches!(op, Op::OutputWindowed | Op::Finalize),
    }
}

/// The timer firing a [`Phase::Timer`] context was minted for.
#[derive(Clone, Debug)]
pub(crate) struct Firing {
    pub(crate) family_or_id: String,
    pub(crate) dynamic_tag: String,
    pub(crate) fire_timestamp: Timestamp,
}

/// The capabilities available to one user hook invocation.
pub struct ProcessContext<'a, F: TransformFn> {
    pub(crate) phase: Phase,
    pub(crate) value: Option<&'a F::Element>,
    pub(crate) timestamp: Timestamp,
    pub(crate) firing: Option<Firing>,
    pub(crate) windows: &'a [F::Window],
    pub(crate) observes_window: bool,
    pub(crate) pane: PaneInfo,
    pub(crate) key: Option<F::Key>,
    pub(crate) allowed_skew: Duration,
    pub(crate) allowed_lateness: Duration,
    pub(crate) main_output: &'a str,
    pub(crate) timer_specs: &'a HashMap<String, TimeDomain>,
    pub(crate) consumers: &'a mut Consumers<F::Output, F::Window>,
    pub(crate) state: &'a mut dyn StateAccessor<F::Key, F::Window>,
    pub(crate) side_inputs: &'a mut dyn SideInputAccessor<F::Window>,
    pub(crate) timers: Option<&'a mut TimerBundleTracker<F::Key, F::Window>>,
    pub(crate) finalizer: &'a mut dyn BundleFinalizer,
    pub(crate) tracker: Option<TrackerHandle<F::Tracker>>,
    pub(crate) estimator: Option<SharedEstimator<F::Estimator>>,
}

impl<'a, F: TransformFn> ProcessContext<'a, F> {
    /// The phase this context was minted for.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn require(&self, op: Op, what: &str) -> Result<(), Error> {
        if supports(self.phase, op) {
            Ok(())
        } else {
            Err(Error::Unsupported(format!(
                "{what} is not available in the {:?} phase",
                self.phase
            )))
        }
    }

    /// The element being processed.
    pub fn element(&self) -> Result<&F::Element, Error> {
        self.require(Op::Element, "the current element")?;
        self.value
            .ok_or_else(|| Error::Unsupported("no element is in scope".to_owned()))
    }

    /// The element timestamp, or the firing timer's hold timestamp.
    pub fn timestamp(&self) -> Result<Timestamp, Error> {
        self.require(Op::Timestamp, "the current timestamp")?;
        Ok(self.timestamp)
    }

    /// The fire timestamp of the timer being handled.
    pub fn fire_timestamp(&self) -> Result<Timestamp, Error> {
        self.require(Op::FireTimestamp, "the fire timestamp")?;
        self.firing
            .as_ref()
            .map(|firing| firing.fire_timestamp)
            .ok_or_else(|| Error::Unsupported("no timer firing is in scope".to_owned()))
    }

    /// The family-or-id and dynamic tag of the timer being handled.
    pub fn firing_timer(&self) -> Result<(&str, &str), Error> {
        self.require(Op::FireTimestamp, "the firing timer")?;
        self.firing
            .as_ref()
            .map(|firing| (firing.family_or_id.as_str(), firing.dynamic_tag.as_str()))
            .ok_or_else(|| Error::Unsupported("no timer firing is in scope".to_owned()))
    }

    /// The window being processed.
    pub fn window(&self) -> Result<&F::Window, Error> {
        self.require(Op::Window, "the current window")?;
        if !self.observes_window {
            return Err(Error::Unsupported(
                "window access requires a window-observing transform".to_owned(),
            ));
        }
        self.windows
            .first()
            .ok_or_else(|| Error::Unsupported("no window is in scope".to_owned()))
    }

    /// The pane of the element or firing being processed.
    pub fn pane(&self) -> Result<PaneInfo, Error> {
        self.require(Op::Pane, "the current pane")?;
        Ok(self.pane)
    }

    /// The user key of the element or firing being processed.
    pub fn key(&self) -> Result<&F::Key, Error> {
        self.require(Op::Key, "the current key")?;
        self.key
            .as_ref()
            .ok_or_else(|| Error::Unsupported("the current element carries no key".to_owned()))
    }

    /// Emits to the main output at the current timestamp.
    pub fn output(&mut self, value: F::Output) -> Result<(), Error> {
        self.require(Op::Output, "emitting output")?;
        self.deliver_main(value, self.timestamp)
    }

    /// Emits to the main output at an explicit timestamp.
    pub fn output_with_timestamp(&mut self, value: F::Output, timestamp: Timestamp) -> Result<(), Error> {
        self.require(Op::Output, "emitting output")?;
        self.validate_output_timestamp(timestamp)?;
        self.deliver_main(value, timestamp)
    }

    /// Emits to a tagged output at the current timestamp.
    pub fn output_tagged(&mut self, tag: &str, value: F::Output) -> Result<(), Error> {
        self.require(Op::Output, "emitting output")?;
        self.deliver(tag, value, self.timestamp)
    }

    /// Emits to a tagged output at an explicit timestamp.
    pub fn output_tagged_with_timestamp(
        &mut self,
        tag: &str,
        value: F::Output,
        timestamp: Timestamp,
    ) -> Result<(), Error> {
        self.require(Op::Output, "emitting output")?;
        self.validate_output_timestamp(timestamp)?;
        self.deliver(tag, value, timestamp)
    }

    /// Emits into an explicit window while finishing the bundle.
    ///
    /// `tag` defaults to the main output when `None`.
    pub fn output_windowed(
        &mut self,
        tag: Option<&str>,
        value: F::Output,
        timestamp: Timestamp,
        window: F::Window,
    ) -> Result<(), Error> {
        self.require(Op::OutputWindowed, "emitting into an explicit window")?;
        if timestamp > Timestamp::MAX {
            return Err(Error::TimestampViolation(format!(
                "cannot output with timestamp {timestamp:?}: later than {:?}",
                Timestamp::MAX
            )));
        }
        let tag = tag.unwrap_or(self.main_output).to_owned();
        self.observe(timestamp);
        self.consumers.send(
            &tag,
            WindowedValue::new(value, timestamp, [window], PaneInfo::UNKNOWN),
        )
    }

    /// The bag for one declared state id under the current key and window.
    pub fn bag_state(&mut self, state_id: &str) -> Result<&mut dyn BagState, Error> {
        self.require(Op::State, "state access")?;
        let window = self.current_window_owned()?;
        let key = self
            .key
            .clone()
            .ok_or_else(|| Error::Unsupported("state access requires a keyed element".to_owned()))?;
        self.state.bag(state_id, &key, &window)
    }

    /// The materialized side input value for `view` in the current window.
    pub fn side_input(&mut self, view: &str) -> Result<Vec<u8>, Error> {
        self.require(Op::SideInput, "side input access")?;
        let window = self.current_window_owned()?;
        self.side_inputs.get(view, &window)
    }

    /// A handle for the plain timer with the given declared id.
    pub fn timer(&mut self, id: &str) -> Result<Timer<'_, F::Key, F::Window>, Error> {
        if is_timer_family(id) {
            return Err(Error::Config(format!(
                "`{id}` declares a timer family; use `timer_family`"
            )));
        }
        let (key, window, domain, gc) = self.timer_scope(id)?;
        let fire_base =
            self.firing.as_ref().map(|firing| firing.fire_timestamp).unwrap_or(self.timestamp);
        let hold_base = self.timestamp;
        let pane = self.pane;
        let skew = self.allowed_skew;
        let buffer = self
            .timers
            .as_deref_mut()
            .ok_or_else(|| Error::Unsupported("timers are not available in this phase".to_owned()))?;
        Ok(Timer::new(
            buffer,
            id.to_owned(),
            String::new(),
            key,
            window,
            domain,
            fire_base,
            hold_base,
            pane,
            gc,
            skew,
        ))
    }

    /// A handle for the timer family with the given declared id.
    pub fn timer_family(&mut self, family_id: &str) -> Result<TimerFamily<'_, F::Key, F::Window>, Error> {
        if !is_timer_family(family_id) {
            return Err(Error::Config(format!(
                "`{family_id}` declares a plain timer; use `timer`"
            )));
        }
        let (key, window, domain, gc) = self.timer_scope(family_id)?;
        let fire_base =
            self.firing.as_ref().map(|firing| firing.fire_timestamp).unwrap_or(self.timestamp);
        let hold_base = self.timestamp;
        let pane = self.pane;
        let skew = self.allowed_skew;
        let buffer = self
            .timers
            .as_deref_mut()
            .ok_or_else(|| Error::Unsupported("timers are not available in this phase".to_owned()))?;
        Ok(TimerFamily::new(
            buffer,
            family_id.to_owned(),
            key,
            window,
            domain,
            fire_base,
            hold_base,
            pane,
            gc,
            skew,
        ))
    }

    /// The restriction tracker of the current splittable element.
    pub fn tracker(&self) -> Result<TrackerHandle<F::Tracker>, Error> {
        self.require(Op::Tracker, "the restriction tracker")?;
        self.tracker.clone().ok_or_else(|| {
            Error::Unsupported("the restriction tracker is only available to splittable transforms".to_owned())
        })
    }

    /// The restriction currently being processed.
    pub fn restriction(&self) -> Result<F::Restriction, Error> {
        Ok(self.tracker()?.current_restriction())
    }

    /// The watermark estimator of the current splittable element.
    pub fn watermark_estimator(&self) -> Result<SharedEstimator<F::Estimator>, Error> {
        self.require(Op::Tracker, "the watermark estimator")?;
        self.estimator.clone().ok_or_else(|| {
            Error::Unsupported("the watermark estimator is only available to splittable transforms".to_owned())
        })
    }

    /// Registers a callback to run once the bundle's outputs are committed.
    pub fn register_finalization(
        &mut self,
        expiry: Timestamp,
        callback: FinalizeCallback,
    ) -> Result<(), Error> {
        self.require(Op::Finalize, "bundle finalization")?;
        self.finalizer.after_bundle_commit(expiry, callback);
        Ok(())
    }

    fn timer_scope(&self, id: &str) -> Result<(F::Key, F::Window, TimeDomain, Timestamp), Error> {
        self.require(Op::Timers, "setting timers")?;
        let domain = *self
            .timer_specs
            .get(id)
            .ok_or_else(|| Error::Config(format!("unknown timer `{id}`")))?;
        let key = self
            .key
            .clone()
            .ok_or_else(|| Error::Unsupported("timers require a keyed element".to_owned()))?;
        let window = self.current_window_owned()?;
        let gc = garbage_collection_time(&window, self.allowed_lateness);
        Ok((key, window, domain, gc))
    }

    fn current_window_owned(&self) -> Result<F::Window, Error> {
        if !self.observes_window {
            return Err(Error::Unsupported(
                "window access requires a window-observing transform".to_owned(),
            ));
        }
        self.windows
            .first()
            .cloned()
            .ok_or_else(|| Error::Unsupported("no window is in scope".to_owned()))
    }

    fn validate_output_timestamp(&self, timestamp: Timestamp) -> Result<(), Error> {
        if timestamp > Timestamp::MAX {
            return Err(Error::TimestampViolation(format!(
                "cannot output with timestamp {timestamp:?}: later than {:?}",
                Timestamp::MAX
            )));
        }
        match self.phase {
            Phase::Element => {
                let lower = self.timestamp.saturating_sub(self.allowed_skew);
                if timestamp < lower {
                    return Err(Error::TimestampViolation(format!(
                        "cannot output with timestamp {timestamp:?}: more than the allowed skew \
                         {:?} before the element timestamp {:?}; outputs must lie in \
                         [{lower:?}, {:?}]",
                        self.allowed_skew,
                        self.timestamp,
                        Timestamp::MAX,
                    )));
                }
            }
            _ => {
                if timestamp < self.timestamp {
                    return Err(Error::TimestampViolation(format!(
                        "cannot output with timestamp {timestamp:?}: earlier than the hold {:?}",
                        self.timestamp
                    )));
                }
            }
        }
        Ok(())
    }

    fn deliver_main(&mut self, value: F::Output, timestamp: Timestamp) -> Result<(), Error> {
        let tag = self.main_output;
        self.deliver(tag, value, timestamp)
    }

    fn deliver(&mut self, tag: &str, value: F::Output, timestamp: Timestamp) -> Result<(), Error> {
        self.observe(timestamp);
        let windowed =
            WindowedValue::new(value, timestamp, self.windows.iter().cloned(), self.pane);
        self.consumers.send(tag, windowed)
    }

    fn observe(&self, timestamp: Timestamp) {
        if let Some(estimator) = &self.estimator {
            if estimator.observes_timestamps() {
                estimator.observe_timestamp(timestamp);
            }
        }
    }
}
