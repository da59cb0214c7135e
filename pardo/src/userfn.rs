//! The seam between the runtime and user transform code.
//!
//! A user transform implements [`TransformFn`]: a set of lifecycle hooks the
//! runner invokes over the lifetime of a bundle, plus factory hooks for the
//! splittable machinery. The hooks all receive a [`ProcessContext`], whose
//! capabilities depend on the phase being executed; they return `Result` so
//! that `?` composes with whatever error type the user's code produces.
//!
//! The static shape of a transform — whether it observes windows, whether its
//! elements are keyed, which timer families it declares — lives in the
//! [`FnDescriptor`] handed to the runner at construction, not in the trait.

use std::collections::HashMap;
use std::hash::Hash;

use crate::context::ProcessContext;
use crate::error::UserError;
use crate::progress::Progress;
use crate::time::{Duration, TimeDomain, Timestamp};
use crate::window::Window;

/// Well-known transform payload identifiers.
pub mod urns {
    /// A plain element-at-a-time transform.
    pub const PAR_DO: &str = "transform:pardo:v1";
    /// A splittable transform consuming sized element-and-restriction pairs.
    pub const PROCESS_SIZED_ELEMENTS_AND_RESTRICTIONS: &str =
        "transform:sdf_process_sized_element_and_restrictions:v1";
}

/// How a process-element invocation left its restriction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessContinuation {
    /// The restriction was processed to completion (or failure).
    Stop,
    /// Processing should resume later, after at least `delay`.
    Resume {
        /// The minimum delay before the residual should be retried.
        delay: Duration,
    },
}

impl ProcessContinuation {
    /// Declares the current restriction fully processed.
    pub fn stop() -> Self {
        ProcessContinuation::Stop
    }

    /// Asks the runner to checkpoint and resume as soon as it likes.
    pub fn resume() -> Self {
        ProcessContinuation::Resume { delay: Duration::ZERO }
    }

    /// Attaches a minimum resume delay; a no-op on [`ProcessContinuation::Stop`].
    pub fn with_delay(self, delay: Duration) -> Self {
        match self {
            ProcessContinuation::Stop => ProcessContinuation::Stop,
            ProcessContinuation::Resume { .. } => ProcessContinuation::Resume { delay },
        }
    }
}

/// A user-defined description of a portion of work for one element.
///
/// Restrictions are opaque to the runtime except for a size hint, which is
/// how primary and residual roots are weighed when work is handed back to the
/// runner. The hint need not be exact; it must be non-negative and roughly
/// proportional to the cost of processing the restriction.
pub trait Restriction: Clone + Send + 'static {
    /// A non-negative estimate of how much work this restriction represents.
    fn size(&self) -> f64;
}

/// An interactive cursor over a restriction.
///
/// `try_split` and `progress` may be invoked from the split thread while the
/// processing thread is between `try_claim` calls; the runtime provides the
/// synchronization, so implementations can be plain single-threaded state.
pub trait RestrictionTracker: Send + 'static {
    /// The restriction type this tracker walks.
    type Restriction: Restriction;
    /// Positions claimable within the restriction.
    type Position;

    /// Attempts to claim `position`; returns false when the position is
    /// outside the restriction and processing must stop.
    fn try_claim(&mut self, position: Self::Position) -> bool;

    /// The restriction as currently constrained by claims and splits.
    fn current_restriction(&self) -> Self::Restriction;

    /// Splits off the given fraction of the remaining work.
    ///
    /// Returns the new `(primary, residual)` pair, or `None` when nothing
    /// remains to give away. After a successful split the tracker itself is
    /// bounded to the primary.
    fn try_split(&mut self, fraction_of_remainder: f64) -> Option<(Self::Restriction, Self::Restriction)>;

    /// Fails unless every position of the (possibly split) restriction was
    /// claimed.
    fn check_done(&self) -> Result<(), UserError>;

    /// Work completed and remaining, when the tracker can estimate it.
    fn progress(&self) -> Option<Progress> {
        None
    }
}

/// A user-provided lower bound on the event times of future outputs.
pub trait WatermarkEstimator: Send + 'static {
    /// Serializable snapshot from which the estimator can be rebuilt.
    type State: Clone + Send + 'static;

    /// The current lower bound on future output timestamps.
    fn current_watermark(&self) -> Timestamp;

    /// Captures the estimator's state.
    fn state(&self) -> Self::State;

    /// Reports an output timestamp to the estimator.
    fn observe_timestamp(&mut self, _timestamp: Timestamp) {}

    /// Whether output timestamps should be reported via
    /// [`WatermarkEstimator::observe_timestamp`] before delivery.
    fn observes_timestamps(&self) -> bool {
        false
    }
}

/// The state type of a transform's watermark estimator.
pub type EstimatorState<F> = <<F as TransformFn>::Estimator as WatermarkEstimator>::State;

/// A user-defined element transform.
///
/// Only `process_element` and the two factory hooks are mandatory; every
/// other hook defaults to a no-op. Non-splittable transforms plug the unit
/// implementations [`NoRestriction`], [`NoTracker`], and [`NoEstimator`] into
/// the splittable associated types.
pub trait TransformFn: Sized + 'static {
    /// The main input element type.
    type Element: Clone + Send + 'static;
    /// The output element type, shared by all output tags.
    type Output: Clone + 'static;
    /// The user key of keyed elements; `()` for unkeyed transforms.
    type Key: Clone + Eq + Hash + Send + 'static;
    /// The window type of the main input.
    type Window: Window;
    /// The restriction type of splittable elements.
    type Restriction: Restriction;
    /// The tracker walking [`TransformFn::Restriction`].
    type Tracker: RestrictionTracker<Restriction = Self::Restriction>;
    /// The watermark estimator for splittable processing.
    type Estimator: WatermarkEstimator;

    /// Invoked once per element, or once per element and window for
    /// window-observing and splittable transforms.
    ///
    /// Non-splittable transforms must return [`ProcessContinuation::Stop`].
    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, Self>,
    ) -> Result<ProcessContinuation, UserError>;

    /// Invoked once when a bundle starts, before any element.
    fn start_bundle(&mut self, _ctx: &mut ProcessContext<'_, Self>) -> Result<(), UserError> {
        Ok(())
    }

    /// Invoked once when a bundle finishes, after the last element.
    fn finish_bundle(&mut self, _ctx: &mut ProcessContext<'_, Self>) -> Result<(), UserError> {
        Ok(())
    }

    /// Invoked for each firing of a timer declared by this transform.
    fn on_timer(&mut self, _ctx: &mut ProcessContext<'_, Self>) -> Result<(), UserError> {
        Ok(())
    }

    /// Invoked once per window when a window's garbage-collection time
    /// passes, as a last chance to flush state.
    fn on_window_expiration(&mut self, _ctx: &mut ProcessContext<'_, Self>) -> Result<(), UserError> {
        Ok(())
    }

    /// Invoked exactly once when the runner is discarded.
    fn teardown(&mut self) -> Result<(), UserError> {
        Ok(())
    }

    /// Builds a fresh tracker for one restriction.
    fn new_tracker(&self, restriction: Self::Restriction) -> Self::Tracker;

    /// Rebuilds a watermark estimator from its captured state.
    fn new_estimator(&self, state: EstimatorState<Self>) -> Self::Estimator;

    /// Extracts the user key of an element, for keyed transforms.
    fn key_of(&self, _element: &Self::Element) -> Option<Self::Key> {
        None
    }
}

/// The static shape of a transform, as declared to the runner.
#[derive(Clone, Debug)]
pub struct FnDescriptor {
    /// Which kind of transform payload this is; see [`urns`].
    pub urn: String,
    /// Whether `process_element` is invoked once per window.
    pub observes_window: bool,
    /// Whether elements carry user keys for state and timers.
    pub keyed: bool,
    /// Declared timer families and plain timers, by local name, with their
    /// time domains.
    pub timer_specs: HashMap<String, TimeDomain>,
    /// Whether the transform declares an on-window-expiration hook.
    pub has_on_window_expiration: bool,
    /// How far before the element timestamp outputs may be emitted.
    pub allowed_skew: Duration,
    /// How long windows remain addressable after their end.
    pub allowed_lateness: Duration,
    /// The local name of the main output.
    pub main_output: String,
    /// Local names of additional tagged outputs.
    pub additional_outputs: Vec<String>,
}

impl FnDescriptor {
    /// A descriptor with the given payload identifier and defaults
    /// everywhere else: unkeyed, not window-observing, no timers, a single
    /// main output named `"out"`.
    pub fn for_urn(urn: &str) -> Self {
        FnDescriptor {
            urn: urn.to_owned(),
            observes_window: false,
            keyed: false,
            timer_specs: HashMap::new(),
            has_on_window_expiration: false,
            allowed_skew: Duration::ZERO,
            allowed_lateness: Duration::ZERO,
            main_output: "out".to_owned(),
            additional_outputs: Vec::new(),
        }
    }
}

/// The restriction of a non-splittable transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoRestriction;

impl Restriction for NoRestriction {
    fn size(&self) -> f64 {
        0.0
    }
}

/// The tracker of a non-splittable transform. Claims nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTracker;

impl RestrictionTracker for NoTracker {
    type Restriction = NoRestriction;
    type Position = ();

    fn try_claim(&mut self, _position: ()) -> bool {
        false
    }

    fn current_restriction(&self) -> NoRestriction {
        NoRestriction
    }

    fn try_split(&mut self, _fraction_of_remainder: f64) -> Option<(NoRestriction, NoRestriction)> {
        None
    }

    fn check_done(&self) -> Result<(), UserError> {
        Ok(())
    }
}

/// The watermark estimator of a non-splittable transform.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEstimator;

impl WatermarkEstimator for NoEstimator {
    type State = ();

    fn current_watermark(&self) -> Timestamp {
        Timestamp::MIN
    }

    fn state(&self) {}
}
