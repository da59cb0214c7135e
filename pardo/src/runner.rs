//! Driving a single user transform over the lifetime of a bundle.
//!
//! A [`TransformRunner`] owns one [`TransformFn`] instance, the buffered
//! timer modifications of the current bundle, and the window cursor of the
//! element being processed. The harness feeds it elements and timer firings
//! on one thread; a [`SplitHandle`] cloned from the runner may concurrently
//! sample progress and request dynamic splits from another.
//!
//! The two threads meet only at the *split lock*, a mutex over the window
//! cursor. The processing thread holds it just long enough to advance the
//! cursor and install fresh per-window machinery — restriction tracker,
//! watermark estimator, the was-ever-claimed flag — and releases it before
//! invoking user code, so a split request never waits on a slow user hook.
//! The split thread holds it while deciding where the split lands and while
//! committing the shrunken stop index, which is how a concurrent split
//! truncates the processing loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::coder::Coder;
use crate::context::{Firing, Phase, ProcessContext};
use crate::error::Error;
use crate::host::{
    BundleFinalizer, Consumers, ProgressSink, SideInputAccessor, SplitListener, StateAccessor,
    TimerSink,
};
use crate::observe::{lock, ClaimObserving, SharedEstimator, TrackerHandle};
use crate::progress::{encode_progress, Progress};
use crate::split::{
    choose_split, DownstreamSplitter, SplitDecision, SplitElement, SplitResultsWithStopIndex,
    WindowedSplitResult,
};
use crate::time::{Duration, TimeDomain, Timestamp};
use crate::timers::{TimerBundleTracker, TimerRecord};
use crate::userfn::{
    urns, EstimatorState, FnDescriptor, ProcessContinuation, Restriction, TransformFn,
};
use crate::window::{PaneInfo, WindowedValue};
use crate::wire::{BundleApplication, DelayedBundleApplication, SplitResult, WireTimestamp};

/// The value of a splittable input: element, restriction, estimator state.
pub type SplitValue<F> = SplitElement<
    <F as TransformFn>::Element,
    <F as TransformFn>::Restriction,
    EstimatorState<F>,
>;

/// A splittable input element: a [`SplitValue`] weighed by a size hint,
/// windowed with the element's timestamp, windows, and pane.
pub type SplitInput<F> = WindowedValue<(SplitValue<F>, f64), <F as TransformFn>::Window>;

/// The host capabilities one runner is wired to.
pub struct Host<F: TransformFn> {
    /// Downstream consumers, one per output tag.
    pub consumers: Consumers<F::Output, F::Window>,
    /// The remote state channel.
    pub state: Box<dyn StateAccessor<F::Key, F::Window>>,
    /// Materialized side inputs.
    pub side_inputs: Box<dyn SideInputAccessor<F::Window>>,
    /// Where the bundle's final timer records go.
    pub timer_sink: Box<dyn TimerSink<F::Key, F::Window>>,
    /// Where self-initiated checkpoints report their roots.
    pub split_listener: Box<dyn SplitListener>,
    /// Registration of end-of-bundle callbacks.
    pub finalizer: Box<dyn BundleFinalizer>,
}

/// Identifiers and coders used when shipping work back to the runner.
pub struct WireConfig<F: TransformFn> {
    /// The id of the transform this runner executes.
    pub transform_id: String,
    /// The local name of the transform's main input.
    pub input_id: String,
    /// The metric short id under which completed work is reported.
    pub completed_short_id: String,
    /// The metric short id under which remaining work is reported.
    pub remaining_short_id: String,
    /// The full input coder (value ⊕ window); required for splittable
    /// transforms, unused otherwise.
    pub input_coder: Option<Box<dyn Coder<SplitInput<F>>>>,
}

impl<F: TransformFn> WireConfig<F> {
    /// A configuration with default metric short ids and no input coder.
    pub fn new(transform_id: impl Into<String>, input_id: impl Into<String>) -> Self {
        WireConfig {
            transform_id: transform_id.into(),
            input_id: input_id.into(),
            completed_short_id: "work_completed".to_owned(),
            remaining_short_id: "work_remaining".to_owned(),
            input_coder: None,
        }
    }

    /// Attaches the full input coder required for splittable processing.
    pub fn with_input_coder(mut self, coder: Box<dyn Coder<SplitInput<F>>>) -> Self {
        self.input_coder = Some(coder);
        self
    }

    /// Overrides the metric short ids used for progress reporting.
    pub fn with_progress_ids(
        mut self,
        completed_short_id: impl Into<String>,
        remaining_short_id: impl Into<String>,
    ) -> Self {
        self.completed_short_id = completed_short_id.into();
        self.remaining_short_id = remaining_short_id.into();
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    Simple,
    WindowObserving,
    Splittable,
}

/// The per-element window cursor shared with the split thread.
///
/// Outside element processing both indices sit at their sentinel values and
/// `live` is false; every transition happens under the split lock.
struct Cursor<F: TransformFn> {
    element: Option<SplitInput<F>>,
    current_index: i64,
    stop_index: i64,
    initial_watermark: Timestamp,
    claimed: Arc<AtomicBool>,
    tracker: Option<TrackerHandle<F::Tracker>>,
    downstream: Option<Box<dyn DownstreamSplitter>>,
    estimator: Option<SharedEstimator<F::Estimator>>,
}

impl<F: TransformFn> Cursor<F> {
    fn new() -> Self {
        Cursor {
            element: None,
            current_index: -1,
            stop_index: 0,
            initial_watermark: Timestamp::MIN,
            claimed: Arc::new(AtomicBool::new(false)),
            tracker: None,
            downstream: None,
            estimator: None,
        }
    }

    fn live(&self) -> bool {
        self.element.is_some() && self.current_index >= 0 && self.current_index < self.stop_index
    }

    fn reset(&mut self) {
        self.element = None;
        self.current_index = -1;
        self.stop_index = 0;
        self.initial_watermark = Timestamp::MIN;
        self.claimed = Arc::new(AtomicBool::new(false));
        self.tracker = None;
        self.downstream = None;
        self.estimator = None;
    }
}

struct Shared<F: TransformFn> {
    cursor: Mutex<Cursor<F>>,
}

struct WireState<F: TransformFn> {
    transform_id: String,
    input_id: String,
    output_ids: Vec<String>,
    completed_short_id: String,
    remaining_short_id: String,
    input_coder: Option<Box<dyn Coder<SplitInput<F>>>>,
}

/// A cloneable, thread-safe view of one runner's progress and split surface.
///
/// Handles may be sent to the bundle control thread and used while the
/// processing thread is inside user code. Between elements both operations
/// observe a dead cursor and return `None`; that is the normal idle answer,
/// never an error.
pub struct SplitHandle<F: TransformFn> {
    shared: Arc<Shared<F>>,
    wire: Arc<WireState<F>>,
}

impl<F: TransformFn> Clone for SplitHandle<F> {
    fn clone(&self) -> Self {
        SplitHandle { shared: Arc::clone(&self.shared), wire: Arc::clone(&self.wire) }
    }
}

impl<F: TransformFn> SplitHandle<F> {
    /// Work completed and remaining for the current element, scaled across
    /// its windows, when the tracker can estimate it.
    pub fn get_progress(&self) -> Option<Progress> {
        let cursor = lock(&self.shared.cursor);
        if !cursor.live() {
            return None;
        }
        let element_progress = if let Some(tracker) = &cursor.tracker {
            tracker.progress()?
        } else if let Some(downstream) = &cursor.downstream {
            downstream.progress()
        } else {
            return None;
        };
        Some(element_progress.scale_to_windows(
            cursor.current_index as usize,
            cursor.stop_index as usize,
        ))
    }

    /// Encodes the current progress into `sink` under the configured metric
    /// short ids. Does nothing when no element is live.
    pub fn report_progress(&self, sink: &mut dyn ProgressSink) {
        if let Some(progress) = self.get_progress() {
            sink.update(&self.wire.completed_short_id, encode_progress(progress.completed()));
            sink.update(&self.wire.remaining_short_id, encode_progress(progress.remaining()));
        }
    }

    /// Attempts a dynamic split at the given fraction of remaining work.
    ///
    /// Returns `None` when no element is live, when a checkpoint request
    /// (fraction zero) arrives before the tracker has claimed anything, or
    /// when nothing could be split. On success the stop index is committed
    /// and the processing loop will not enter the returned residual windows.
    pub fn try_split(&self, fraction_of_remainder: f64) -> Option<SplitResult> {
        self.split_with(fraction_of_remainder, None, fraction_of_remainder == 0.0)
    }

    pub(crate) fn split_with(
        &self,
        fraction_of_remainder: f64,
        resume_delay: Option<Duration>,
        require_claim: bool,
    ) -> Option<SplitResult> {
        let mut cursor = lock(&self.shared.cursor);
        if !cursor.live() {
            return None;
        }
        let current = cursor.current_index as usize;
        let stop = cursor.stop_index as usize;
        // Capture the watermark and estimator state before slicing windows;
        // the residual carries exactly this pair.
        let captured = cursor.estimator.as_ref().map(|estimator| estimator.watermark_and_state());

        if let Some(tracker) = cursor.tracker.clone() {
            if require_claim && !cursor.claimed.load(Ordering::Acquire) {
                debug!("declining checkpoint: nothing claimed for the current restriction");
                return None;
            }
            let element_progress =
                tracker.progress().unwrap_or_else(|| Progress::new(0.0, 1.0));
            let decision = choose_split(element_progress, fraction_of_remainder, current, stop);
            let (element_split, new_stop) = match decision {
                SplitDecision::WindowBoundary { new_stop_index } => (None, new_stop_index),
                SplitDecision::ElementSplit { fraction, new_stop_index } => {
                    match tracker.try_split(fraction) {
                        Some(pair) => (Some(pair), new_stop_index),
                        // Nothing to give away in this window; hand back
                        // whole trailing windows if any exist.
                        None if current + 1 < stop => (None, current + 1),
                        None => return None,
                    }
                }
            };
            // An element split keeps the current window on both sides of the
            // cut; a window-boundary split leaves it whole in the primary.
            let (primary_end, residual_start) =
                if element_split.is_some() { (current, current + 1) } else { (new_stop, new_stop) };
            let captured_state = captured.as_ref().map(|(_, state)| state.clone());
            let results = SplitResultsWithStopIndex {
                windowed: self.windowed_roots(
                    &cursor,
                    captured_state,
                    current,
                    stop,
                    primary_end,
                    residual_start,
                    element_split,
                )?,
                downstream: None,
                new_stop_index: new_stop,
            };
            let captured_watermark =
                captured.map(|(watermark, _)| watermark).unwrap_or(Timestamp::MIN);
            let result = self.to_wire(&cursor, &results.windowed, captured_watermark, resume_delay)?;
            debug!(
                "split at fraction {fraction_of_remainder}: window stop {stop} -> {new_stop}"
            );
            cursor.stop_index = results.new_stop_index as i64;
            Some(result)
        } else if cursor.downstream.is_some() {
            let element_progress = cursor.downstream.as_ref().map(|d| d.progress())?;
            let decision = choose_split(element_progress, fraction_of_remainder, current, stop);
            let (downstream_split, new_stop) = match decision {
                SplitDecision::WindowBoundary { new_stop_index } => (None, new_stop_index),
                SplitDecision::ElementSplit { fraction, new_stop_index } => {
                    match cursor.downstream.as_mut().and_then(|d| d.try_split(fraction)) {
                        Some(result) => (Some(result), new_stop_index),
                        None if current + 1 < stop => (None, current + 1),
                        None => return None,
                    }
                }
            };
            // The delegate's roots stand in for the current window when it
            // performed the element split.
            let (primary_end, residual_start) = if downstream_split.is_some() {
                (current, current + 1)
            } else {
                (new_stop, new_stop)
            };
            let results = SplitResultsWithStopIndex {
                windowed: self.windowed_roots(
                    &cursor,
                    None,
                    current,
                    stop,
                    primary_end,
                    residual_start,
                    None,
                )?,
                downstream: downstream_split,
                new_stop_index: new_stop,
            };
            let mut result = self.to_wire(&cursor, &results.windowed, Timestamp::MIN, resume_delay)?;
            cursor.stop_index = results.new_stop_index as i64;
            if let Some(downstream) = results.downstream {
                result.merge(downstream);
            }
            Some(result)
        } else {
            None
        }
    }

    /// Builds the four windowed roots of a committed decision.
    #[allow(clippy::too_many_arguments)]
    fn windowed_roots(
        &self,
        cursor: &Cursor<F>,
        captured_state: Option<EstimatorState<F>>,
        current: usize,
        stop: usize,
        primary_end: usize,
        residual_start: usize,
        element_split: Option<(F::Restriction, F::Restriction)>,
    ) -> Option<WindowedSplitResult<(SplitValue<F>, f64), F::Window>> {
        let element = cursor.element.as_ref()?;
        let original = &element.value.0;
        let captured_state = captured_state.unwrap_or_else(|| original.estimator_state.clone());

        let root = |windows: &[F::Window],
                    restriction: F::Restriction,
                    state: EstimatorState<F>|
         -> SplitInput<F> {
            let size = restriction.size();
            let value = SplitElement {
                element: original.element.clone(),
                restriction,
                estimator_state: state,
            };
            WindowedValue::new((value, size), element.timestamp, windows.iter().cloned(), element.pane)
        };

        Some(WindowedSplitResult {
            primary_in_fully_processed_windows: (primary_end > 0).then(|| {
                root(
                    &element.windows[..primary_end],
                    original.restriction.clone(),
                    original.estimator_state.clone(),
                )
            }),
            primary_split_root: element_split.as_ref().map(|(primary, _)| {
                root(
                    &element.windows[current..current + 1],
                    primary.clone(),
                    original.estimator_state.clone(),
                )
            }),
            residual_split_root: element_split.as_ref().map(|(_, residual)| {
                root(
                    &element.windows[current..current + 1],
                    residual.clone(),
                    captured_state.clone(),
                )
            }),
            residual_in_unprocessed_windows: (residual_start < stop).then(|| {
                root(
                    &element.windows[residual_start..stop],
                    original.restriction.clone(),
                    original.estimator_state.clone(),
                )
            }),
        })
    }

    /// Encodes windowed roots into the wire split result.
    fn to_wire(
        &self,
        cursor: &Cursor<F>,
        windowed: &WindowedSplitResult<(SplitValue<F>, f64), F::Window>,
        captured_watermark: Timestamp,
        resume_delay: Option<Duration>,
    ) -> Option<SplitResult> {
        let coder = self.wire.input_coder.as_ref()?;

        let encode = |windowed_value: &SplitInput<F>| -> Option<BundleApplication> {
            let mut buf = Vec::new();
            coder.encode(windowed_value, &mut buf).ok()?;
            Some(BundleApplication {
                transform_id: self.wire.transform_id.clone(),
                input_id: self.wire.input_id.clone(),
                element: buf,
            })
        };
        let watermarks = |watermark: Timestamp| {
            if watermark == Timestamp::MIN {
                Default::default()
            } else {
                self.wire
                    .output_ids
                    .iter()
                    .map(|id| (id.clone(), WireTimestamp::from_timestamp(watermark)))
                    .collect()
            }
        };

        let mut result = SplitResult::default();
        if let Some(value) = &windowed.primary_in_fully_processed_windows {
            result.primary_roots.push(encode(value)?);
        }
        if let Some(value) = &windowed.primary_split_root {
            result.primary_roots.push(encode(value)?);
        }
        if let Some(value) = &windowed.residual_split_root {
            result.residual_roots.push(DelayedBundleApplication {
                application: encode(value)?,
                requested_time_delay_ms: resume_delay.unwrap_or(Duration::ZERO).millis(),
                output_watermarks: watermarks(captured_watermark),
            });
        }
        if let Some(value) = &windowed.residual_in_unprocessed_windows {
            result.residual_roots.push(DelayedBundleApplication {
                application: encode(value)?,
                requested_time_delay_ms: 0,
                output_watermarks: watermarks(cursor.initial_watermark),
            });
        }
        Some(result)
    }
}

/// The per-transform execution core.
///
/// One runner drives one user transform instance over one bundle at a time:
/// `start_bundle`, any number of `process_element` / `process_sized_element` /
/// `process_timer` / `process_on_window_expiration` calls, `finish_bundle`,
/// and eventually exactly one `tear_down`.
pub struct TransformRunner<F: TransformFn> {
    user_fn: F,
    descriptor: FnDescriptor,
    strategy: Strategy,
    host: Host<F>,
    timers: TimerBundleTracker<F::Key, F::Window>,
    shared: Arc<Shared<F>>,
    wire: Arc<WireState<F>>,
    torn_down: bool,
}

impl<F: TransformFn> TransformRunner<F> {
    /// Wires a user transform to its host capabilities, validating the
    /// descriptor eagerly.
    pub fn new(
        user_fn: F,
        descriptor: FnDescriptor,
        wire: WireConfig<F>,
        host: Host<F>,
    ) -> Result<Self, Error> {
        let strategy = match descriptor.urn.as_str() {
            urns::PAR_DO => {
                // State, timers, and window expiration all address a single
                // window; their presence forces per-window invocation.
                if descriptor.observes_window
                    || descriptor.keyed
                    || !descriptor.timer_specs.is_empty()
                    || descriptor.has_on_window_expiration
                {
                    Strategy::WindowObserving
                } else {
                    Strategy::Simple
                }
            }
            urns::PROCESS_SIZED_ELEMENTS_AND_RESTRICTIONS => Strategy::Splittable,
            other => {
                return Err(Error::Config(format!("unknown transform payload urn `{other}`")))
            }
        };
        if strategy == Strategy::Splittable && wire.input_coder.is_none() {
            return Err(Error::Config(
                "splittable transforms require a full input coder".to_owned(),
            ));
        }
        if !host.consumers.contains(&descriptor.main_output) {
            return Err(Error::Config(format!(
                "no consumer registered for main output `{}`",
                descriptor.main_output
            )));
        }
        for tag in &descriptor.additional_outputs {
            if !host.consumers.contains(tag) {
                return Err(Error::Config(format!("no consumer registered for output `{tag}`")));
            }
        }
        if (!descriptor.timer_specs.is_empty() || descriptor.has_on_window_expiration)
            && !descriptor.keyed
        {
            return Err(Error::Config("timers require keyed elements".to_owned()));
        }
        if descriptor.allowed_skew.millis() < 0 || descriptor.allowed_lateness.millis() < 0 {
            return Err(Error::Config(
                "allowed skew and allowed lateness must be non-negative".to_owned(),
            ));
        }

        let mut output_ids = vec![descriptor.main_output.clone()];
        output_ids.extend(descriptor.additional_outputs.iter().cloned());
        Ok(TransformRunner {
            user_fn,
            strategy,
            host,
            timers: TimerBundleTracker::new(),
            shared: Arc::new(Shared { cursor: Mutex::new(Cursor::new()) }),
            wire: Arc::new(WireState {
                transform_id: wire.transform_id,
                input_id: wire.input_id,
                output_ids,
                completed_short_id: wire.completed_short_id,
                remaining_short_id: wire.remaining_short_id,
                input_coder: wire.input_coder,
            }),
            descriptor,
            torn_down: false,
        })
    }

    /// A thread-safe handle for concurrent progress and split requests.
    pub fn split_handle(&self) -> SplitHandle<F> {
        SplitHandle { shared: Arc::clone(&self.shared), wire: Arc::clone(&self.wire) }
    }

    /// See [`SplitHandle::get_progress`].
    pub fn get_progress(&self) -> Option<Progress> {
        self.split_handle().get_progress()
    }

    /// See [`SplitHandle::report_progress`].
    pub fn report_progress(&self, sink: &mut dyn ProgressSink) {
        self.split_handle().report_progress(sink);
    }

    /// See [`SplitHandle::try_split`].
    pub fn try_split(&self, fraction_of_remainder: f64) -> Option<SplitResult> {
        self.split_handle().try_split(fraction_of_remainder)
    }

    /// Invokes the user start-bundle hook on a fresh bundle.
    pub fn start_bundle(&mut self) -> Result<(), Error> {
        self.timers = TimerBundleTracker::new();
        let TransformRunner { user_fn, host, descriptor, .. } = self;
        let mut ctx = make_ctx(
            Phase::StartBundle,
            host,
            None,
            descriptor,
            false,
            None,
            Timestamp::MIN,
            None,
            &[],
            PaneInfo::UNKNOWN,
            None,
            None,
            None,
        );
        user_fn.start_bundle(&mut ctx).map_err(Error::from_user)
    }

    /// Processes one plain element, dispatching per the configured strategy.
    pub fn process_element(
        &mut self,
        element: WindowedValue<F::Element, F::Window>,
    ) -> Result<(), Error> {
        match self.strategy {
            Strategy::Splittable => Err(Error::Config(
                "this transform consumes sized element-and-restriction pairs; \
                 use process_sized_element"
                    .to_owned(),
            )),
            Strategy::Simple => {
                let key = self.user_fn.key_of(&element.value);
                let TransformRunner { user_fn, host, timers, descriptor, .. } = self;
                let mut ctx = make_ctx(
                    Phase::Element,
                    host,
                    Some(timers),
                    descriptor,
                    false,
                    Some(&element.value),
                    element.timestamp,
                    None,
                    &element.windows,
                    element.pane,
                    key,
                    None,
                    None,
                );
                let continuation =
                    user_fn.process_element(&mut ctx).map_err(Error::from_user)?;
                require_stop(continuation)
            }
            Strategy::WindowObserving => {
                let key = self.user_fn.key_of(&element.value);
                for index in 0..element.windows.len() {
                    let TransformRunner { user_fn, host, timers, descriptor, .. } = self;
                    let mut ctx = make_ctx(
                        Phase::Element,
                        host,
                        Some(timers),
                        descriptor,
                        true,
                        Some(&element.value),
                        element.timestamp,
                        None,
                        &element.windows[index..index + 1],
                        element.pane,
                        key.clone(),
                        None,
                        None,
                    );
                    let continuation =
                        user_fn.process_element(&mut ctx).map_err(Error::from_user)?;
                    require_stop(continuation)?;
                }
                Ok(())
            }
        }
    }

    /// Processes one splittable element-and-restriction pair, window by
    /// window, honoring concurrent splits and self-initiated checkpoints.
    pub fn process_sized_element(&mut self, element: SplitInput<F>) -> Result<(), Error> {
        if self.strategy != Strategy::Splittable {
            return Err(Error::Config(
                "this transform consumes plain elements; use process_element".to_owned(),
            ));
        }
        if element.windows.is_empty() {
            return Ok(());
        }
        let key = self.user_fn.key_of(&element.value.0.element);
        {
            let mut cursor = lock(&self.shared.cursor);
            cursor.reset();
            cursor.element = Some(element.clone());
            cursor.current_index = -1;
            cursor.stop_index = element.windows.len() as i64;
        }
        let handle = self.split_handle();
        loop {
            // Advance and install fresh per-window machinery under the split
            // lock; a concurrent split may have lowered the stop index.
            let installed = {
                let mut cursor = lock(&self.shared.cursor);
                cursor.current_index += 1;
                if cursor.current_index >= cursor.stop_index {
                    cursor.reset();
                    None
                } else {
                    let index = cursor.current_index as usize;
                    let claimed = Arc::new(AtomicBool::new(false));
                    let tracker = TrackerHandle::new(ClaimObserving::new(
                        self.user_fn.new_tracker(element.value.0.restriction.clone()),
                        Arc::clone(&claimed),
                    ));
                    let estimator = SharedEstimator::new(
                        self.user_fn.new_estimator(element.value.0.estimator_state.clone()),
                    );
                    cursor.claimed = claimed;
                    cursor.tracker = Some(tracker.clone());
                    cursor.estimator = Some(estimator.clone());
                    cursor.initial_watermark = estimator.current_watermark();
                    Some((index, tracker, estimator))
                }
            };
            let Some((index, tracker, estimator)) = installed else {
                return Ok(());
            };

            // User code runs with the split lock released.
            let outcome = {
                let TransformRunner { user_fn, host, timers, descriptor, .. } = &mut *self;
                let mut ctx = make_ctx(
                    Phase::Element,
                    host,
                    Some(timers),
                    descriptor,
                    true,
                    Some(&element.value.0.element),
                    element.timestamp,
                    None,
                    &element.windows[index..index + 1],
                    element.pane,
                    key.clone(),
                    Some(tracker.clone()),
                    Some(estimator),
                );
                user_fn.process_element(&mut ctx)
            };
            let continuation = match outcome {
                Ok(continuation) => continuation,
                Err(err) => {
                    lock(&self.shared.cursor).reset();
                    return Err(Error::from_user(err));
                }
            };
            match continuation {
                ProcessContinuation::Stop => {
                    if let Err(err) = tracker.check_done() {
                        lock(&self.shared.cursor).reset();
                        return Err(Error::from_user(err));
                    }
                }
                ProcessContinuation::Resume { delay } => {
                    // A checkpoint at fraction zero; without a successful
                    // claim there is nothing to hand back and the window is
                    // simply done.
                    if let Some(result) = handle.split_with(0.0, Some(delay), true) {
                        self.host
                            .split_listener
                            .split(result.primary_roots, result.residual_roots);
                    }
                }
            }
        }
    }

    /// Handles one delivered timer firing, draining buffered timers that were
    /// scheduled at or before it first.
    pub fn process_timer(
        &mut self,
        family_or_id: &str,
        domain: TimeDomain,
        timer: TimerRecord<F::Key, F::Window>,
    ) -> Result<(), Error> {
        let declared = self
            .descriptor
            .timer_specs
            .get(family_or_id)
            .copied()
            .ok_or_else(|| Error::Config(format!("unknown timer `{family_or_id}`")))?;
        if declared != domain {
            return Err(Error::Config(format!(
                "timer `{family_or_id}` is declared in {declared:?}, not {domain:?}"
            )));
        }
        for window in timer.windows.clone() {
            // Buffered timers scheduled at or before this firing run first,
            // each tombstoned so an independent redelivery is recognized.
            while let Some(buffered) =
                self.timers.pop_earlier(&timer.key, &window, domain, timer.fire_timestamp)
            {
                self.fire_timer(&buffered, &window)?;
            }
            // The delivered firing itself may have been superseded or
            // cleared earlier in this bundle.
            let superseded = self
                .timers
                .modification(&timer.key, &window, family_or_id, &timer.dynamic_tag)
                .is_some_and(|m| m.cleared || m.fire_timestamp != timer.fire_timestamp);
            if !superseded {
                self.fire_timer(&timer, &window)?;
            }
        }
        Ok(())
    }

    /// Invokes the user on-window-expiration hook once per window of the
    /// firing cleanup timer.
    pub fn process_on_window_expiration(
        &mut self,
        timer: TimerRecord<F::Key, F::Window>,
    ) -> Result<(), Error> {
        if !self.descriptor.has_on_window_expiration {
            return Err(Error::Config(
                "the transform declares no on-window-expiration hook".to_owned(),
            ));
        }
        for window in timer.windows.clone() {
            let TransformRunner { user_fn, host, descriptor, .. } = self;
            let mut ctx = make_ctx(
                Phase::WindowExpiration,
                host,
                None,
                descriptor,
                true,
                None,
                timer.hold_timestamp,
                None,
                std::slice::from_ref(&window),
                timer.pane,
                Some(timer.key.clone()),
                None,
                None,
            );
            user_fn.on_window_expiration(&mut ctx).map_err(Error::from_user)?;
        }
        Ok(())
    }

    /// Finishes the bundle: user hook, then the timer flush, then state
    /// finalization.
    pub fn finish_bundle(&mut self) -> Result<(), Error> {
        {
            let TransformRunner { user_fn, host, descriptor, .. } = self;
            let mut ctx = make_ctx(
                Phase::FinishBundle,
                host,
                None,
                descriptor,
                false,
                None,
                Timestamp::MIN,
                None,
                &[],
                PaneInfo::UNKNOWN,
                None,
                None,
                None,
            );
            user_fn.finish_bundle(&mut ctx).map_err(Error::from_user)?;
        }
        let records = self.timers.drain();
        if !records.is_empty() {
            debug!("flushing {} timer record(s)", records.len());
        }
        for record in records {
            let family = record.family_or_id.clone();
            self.host.timer_sink.receive(&family, record)?;
        }
        self.host.state.finalize()
    }

    /// Invokes the user teardown hook. Valid exactly once per runner.
    pub fn tear_down(&mut self) -> Result<(), Error> {
        if self.torn_down {
            return Err(Error::TornDown);
        }
        self.torn_down = true;
        self.user_fn.teardown().map_err(Error::from_user)
    }

    fn fire_timer(
        &mut self,
        record: &TimerRecord<F::Key, F::Window>,
        window: &F::Window,
    ) -> Result<(), Error> {
        let TransformRunner { user_fn, host, timers, descriptor, .. } = self;
        let mut ctx = make_ctx(
            Phase::Timer,
            host,
            Some(timers),
            descriptor,
            true,
            None,
            record.hold_timestamp,
            Some(Firing {
                family_or_id: record.family_or_id.clone(),
                dynamic_tag: record.dynamic_tag.clone(),
                fire_timestamp: record.fire_timestamp,
            }),
            std::slice::from_ref(window),
            record.pane,
            Some(record.key.clone()),
            None,
            None,
        );
        user_fn.on_timer(&mut ctx).map_err(Error::from_user)
    }

    #[cfg(test)]
    fn install_downstream(&self, element: SplitInput<F>, downstream: Box<dyn DownstreamSplitter>) {
        let mut cursor = lock(&self.shared.cursor);
        cursor.reset();
        cursor.stop_index = element.windows.len() as i64;
        cursor.current_index = 0;
        cursor.element = Some(element);
        cursor.downstream = Some(downstream);
    }
}

fn require_stop(continuation: ProcessContinuation) -> Result<(), Error> {
    match continuation {
        ProcessContinuation::Stop => Ok(()),
        ProcessContinuation::Resume { .. } => Err(Error::Config(
            "only splittable transforms may request a resume".to_owned(),
        )),
    }
}

#[allow(clippy::too_many_arguments)]
fn make_ctx<'a, F: TransformFn>(
    phase: Phase,
    host: &'a mut Host<F>,
    timers: Option<&'a mut TimerBundleTracker<F::Key, F::Window>>,
    descriptor: &'a FnDescriptor,
    observes_window: bool,
    value: Option<&'a F::Element>,
    timestamp: Timestamp,
    firing: Option<Firing>,
    windows: &'a [F::Window],
    pane: PaneInfo,
    key: Option<F::Key>,
    tracker: Option<TrackerHandle<F::Tracker>>,
    estimator: Option<SharedEstimator<F::Estimator>>,
) -> ProcessContext<'a, F> {
    ProcessContext {
        phase,
        value,
        timestamp,
        firing,
        windows,
        observes_window,
        pane,
        key,
        allowed_skew: descriptor.allowed_skew,
        allowed_lateness: descriptor.allowed_lateness,
        main_output: &descriptor.main_output,
        timer_specs: &descriptor.timer_specs,
        consumers: &mut host.consumers,
        state: host.state.as_mut(),
        side_inputs: host.side_inputs.as_mut(),
        timers,
        finalizer: host.finalizer.as_mut(),
        tracker,
        estimator,
    }
}
