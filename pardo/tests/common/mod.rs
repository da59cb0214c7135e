//! Shared fixtures for the integration tests: a real offset-range tracker, a
//! scripted tracker with a fixed progress report, watermark estimators, and
//! recording implementations of the host capabilities.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use pardo::coder::{BincodeCoder, Coder, FullWindowedValueCoder};
use pardo::error::{Error, UserError};
use pardo::host::{
    BagState, BundleFinalizer, Consumers, FinalizeCallback, NoSideInputs, NullState, SplitListener,
    StateAccessor, TimerSink,
};
use pardo::progress::Progress;
use pardo::runner::{Host, SplitInput, SplitValue};
use pardo::time::Timestamp;
use pardo::timers::TimerRecord;
use pardo::userfn::{RestrictionTracker, Restriction, TransformFn, WatermarkEstimator};
use pardo::window::{IntervalWindow, Window, WindowedValue};
use pardo::wire::{BundleApplication, DelayedBundleApplication, SplitResult};

/// A half-open range of claimable offsets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRange {
    pub from: u64,
    pub to: u64,
}

impl OffsetRange {
    pub fn new(from: u64, to: u64) -> Self {
        OffsetRange { from, to }
    }
}

impl Restriction for OffsetRange {
    fn size(&self) -> f64 {
        (self.to - self.from) as f64
    }
}

/// A tracker claiming offsets in order, splittable at any unclaimed point.
pub struct OffsetTracker {
    range: OffsetRange,
    position: u64,
}

impl OffsetTracker {
    pub fn new(range: OffsetRange) -> Self {
        OffsetTracker { position: range.from, range }
    }
}

impl RestrictionTracker for OffsetTracker {
    type Restriction = OffsetRange;
    type Position = u64;

    fn try_claim(&mut self, position: u64) -> bool {
        if position >= self.range.to {
            false
        } else {
            self.position = position + 1;
            true
        }
    }

    fn current_restriction(&self) -> OffsetRange {
        self.range.clone()
    }

    fn try_split(&mut self, fraction_of_remainder: f64) -> Option<(OffsetRange, OffsetRange)> {
        let remaining = self.range.to.saturating_sub(self.position);
        if remaining == 0 {
            return None;
        }
        let keep = (remaining as f64 * fraction_of_remainder).round() as u64;
        let split = self.position + keep;
        if split >= self.range.to {
            return None;
        }
        let primary = OffsetRange::new(self.range.from, split);
        let residual = OffsetRange::new(split, self.range.to);
        self.range = primary.clone();
        Some((primary, residual))
    }

    fn check_done(&self) -> Result<(), UserError> {
        if self.position >= self.range.to {
            Ok(())
        } else {
            Err(format!(
                "offsets [{}, {}) were never claimed",
                self.position, self.range.to
            )
            .into())
        }
    }

    fn progress(&self) -> Option<Progress> {
        Some(Progress::new(
            (self.position - self.range.from) as f64,
            self.range.to.saturating_sub(self.position) as f64,
        ))
    }
}

/// A tracker reporting a fixed progress measure and a scripted split result.
pub struct ScriptedTracker {
    pub restriction: OffsetRange,
    pub progress: Progress,
    pub split_result: Option<(OffsetRange, OffsetRange)>,
}

impl RestrictionTracker for ScriptedTracker {
    type Restriction = OffsetRange;
    type Position = u64;

    fn try_claim(&mut self, _position: u64) -> bool {
        true
    }

    fn current_restriction(&self) -> OffsetRange {
        self.restriction.clone()
    }

    fn try_split(&mut self, _fraction_of_remainder: f64) -> Option<(OffsetRange, OffsetRange)> {
        self.split_result.take()
    }

    fn check_done(&self) -> Result<(), UserError> {
        Ok(())
    }

    fn progress(&self) -> Option<Progress> {
        Some(self.progress)
    }
}

/// An estimator pinned at the watermark it was built from.
pub struct ManualMark {
    pub mark: Timestamp,
}

impl WatermarkEstimator for ManualMark {
    type State = Timestamp;

    fn current_watermark(&self) -> Timestamp {
        self.mark
    }

    fn state(&self) -> Timestamp {
        self.mark
    }
}

/// An estimator tracking the least timestamp it has observed.
pub struct ObservingMark {
    pub mark: Timestamp,
}

impl WatermarkEstimator for ObservingMark {
    type State = Timestamp;

    fn current_watermark(&self) -> Timestamp {
        self.mark
    }

    fn state(&self) -> Timestamp {
        self.mark
    }

    fn observe_timestamp(&mut self, timestamp: Timestamp) {
        if timestamp < self.mark {
            self.mark = timestamp;
        }
    }

    fn observes_timestamps(&self) -> bool {
        true
    }
}

/// The `index`-th hundred-millisecond window.
pub fn window(index: i64) -> IntervalWindow {
    IntervalWindow::new(
        Timestamp::from_millis(index * 100),
        Timestamp::from_millis((index + 1) * 100),
    )
}

/// A bincode-backed full input coder for a splittable transform.
pub fn full_coder<F: TransformFn>() -> Box<dyn Coder<SplitInput<F>>>
where
    (SplitValue<F>, f64): Serialize + DeserializeOwned,
    F::Window: Serialize + DeserializeOwned,
{
    Box::new(FullWindowedValueCoder::new(
        Box::new(BincodeCoder::new()),
        Box::new(BincodeCoder::new()),
    ))
}

/// A consumer registry capturing everything sent to the given tags.
pub fn recording_consumers<O: Clone + 'static, W: Window>(
    tags: &[&str],
) -> (Consumers<O, W>, Rc<RefCell<Vec<(String, WindowedValue<O, W>)>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut consumers = Consumers::new();
    for tag in tags {
        let tag = (*tag).to_owned();
        let sink = Rc::clone(&seen);
        consumers.register(tag.clone(), move |value| {
            sink.borrow_mut().push((tag.clone(), value));
        });
    }
    (consumers, seen)
}

/// A timer sink collecting every record it receives.
pub struct RecordingTimers<K, W: Window> {
    pub records: Rc<RefCell<Vec<TimerRecord<K, W>>>>,
}

impl<K, W: Window> TimerSink<K, W> for RecordingTimers<K, W> {
    fn receive(&mut self, _family_or_id: &str, record: TimerRecord<K, W>) -> Result<(), Error> {
        self.records.borrow_mut().push(record);
        Ok(())
    }
}

/// A split listener collecting every reported split.
pub struct RecordingListener {
    pub splits: Rc<RefCell<Vec<SplitResult>>>,
}

impl SplitListener for RecordingListener {
    fn split(
        &mut self,
        primary_roots: Vec<BundleApplication>,
        residual_roots: Vec<DelayedBundleApplication>,
    ) {
        self.splits.borrow_mut().push(SplitResult { primary_roots, residual_roots });
    }
}

/// A finalizer recording expiries and running callbacks eagerly.
pub struct RecordingFinalizer {
    pub expiries: Rc<RefCell<Vec<Timestamp>>>,
}

impl BundleFinalizer for RecordingFinalizer {
    fn after_bundle_commit(&mut self, expiry: Timestamp, callback: FinalizeCallback) {
        self.expiries.borrow_mut().push(expiry);
        let _ = callback();
    }
}

/// A side input accessor serving one fixed value for every view and window.
pub struct FixedSideInput {
    pub value: Vec<u8>,
}

impl<W: Window> pardo::host::SideInputAccessor<W> for FixedSideInput {
    fn get(&mut self, _view: &str, _window: &W) -> Result<Vec<u8>, Error> {
        Ok(self.value.clone())
    }
}

#[derive(Debug)]
struct VecBag(Vec<Vec<u8>>);

impl BagState for VecBag {
    fn read(&mut self) -> Result<Vec<Vec<u8>>, Error> {
        Ok(self.0.clone())
    }

    fn append(&mut self, value: Vec<u8>) -> Result<(), Error> {
        self.0.push(value);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), Error> {
        self.0.clear();
        Ok(())
    }
}

/// An in-memory state channel keyed by state id, user key, and window.
pub struct MapState<K, W: Window> {
    bags: HashMap<(String, K, W), VecBag>,
    pub finalized: Rc<RefCell<u32>>,
}

impl<K, W: Window> MapState<K, W> {
    pub fn new() -> Self {
        MapState { bags: HashMap::new(), finalized: Rc::new(RefCell::new(0)) }
    }
}

impl<K: Clone + Eq + std::hash::Hash, W: Window> StateAccessor<K, W> for MapState<K, W> {
    fn bag(&mut self, state_id: &str, key: &K, window: &W) -> Result<&mut dyn BagState, Error> {
        let bag = self
            .bags
            .entry((state_id.to_owned(), key.clone(), window.clone()))
            .or_insert_with(|| VecBag(Vec::new()));
        Ok(bag)
    }

    fn finalize(&mut self) -> Result<(), Error> {
        *self.finalized.borrow_mut() += 1;
        Ok(())
    }
}

/// A host wired to null capabilities everywhere but the consumers.
pub fn null_host<F: TransformFn>(consumers: Consumers<F::Output, F::Window>) -> Host<F> {
    Host {
        consumers,
        state: Box::new(NullState),
        side_inputs: Box::new(NoSideInputs),
        timer_sink: Box::new(pardo::host::NullTimerSink),
        split_listener: Box::new(pardo::host::NullSplitListener),
        finalizer: Box::new(pardo::host::NullFinalizer),
    }
}
