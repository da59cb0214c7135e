//! Bundle lifecycle, output routing, context phase rules, and state access.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::*;
use pardo::context::ProcessContext;
use pardo::error::{Error, UserError};
use pardo::runner::{SplitInput, TransformRunner, WireConfig};
use pardo::split::{sized, SplitElement};
use pardo::time::{Duration, Timestamp};
use pardo::userfn::{
    urns, FnDescriptor, NoEstimator, NoRestriction, NoTracker, ProcessContinuation, TransformFn,
};
use pardo::window::{IntervalWindow, PaneInfo, WindowedValue};

enum PlainBehavior {
    /// Emit the element to the main output.
    Echo,
    /// Emit with an explicit timestamp.
    EchoAt(i64),
    /// Emit to a named tag.
    EchoTagged(&'static str),
    /// Record whether the window was visible, then emit.
    ProbeWindow,
    /// Append the element to a state bag and emit the bag's length so far.
    CountInState,
    /// Emit the side input value for the view named by the element.
    EchoSideInput,
    /// Ask to resume, which plain transforms may not do.
    IllegalResume,
}

struct PlainFn {
    behavior: PlainBehavior,
    windows_seen: Rc<RefCell<Vec<Result<IntervalWindow, String>>>>,
}

impl TransformFn for PlainFn {
    type Element = (String, String);
    type Output = String;
    type Key = String;
    type Window = IntervalWindow;
    type Restriction = NoRestriction;
    type Tracker = NoTracker;
    type Estimator = NoEstimator;

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, Self>,
    ) -> Result<ProcessContinuation, UserError> {
        let value = ctx.element()?.1.clone();
        match &self.behavior {
            PlainBehavior::Echo => ctx.output(value)?,
            PlainBehavior::EchoAt(at) => {
                ctx.output_with_timestamp(value, Timestamp::from_millis(*at))?
            }
            PlainBehavior::EchoTagged(tag) => ctx.output_tagged(tag, value)?,
            PlainBehavior::ProbeWindow => {
                let seen = ctx.window().map(|w| *w).map_err(|err| err.to_string());
                self.windows_seen.borrow_mut().push(seen);
                ctx.output(value)?;
            }
            PlainBehavior::CountInState => {
                let bag = ctx.bag_state("count")?;
                bag.append(vec![1])?;
                let length = bag.read()?.len();
                ctx.output(format!("{value}:{length}"))?;
            }
            PlainBehavior::EchoSideInput => {
                let bytes = ctx.side_input(&value)?;
                ctx.output(String::from_utf8(bytes).expect("utf8 side input"))?;
            }
            PlainBehavior::IllegalResume => return Ok(ProcessContinuation::resume()),
        }
        Ok(ProcessContinuation::stop())
    }

    fn start_bundle(&mut self, ctx: &mut ProcessContext<'_, Self>) -> Result<(), UserError> {
        ctx.register_finalization(Timestamp::from_millis(10_000), Box::new(|| Ok(())))?;
        Ok(())
    }

    fn new_tracker(&self, _restriction: NoRestriction) -> NoTracker {
        NoTracker
    }

    fn new_estimator(&self, _state: ()) -> NoEstimator {
        NoEstimator
    }

    fn key_of(&self, element: &(String, String)) -> Option<String> {
        Some(element.0.clone())
    }
}

struct Fixture {
    runner: TransformRunner<PlainFn>,
    seen: Rc<RefCell<Vec<(String, WindowedValue<String, IntervalWindow>)>>>,
    windows_seen: Rc<RefCell<Vec<Result<IntervalWindow, String>>>>,
    expiries: Rc<RefCell<Vec<Timestamp>>>,
    finalized: Rc<RefCell<u32>>,
}

fn build(behavior: PlainBehavior, mut descriptor: FnDescriptor) -> Fixture {
    let windows_seen = Rc::new(RefCell::new(Vec::new()));
    let expiries = Rc::new(RefCell::new(Vec::new()));
    let user_fn = PlainFn { behavior, windows_seen: Rc::clone(&windows_seen) };
    let (consumers, seen) = recording_consumers(&["out", "late"]);
    descriptor.additional_outputs = vec!["late".to_owned()];

    let state = MapState::new();
    let finalized = Rc::clone(&state.finalized);
    let mut host = null_host(consumers);
    host.state = Box::new(state);
    host.finalizer = Box::new(RecordingFinalizer { expiries: Rc::clone(&expiries) });

    let runner = TransformRunner::new(user_fn, descriptor, WireConfig::new("t", "in"), host)
        .expect("valid configuration");
    Fixture { runner, seen, windows_seen, expiries, finalized }
}

fn element(key: &str, value: &str, windows: &[IntervalWindow]) -> WindowedValue<(String, String), IntervalWindow> {
    WindowedValue::new(
        (key.to_owned(), value.to_owned()),
        Timestamp::from_millis(150),
        windows.iter().copied(),
        PaneInfo::ON_TIME,
    )
}

#[test]
fn outputs_inherit_the_element_metadata() {
    let mut fixture = build(PlainBehavior::Echo, FnDescriptor::for_urn(urns::PAR_DO));
    fixture.runner.start_bundle().unwrap();
    fixture.runner.process_element(element("k", "v", &[window(1), window(2)])).unwrap();
    fixture.runner.finish_bundle().unwrap();

    let seen = fixture.seen.borrow();
    // Non-window-observing: one invocation, the output spans both windows.
    assert_eq!(seen.len(), 1);
    let (tag, value) = &seen[0];
    assert_eq!(tag, "out");
    assert_eq!(value.value, "v");
    assert_eq!(value.timestamp, Timestamp::from_millis(150));
    assert_eq!(value.windows.as_slice(), &[window(1), window(2)]);
}

#[test]
fn window_observing_transforms_run_once_per_window() {
    let mut descriptor = FnDescriptor::for_urn(urns::PAR_DO);
    descriptor.observes_window = true;
    let mut fixture = build(PlainBehavior::ProbeWindow, descriptor);
    fixture.runner.start_bundle().unwrap();
    fixture.runner.process_element(element("k", "v", &[window(1), window(2)])).unwrap();

    let windows_seen = fixture.windows_seen.borrow();
    assert_eq!(windows_seen.as_slice(), &[Ok(window(1)), Ok(window(2))]);

    let seen = fixture.seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1.windows.as_slice(), &[window(1)]);
    assert_eq!(seen[1].1.windows.as_slice(), &[window(2)]);
}

#[test]
fn window_access_fails_outside_window_observing_transforms() {
    let mut fixture = build(PlainBehavior::ProbeWindow, FnDescriptor::for_urn(urns::PAR_DO));
    fixture.runner.start_bundle().unwrap();
    fixture.runner.process_element(element("k", "v", &[window(1)])).unwrap();

    let windows_seen = fixture.windows_seen.borrow();
    assert_eq!(windows_seen.len(), 1);
    let message = windows_seen[0].as_ref().unwrap_err();
    assert!(message.contains("window-observing"), "unexpected message: {message}");
}

#[test]
fn output_timestamps_below_the_allowed_skew_fail_fast() {
    let mut descriptor = FnDescriptor::for_urn(urns::PAR_DO);
    descriptor.allowed_skew = Duration::from_millis(20);
    let mut fixture = build(PlainBehavior::EchoAt(100), descriptor);
    fixture.runner.start_bundle().unwrap();
    let err = fixture.runner.process_element(element("k", "v", &[window(1)])).unwrap_err();

    match err {
        Error::TimestampViolation(message) => {
            // The message names everything needed to debug the rejection.
            assert!(message.contains("100ms"), "missing timestamp: {message}");
            assert!(message.contains("150ms"), "missing element timestamp: {message}");
            assert!(message.contains("20ms"), "missing skew: {message}");
            assert!(message.contains("Timestamp::MAX"), "missing upper bound: {message}");
        }
        other => panic!("expected a timestamp violation, got {other:?}"),
    }
}

#[test]
fn skewed_outputs_within_the_bound_are_delivered() {
    let mut descriptor = FnDescriptor::for_urn(urns::PAR_DO);
    descriptor.allowed_skew = Duration::from_millis(100);
    let mut fixture = build(PlainBehavior::EchoAt(100), descriptor);
    fixture.runner.start_bundle().unwrap();
    fixture.runner.process_element(element("k", "v", &[window(1)])).unwrap();
    assert_eq!(fixture.seen.borrow()[0].1.timestamp, Timestamp::from_millis(100));
}

#[test]
fn tagged_outputs_reach_their_consumer_and_unknown_tags_fail() {
    let mut fixture = build(PlainBehavior::EchoTagged("late"), FnDescriptor::for_urn(urns::PAR_DO));
    fixture.runner.start_bundle().unwrap();
    fixture.runner.process_element(element("k", "v", &[window(1)])).unwrap();
    assert_eq!(fixture.seen.borrow()[0].0, "late");

    let mut fixture = build(PlainBehavior::EchoTagged("nope"), FnDescriptor::for_urn(urns::PAR_DO));
    fixture.runner.start_bundle().unwrap();
    let err = fixture.runner.process_element(element("k", "v", &[window(1)])).unwrap_err();
    assert!(matches!(err, Error::UnknownOutput(tag) if tag == "nope"));
}

#[test]
fn state_is_kept_per_key_and_window_and_finalized_once() {
    let mut descriptor = FnDescriptor::for_urn(urns::PAR_DO);
    descriptor.keyed = true;
    let mut fixture = build(PlainBehavior::CountInState, descriptor);
    fixture.runner.start_bundle().unwrap();
    fixture.runner.process_element(element("k", "a", &[window(1)])).unwrap();
    fixture.runner.process_element(element("k", "b", &[window(1)])).unwrap();
    fixture.runner.process_element(element("other", "c", &[window(1)])).unwrap();
    fixture.runner.finish_bundle().unwrap();

    let seen = fixture.seen.borrow();
    let values: Vec<&str> = seen.iter().map(|(_, value)| value.value.as_str()).collect();
    assert_eq!(values, ["a:1", "b:2", "c:1"]);
    assert_eq!(*fixture.finalized.borrow(), 1);
}

#[test]
fn state_access_requires_a_keyed_context() {
    // Window-observing but unkeyed: the key is absent, state must fail.
    let mut descriptor = FnDescriptor::for_urn(urns::PAR_DO);
    descriptor.observes_window = true;
    struct Unkeyed;
    impl TransformFn for Unkeyed {
        type Element = (String, String);
        type Output = String;
        type Key = String;
        type Window = IntervalWindow;
        type Restriction = NoRestriction;
        type Tracker = NoTracker;
        type Estimator = NoEstimator;

        fn process_element(
            &mut self,
            ctx: &mut ProcessContext<'_, Self>,
        ) -> Result<ProcessContinuation, UserError> {
            match ctx.bag_state("count") {
                Err(Error::Unsupported(message)) => {
                    assert!(message.contains("keyed"), "unexpected message: {message}");
                }
                other => panic!("expected an unsupported-operation error, got {other:?}"),
            }
            Ok(ProcessContinuation::stop())
        }

        fn new_tracker(&self, _restriction: NoRestriction) -> NoTracker {
            NoTracker
        }

        fn new_estimator(&self, _state: ()) -> NoEstimator {
            NoEstimator
        }
    }
    let (consumers, _seen) = recording_consumers(&["out"]);
    let mut runner =
        TransformRunner::new(Unkeyed, descriptor, WireConfig::new("t", "in"), null_host(consumers))
            .unwrap();
    runner.start_bundle().unwrap();
    runner.process_element(element("k", "v", &[window(1)])).unwrap();
}

#[test]
fn side_inputs_resolve_against_the_current_window() {
    let mut descriptor = FnDescriptor::for_urn(urns::PAR_DO);
    descriptor.observes_window = true;
    let user_fn = PlainFn {
        behavior: PlainBehavior::EchoSideInput,
        windows_seen: Rc::new(RefCell::new(Vec::new())),
    };
    let (consumers, seen) = recording_consumers(&["out"]);
    let mut host = null_host(consumers);
    host.side_inputs = Box::new(FixedSideInput { value: b"dictionary".to_vec() });
    let mut runner =
        TransformRunner::new(user_fn, descriptor, WireConfig::new("t", "in"), host).unwrap();
    runner.start_bundle().unwrap();
    runner.process_element(element("k", "dict", &[window(1)])).unwrap();
    assert_eq!(seen.borrow()[0].1.value, "dictionary");
}

#[test]
fn resume_is_reserved_for_splittable_transforms() {
    let mut fixture = build(PlainBehavior::IllegalResume, FnDescriptor::for_urn(urns::PAR_DO));
    fixture.runner.start_bundle().unwrap();
    let err = fixture.runner.process_element(element("k", "v", &[window(1)])).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn teardown_is_valid_exactly_once() {
    let mut fixture = build(PlainBehavior::Echo, FnDescriptor::for_urn(urns::PAR_DO));
    fixture.runner.start_bundle().unwrap();
    fixture.runner.finish_bundle().unwrap();
    fixture.runner.tear_down().unwrap();
    assert!(matches!(fixture.runner.tear_down(), Err(Error::TornDown)));
}

#[test]
fn finalization_callbacks_reach_the_host_finalizer() {
    let mut fixture = build(PlainBehavior::Echo, FnDescriptor::for_urn(urns::PAR_DO));
    fixture.runner.start_bundle().unwrap();
    assert_eq!(fixture.expiries.borrow().as_slice(), &[Timestamp::from_millis(10_000)]);
}

#[test]
fn user_errors_are_wrapped_in_a_single_carrier() {
    struct Failing;
    impl TransformFn for Failing {
        type Element = String;
        type Output = String;
        type Key = String;
        type Window = IntervalWindow;
        type Restriction = NoRestriction;
        type Tracker = NoTracker;
        type Estimator = NoEstimator;

        fn process_element(
            &mut self,
            _ctx: &mut ProcessContext<'_, Self>,
        ) -> Result<ProcessContinuation, UserError> {
            Err("the user code is unhappy".into())
        }

        fn new_tracker(&self, _restriction: NoRestriction) -> NoTracker {
            NoTracker
        }

        fn new_estimator(&self, _state: ()) -> NoEstimator {
            NoEstimator
        }
    }
    let (consumers, _seen) = recording_consumers(&["out"]);
    let mut runner = TransformRunner::new(
        Failing,
        FnDescriptor::for_urn(urns::PAR_DO),
        WireConfig::new("t", "in"),
        null_host(consumers),
    )
    .unwrap();
    let err = runner
        .process_element(WindowedValue::new(
            "v".to_owned(),
            Timestamp::from_millis(0),
            [window(0)],
            PaneInfo::ON_TIME,
        ))
        .unwrap_err();
    match err {
        Error::UserCode(source) => assert_eq!(source.to_string(), "the user code is unhappy"),
        other => panic!("expected a user-code error, got {other:?}"),
    }
}

/// A splittable transform whose estimator observes output timestamps.
struct ObservingFixture;

impl TransformFn for ObservingFixture {
    type Element = String;
    type Output = String;
    type Key = String;
    type Window = IntervalWindow;
    type Restriction = OffsetRange;
    type Tracker = OffsetTracker;
    type Estimator = ObservingMark;

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, Self>,
    ) -> Result<ProcessContinuation, UserError> {
        let tracker = ctx.tracker()?;
        assert!(tracker.try_claim(0));
        // Outputs are reported to the estimator before delivery; emitting at
        // 40 drags the watermark down from its initial 800.
        ctx.output_with_timestamp("low".to_owned(), Timestamp::from_millis(40))?;
        assert_eq!(
            ctx.watermark_estimator()?.current_watermark(),
            Timestamp::from_millis(40)
        );
        assert!(tracker.try_claim(1));
        Ok(ProcessContinuation::stop())
    }

    fn new_tracker(&self, restriction: OffsetRange) -> OffsetTracker {
        OffsetTracker::new(restriction)
    }

    fn new_estimator(&self, state: Timestamp) -> ObservingMark {
        ObservingMark { mark: state }
    }
}

#[test]
fn observing_estimators_see_output_timestamps_before_delivery() {
    let (consumers, seen) = recording_consumers(&["out"]);
    let mut runner = TransformRunner::new(
        ObservingFixture,
        FnDescriptor::for_urn(urns::PROCESS_SIZED_ELEMENTS_AND_RESTRICTIONS),
        WireConfig::new("t", "in").with_input_coder(full_coder::<ObservingFixture>()),
        null_host(consumers),
    )
    .unwrap();

    let value = SplitElement {
        element: "e".to_owned(),
        restriction: OffsetRange::new(0, 2),
        estimator_state: Timestamp::from_millis(800),
    };
    let input: SplitInput<ObservingFixture> = WindowedValue::new(
        sized(value),
        Timestamp::from_millis(40),
        [window(0)],
        PaneInfo::ON_TIME,
    );
    runner.process_sized_element(input).unwrap();
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].1.value, "low");
}
