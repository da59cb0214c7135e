//! Per-transform bundle execution for data-parallel pipeline workers.
//!
//! A pipeline runner hands workers *bundles*: batches of elements and timer
//! firings to be pushed through a user-defined transform. This crate is the
//! runtime for exactly one such transform: it invokes the user's lifecycle
//! hooks element by element and window by window, routes outputs to
//! registered consumers, buffers and fires timers, reaches keyed state over
//! the host's state channel, and — for splittable transforms — walks
//! restrictions under a cooperative tracker so that a concurrent split
//! request from the runner can carve off unstarted work and hand it back.
//!
//! The crate deliberately stops at the transform boundary. Accepting bundles,
//! multiplexing transforms, decoding wire formats, and talking to the state
//! service all belong to the enclosing harness and are reached through the
//! capability traits in [`host`] and [`coder`].
//!
//! # Examples
//!
//! Wiring the simplest possible transform to a runner and pushing one
//! element through a bundle:
//!
//! ```
//! use pardo::context::ProcessContext;
//! use pardo::error::UserError;
//! use pardo::host::{
//!     Consumers, NoSideInputs, NullFinalizer, NullSplitListener, NullState, NullTimerSink,
//! };
//! use pardo::runner::{Host, TransformRunner, WireConfig};
//! use pardo::userfn::{
//!     urns, FnDescriptor, NoEstimator, NoRestriction, NoTracker, ProcessContinuation, TransformFn,
//! };
//! use pardo::window::{GlobalWindow, WindowedValue};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! struct Double;
//!
//! impl TransformFn for Double {
//!     type Element = i64;
//!     type Output = i64;
//!     type Key = ();
//!     type Window = GlobalWindow;
//!     type Restriction = NoRestriction;
//!     type Tracker = NoTracker;
//!     type Estimator = NoEstimator;
//!
//!     fn process_element(
//!         &mut self,
//!         ctx: &mut ProcessContext<'_, Self>,
//!     ) -> Result<ProcessContinuation, UserError> {
//!         let doubled = *ctx.element()? * 2;
//!         ctx.output(doubled)?;
//!         Ok(ProcessContinuation::stop())
//!     }
//!
//!     fn new_tracker(&self, _restriction: NoRestriction) -> NoTracker {
//!         NoTracker
//!     }
//!
//!     fn new_estimator(&self, _state: ()) -> NoEstimator {
//!         NoEstimator
//!     }
//! }
//!
//! # fn main() -> Result<(), pardo::error::Error> {
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! let mut consumers = Consumers::new();
//! consumers.register("out", move |value: WindowedValue<i64, GlobalWindow>| {
//!     sink.borrow_mut().push(value.value);
//! });
//!
//! let mut runner = TransformRunner::new(
//!     Double,
//!     FnDescriptor::for_urn(urns::PAR_DO),
//!     WireConfig::new("double", "in"),
//!     Host {
//!         consumers,
//!         state: Box::new(NullState),
//!         side_inputs: Box::new(NoSideInputs),
//!         timer_sink: Box::new(NullTimerSink),
//!         split_listener: Box::new(NullSplitListener),
//!         finalizer: Box::new(NullFinalizer),
//!     },
//! )?;
//!
//! runner.start_bundle()?;
//! runner.process_element(WindowedValue::in_global_window(21))?;
//! runner.finish_bundle()?;
//! assert_eq!(seen.borrow().as_slice(), &[42]);
//! # Ok(())
//! # }
//! ```

pub mod coder;
pub mod context;
pub mod error;
pub mod host;
pub mod observe;
pub mod progress;
pub mod runner;
pub mod split;
pub mod time;
pub mod timers;
pub mod userfn;
pub mod window;
pub mod wire;

pub use context::{Phase, ProcessContext};
pub use error::{Error, UserError};
pub use progress::Progress;
pub use runner::{Host, SplitHandle, TransformRunner, WireConfig};
pub use time::{Duration, TimeDomain, Timestamp};
pub use userfn::{FnDescriptor, ProcessContinuation, TransformFn};
pub use window::{PaneInfo, Timing, Window, WindowedValue};
