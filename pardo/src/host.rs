//! Capabilities provided by the enclosing worker harness.
//!
//! The execution core drives exactly one transform; everything around it —
//! downstream consumers, the remote state channel, side input materialization,
//! the outgoing timer stream, split reporting, progress reporting, bundle
//! finalization — is owned by the harness and reached through the small traits
//! in this module. The `Null*` implementations stand in for capabilities a
//! particular transform does not use.

use std::collections::HashMap;

use crate::error::{Error, UserError};
use crate::time::Timestamp;
use crate::timers::TimerRecord;
use crate::window::{Window, WindowedValue};
use crate::wire::{BundleApplication, DelayedBundleApplication};

/// The registry of downstream consumers, one per output tag.
pub struct Consumers<O, W: Window> {
    receivers: HashMap<String, Box<dyn FnMut(WindowedValue<O, W>)>>,
}

impl<O, W: Window> Default for Consumers<O, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O, W: Window> Consumers<O, W> {
    /// An empty registry.
    pub fn new() -> Self {
        Consumers { receivers: HashMap::new() }
    }

    /// Registers the consumer for one output tag, replacing any previous one.
    pub fn register<F>(&mut self, tag: impl Into<String>, receiver: F)
    where
        F: FnMut(WindowedValue<O, W>) + 'static,
    {
        self.receivers.insert(tag.into(), Box::new(receiver));
    }

    /// Whether a consumer is registered for `tag`.
    pub fn contains(&self, tag: &str) -> bool {
        self.receivers.contains_key(tag)
    }

    /// Delivers one value to the consumer registered for `tag`.
    pub(crate) fn send(&mut self, tag: &str, value: WindowedValue<O, W>) -> Result<(), Error> {
        match self.receivers.get_mut(tag) {
            Some(receiver) => {
                receiver(value);
                Ok(())
            }
            None => Err(Error::UnknownOutput(tag.to_owned())),
        }
    }
}

/// A bag of encoded values held by the remote state channel.
pub trait BagState: std::fmt::Debug {
    /// Reads the bag's contents.
    fn read(&mut self) -> Result<Vec<Vec<u8>>, Error>;
    /// Appends one encoded value.
    fn append(&mut self, value: Vec<u8>) -> Result<(), Error>;
    /// Empties the bag.
    fn clear(&mut self) -> Result<(), Error>;
}

/// Keyed, windowed state reached over the remote state channel.
pub trait StateAccessor<K, W: Window> {
    /// The bag for one state id under the given key and window.
    fn bag(&mut self, state_id: &str, key: &K, window: &W) -> Result<&mut dyn BagState, Error>;

    /// Flushes pending writes; invoked once per bundle after the user
    /// finish-bundle hook and the timer flush.
    fn finalize(&mut self) -> Result<(), Error>;
}

/// Materialized side input views, by view id and window.
pub trait SideInputAccessor<W: Window> {
    /// The encoded side input value for `view` in `window`.
    fn get(&mut self, view: &str, window: &W) -> Result<Vec<u8>, Error>;
}

/// The outgoing stream of timer records, by timer family local name.
pub trait TimerSink<K, W: Window> {
    /// Receives one final timer record of the bundle.
    fn receive(&mut self, family_or_id: &str, record: TimerRecord<K, W>) -> Result<(), Error>;
}

/// Where self-initiated splits report their roots.
pub trait SplitListener {
    /// Receives the primary and residual roots of one split.
    fn split(
        &mut self,
        primary_roots: Vec<BundleApplication>,
        residual_roots: Vec<DelayedBundleApplication>,
    );
}

/// The per-bundle progress report, keyed by metric short id.
pub trait ProgressSink {
    /// Records the encoded progress payload for one short id.
    fn update(&mut self, short_id: &str, encoded: Vec<u8>);
}

impl ProgressSink for HashMap<String, Vec<u8>> {
    fn update(&mut self, short_id: &str, encoded: Vec<u8>) {
        self.insert(short_id.to_owned(), encoded);
    }
}

/// A callback to run after the bundle's outputs are durably committed.
pub type FinalizeCallback = Box<dyn FnOnce() -> Result<(), UserError> + Send>;

/// Registration of end-of-bundle callbacks on behalf of user code.
pub trait BundleFinalizer {
    /// Registers `callback` to run after commit, valid until `expiry`.
    fn after_bundle_commit(&mut self, expiry: Timestamp, callback: FinalizeCallback);
}

/// A state accessor for transforms that declare no state.
pub struct NullState;

impl<K, W: Window> StateAccessor<K, W> for NullState {
    fn bag(&mut self, state_id: &str, _key: &K, _window: &W) -> Result<&mut dyn BagState, Error> {
        Err(Error::Unsupported(format!("no state channel is plumbed for state id `{state_id}`")))
    }

    fn finalize(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// A side input accessor for transforms that declare no side inputs.
pub struct NoSideInputs;

impl<W: Window> SideInputAccessor<W> for NoSideInputs {
    fn get(&mut self, view: &str, _window: &W) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported(format!("no side input is plumbed for view `{view}`")))
    }
}

/// A timer sink that rejects every record, for transforms without timers.
pub struct NullTimerSink;

impl<K, W: Window> TimerSink<K, W> for NullTimerSink {
    fn receive(&mut self, family_or_id: &str, _record: TimerRecord<K, W>) -> Result<(), Error> {
        Err(Error::Config(format!("no timer sink is plumbed for `{family_or_id}`")))
    }
}

/// A split listener that discards reported roots.
pub struct NullSplitListener;

impl SplitListener for NullSplitListener {
    fn split(
        &mut self,
        _primary_roots: Vec<BundleApplication>,
        _residual_roots: Vec<DelayedBundleApplication>,
    ) {
    }
}

/// A finalizer that drops registered callbacks.
pub struct NullFinalizer;

impl BundleFinalizer for NullFinalizer {
    fn after_bundle_commit(&mut self, _expiry: Timestamp, _callback: FinalizeCallback) {}
}
