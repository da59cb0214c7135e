//! Wire-facing descriptions of split outcomes.
//!
//! When work is handed back to the runner it travels as encoded bundle
//! applications: the primary roots describe what this worker keeps, the
//! residual roots what the runner should schedule elsewhere, each with the
//! element encoded by the full input coder. Instants on the wire are split
//! into seconds and nanoseconds, derived from milliseconds with floor
//! semantics so the nanosecond component is always non-negative.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// An instant as seconds and nanoseconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTimestamp {
    /// Whole seconds since the epoch; negative before it.
    pub seconds: i64,
    /// Nanoseconds within the second, in `[0, 1_000_000_000)`.
    pub nanos: i32,
}

impl WireTimestamp {
    /// Converts a millisecond instant to seconds and nanoseconds.
    pub fn from_timestamp(timestamp: Timestamp) -> Self {
        let millis = timestamp.millis();
        WireTimestamp {
            seconds: millis.div_euclid(1000),
            nanos: (millis.rem_euclid(1000) * 1_000_000) as i32,
        }
    }
}

/// One root of a split: an encoded element re-enterable at a transform input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleApplication {
    /// The transform the element re-enters.
    pub transform_id: String,
    /// The local name of the input it re-enters on.
    pub input_id: String,
    /// The windowed element, encoded with the full input coder.
    pub element: Vec<u8>,
}

/// A residual root, scheduled no earlier than its requested delay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedBundleApplication {
    /// The element to re-process.
    pub application: BundleApplication,
    /// Minimum delay before re-processing, in milliseconds.
    pub requested_time_delay_ms: i64,
    /// Lower bounds on the event times this residual will output, per output.
    pub output_watermarks: BTreeMap<String, WireTimestamp>,
}

/// The outcome of a dynamic split, as reported to the enclosing framework.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitResult {
    /// Work this worker keeps, in order.
    pub primary_roots: Vec<BundleApplication>,
    /// Work handed back to the runner, in order.
    pub residual_roots: Vec<DelayedBundleApplication>,
}

impl SplitResult {
    /// Whether the split produced no roots at all.
    pub fn is_empty(&self) -> bool {
        self.primary_roots.is_empty() && self.residual_roots.is_empty()
    }

    /// Appends another split's roots, preserving order.
    pub fn merge(&mut self, other: SplitResult) {
        self.primary_roots.extend(other.primary_roots);
        self.residual_roots.extend(other.residual_roots);
    }
}
