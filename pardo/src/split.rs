//! Computing dynamic splits over windows and restrictions.
//!
//! A split request carries a fraction of the *remaining* work that the runner
//! would like back. With every window of the current element weighed as one
//! unit of work, the request either lands beyond the window being processed —
//! in which case whole trailing windows are returned and no restriction is
//! touched — or inside it, in which case the restriction tracker is asked to
//! split at the corresponding fraction of its own remainder.
//!
//! [`choose_split`] makes that decision from numbers alone; assembling the
//! four split roots and committing the new stop index happens in the runner,
//! under its split lock.

use crate::progress::Progress;
use crate::userfn::Restriction;
use crate::window::{Window, WindowedValue};
use crate::wire::SplitResult;

/// An element paired with its restriction and watermark estimator state.
///
/// This is the value type of splittable transform inputs, and of the primary
/// and residual roots shipped back to the runner.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SplitElement<E, R, S> {
    /// The element being processed.
    pub element: E,
    /// The portion of the element's work this value describes.
    pub restriction: R,
    /// The watermark estimator state to resume from.
    pub estimator_state: S,
}

/// Where a requested split landed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SplitDecision {
    /// Keep whole windows up to `new_stop_index`; return the rest. The
    /// restriction is untouched.
    WindowBoundary {
        /// The first window index to hand back.
        new_stop_index: usize,
    },
    /// Split the current element's restriction at `fraction` of its own
    /// remaining work; windows from `new_stop_index` onward are handed back
    /// untouched.
    ElementSplit {
        /// Fraction of the element's remaining work to give away.
        fraction: f64,
        /// One past the current window index.
        new_stop_index: usize,
    },
}

/// Decides between a window-boundary split and an element split.
///
/// `element_progress` is the tracker's own measure for the current window;
/// `current_index` and `stop_index` delimit the live windows. The decision
/// scales the fraction over all remaining work, one unit per window, and
/// prefers to keep at least one window of residual when rounding to a
/// boundary.
pub fn choose_split(
    element_progress: Progress,
    fraction_of_remainder: f64,
    current_index: usize,
    stop_index: usize,
) -> SplitDecision {
    debug_assert!(current_index < stop_index);
    if current_index + 1 == stop_index {
        // The last live window: nothing beyond it to return.
        return SplitDecision::ElementSplit {
            fraction: fraction_of_remainder,
            new_stop_index: stop_index,
        };
    }

    let completed = element_progress.fraction_completed();
    let remaining = 1.0 - completed;
    let scaled_remaining = stop_index as f64 - current_index as f64 - completed;
    let scaled_fraction = fraction_of_remainder * scaled_remaining;

    if scaled_fraction > remaining {
        // The split point falls beyond the current window; round to the
        // nearest boundary, clamped so both sides keep at least one window.
        let boundary = (current_index as f64 + completed + scaled_fraction).round() as usize;
        let new_stop_index = boundary.clamp(current_index + 1, stop_index - 1);
        SplitDecision::WindowBoundary { new_stop_index }
    } else {
        let fraction = if remaining > 0.0 { scaled_fraction / remaining } else { 0.0 };
        SplitDecision::ElementSplit { fraction, new_stop_index: current_index + 1 }
    }
}

/// The four optional roots of a windowed split.
///
/// Together the roots cover the element's original window set exactly: fully
/// processed windows stay with the primary, unprocessed windows go back to
/// the runner whole, and when the restriction itself was split the current
/// window appears once on each side with its half of the restriction.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowedSplitResult<V, W: Window> {
    /// The element over windows this bundle has processed or will process in
    /// full.
    pub primary_in_fully_processed_windows: Option<WindowedValue<V, W>>,
    /// The primary half of the current window's restriction split.
    pub primary_split_root: Option<WindowedValue<V, W>>,
    /// The residual half of the current window's restriction split.
    pub residual_split_root: Option<WindowedValue<V, W>>,
    /// The element over windows this bundle will not touch.
    pub residual_in_unprocessed_windows: Option<WindowedValue<V, W>>,
}

/// A windowed split plus the stop index to commit and, for transforms that
/// delegate element splitting downstream, the delegate's own split result.
#[derive(Debug)]
pub struct SplitResultsWithStopIndex<V, W: Window> {
    /// The windowed roots of the split.
    pub windowed: WindowedSplitResult<V, W>,
    /// The downstream element split, when a delegate performed it.
    pub downstream: Option<SplitResult>,
    /// The new stop index for the window cursor.
    pub new_stop_index: usize,
}

/// Element splitting delegated across a component boundary.
///
/// Transforms that do not track a restriction of their own — truncation
/// wrappers around another splittable stage — forward element splits to the
/// stage downstream and only handle the window arithmetic locally.
pub trait DownstreamSplitter: Send {
    /// The downstream stage's progress through the current element.
    fn progress(&self) -> Progress;

    /// Asks the downstream stage to split at the given fraction of its
    /// remaining work.
    fn try_split(&mut self, fraction_of_remainder: f64) -> Option<SplitResult>;
}

/// Weighs a split-element value by its restriction's size hint.
pub fn sized<E: Clone, R: Restriction, S: Clone>(value: SplitElement<E, R, S>) -> (SplitElement<E, R, S>, f64) {
    let size = value.restriction.size();
    (value, size)
}
