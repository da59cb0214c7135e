//! Observation adapters around user-provided splittable components.
//!
//! The split thread needs two things from user machinery it must never race
//! with: whether the current tracker has ever claimed anything, and an
//! internally consistent `(watermark, state)` pair from the estimator. Both
//! are provided here by wrapping the user's objects rather than asking user
//! code to be thread-aware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::UserError;
use crate::progress::Progress;
use crate::time::Timestamp;
use crate::userfn::{RestrictionTracker, WatermarkEstimator};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A restriction tracker that records whether any claim ever succeeded.
///
/// The flag is written lazily: only the first successful claim stores, and
/// the split thread reads it with acquire ordering. A checkpoint request that
/// arrives before any claim observes `false` and declines to split.
pub struct ClaimObserving<T> {
    tracker: T,
    claimed: Arc<AtomicBool>,
}

impl<T: RestrictionTracker> ClaimObserving<T> {
    /// Wraps `tracker`, reporting successful claims through `claimed`.
    pub fn new(tracker: T, claimed: Arc<AtomicBool>) -> Self {
        ClaimObserving { tracker, claimed }
    }

    /// Claims a position, recording the first success.
    pub fn try_claim(&mut self, position: T::Position) -> bool {
        let ok = self.tracker.try_claim(position);
        if ok && !self.claimed.load(Ordering::Relaxed) {
            self.claimed.store(true, Ordering::Release);
        }
        ok
    }
}

/// A shareable handle to the current element's observed tracker.
///
/// Clones are cheap and refer to the same tracker; the processing thread
/// claims through one clone while the split thread splits through another.
/// The two paths synchronize on the tracker's own mutex, not on the split
/// lock, so claims never wait on an in-flight split decision's bookkeeping.
pub struct TrackerHandle<T: RestrictionTracker> {
    inner: Arc<Mutex<ClaimObserving<T>>>,
}

impl<T: RestrictionTracker> Clone for TrackerHandle<T> {
    fn clone(&self) -> Self {
        TrackerHandle { inner: Arc::clone(&self.inner) }
    }
}

impl<T: RestrictionTracker> TrackerHandle<T> {
    /// Wraps an observed tracker for shared access.
    pub fn new(observed: ClaimObserving<T>) -> Self {
        TrackerHandle { inner: Arc::new(Mutex::new(observed)) }
    }

    /// Attempts to claim `position`; see [`RestrictionTracker::try_claim`].
    pub fn try_claim(&self, position: T::Position) -> bool {
        lock(&self.inner).try_claim(position)
    }

    /// The restriction as currently constrained by claims and splits.
    pub fn current_restriction(&self) -> T::Restriction {
        lock(&self.inner).tracker.current_restriction()
    }

    /// Splits off a fraction of the remaining work.
    pub fn try_split(&self, fraction_of_remainder: f64) -> Option<(T::Restriction, T::Restriction)> {
        lock(&self.inner).tracker.try_split(fraction_of_remainder)
    }

    /// Fails unless the restriction was fully claimed.
    pub fn check_done(&self) -> Result<(), UserError> {
        lock(&self.inner).tracker.check_done()
    }

    /// The tracker's own progress estimate, when it has one.
    pub fn progress(&self) -> Option<Progress> {
        lock(&self.inner).tracker.progress()
    }
}

/// A watermark estimator wrapped for concurrent observation.
///
/// `watermark_and_state` reads both halves under a single lock acquisition,
/// so the split thread always captures a pair that some single moment of the
/// estimator could have produced.
pub struct SharedEstimator<E: WatermarkEstimator> {
    inner: Arc<Mutex<E>>,
}

impl<E: WatermarkEstimator> Clone for SharedEstimator<E> {
    fn clone(&self) -> Self {
        SharedEstimator { inner: Arc::clone(&self.inner) }
    }
}

impl<E: WatermarkEstimator> SharedEstimator<E> {
    /// Wraps a freshly built estimator.
    pub fn new(estimator: E) -> Self {
        SharedEstimator { inner: Arc::new(Mutex::new(estimator)) }
    }

    /// The current lower bound on future output timestamps.
    pub fn current_watermark(&self) -> Timestamp {
        lock(&self.inner).current_watermark()
    }

    /// An internally consistent `(watermark, state)` pair.
    pub fn watermark_and_state(&self) -> (Timestamp, E::State) {
        let guard = lock(&self.inner);
        (guard.current_watermark(), guard.state())
    }

    /// Reports an output timestamp to the estimator.
    pub fn observe_timestamp(&self, timestamp: Timestamp) {
        lock(&self.inner).observe_timestamp(timestamp);
    }

    /// Whether outputs should be reported before delivery.
    pub fn observes_timestamps(&self) -> bool {
        lock(&self.inner).observes_timestamps()
    }
}
