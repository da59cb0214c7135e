//! Timer records and the in-bundle buffer of timer modifications.
//!
//! Timers set, overwritten, and cleared while a bundle runs are not shipped
//! to the runner one by one. They accumulate in a [`TimerBundleTracker`],
//! keyed by user key and window, and only the *final* state of each
//! `(family, tag)` slot is emitted when the bundle finishes. A cleared timer
//! is emitted as a tombstone record so the runner can drop its own copy, and
//! a buffered timer that fires inline during the bundle is tombstoned first
//! so a later redelivery of the same firing is recognized as stale.
//!
//! Within each key and window the buffered timers are additionally held in
//! fire-timestamp order per time domain, which is what lets timer delivery
//! drain "everything scheduled at or before this firing" cheaply.

pub mod handle;

pub use handle::{Timer, TimerFamily};

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::time::{TimeDomain, Timestamp};
use crate::window::{PaneInfo, Window};

/// Prefix distinguishing timer-family local names from plain timer ids.
pub const TIMER_FAMILY_PREFIX: &str = "tfs-";

/// Whether a local name designates a timer family rather than a plain timer.
pub fn is_timer_family(family_or_id: &str) -> bool {
    family_or_id.starts_with(TIMER_FAMILY_PREFIX)
}

/// One timer modification: a set or, when `cleared`, a tombstone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord<K, W: Window> {
    /// The user key the timer belongs to.
    pub key: K,
    /// The declared local name: a plain timer id or a `tfs-`-prefixed family.
    pub family_or_id: String,
    /// The per-tag discriminator within a family; empty for plain timers.
    pub dynamic_tag: String,
    /// The windows the timer is scheduled in.
    pub windows: SmallVec<[W; 2]>,
    /// When the timer fires.
    pub fire_timestamp: Timestamp,
    /// The output watermark hold while the timer is pending.
    pub hold_timestamp: Timestamp,
    /// The pane of the element or firing that set the timer.
    pub pane: PaneInfo,
    /// Which clock the fire timestamp refers to.
    pub domain: TimeDomain,
    /// True for tombstones: the timer was cleared or already fired inline.
    pub cleared: bool,
}

type SlotId = (String, String);
type FireOrder = (Timestamp, String, String);

#[derive(Debug)]
struct CellModifications<K, W: Window> {
    by_id: HashMap<SlotId, TimerRecord<K, W>>,
    event_time: BTreeSet<FireOrder>,
    processing_time: BTreeSet<FireOrder>,
}

impl<K, W: Window> CellModifications<K, W> {
    fn new() -> Self {
        CellModifications {
            by_id: HashMap::new(),
            event_time: BTreeSet::new(),
            processing_time: BTreeSet::new(),
        }
    }

    fn ordered(&mut self, domain: TimeDomain) -> &mut BTreeSet<FireOrder> {
        match domain {
            TimeDomain::EventTime => &mut self.event_time,
            TimeDomain::ProcessingTime => &mut self.processing_time,
        }
    }
}

/// Buffers the timer modifications of one bundle.
///
/// `K` is the user key type and `W` the window type; together with the
/// family-or-id and dynamic tag they address one timer slot. Later
/// modifications to a slot overwrite earlier ones.
#[derive(Debug)]
pub struct TimerBundleTracker<K, W: Window> {
    cells: HashMap<(K, W), CellModifications<K, W>>,
}

impl<K: Clone + Eq + Hash, W: Window> Default for TimerBundleTracker<K, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash, W: Window> TimerBundleTracker<K, W> {
    /// An empty buffer for a fresh bundle.
    pub fn new() -> Self {
        TimerBundleTracker { cells: HashMap::new() }
    }

    /// Records a timer modification, overwriting any earlier modification of
    /// the same slot. Multi-window records are buffered per window.
    pub fn record_set(&mut self, record: TimerRecord<K, W>) {
        for window in record.windows.clone() {
            let mut single = record.clone();
            single.windows = std::iter::once(window.clone()).collect();
            let cell = self
                .cells
                .entry((record.key.clone(), window))
                .or_insert_with(CellModifications::new);
            let slot = (single.family_or_id.clone(), single.dynamic_tag.clone());
            if let Some(previous) = cell.by_id.get(&slot) {
                let (stale_domain, stale_fire) = (previous.domain, previous.fire_timestamp);
                cell.ordered(stale_domain).remove(&(stale_fire, slot.0.clone(), slot.1.clone()));
            }
            if !single.cleared {
                cell.ordered(single.domain).insert((
                    single.fire_timestamp,
                    slot.0.clone(),
                    slot.1.clone(),
                ));
            }
            cell.by_id.insert(slot, single);
        }
    }

    /// Records a tombstone for a slot, whether or not it was set earlier in
    /// this bundle.
    pub fn record_clear(
        &mut self,
        key: K,
        window: W,
        family_or_id: &str,
        dynamic_tag: &str,
        domain: TimeDomain,
    ) {
        self.record_set(TimerRecord {
            key,
            family_or_id: family_or_id.to_owned(),
            dynamic_tag: dynamic_tag.to_owned(),
            windows: std::iter::once(window).collect(),
            fire_timestamp: Timestamp::MIN,
            hold_timestamp: Timestamp::MIN,
            pane: PaneInfo::UNKNOWN,
            domain,
            cleared: true,
        });
    }

    /// The current modification of a slot, if any.
    pub fn modification(
        &self,
        key: &K,
        window: &W,
        family_or_id: &str,
        dynamic_tag: &str,
    ) -> Option<&TimerRecord<K, W>> {
        self.cells
            .get(&(key.clone(), window.clone()))
            .and_then(|cell| cell.by_id.get(&(family_or_id.to_owned(), dynamic_tag.to_owned())))
    }

    /// Removes and returns the earliest buffered timer of `domain` in the
    /// given key and window firing at or before `limit`, leaving a tombstone
    /// in its slot.
    ///
    /// The tombstone makes an independent redelivery of the same firing by
    /// the runner recognizable as already handled. Callers fire the returned
    /// record inline and call again, since firing may buffer new timers at or
    /// before the limit.
    pub fn pop_earlier(
        &mut self,
        key: &K,
        window: &W,
        domain: TimeDomain,
        limit: Timestamp,
    ) -> Option<TimerRecord<K, W>> {
        let cell = self.cells.get_mut(&(key.clone(), window.clone()))?;
        let earliest = cell.ordered(domain).iter().next().cloned()?;
        if earliest.0 > limit {
            return None;
        }
        cell.ordered(domain).remove(&earliest);
        let slot = (earliest.1, earliest.2);
        let record = cell.by_id.get(&slot).cloned()?;
        let mut tombstone = record.clone();
        tombstone.cleared = true;
        cell.by_id.insert(slot, tombstone);
        Some(record)
    }

    /// Whether any modification is buffered.
    pub fn is_empty(&self) -> bool {
        self.cells.values().all(|cell| cell.by_id.is_empty())
    }

    /// Drains the final per-slot records of the bundle, tombstones included,
    /// ordered by time domain and fire timestamp.
    pub fn drain(&mut self) -> Vec<TimerRecord<K, W>> {
        self.cells
            .drain()
            .flat_map(|(_, cell)| cell.by_id.into_values())
            .sorted_by(|a, b| {
                (a.domain, a.fire_timestamp, &a.family_or_id, &a.dynamic_tag).cmp(&(
                    b.domain,
                    b.fire_timestamp,
                    &b.family_or_id,
                    &b.dynamic_tag,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::IntervalWindow;

    fn window() -> IntervalWindow {
        IntervalWindow::new(Timestamp::from_millis(0), Timestamp::from_millis(1000))
    }

    fn record(fire: i64) -> TimerRecord<String, IntervalWindow> {
        TimerRecord {
            key: "k".to_owned(),
            family_or_id: "gc".to_owned(),
            dynamic_tag: String::new(),
            windows: SmallVec::from_slice(&[window()]),
            fire_timestamp: Timestamp::from_millis(fire),
            hold_timestamp: Timestamp::from_millis(fire),
            pane: PaneInfo::ON_TIME,
            domain: TimeDomain::EventTime,
            cleared: false,
        }
    }

    #[test]
    fn later_sets_overwrite_earlier_ones() {
        let mut tracker = TimerBundleTracker::new();
        tracker.record_set(record(100));
        tracker.record_set(record(200));

        let drained = tracker.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].fire_timestamp, Timestamp::from_millis(200));
    }

    #[test]
    fn overwriting_removes_the_stale_ordered_entry() {
        let mut tracker = TimerBundleTracker::new();
        tracker.record_set(record(100));
        tracker.record_set(record(200));

        // Nothing fires at or before 150: the entry at 100 is gone.
        let key = "k".to_owned();
        assert!(tracker
            .pop_earlier(&key, &window(), TimeDomain::EventTime, Timestamp::from_millis(150))
            .is_none());
        assert!(tracker
            .pop_earlier(&key, &window(), TimeDomain::EventTime, Timestamp::from_millis(250))
            .is_some());
    }

    #[test]
    fn pop_earlier_leaves_a_tombstone() {
        let mut tracker = TimerBundleTracker::new();
        tracker.record_set(record(100));

        let key = "k".to_owned();
        let fired = tracker
            .pop_earlier(&key, &window(), TimeDomain::EventTime, Timestamp::from_millis(100))
            .expect("timer at 100 fires at limit 100");
        assert!(!fired.cleared);

        let slot = tracker.modification(&key, &window(), "gc", "").expect("tombstone buffered");
        assert!(slot.cleared);

        let drained = tracker.drain();
        assert_eq!(drained.len(), 1);
        assert!(drained[0].cleared);
    }

    #[test]
    fn clears_are_tombstones_even_without_a_prior_set() {
        let mut tracker: TimerBundleTracker<String, IntervalWindow> = TimerBundleTracker::new();
        tracker.record_clear("k".to_owned(), window(), "gc", "", TimeDomain::EventTime);

        let drained = tracker.drain();
        assert_eq!(drained.len(), 1);
        assert!(drained[0].cleared);
        assert_eq!(drained[0].family_or_id, "gc");
    }

    #[test]
    fn drain_orders_by_domain_then_fire_timestamp() {
        let mut tracker = TimerBundleTracker::new();
        let mut processing = record(50);
        processing.family_or_id = "poll".to_owned();
        processing.domain = TimeDomain::ProcessingTime;
        tracker.record_set(processing);
        tracker.record_set(record(100));
        let mut other = record(40);
        other.family_or_id = "early".to_owned();
        tracker.record_set(other);

        let drained = tracker.drain();
        let names: Vec<_> = drained.iter().map(|r| r.family_or_id.as_str()).collect();
        assert_eq!(names, ["early", "gc", "poll"]);
    }

    #[test]
    fn family_prefix_is_recognized() {
        assert!(is_timer_family("tfs-retries"));
        assert!(!is_timer_family("gc"));
    }
}
