//! Work progress measures and their wire encoding.
//!
//! A restriction tracker reports how much work it has finished and how much it
//! believes remains as a pair of non-negative reals. When an element lives in
//! several windows the pair is rescaled so that each window contributes one
//! unit of work: a tracker halfway through the third of five windows reports
//! 2.5 units completed and 2.5 remaining.

use byteorder::{BigEndian, WriteBytesExt};

/// A snapshot of work completed and work remaining.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    completed: f64,
    remaining: f64,
}

impl Progress {
    /// Builds a progress snapshot from non-negative work measures.
    pub fn new(completed: f64, remaining: f64) -> Self {
        assert!(
            completed >= 0.0 && remaining >= 0.0,
            "progress must be non-negative, got ({completed}, {remaining})"
        );
        Progress { completed, remaining }
    }

    /// Work already completed, in the reporter's own units.
    #[inline]
    pub fn completed(&self) -> f64 {
        self.completed
    }

    /// Work believed to remain, in the reporter's own units.
    #[inline]
    pub fn remaining(&self) -> f64 {
        self.remaining
    }

    /// The completed fraction of the element's own work, in `[0, 1]`.
    ///
    /// An empty measure (zero completed, zero remaining) counts as nothing
    /// done rather than dividing by zero.
    pub fn fraction_completed(&self) -> f64 {
        let total = self.completed + self.remaining;
        if total > 0.0 {
            self.completed / total
        } else {
            0.0
        }
    }

    /// Rescales element progress across a span of windows.
    ///
    /// Window `current_index` is in flight and windows up to `stop_index`
    /// remain to be processed; each window counts as one unit of work.
    pub fn scale_to_windows(&self, current_index: usize, stop_index: usize) -> Progress {
        let completed = current_index as f64 + self.fraction_completed();
        Progress {
            completed,
            remaining: stop_index as f64 - completed,
        }
    }
}

/// Encodes a progress measure for the wire.
///
/// The format is a single-element sequence of IEEE-754 doubles: a big-endian
/// element count of one followed by the big-endian double itself.
pub fn encode_progress(value: f64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.write_i32::<BigEndian>(1).expect("writes to Vec<u8> are infallible");
    buf.write_f64::<BigEndian>(value).expect("writes to Vec<u8> are infallible");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_counts_one_unit_per_window() {
        // Ninety percent through the first of three windows.
        let scaled = Progress::new(0.9, 0.1).scale_to_windows(0, 3);
        assert!((scaled.completed() - 0.9).abs() < 1e-9);
        assert!((scaled.remaining() - 2.1).abs() < 1e-9);

        // Halfway through the third of five windows.
        let scaled = Progress::new(5.0, 5.0).scale_to_windows(2, 5);
        assert!((scaled.completed() - 2.5).abs() < 1e-9);
        assert!((scaled.remaining() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn empty_measures_do_not_divide_by_zero() {
        let scaled = Progress::new(0.0, 0.0).scale_to_windows(1, 4);
        assert_eq!(scaled.completed(), 1.0);
        assert_eq!(scaled.remaining(), 3.0);
    }

    #[test]
    fn encoding_is_a_single_big_endian_double() {
        let bytes = encode_progress(2.5);
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..], &2.5f64.to_be_bytes());
    }
}
