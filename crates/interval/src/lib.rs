//! Merging of byte ranges touched during a single intercepted call.

use std::fmt;
use std::slice;

/// Observations closer than this many bytes are merged into one.
pub const MERGE_THRESHOLD: u64 = 256;

pub trait Bound: Copy + Ord + Default + fmt::Debug {
    fn saturating_add(self, rhs: Self) -> Self;
    fn saturating_sub(self, rhs: Self) -> Self;
}

macro_rules! impl_bound {
    ($($t: ty),*) => {
        $(
            impl Bound for $t {
                fn saturating_add(self, rhs: Self) -> Self {
                    <$t>::saturating_add(self, rhs)
                }

                fn saturating_sub(self, rhs: Self) -> Self {
                    <$t>::saturating_sub(self, rhs)
                }
            }
        )*
    };
}

impl_bound!(u16, u32, u64, usize);

/// Half-open range `[start, end)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interval<T> {
    pub start: T,
    pub end: T,
}

impl<T: Bound> Interval<T> {
    pub fn new(start: T, end: T) -> Self {
        debug_assert!(start <= end, "interval start past its end");
        Self { start, end }
    }

    pub fn from_base_size(base: T, size: T) -> Self {
        Self::new(base, base.saturating_add(size))
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, value: T) -> bool {
        self.start <= value && value < self.end
    }

    /// True if the gap between the two intervals is no larger than `threshold`.
    fn is_near(&self, other: &Self, threshold: T) -> bool {
        self.start <= other.end.saturating_add(threshold)
            && other.start <= self.end.saturating_add(threshold)
    }
}

impl<T: fmt::Debug> fmt::Debug for Interval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}, {:?})", self.start, self.end)
    }
}

/// An address-ordered set of non-overlapping intervals.
///
/// No two stored intervals are within `threshold` of each other; inserting an
/// interval close to existing ones coalesces them.
#[derive(Clone, Debug)]
pub struct IntervalList<T> {
    intervals: Vec<Interval<T>>,
    threshold: T,
}

impl<T: Bound> IntervalList<T> {
    pub fn new(threshold: T) -> Self {
        Self { intervals: Vec::new(), threshold }
    }

    pub fn threshold(&self) -> T {
        self.threshold
    }

    /// Inserts `interval`, coalescing it with every stored interval it is
    /// near. Empty intervals are ignored.
    pub fn merge(&mut self, interval: Interval<T>) {
        if interval.is_empty() {
            return;
        }

        let threshold = self.threshold;
        // First stored interval whose end (plus threshold) reaches the new start.
        let first = self.intervals
            .partition_point(|i| i.end.saturating_add(threshold) < interval.start);
        // One past the last stored interval whose start is near the new end.
        let last = self.intervals
            .partition_point(|i| i.start <= interval.end.saturating_add(threshold));

        if first >= last {
            self.intervals.insert(first, interval);
            return;
        }

        debug_assert!(self.intervals[first].is_near(&interval, threshold));
        let start = interval.start.min(self.intervals[first].start);
        let end = interval.end.max(self.intervals[last - 1].end);

        self.intervals[first] = Interval::new(start, end);
        self.intervals.drain(first + 1..last);
    }

    pub fn count(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Interval<T>> {
        self.intervals.iter()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Moves the stored intervals out, leaving the list empty.
    pub fn take(&mut self) -> Vec<Interval<T>> {
        std::mem::take(&mut self.intervals)
    }
}

impl<'a, T: Bound> IntoIterator for &'a IntervalList<T> {
    type Item = &'a Interval<T>;
    type IntoIter = slice::Iter<'a, Interval<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    use crate::{Interval, IntervalList, MERGE_THRESHOLD};

    fn list(threshold: u64, ranges: &[(u64, u64)]) -> IntervalList<u64> {
        let mut list = IntervalList::new(threshold);
        for (start, end) in ranges {
            list.merge(Interval::new(*start, *end));
        }
        list
    }

    fn collect(list: &IntervalList<u64>) -> Vec<(u64, u64)> {
        list.iter().map(|i| (i.start, i.end)).collect()
    }

    #[test]
    fn nearby_intervals_merge_under_the_default_threshold() {
        let list = list(MERGE_THRESHOLD, &[(0, 10), (20, 30)]);

        assert_eq!(collect(&list), vec![(0, 30)]);
    }

    #[test]
    fn distant_intervals_stay_apart_under_a_small_threshold() {
        let list = list(5, &[(0, 10), (20, 30)]);

        assert_eq!(list.count(), 2);
        assert_eq!(collect(&list), vec![(0, 10), (20, 30)]);
    }

    #[test]
    fn a_gap_equal_to_the_threshold_is_merged() {
        let list = list(5, &[(0, 10), (15, 20)]);

        assert_eq!(collect(&list), vec![(0, 20)]);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let forward = list(0, &[(0, 4), (10, 14), (20, 24), (4, 10)]);
        let backward = list(0, &[(4, 10), (20, 24), (10, 14), (0, 4)]);

        assert_eq!(collect(&forward), vec![(0, 14), (20, 24)]);
        assert_eq!(collect(&forward), collect(&backward));
    }

    #[test]
    fn one_interval_can_bridge_many() {
        let list = list(0, &[(0, 2), (4, 6), (8, 10), (12, 14), (1, 13)]);

        assert_eq!(collect(&list), vec![(0, 14)]);
    }

    #[test]
    fn empty_intervals_are_ignored() {
        let list = list(MERGE_THRESHOLD, &[(40, 40), (0, 0)]);

        assert!(list.is_empty());
    }

    #[test]
    fn clear_empties_the_list() {
        let mut list = list(0, &[(0, 4), (100, 140)]);
        list.clear();

        assert_eq!(list.count(), 0);
    }

    #[test]
    fn random_insertions_keep_the_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for round in 0..200 {
            let threshold = [0u64, 1, 16, 256][round % 4];
            let mut list = IntervalList::new(threshold);
            let mut covered = vec![false; 4096];

            for _ in 0..rng.gen_range(1..40) {
                let start = rng.gen_range(0..4000u64);
                let size = rng.gen_range(0..96u64);
                list.merge(Interval::from_base_size(start, size));
                for b in start..start + size {
                    covered[b as usize] = true;
                }
            }

            let merged = collect(&list);
            for pair in merged.windows(2) {
                assert!(pair[0].1 + threshold < pair[1].0, "{:?} too close", pair);
            }

            // Every inserted byte is covered, and every merged interval starts
            // and ends on inserted bytes.
            for (b, was_covered) in covered.iter().enumerate() {
                if *was_covered {
                    assert!(merged.iter().any(|(s, e)| (*s..*e).contains(&(b as u64))));
                }
            }
            for (start, end) in merged {
                assert!(covered[start as usize]);
                assert!(covered[end as usize - 1]);
            }
        }
    }
}
