//! Compression of build-side keys into maximal closed intervals.
//!
//! ```text
//!  keys (any order, duplicates)      ranges (sorted, maximal)
//!  20 5 10 7 11 6 10        ──►      starts: [ 5, 10, 20]
//!                                    ends:   [ 7, 11, 20]
//! ```
//!
//! Every integer in `[starts[i], ends[i]]` is a build key, `starts[i] - 1`
//! and `ends[i] + 1` are not, and `ends[i] + 1 < starts[i + 1]`.

use std::fmt;

use tracing::warn;

use crate::Key;
use crate::config::key_capacity;
use crate::error::{Error, Result};
use crate::prefilter::PrefilterBuilder;
use crate::ranges::ExactRangesIndex;

/// Closed interval `[start, end]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Interval {
    pub start: Key,
    pub end: Key,
}

impl Interval {
    pub fn new(start: Key, end: Key) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, key: Key) -> bool {
        self.start <= key && key <= self.end
    }

    /// Number of integers covered.
    pub fn len(&self) -> u64 {
        (i64::from(self.end) - i64::from(self.start) + 1) as u64
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Sorted, non-overlapping, non-adjacent intervals as parallel arrays.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ranges {
    starts: Vec<Key>,
    ends: Vec<Key>,
}

impl Ranges {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Takes already-normalized parallel arrays.
    pub fn from_parts(starts: Vec<Key>, ends: Vec<Key>) -> Self {
        debug_assert_eq!(starts.len(), ends.len());
        debug_assert!(starts.iter().zip(&ends).all(|(s, e)| s <= e));
        debug_assert!(
            starts
                .iter()
                .skip(1)
                .zip(&ends)
                .all(|(&next, &prev_end)| i64::from(next) > i64::from(prev_end) + 1)
        );
        Self { starts, ends }
    }

    pub fn starts(&self) -> &[Key] {
        &self.starts
    }

    pub fn ends(&self) -> &[Key] {
        &self.ends
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<Interval> {
        Some(Interval::new(*self.starts.get(i)?, self.ends[i]))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = Interval> + '_ {
        self.starts
            .iter()
            .zip(&self.ends)
            .map(|(&start, &end)| Interval::new(start, end))
    }

    /// Number of distinct keys covered by all intervals.
    pub fn total_keys(&self) -> u64 {
        self.iter().map(|r| r.len()).sum()
    }
}

/// Append-only key buffer that compresses into [`Ranges`].
#[derive(Clone, Debug)]
pub struct RangeExtractor {
    keys: Vec<Key>,
}

impl RangeExtractor {
    /// Presizes for `expected_keys` (at least 16). The hint only affects
    /// reallocation: if it cannot be reserved the minimum is used instead.
    pub fn new(expected_keys: usize) -> Self {
        let mut keys = Vec::new();
        if keys.try_reserve_exact(key_capacity(expected_keys)).is_err() {
            warn!(expected_keys, "key buffer hint too large, using minimum capacity");
            keys = Vec::with_capacity(key_capacity(0));
        }
        Self { keys }
    }

    /// Appends one build key. Growth doubles the buffer.
    #[inline]
    pub fn add(&mut self, key: Key) -> Result<()> {
        if self.keys.len() == self.keys.capacity() {
            self.keys
                .try_reserve(self.keys.capacity().max(1))
                .map_err(Error::oom("range key buffer"))?;
        }
        self.keys.push(key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Sorts the buffered keys and emits the minimal interval list.
    pub fn build_exact_ranges(&mut self) -> Result<Ranges> {
        if self.keys.is_empty() {
            return Ok(Ranges::empty());
        }
        self.keys.sort_unstable();

        let mut starts = Vec::new();
        let mut ends = Vec::new();

        let mut range_start = self.keys[0];
        let mut range_end = range_start;

        for &x in &self.keys[1..] {
            if x == range_end {
                continue;
            }
            if i64::from(x) == i64::from(range_end) + 1 {
                range_end = x;
            } else {
                push_range(&mut starts, &mut ends, range_start, range_end)?;
                range_start = x;
                range_end = x;
            }
        }
        push_range(&mut starts, &mut ends, range_start, range_end)?;

        starts.shrink_to_fit();
        ends.shrink_to_fit();
        Ok(Ranges { starts, ends })
    }
}

fn push_range(starts: &mut Vec<Key>, ends: &mut Vec<Key>, start: Key, end: Key) -> Result<()> {
    starts.try_reserve(1).map_err(Error::oom("range arrays"))?;
    ends.try_reserve(1).map_err(Error::oom("range arrays"))?;
    starts.push(start);
    ends.push(end);
    Ok(())
}

/// Extracts the intervals of an arbitrary key multiset.
pub fn extract_ranges(keys: impl IntoIterator<Item = Key>) -> Result<Ranges> {
    let keys = keys.into_iter();
    let mut extractor = RangeExtractor::new(keys.size_hint().0);
    for key in keys {
        extractor.add(key)?;
    }
    extractor.build_exact_ranges()
}

impl PrefilterBuilder<Key> for RangeExtractor {
    type Output = ExactRangesIndex;

    #[inline]
    fn add(&mut self, key: &Key) -> Result<()> {
        RangeExtractor::add(self, *key)
    }

    fn finish(mut self) -> Result<ExactRangesIndex> {
        Ok(ExactRangesIndex::from_ranges(self.build_exact_ranges()?))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    fn pairs(r: &Ranges) -> Vec<(Key, Key)> {
        r.iter().map(|i| (i.start, i.end)).collect()
    }

    #[test]
    fn merges_runs_and_collapses_duplicates() {
        let r = extract_ranges([5, 6, 7, 10, 10, 11, 20]).unwrap();
        assert_eq!(pairs(&r), vec![(5, 7), (10, 11), (20, 20)]);
    }

    #[test]
    fn input_order_does_not_matter() {
        let r = extract_ranges([20, 11, 10, 7, 5, 10, 6]).unwrap();
        assert_eq!(pairs(&r), vec![(5, 7), (10, 11), (20, 20)]);
    }

    #[test]
    fn empty_input_yields_no_ranges() {
        let r = extract_ranges(std::iter::empty()).unwrap();
        assert!(r.is_empty());
        assert_eq!(r.total_keys(), 0);
    }

    #[test]
    fn single_key_and_all_duplicates() {
        assert_eq!(pairs(&extract_ranges([4]).unwrap()), vec![(4, 4)]);
        assert_eq!(pairs(&extract_ranges([4, 4, 4, 4]).unwrap()), vec![(4, 4)]);
    }

    #[test]
    fn negative_and_extreme_keys() {
        let r = extract_ranges([i32::MAX, -1, 0, 1, i32::MIN, i32::MAX - 1, i32::MIN + 2]).unwrap();
        assert_eq!(
            pairs(&r),
            vec![
                (i32::MIN, i32::MIN),
                (i32::MIN + 2, i32::MIN + 2),
                (-1, 1),
                (i32::MAX - 1, i32::MAX),
            ]
        );
    }

    #[test]
    fn grows_past_hint() {
        let mut ex = RangeExtractor::new(0);
        for key in 0..1000 {
            ex.add(key * 2).unwrap();
        }
        assert_eq!(ex.len(), 1000);
        assert_eq!(ex.build_exact_ranges().unwrap().len(), 1000);
    }

    #[test]
    fn oversized_hint_falls_back() {
        let mut ex = RangeExtractor::new(usize::MAX / 2);
        ex.add(1).unwrap();
        ex.add(2).unwrap();
        assert_eq!(pairs(&ex.build_exact_ranges().unwrap()), vec![(1, 2)]);
    }

    #[test]
    fn interval_len_and_display() {
        let i = Interval::new(i32::MIN, i32::MAX);
        assert_eq!(i.len(), 1 << 32);
        assert_eq!(Interval::new(3, 5).to_string(), "[3, 5]");
        assert!(Interval::new(3, 5).contains(5));
        assert!(!Interval::new(3, 5).contains(6));
    }

    proptest! {
        #[test]
        fn ranges_cover_exactly_the_distinct_keys(keys in proptest::collection::vec(-500i32..500, 0..400)) {
            let r = extract_ranges(keys.iter().copied()).unwrap();
            let distinct: BTreeSet<i32> = keys.iter().copied().collect();

            prop_assert_eq!(r.total_keys(), distinct.len() as u64);
            for key in -510..510 {
                let covered = r.iter().any(|i| i.contains(key));
                prop_assert_eq!(covered, distinct.contains(&key));
            }
            // maximal: neighbours never touch
            for w in pairs(&r).windows(2) {
                prop_assert!(i64::from(w[1].0) > i64::from(w[0].1) + 1);
            }
        }

        #[test]
        fn extraction_is_idempotent(keys in proptest::collection::vec(-200i32..200, 0..200)) {
            let once = extract_ranges(keys).unwrap();
            let expanded: Vec<i32> = once.iter().flat_map(|i| i.start..=i.end).collect();
            let twice = extract_ranges(expanded).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
