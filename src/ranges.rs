//! Exact membership over sorted intervals with one binary search.

use crate::Key;
use crate::config::RangeIndexConfig;
use crate::error::Result;
use crate::extract::{RangeExtractor, Ranges};
use crate::prefilter::{IndexFootprint, Prefilter, PrefilterKind};

#[derive(Clone, Debug, Default)]
pub struct ExactRangesIndex {
    ranges: Ranges,
}

impl ExactRangesIndex {
    pub fn from_ranges(ranges: Ranges) -> Self {
        Self { ranges }
    }

    /// True iff `key` lies in a stored interval. No false positives.
    #[inline]
    pub fn contains(&self, key: Key) -> bool {
        // upper bound: first start > key
        let idx = self.ranges.starts().partition_point(|&s| s <= key);
        idx > 0 && key <= self.ranges.ends()[idx - 1]
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Bytes of the start and end arrays.
    pub fn approx_bytes(&self) -> u64 {
        (self.ranges.len() * 2 * size_of::<Key>()) as u64
    }

    pub fn ranges(&self) -> &Ranges {
        &self.ranges
    }
}

impl Prefilter<Key> for ExactRangesIndex {
    type Config = RangeIndexConfig;
    type Builder = RangeExtractor;

    const KIND: PrefilterKind = PrefilterKind::ExactRanges;

    fn builder(config: &RangeIndexConfig) -> Result<RangeExtractor> {
        Ok(RangeExtractor::new(config.expected_build_keys))
    }

    #[inline(always)]
    fn might_contain(&self, key: &Key) -> bool {
        self.contains(*key)
    }

    fn footprint(&self) -> Option<IndexFootprint> {
        Some(IndexFootprint {
            range_count: self.range_count(),
            approx_bytes: self.approx_bytes(),
        })
    }
}
