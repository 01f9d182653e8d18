//! Key-existence prefilters consulted before the build-table lookup.
//!
//! A prefilter is built from the build-side keys during `open()` and is
//! read-only afterwards. The join is generic over the prefilter type, so
//! the probe loop is monomorphized per variant. Both traits are generic
//! over the key type `K`: [`NoFilter`] and the Bloom filter accept any
//! hashable key, the interval indexes only integer keys.

use std::fmt::Debug;

use serde::Serialize;

use crate::error::Result;

/// Which prefilter a join runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefilterKind {
    None,
    Bloom,
    ExactRanges,
    RangeTree,
}

impl PrefilterKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "no-filter",
            Self::Bloom => "bloom",
            Self::ExactRanges => "exact-ranges",
            Self::RangeTree => "range-tree",
        }
    }
}

/// Storage footprint of an interval index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexFootprint {
    pub range_count: usize,
    pub approx_bytes: u64,
}

/// Accumulates build keys and produces the finished prefilter.
pub trait PrefilterBuilder<K> {
    type Output;

    fn add(&mut self, key: &K) -> Result<()>;

    fn finish(self) -> Result<Self::Output>;
}

pub trait Prefilter<K>: Sized {
    type Config: Clone + Debug;
    type Builder: PrefilterBuilder<K, Output = Self>;

    const KIND: PrefilterKind;

    /// When false the probe loop skips the membership test and its counters.
    const ENABLED: bool = true;

    /// Rejects configurations the builder cannot honour.
    fn validate_config(_config: &Self::Config) -> Result<()> {
        Ok(())
    }

    fn builder(config: &Self::Config) -> Result<Self::Builder>;

    /// May return false only for keys never added.
    fn might_contain(&self, key: &K) -> bool;

    fn footprint(&self) -> Option<IndexFootprint> {
        None
    }
}

/// The disabled prefilter: every probe row goes straight to the lookup.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoFilter;

impl<K> PrefilterBuilder<K> for NoFilter {
    type Output = NoFilter;

    #[inline(always)]
    fn add(&mut self, _key: &K) -> Result<()> {
        Ok(())
    }

    fn finish(self) -> Result<Self::Output> {
        Ok(self)
    }
}

impl<K> Prefilter<K> for NoFilter {
    type Config = ();
    type Builder = NoFilter;

    const KIND: PrefilterKind = PrefilterKind::None;
    const ENABLED: bool = false;

    fn builder(_config: &()) -> Result<Self::Builder> {
        Ok(NoFilter)
    }

    #[inline(always)]
    fn might_contain(&self, _key: &K) -> bool {
        true
    }
}
