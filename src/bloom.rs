//! Bloom filter over a fixed bit vector.
//!
//! Probe positions are `|h * M[i mod 10]| mod m` for `i in 0..k` with a
//! small table of prime multipliers, where `h` is the key's 32-bit
//! [`BloomKey`] hash. Integer keys hash to themselves. The vector never
//! grows after construction.

use std::rc::Rc;

use tracing::debug;

use crate::Key;
use crate::config::BloomConfig;
use crate::error::{Error, Result};
use crate::prefilter::{Prefilter, PrefilterBuilder, PrefilterKind};

const MULTIPLIERS: [i32; 10] = [31, 37, 41, 43, 47, 53, 59, 61, 67, 71];

/// 32-bit hash a [`BloomFilter`] derives its probe positions from.
pub trait BloomKey {
    fn bloom_hash(&self) -> i32;
}

impl BloomKey for i32 {
    #[inline(always)]
    fn bloom_hash(&self) -> i32 {
        *self
    }
}

impl BloomKey for u32 {
    #[inline(always)]
    fn bloom_hash(&self) -> i32 {
        *self as i32
    }
}

impl BloomKey for i64 {
    /// High and low halves folded with xor.
    #[inline(always)]
    fn bloom_hash(&self) -> i32 {
        let v = *self as u64;
        (v ^ (v >> 32)) as i32
    }
}

impl BloomKey for str {
    /// `s[0]*31^(n-1) + ... + s[n-1]` over UTF-16 code units, wrapping.
    fn bloom_hash(&self) -> i32 {
        self.encode_utf16()
            .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
    }
}

impl BloomKey for String {
    #[inline]
    fn bloom_hash(&self) -> i32 {
        self.as_str().bloom_hash()
    }
}

impl<T: BloomKey + ?Sized> BloomKey for &T {
    #[inline]
    fn bloom_hash(&self) -> i32 {
        (**self).bloom_hash()
    }
}

impl<T: BloomKey + ?Sized> BloomKey for Rc<T> {
    #[inline]
    fn bloom_hash(&self) -> i32 {
        (**self).bloom_hash()
    }
}

#[derive(Clone, Debug)]
pub struct BloomFilter {
    words: Box<[u64]>,
    size: usize,
    k: u32,
}

impl BloomFilter {
    /// Allocates a zeroed filter of `size_bits` bits probed `k` times.
    pub fn new(size_bits: usize, k: u32) -> Self {
        debug_assert!(size_bits > 0);
        debug_assert!(k >= 1);
        Self {
            words: vec![0u64; size_bits.div_ceil(64)].into_boxed_slice(),
            size: size_bits,
            k,
        }
    }

    /// Like [`BloomFilter::new`] but reports allocation failure.
    pub fn try_new(size_bits: usize, k: u32) -> Result<Self> {
        debug_assert!(size_bits > 0);
        debug_assert!(k >= 1);
        let n = size_bits.div_ceil(64);
        let mut words = Vec::new();
        words
            .try_reserve_exact(n)
            .map_err(Error::oom("bloom bit vector"))?;
        words.resize(n, 0);
        Ok(Self {
            words: words.into_boxed_slice(),
            size: size_bits,
            k,
        })
    }

    #[inline(always)]
    fn position(&self, key: Key, i: u32) -> usize {
        let m = MULTIPLIERS[i as usize % MULTIPLIERS.len()];
        key.wrapping_mul(m).unsigned_abs() as usize % self.size
    }

    #[inline(always)]
    fn get_bit(&self, pos: usize) -> bool {
        self.words[pos >> 6] & (1 << (pos & 63)) != 0
    }

    #[inline(always)]
    fn set_bit(&mut self, pos: usize) {
        self.words[pos >> 6] |= 1 << (pos & 63);
    }

    pub fn add(&mut self, key: Key) {
        for i in 0..self.k {
            let pos = self.position(key, i);
            self.set_bit(pos);
        }
    }

    /// False means `key` was never added; true may be a false positive.
    #[inline]
    pub fn might_contain(&self, key: Key) -> bool {
        (0..self.k).all(|i| self.get_bit(self.position(key, i)))
    }

    /// `(1 - e^(-k*n/m))^k` for `n` inserted keys.
    pub fn estimate_false_positive_rate(&self, inserted: usize) -> f64 {
        let k = f64::from(self.k);
        let load = inserted as f64 / self.size as f64;
        (1.0 - (-k * load).exp()).powf(k)
    }

    pub fn size_bits(&self) -> usize {
        self.size
    }

    pub fn num_hashes(&self) -> u32 {
        self.k
    }

    /// Number of set bits.
    pub fn set_bits(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn approx_bytes(&self) -> u64 {
        (self.words.len() * size_of::<u64>()) as u64
    }
}

/// Counts inserted keys so the open-time log can report the estimate.
pub struct BloomBuilder {
    filter: BloomFilter,
    inserted: usize,
}

impl<K: BloomKey> PrefilterBuilder<K> for BloomBuilder {
    type Output = BloomFilter;

    #[inline]
    fn add(&mut self, key: &K) -> Result<()> {
        self.filter.add(key.bloom_hash());
        self.inserted += 1;
        Ok(())
    }

    fn finish(self) -> Result<BloomFilter> {
        debug!(
            m = self.filter.size,
            k = self.filter.k,
            inserted = self.inserted,
            est_fp_rate = self.filter.estimate_false_positive_rate(self.inserted),
            "bloom filter built"
        );
        Ok(self.filter)
    }
}

impl<K: BloomKey> Prefilter<K> for BloomFilter {
    type Config = BloomConfig;
    type Builder = BloomBuilder;

    const KIND: PrefilterKind = PrefilterKind::Bloom;

    fn validate_config(config: &BloomConfig) -> Result<()> {
        config.validate()
    }

    fn builder(config: &BloomConfig) -> Result<BloomBuilder> {
        config.validate()?;
        Ok(BloomBuilder {
            filter: BloomFilter::try_new(config.size_bits, config.num_hashes)?,
            inserted: 0,
        })
    }

    #[inline(always)]
    fn might_contain(&self, key: &K) -> bool {
        BloomFilter::might_contain(self, key.bloom_hash())
    }
}
