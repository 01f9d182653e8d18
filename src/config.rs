//! Join and prefilter configuration.
//!
//! All structs derive serde so a driver can load parameter sweeps from a
//! file. Validation happens when a join is constructed.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Minimum capacity of the build-key buffer regardless of the hint.
pub const MIN_KEY_CAPACITY: usize = 16;

/// Default intervals per range tree leaf.
pub const DEFAULT_LEAF_CAPACITY: usize = 128;

/// Default children per range tree internal node.
pub const DEFAULT_FANOUT: usize = 128;

/// Key column index on each side of the join.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinKeys {
    pub left: usize,
    pub right: usize,
}

impl JoinKeys {
    pub fn new(left: usize, right: usize) -> Self {
        Self { left, right }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomConfig {
    /// Bit vector length `m`.
    pub size_bits: usize,
    /// Number of hash probes `k`.
    pub num_hashes: u32,
}

impl BloomConfig {
    pub fn new(size_bits: usize, num_hashes: u32) -> Self {
        Self {
            size_bits,
            num_hashes,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.size_bits == 0 {
            return Err(Error::InvalidConfig("bloom filter size must be non-zero".into()));
        }
        if self.num_hashes == 0 {
            return Err(Error::InvalidConfig(
                "bloom filter needs at least one hash function".into(),
            ));
        }
        Ok(())
    }
}

/// Sizing for the flat exact-ranges index.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeIndexConfig {
    /// Presizes the build-key buffer. Only affects reallocation.
    pub expected_build_keys: usize,
}

impl RangeIndexConfig {
    pub fn new(expected_build_keys: usize) -> Self {
        Self {
            expected_build_keys,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeTreeConfig {
    pub expected_build_keys: usize,
    /// Maximum intervals per leaf (`L`).
    pub leaf_capacity: usize,
    /// Maximum children per internal node (`F`).
    pub fanout: usize,
}

impl Default for RangeTreeConfig {
    fn default() -> Self {
        Self {
            expected_build_keys: 0,
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            fanout: DEFAULT_FANOUT,
        }
    }
}

impl RangeTreeConfig {
    pub fn new(expected_build_keys: usize) -> Self {
        Self {
            expected_build_keys,
            ..Self::default()
        }
    }

    pub fn with_shape(expected_build_keys: usize, leaf_capacity: usize, fanout: usize) -> Self {
        Self {
            expected_build_keys,
            leaf_capacity,
            fanout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.leaf_capacity == 0 {
            return Err(Error::InvalidConfig("leaf capacity must be at least 1".into()));
        }
        if self.fanout < 2 {
            return Err(Error::InvalidConfig("fanout must be at least 2".into()));
        }
        Ok(())
    }
}

/// Runtime selection of the probe prefilter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrefilterConfig {
    None,
    Bloom(BloomConfig),
    ExactRanges(RangeIndexConfig),
    RangeTree(RangeTreeConfig),
}

impl PrefilterConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::None | Self::ExactRanges(_) => Ok(()),
            Self::Bloom(c) => c.validate(),
            Self::RangeTree(c) => c.validate(),
        }
    }
}

/// Initial capacity of the build-key buffer for a sizing hint.
pub(crate) fn key_capacity(expected_build_keys: usize) -> usize {
    expected_build_keys.max(MIN_KEY_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bloom_rejects_zero_size_and_zero_hashes() {
        assert!(BloomConfig::new(0, 2).validate().is_err());
        assert!(BloomConfig::new(1024, 0).validate().is_err());
        assert!(BloomConfig::new(1024, 2).validate().is_ok());
    }

    #[test]
    fn range_tree_shape_limits() {
        assert!(RangeTreeConfig::with_shape(10, 0, 4).validate().is_err());
        assert!(RangeTreeConfig::with_shape(10, 4, 1).validate().is_err());
        assert!(RangeTreeConfig::with_shape(10, 1, 2).validate().is_ok());
        assert!(RangeTreeConfig::default().validate().is_ok());
    }

    #[test]
    fn key_capacity_has_floor() {
        assert_eq!(key_capacity(0), MIN_KEY_CAPACITY);
        assert_eq!(key_capacity(1000), 1000);
    }

    #[test]
    fn prefilter_config_validates_payload() {
        assert!(PrefilterConfig::None.validate().is_ok());
        assert!(PrefilterConfig::Bloom(BloomConfig::new(0, 1)).validate().is_err());
        assert!(
            PrefilterConfig::RangeTree(RangeTreeConfig::with_shape(0, 8, 0))
                .validate()
                .is_err()
        );
    }
}
