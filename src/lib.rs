//! In-memory hash equi-join with key-existence prefilters.
//!
//! The probe phase of a hash join spends most of its time on build-table
//! lookups for keys that are not there. This crate runs the same pull-based
//! join with four interchangeable prefilters in front of that lookup:
//!
//! | Variant        | Prefilter                | Errors                 |
//! |----------------|--------------------------|------------------------|
//! | no-filter      | none                     | n/a                    |
//! | Bloom          | [`BloomFilter`]          | false positives        |
//! | exact ranges   | [`ExactRangesIndex`]     | exact, one bsearch     |
//! | range tree     | [`RangeTree`]            | exact, multiway search |
//!
//! The interval indexes are built from the build keys compressed into
//! maximal runs by [`RangeExtractor`]. All variants produce identical
//! output; only the prefilter counters differ.
//!
//! Rows default to `i32` fields. The no-filter and Bloom joins also run
//! over any hashable field type (for example `String`); the Bloom filter
//! then probes with the key's [`BloomKey`] hash. The interval indexes need
//! integer keys.
//!
//! ```no_run
//! use probefilter::{Operator, RangeTreeJoin, ScanOperator, rows_from};
//!
//! let dates = ScanOperator::new(rows_from([[1, 1980], [2, 1981]]));
//! let sales = ScanOperator::new(rows_from([[10, 2], [11, 7]]));
//! let mut join = RangeTreeJoin::with_range_tree(dates, sales, 0, 1, 2);
//! join.open()?;
//! while let Some(row) = join.next()? {
//!     println!("{row:?}");
//! }
//! join.close()?;
//! # Ok::<(), probefilter::Error>(())
//! ```

use std::rc::Rc;

pub mod bloom;
pub mod config;
pub mod error;
pub mod extract;
pub mod join;
pub mod operator;
pub mod prefilter;
pub mod range_tree;
pub mod ranges;

/// One integer field of a row.
pub type Field = i32;

/// A join key: one field selected by column index.
pub type Key = Field;

/// Immutable fixed-width row, shared between sources and the build table.
pub type Row<T = Field> = Rc<[T]>;

pub use bloom::{BloomFilter, BloomKey};
pub use config::{BloomConfig, JoinKeys, PrefilterConfig, RangeIndexConfig, RangeTreeConfig};
pub use error::{Error, Result};
pub use extract::{Interval, RangeExtractor, Ranges, extract_ranges};
pub use join::{
    AnyJoin, BloomJoin, BuildTable, ExactRangeJoin, HashJoin, JoinKey, JoinMetrics, JoinState,
    NoFilterJoin, RangeTreeJoin,
};
pub use operator::{Operator, ScanOperator, rows_from};
pub use prefilter::{IndexFootprint, NoFilter, Prefilter, PrefilterBuilder, PrefilterKind};
pub use range_tree::{RangeTree, SharedRangeTree};
pub use ranges::ExactRangesIndex;
