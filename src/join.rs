//! Hash equi-join with an optional key-existence prefilter.
//!
//! # Phases
//!
//! ```text
//!  open():   left ──scan──► BuildTable (key -> rows)   + prefilter builder
//!                                                        └─► finish()
//!
//!  next():   right ──row──► prefilter? ──pass──► BuildTable lookup ──► cursor
//!                               │                       │
//!                             reject                  miss
//!                               └────── next probe row ◄┘
//! ```
//!
//! The build phase drains the left input completely before the first probe
//! row is pulled. All four variants share this operator; they differ only
//! in the [`Prefilter`] type parameter. The field type comes from the left
//! input and must match the right input's; Bloom and no-filter joins take
//! any [`JoinKey`], the interval-index joins only `i32`.

use std::collections::hash_map::Entry;
use std::hash::Hash;
use std::mem;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

use crate::bloom::{BloomFilter, BloomKey};
use crate::config::{BloomConfig, JoinKeys, PrefilterConfig, RangeIndexConfig, RangeTreeConfig};
use crate::error::{Error, Result};
use crate::operator::Operator;
use crate::prefilter::{IndexFootprint, NoFilter, Prefilter, PrefilterBuilder, PrefilterKind};
use crate::range_tree::RangeTree;
use crate::ranges::ExactRangesIndex;
use crate::{Key, Row};

type GroupId = u32;

/// Field types a join can key on.
pub trait JoinKey: Clone + Eq + Hash {}

impl<T: Clone + Eq + Hash> JoinKey for T {}

/// Build-side multimap from key to the rows carrying it, in scan order.
#[derive(Debug)]
pub struct BuildTable<T = Key> {
    slots: FxHashMap<T, GroupId>,
    groups: Vec<Vec<Row<T>>>,
    rows: usize,
}

impl<T> Default for BuildTable<T> {
    fn default() -> Self {
        Self {
            slots: FxHashMap::default(),
            groups: Vec::new(),
            rows: 0,
        }
    }
}

impl<T: Eq + Hash> BuildTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: T, row: Row<T>) -> Result<()> {
        self.slots.try_reserve(1).map_err(Error::oom("build table"))?;
        self.groups.try_reserve(1).map_err(Error::oom("build table"))?;

        let next = self.groups.len() as GroupId;
        let group = match self.slots.entry(key) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                self.groups.push(Vec::new());
                *e.insert(next)
            }
        };
        let rows = &mut self.groups[group as usize];
        rows.try_reserve(1).map_err(Error::oom("build table"))?;
        rows.push(row);
        self.rows += 1;
        Ok(())
    }

    #[inline]
    fn lookup(&self, key: &T) -> Option<GroupId> {
        self.slots.get(key).copied()
    }

    #[inline]
    fn group(&self, group: GroupId) -> &[Row<T>] {
        &self.groups[group as usize]
    }

    /// Rows stored under `key`, in insertion order.
    pub fn get(&self, key: &T) -> Option<&[Row<T>]> {
        self.lookup(key).map(|g| self.group(g))
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn distinct_keys(&self) -> usize {
        self.groups.len()
    }

    pub fn clear(&mut self) {
        self.slots = FxHashMap::default();
        self.groups = Vec::new();
        self.rows = 0;
    }
}

/// Counters a join exposes once probing has finished.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JoinMetrics {
    pub kind: PrefilterKind,
    pub build_rows: u64,
    pub distinct_build_keys: u64,
    pub hash_lookups: u64,
    pub actual_matches: u64,
    pub prefilter_passes: u64,
    pub prefilter_rejects: u64,
    pub footprint: Option<IndexFootprint>,
}

impl JoinMetrics {
    fn new(kind: PrefilterKind) -> Self {
        Self {
            kind,
            build_rows: 0,
            distinct_build_keys: 0,
            hash_lookups: 0,
            actual_matches: 0,
            prefilter_passes: 0,
            prefilter_rejects: 0,
            footprint: None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JoinState {
    Created,
    Probing,
    Exhausted,
    Closed,
    /// `open()` returned an error.
    Failed,
    /// `next()` returned a probe-side error; no further rows follow.
    ProbeFailed,
}

/// Current probe row and position within its matching build rows.
#[derive(Debug)]
struct MatchCursor<T> {
    probe: Row<T>,
    group: GroupId,
    pos: usize,
}

#[inline]
fn key_at<T>(row: &Row<T>, index: usize) -> Result<&T> {
    row.get(index).ok_or(Error::KeyColumnOutOfRange {
        index,
        width: row.len(),
    })
}

/// Build row fields followed by probe row fields.
#[inline]
fn join_rows<T: Clone>(build: &Row<T>, probe: &Row<T>) -> Row<T> {
    build.iter().chain(probe.iter()).cloned().collect()
}

pub struct HashJoin<L: Operator, R, F: Prefilter<L::Field>> {
    left: L,
    right: R,
    keys: JoinKeys,
    config: F::Config,
    filter: Option<F>,
    table: BuildTable<L::Field>,
    cursor: Option<MatchCursor<L::Field>>,
    state: JoinState,
    probe_open: bool,
    /// Probe error raised while advancing past an already returned row.
    pending: Option<Error>,
    metrics: JoinMetrics,
}

pub type NoFilterJoin<L, R> = HashJoin<L, R, NoFilter>;
pub type BloomJoin<L, R> = HashJoin<L, R, BloomFilter>;
pub type ExactRangeJoin<L, R> = HashJoin<L, R, ExactRangesIndex>;
pub type RangeTreeJoin<L, R> = HashJoin<L, R, RangeTree>;

impl<L: Operator, R> HashJoin<L, R, NoFilter> {
    pub fn new(left: L, right: R, left_key: usize, right_key: usize) -> Self {
        Self::unchecked(left, right, JoinKeys::new(left_key, right_key), ())
    }
}

impl<L: Operator, R> HashJoin<L, R, BloomFilter>
where
    L::Field: BloomKey,
{
    pub fn with_bloom(
        left: L,
        right: R,
        left_key: usize,
        right_key: usize,
        filter_size_bits: usize,
        num_hash_functions: u32,
    ) -> Result<Self> {
        Self::with_prefilter(
            left,
            right,
            JoinKeys::new(left_key, right_key),
            BloomConfig::new(filter_size_bits, num_hash_functions),
        )
    }
}

impl<L: Operator<Field = Key>, R> HashJoin<L, R, ExactRangesIndex> {
    pub fn with_exact_ranges(
        left: L,
        right: R,
        left_key: usize,
        right_key: usize,
        expected_build_keys: usize,
    ) -> Self {
        Self::unchecked(
            left,
            right,
            JoinKeys::new(left_key, right_key),
            RangeIndexConfig::new(expected_build_keys),
        )
    }
}

impl<L: Operator<Field = Key>, R> HashJoin<L, R, RangeTree> {
    /// Range tree with the default leaf capacity and fanout.
    pub fn with_range_tree(
        left: L,
        right: R,
        left_key: usize,
        right_key: usize,
        expected_build_keys: usize,
    ) -> Self {
        Self::unchecked(
            left,
            right,
            JoinKeys::new(left_key, right_key),
            RangeTreeConfig::new(expected_build_keys),
        )
    }
}

impl<L: Operator, R, F: Prefilter<L::Field>> HashJoin<L, R, F> {
    pub fn with_prefilter(left: L, right: R, keys: JoinKeys, config: F::Config) -> Result<Self> {
        F::validate_config(&config)?;
        Ok(Self::unchecked(left, right, keys, config))
    }

    fn unchecked(left: L, right: R, keys: JoinKeys, config: F::Config) -> Self {
        Self {
            left,
            right,
            keys,
            config,
            filter: None,
            table: BuildTable::default(),
            cursor: None,
            state: JoinState::Created,
            probe_open: false,
            pending: None,
            metrics: JoinMetrics::new(F::KIND),
        }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn keys(&self) -> JoinKeys {
        self.keys
    }

    /// The built prefilter, available between `open()` and `close()`.
    pub fn filter(&self) -> Option<&F> {
        self.filter.as_ref()
    }

    pub fn build_table(&self) -> &BuildTable<L::Field> {
        &self.table
    }

    pub fn metrics(&self) -> JoinMetrics {
        self.metrics
    }

    pub fn hash_lookups(&self) -> u64 {
        self.metrics.hash_lookups
    }

    pub fn actual_matches(&self) -> u64 {
        self.metrics.actual_matches
    }

    pub fn prefilter_passes(&self) -> u64 {
        self.metrics.prefilter_passes
    }

    pub fn prefilter_rejects(&self) -> u64 {
        self.metrics.prefilter_rejects
    }

    pub fn range_count(&self) -> Option<usize> {
        self.metrics.footprint.map(|f| f.range_count)
    }

    pub fn index_bytes(&self) -> Option<u64> {
        self.metrics.footprint.map(|f| f.approx_bytes)
    }
}

impl<L, R, F> HashJoin<L, R, F>
where
    L: Operator,
    L::Field: JoinKey,
    R: Operator<Field = L::Field>,
    F: Prefilter<L::Field>,
{
    fn build(&mut self) -> Result<F> {
        let mut builder = F::builder(&self.config)?;

        self.left.open()?;
        while let Some(row) = self.left.next()? {
            let key = key_at(&row, self.keys.left)?.clone();
            builder.add(&key)?;
            self.table.insert(key, row)?;
        }
        self.left.close()?;

        let filter = builder.finish()?;
        self.metrics.build_rows = self.table.row_count() as u64;
        self.metrics.distinct_build_keys = self.table.distinct_keys() as u64;
        self.metrics.footprint = filter.footprint();

        debug!(
            variant = F::KIND.name(),
            build_rows = self.metrics.build_rows,
            distinct_keys = self.metrics.distinct_build_keys,
            ranges = ?self.range_count(),
            index_bytes = ?self.index_bytes(),
            "build phase complete"
        );
        Ok(filter)
    }

    fn start_probe(&mut self) -> Result<()> {
        self.right.open()?;
        self.probe_open = true;
        self.state = JoinState::Probing;
        self.advance()?;
        Ok(())
    }

    /// Pulls probe rows until one has build-side matches and points the
    /// cursor at them. Returns false once the probe input is exhausted.
    fn advance(&mut self) -> Result<bool> {
        self.cursor = None;
        let Some(filter) = self.filter.as_ref() else {
            return Err(Error::NotOpen);
        };

        while let Some(row) = self.right.next()? {
            let key = key_at(&row, self.keys.right)?;

            if F::ENABLED {
                if !filter.might_contain(key) {
                    self.metrics.prefilter_rejects += 1;
                    continue;
                }
                self.metrics.prefilter_passes += 1;
            }

            self.metrics.hash_lookups += 1;
            if let Some(group) = self.table.lookup(key) {
                self.metrics.actual_matches += self.table.group(group).len() as u64;
                self.cursor = Some(MatchCursor {
                    probe: row,
                    group,
                    pos: 0,
                });
                return Ok(true);
            }
        }

        self.state = JoinState::Exhausted;
        Ok(false)
    }
}

impl<L, R, F> Operator for HashJoin<L, R, F>
where
    L: Operator,
    L::Field: JoinKey,
    R: Operator<Field = L::Field>,
    F: Prefilter<L::Field>,
{
    type Field = L::Field;

    fn open(&mut self) -> Result<()> {
        match self.state {
            JoinState::Created => {}
            JoinState::Failed => return Err(Error::BuildFailed),
            _ => return Err(Error::AlreadyOpen),
        }

        // Stays failed unless both phases start cleanly.
        self.state = JoinState::Failed;
        let started = match self.build() {
            Ok(filter) => {
                self.filter = Some(filter);
                self.start_probe()
            }
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            self.state = JoinState::Failed;
            self.cursor = None;
            self.filter = None;
            self.table.clear();
            return Err(e);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row<L::Field>>> {
        match self.state {
            JoinState::Probing => {}
            JoinState::Created => return Err(Error::NotOpen),
            JoinState::Failed => return Err(Error::BuildFailed),
            JoinState::ProbeFailed => return Err(Error::ProbeFailed),
            JoinState::Exhausted | JoinState::Closed => return Ok(None),
        }

        if let Some(e) = self.pending.take() {
            self.state = JoinState::ProbeFailed;
            return Err(e);
        }

        let Some(cursor) = self.cursor.as_mut() else {
            self.state = JoinState::Exhausted;
            return Ok(None);
        };
        let matches = self.table.group(cursor.group);
        let out = join_rows(&matches[cursor.pos], &cursor.probe);
        cursor.pos += 1;

        if cursor.pos == matches.len() {
            // reported on the next call, after this row
            if let Err(e) = self.advance() {
                self.pending = Some(e);
            }
        }
        Ok(Some(out))
    }

    fn close(&mut self) -> Result<()> {
        if self.state == JoinState::Closed {
            return Ok(());
        }

        self.state = JoinState::Closed;
        self.cursor = None;
        self.pending = None;
        self.filter = None;
        self.table.clear();

        if mem::take(&mut self.probe_open) {
            self.right.close()?;
            debug!(
                variant = F::KIND.name(),
                hash_lookups = self.metrics.hash_lookups,
                actual_matches = self.metrics.actual_matches,
                passes = self.metrics.prefilter_passes,
                rejects = self.metrics.prefilter_rejects,
                "join closed"
            );
        }
        Ok(())
    }
}

/// Any of the four join variants over `i32` rows, chosen at runtime from a
/// [`PrefilterConfig`].
pub enum AnyJoin<L: Operator<Field = Key>, R> {
    NoFilter(NoFilterJoin<L, R>),
    Bloom(BloomJoin<L, R>),
    ExactRanges(ExactRangeJoin<L, R>),
    RangeTree(RangeTreeJoin<L, R>),
}

macro_rules! dispatch {
    ($self:expr, $join:ident => $body:expr) => {
        match $self {
            AnyJoin::NoFilter($join) => $body,
            AnyJoin::Bloom($join) => $body,
            AnyJoin::ExactRanges($join) => $body,
            AnyJoin::RangeTree($join) => $body,
        }
    };
}

impl<L: Operator<Field = Key>, R> AnyJoin<L, R> {
    pub fn new(left: L, right: R, keys: JoinKeys, config: &PrefilterConfig) -> Result<Self> {
        Ok(match *config {
            PrefilterConfig::None => Self::NoFilter(HashJoin::unchecked(left, right, keys, ())),
            PrefilterConfig::Bloom(c) => Self::Bloom(HashJoin::with_prefilter(left, right, keys, c)?),
            PrefilterConfig::ExactRanges(c) => {
                Self::ExactRanges(HashJoin::with_prefilter(left, right, keys, c)?)
            }
            PrefilterConfig::RangeTree(c) => {
                Self::RangeTree(HashJoin::with_prefilter(left, right, keys, c)?)
            }
        })
    }

    pub fn kind(&self) -> PrefilterKind {
        match self {
            Self::NoFilter(_) => PrefilterKind::None,
            Self::Bloom(_) => PrefilterKind::Bloom,
            Self::ExactRanges(_) => PrefilterKind::ExactRanges,
            Self::RangeTree(_) => PrefilterKind::RangeTree,
        }
    }

    pub fn metrics(&self) -> JoinMetrics {
        dispatch!(self, j => j.metrics())
    }

    pub fn state(&self) -> JoinState {
        dispatch!(self, j => j.state())
    }
}

impl<L: Operator<Field = Key>, R: Operator<Field = Key>> Operator for AnyJoin<L, R> {
    type Field = Key;

    fn open(&mut self) -> Result<()> {
        dispatch!(self, j => j.open())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        dispatch!(self, j => j.next())
    }

    fn close(&mut self) -> Result<()> {
        dispatch!(self, j => j.close())
    }
}
