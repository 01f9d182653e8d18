//! Bulk-loaded multiway search tree over sorted intervals.
//!
//! # Layout
//!
//! ```text
//!                 nodes: Vec<Node> (flat arena, children by index)
//!
//!                      ┌──────────────────────┐
//!   root ────────────► │ Internal  seps [s1]  │
//!                      └───┬──────────────┬───┘
//!                          │              │
//!            ┌─────────────▼───┐      ┌───▼─────────────┐
//!            │ Leaf starts[..L]│      │ Leaf starts[..L]│  s1 = first start
//!            │      ends  [..L]│      │      ends  [..L]│       of this leaf
//!            └─────────────────┘      └─────────────────┘
//! ```
//!
//! Leaves hold up to `L` consecutive intervals copied from the sorted input.
//! Internal nodes hold up to `F` children and `children - 1` separators,
//! where separator `j` is the first interval start under child `j + 1`.
//! Nodes are appended level by level, so the root is always the last node.

use std::sync::Arc;

use tracing::debug;

use crate::Key;
use crate::config::RangeTreeConfig;
use crate::error::{Error, Result};
use crate::extract::{RangeExtractor, Ranges};
use crate::prefilter::{IndexFootprint, Prefilter, PrefilterBuilder, PrefilterKind};

type NodeId = u32;

#[derive(Clone, Debug)]
enum Node {
    Leaf {
        starts: Box<[Key]>,
        ends: Box<[Key]>,
    },
    Internal {
        separators: Box<[Key]>,
        children: Box<[NodeId]>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct RangeTree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
    range_count: usize,
    leaf_count: usize,
    height: usize,
    approx_bytes: u64,
}

/// First index in `keys` whose value is greater than `key`.
#[inline(always)]
fn upper_bound(keys: &[Key], key: Key) -> usize {
    keys.partition_point(|&k| k <= key)
}

fn try_boxed<T: Copy>(src: &[T]) -> Result<Box<[T]>> {
    let mut v = Vec::new();
    v.try_reserve_exact(src.len())
        .map_err(Error::oom("range tree node"))?;
    v.extend_from_slice(src);
    Ok(v.into_boxed_slice())
}

impl RangeTree {
    /// Bulk-loads the tree from sorted, non-overlapping intervals.
    pub fn build_from_ranges(ranges: &Ranges, config: &RangeTreeConfig) -> Result<Self> {
        config.validate()?;
        let count = ranges.len();
        if count == 0 {
            return Ok(Self::default());
        }
        let (leaf_cap, fanout) = (config.leaf_capacity, config.fanout);

        let leaf_count = count.div_ceil(leaf_cap);
        let mut nodes: Vec<Node> = Vec::new();
        // leaves plus a geometric bound on the internal levels
        nodes
            .try_reserve(leaf_count + leaf_count.div_ceil(fanout - 1) + 1)
            .map_err(Error::oom("range tree arena"))?;
        let mut approx_bytes = 0u64;

        // (node, first interval start reachable under it)
        let mut level: Vec<(NodeId, Key)> = Vec::new();
        level
            .try_reserve_exact(leaf_count)
            .map_err(Error::oom("range tree level"))?;

        for (starts, ends) in ranges
            .starts()
            .chunks(leaf_cap)
            .zip(ranges.ends().chunks(leaf_cap))
        {
            let id = nodes.len() as NodeId;
            level.push((id, starts[0]));
            approx_bytes += (starts.len() * 2 * size_of::<Key>()) as u64;
            nodes.push(Node::Leaf {
                starts: try_boxed(starts)?,
                ends: try_boxed(ends)?,
            });
        }

        let mut height = 1;
        while level.len() > 1 {
            let mut parents = Vec::new();
            parents
                .try_reserve_exact(level.len().div_ceil(fanout))
                .map_err(Error::oom("range tree level"))?;

            for group in level.chunks(fanout) {
                let separators: Vec<Key> = group[1..].iter().map(|&(_, first)| first).collect();
                let children: Vec<NodeId> = group.iter().map(|&(id, _)| id).collect();
                approx_bytes += (separators.len() * size_of::<Key>()) as u64;

                let id = nodes.len() as NodeId;
                parents.push((id, group[0].1));
                nodes.push(Node::Internal {
                    separators: try_boxed(&separators)?,
                    children: try_boxed(&children)?,
                });
            }
            level = parents;
            height += 1;
        }

        let tree = Self {
            nodes,
            root: Some(level[0].0),
            range_count: count,
            leaf_count,
            height,
            approx_bytes,
        };
        debug!(
            ranges = count,
            leaves = leaf_count,
            height,
            approx_bytes,
            "range tree built"
        );
        Ok(tree)
    }

    /// True iff `key` lies in a stored interval.
    pub fn contains(&self, key: Key) -> bool {
        let Some(mut id) = self.root else {
            return false;
        };
        loop {
            match &self.nodes[id as usize] {
                Node::Internal {
                    separators,
                    children,
                } => id = children[upper_bound(separators, key)],
                Node::Leaf { starts, ends } => {
                    let i = upper_bound(starts, key);
                    return i > 0 && key <= ends[i - 1];
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn range_count(&self) -> usize {
        self.range_count
    }

    /// Leaf start/end arrays plus separator keys.
    pub fn approx_bytes(&self) -> u64 {
        self.approx_bytes
    }

    /// Number of levels; 0 for an empty tree.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Descends child 0 to the leftmost leaf and returns its first start.
    #[cfg(test)]
    fn first_start(&self, mut id: NodeId) -> Key {
        loop {
            match &self.nodes[id as usize] {
                Node::Internal { children, .. } => id = children[0],
                Node::Leaf { starts, .. } => return starts[0],
            }
        }
    }
}

/// Shared handle; a built tree is immutable and can be read from many threads.
pub type SharedRangeTree = Arc<RangeTree>;

pub struct RangeTreeBuilder {
    extractor: RangeExtractor,
    config: RangeTreeConfig,
}

impl PrefilterBuilder<Key> for RangeTreeBuilder {
    type Output = RangeTree;

    #[inline]
    fn add(&mut self, key: &Key) -> Result<()> {
        self.extractor.add(*key)
    }

    fn finish(mut self) -> Result<RangeTree> {
        let ranges = self.extractor.build_exact_ranges()?;
        RangeTree::build_from_ranges(&ranges, &self.config)
    }
}

impl Prefilter<Key> for RangeTree {
    type Config = RangeTreeConfig;
    type Builder = RangeTreeBuilder;

    const KIND: PrefilterKind = PrefilterKind::RangeTree;

    fn validate_config(config: &RangeTreeConfig) -> Result<()> {
        config.validate()
    }

    fn builder(config: &RangeTreeConfig) -> Result<RangeTreeBuilder> {
        config.validate()?;
        Ok(RangeTreeBuilder {
            extractor: RangeExtractor::new(config.expected_build_keys),
            config: *config,
        })
    }

    #[inline(always)]
    fn might_contain(&self, key: &Key) -> bool {
        self.contains(*key)
    }

    fn footprint(&self) -> Option<IndexFootprint> {
        Some(IndexFootprint {
            range_count: self.range_count,
            approx_bytes: self.approx_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::extract::extract_ranges;
    use crate::ranges::ExactRangesIndex;

    fn shape(leaf_capacity: usize, fanout: usize) -> RangeTreeConfig {
        RangeTreeConfig::with_shape(0, leaf_capacity, fanout)
    }

    /// `n` singleton intervals at 0, 10, 20, ...
    fn spaced(n: i32) -> Ranges {
        extract_ranges((0..n).map(|i| i * 10)).unwrap()
    }

    fn random_ranges(rng: &mut ChaCha8Rng, n: usize) -> Ranges {
        let mut starts = Vec::with_capacity(n);
        let mut ends = Vec::with_capacity(n);
        let mut next = rng.random_range(-1_000..1_000);
        for _ in 0..n {
            let start = next;
            let end = start + rng.random_range(0..5);
            starts.push(start);
            ends.push(end);
            next = end + rng.random_range(2..8);
        }
        Ranges::from_parts(starts, ends)
    }

    fn check_agreement(ranges: &Ranges, tree: &RangeTree) {
        let flat = ExactRangesIndex::from_ranges(ranges.clone());
        let lo = ranges.starts().first().copied().unwrap_or(0) - 3;
        let hi = ranges.ends().last().copied().unwrap_or(0) + 3;
        for key in lo..=hi {
            assert_eq!(tree.contains(key), flat.contains(key), "key {key}");
        }
    }

    #[test]
    fn empty_tree_contains_nothing() {
        let tree = RangeTree::build_from_ranges(&Ranges::empty(), &shape(4, 4)).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.node_count(), 0);
        for key in [i32::MIN, -1, 0, 1, i32::MAX] {
            assert!(!tree.contains(key));
        }
    }

    #[test]
    fn single_leaf_tree() {
        let ranges = extract_ranges([5, 6, 7, 10, 11, 20]).unwrap();
        let tree = RangeTree::build_from_ranges(&ranges, &RangeTreeConfig::default()).unwrap();
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.approx_bytes(), 3 * 8);
        check_agreement(&ranges, &tree);
    }

    #[test]
    fn levels_and_footprint_for_small_fanout() {
        // 10 intervals, L = 2 -> 5 leaves -> 3 -> 2 -> 1
        let tree = RangeTree::build_from_ranges(&spaced(10), &shape(2, 2)).unwrap();
        assert_eq!(tree.leaf_count(), 5);
        assert_eq!(tree.height(), 4);
        assert_eq!(tree.node_count(), 11);
        // 80 bytes of leaf arrays + 4 separators
        assert_eq!(tree.approx_bytes(), 80 + 16);
        assert_eq!(tree.range_count(), 10);
    }

    #[test]
    fn separators_are_first_start_of_right_children() {
        let tree = RangeTree::build_from_ranges(&spaced(10), &shape(2, 2)).unwrap();
        for node in &tree.nodes {
            if let Node::Internal {
                separators,
                children,
            } = node
            {
                assert_eq!(separators.len(), children.len() - 1);
                for (j, &sep) in separators.iter().enumerate() {
                    assert_eq!(sep, tree.first_start(children[j + 1]));
                }
            }
        }
    }

    #[test]
    fn root_is_last_node() {
        let tree = RangeTree::build_from_ranges(&spaced(50), &shape(3, 4)).unwrap();
        assert_eq!(tree.root, Some(tree.node_count() as NodeId - 1));
        assert_eq!(tree.first_start(tree.root.unwrap()), 0);
    }

    #[test]
    fn boundaries_and_gaps_across_leaves() {
        let ranges = spaced(100);
        let tree = RangeTree::build_from_ranges(&ranges, &shape(4, 3)).unwrap();
        for i in 0..100 {
            assert!(tree.contains(i * 10));
            assert!(!tree.contains(i * 10 + 1));
            assert!(!tree.contains(i * 10 - 1));
        }
        assert!(!tree.contains(i32::MIN));
        assert!(!tree.contains(i32::MAX));
    }

    #[test]
    fn extreme_keys() {
        let ranges = extract_ranges([i32::MIN, i32::MIN + 1, 0, i32::MAX]).unwrap();
        let tree = RangeTree::build_from_ranges(&ranges, &shape(1, 2)).unwrap();
        assert!(tree.contains(i32::MIN));
        assert!(tree.contains(i32::MIN + 1));
        assert!(!tree.contains(i32::MIN + 2));
        assert!(tree.contains(0));
        assert!(tree.contains(i32::MAX));
        assert!(!tree.contains(i32::MAX - 1));
    }

    #[test]
    fn rejects_invalid_shape() {
        assert!(RangeTree::build_from_ranges(&spaced(3), &shape(0, 4)).is_err());
        assert!(RangeTree::build_from_ranges(&spaced(3), &shape(4, 1)).is_err());
    }

    #[test]
    fn agrees_with_flat_index_on_random_sets() {
        let mut rng = ChaCha8Rng::seed_from_u64(0xC0FFEE);
        for &(leaf_capacity, fanout) in &[(1, 2), (2, 2), (3, 5), (16, 4), (128, 128)] {
            for n in [1, 2, 7, 64, 513] {
                let ranges = random_ranges(&mut rng, n);
                let tree = RangeTree::build_from_ranges(&ranges, &shape(leaf_capacity, fanout))
                    .unwrap();
                check_agreement(&ranges, &tree);
            }
        }
    }

    #[test]
    fn builder_extracts_then_loads() {
        let mut b = RangeTree::builder(&RangeTreeConfig::with_shape(4, 2, 2)).unwrap();
        for key in [3, 1, 2, 9, 9, 100] {
            b.add(&key).unwrap();
        }
        let tree = b.finish().unwrap();
        assert_eq!(tree.range_count(), 3);
        assert!(tree.contains(2) && tree.contains(9) && tree.contains(100));
        assert!(!tree.contains(4) && !tree.contains(99));
    }

    proptest! {
        #[test]
        fn tree_matches_flat_index(
            keys in proptest::collection::vec(-300i32..300, 0..300),
            leaf_capacity in 1usize..9,
            fanout in 2usize..9,
        ) {
            let ranges = extract_ranges(keys).unwrap();
            let tree = RangeTree::build_from_ranges(&ranges, &shape(leaf_capacity, fanout)).unwrap();
            let flat = ExactRangesIndex::from_ranges(ranges);
            for key in -310..310 {
                prop_assert_eq!(tree.contains(key), flat.contains(key));
            }
        }
    }

    #[test]
    fn shuttle_concurrent_readers() {
        use shuttle::thread;

        shuttle::check_random(
            || {
                let ranges = spaced(64);
                let tree: SharedRangeTree =
                    Arc::new(RangeTree::build_from_ranges(&ranges, &shape(4, 3)).unwrap());
                let flat = Arc::new(ExactRangesIndex::from_ranges(ranges));

                let handles: Vec<_> = (0..4)
                    .map(|t| {
                        let tree = tree.clone();
                        let flat = flat.clone();
                        thread::spawn(move || {
                            let mut hits = 0;
                            for key in (t * 3..640).step_by(7) {
                                assert_eq!(tree.contains(key), flat.contains(key));
                                hits += usize::from(tree.contains(key));
                                thread::yield_now();
                            }
                            hits
                        })
                    })
                    .collect();

                for (t, h) in handles.into_iter().enumerate() {
                    let expected = (t as i32 * 3..640).step_by(7).filter(|k| k % 10 == 0).count();
                    assert_eq!(h.join().unwrap(), expected);
                }
            },
            50,
        );
    }
}
