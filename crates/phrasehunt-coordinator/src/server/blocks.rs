//! Block sizing and on-demand block generation.
//!
//! The search space is cut into contiguous half-open blocks `[start, end)`.
//! Blocks are produced lazily in index order, so a space of 2^132 candidates
//! costs no more memory than one of 2^20.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use phrasehunt::IndexRange;

/// Knobs for [`block_size`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSizing {
    /// Number of blocks a large space is cut into.
    pub target_blocks: u64,
    /// Smallest block handed out for a large space.
    pub min_block: u64,
    /// Largest block handed out, whatever the space size.
    pub max_block: u64,
    /// Small spaces are cut into at least this many blocks.
    pub min_blocks: u64,
}

impl Default for BlockSizing {
    fn default() -> Self {
        Self {
            target_blocks: 4096,
            min_block: 10_000,
            max_block: 50_000_000,
            min_blocks: 64,
        }
    }
}

/// Picks the block size for a space of `total` indices.
///
/// `clamp(ceil(total / target_blocks), min_block, max_block)`, then capped at
/// `ceil(total / min_blocks)` so a small space still yields enough blocks to
/// keep every agent busy. Never returns zero.
pub fn block_size(total: &BigUint, sizing: &BlockSizing) -> BigUint {
    let target = BigUint::from(sizing.target_blocks.max(1));
    let min_block = BigUint::from(sizing.min_block.max(1));
    let max_block = BigUint::from(sizing.max_block.max(sizing.min_block).max(1));
    let min_blocks = BigUint::from(sizing.min_blocks.max(1));

    let size = total.div_ceil(&target).clamp(min_block, max_block);
    let small_cap = total.div_ceil(&min_blocks);
    size.min(small_cap).max(BigUint::one())
}

/// Hands out consecutive blocks until the space is exhausted.
#[derive(Clone, Debug)]
pub struct BlockPlanner {
    next_start: BigUint,
    total: BigUint,
    size: BigUint,
    next_id: u64,
    last_end: Option<BigUint>,
}

impl BlockPlanner {
    /// Plans blocks over `[start, total)`, each at most `size` long.
    pub fn new(start: BigUint, total: BigUint, size: BigUint) -> Self {
        let size = if size.is_zero() { BigUint::one() } else { size };
        Self {
            next_start: start.min(total.clone()),
            total,
            size,
            next_id: 0,
            last_end: None,
        }
    }

    pub fn block_size(&self) -> &BigUint {
        &self.size
    }

    pub fn total(&self) -> &BigUint {
        &self.total
    }

    /// First index not yet covered by a generated block.
    pub fn frontier(&self) -> &BigUint {
        &self.next_start
    }

    /// Whether every index has been placed in a block.
    pub fn is_exhausted(&self) -> bool {
        self.next_start >= self.total
    }

    /// Whether `block_id` has already been generated.
    pub fn issued(&self, block_id: u64) -> bool {
        block_id < self.next_id
    }

    /// Number of blocks still to be generated.
    pub fn remaining_blocks(&self) -> BigUint {
        if self.is_exhausted() {
            return BigUint::zero();
        }
        (&self.total - &self.next_start).div_ceil(&self.size)
    }

    /// Generates the next block, or `None` once the space is exhausted.
    pub fn next_block(&mut self) -> Option<(u64, IndexRange)> {
        if self.is_exhausted() {
            return None;
        }
        let start = self.next_start.clone();
        let end = (&start + &self.size).min(self.total.clone());

        if let Some(last_end) = self.last_end.as_ref().filter(|end| **end != start) {
            tracing::error!("Block planner gap or overlap: previous end {last_end}, next start {start}");
        }

        let id = self.next_id;
        self.next_id += 1;
        self.next_start = end.clone();
        self.last_end = Some(end.clone());
        Some((id, IndexRange::new(start, end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn large_space_uses_target_block_count() {
        let sizing = BlockSizing::default();
        // 4096 * 1_000_000 indices -> one million per block
        let total = big(4096 * 1_000_000);
        assert_eq!(block_size(&total, &sizing), big(1_000_000));
    }

    #[test]
    fn block_size_is_clamped() {
        let sizing = BlockSizing::default();
        let huge = BigUint::from(2048u32).pow(12);
        assert_eq!(block_size(&huge, &sizing), big(50_000_000));

        // 2048^2 / 4096 = 1024 is raised to min_block, then capped by
        // ceil(2048^2 / 64) = 65536.
        let pair = big(2048 * 2048);
        assert_eq!(block_size(&pair, &sizing), big(10_000));

        let mid = big(400_000);
        assert_eq!(block_size(&mid, &sizing), big(6_250));
    }

    #[test]
    fn tiny_space_still_splits() {
        let sizing = BlockSizing::default();
        assert_eq!(block_size(&big(100), &sizing), big(2));
        assert_eq!(block_size(&big(1), &sizing), big(1));
        assert_eq!(block_size(&big(0), &sizing), big(1));
    }

    #[test]
    fn planner_covers_the_space_contiguously() {
        let mut planner = BlockPlanner::new(big(0), big(25), big(10));
        assert_eq!(planner.remaining_blocks(), big(3));
        assert!(!planner.issued(0));

        let blocks: Vec<_> = std::iter::from_fn(|| planner.next_block()).collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], (0, IndexRange::new(big(0), big(10))));
        assert_eq!(blocks[1], (1, IndexRange::new(big(10), big(20))));
        assert_eq!(blocks[2], (2, IndexRange::new(big(20), big(25))));
        assert!(planner.is_exhausted());
        assert_eq!(planner.next_block(), None);
        assert_eq!(planner.remaining_blocks(), big(0));
        assert!(planner.issued(2));
        assert!(!planner.issued(3));
    }

    #[test]
    fn planner_resumes_mid_space() {
        let mut planner = BlockPlanner::new(big(15), big(25), big(10));
        assert_eq!(planner.frontier(), &big(15));
        let (id, range) = planner.next_block().unwrap();
        assert_eq!(id, 0);
        assert_eq!(range, IndexRange::new(big(15), big(25)));
        assert!(planner.is_exhausted());
    }

    #[test]
    fn planner_start_past_total_is_exhausted() {
        let mut planner = BlockPlanner::new(big(30), big(25), big(10));
        assert!(planner.is_exhausted());
        assert_eq!(planner.next_block(), None);
    }
}
