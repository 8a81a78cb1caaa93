//! Deterministic helpers shared by tree construction and ensemble fitting
//!
//! Split candidates with identical gain are ordered by a fixed tie-breaker so
//! that the fitted trees never depend on iteration accidents.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;

/// Deterministic tie-breaker for split selection
/// Orders candidates by (feature_idx, threshold)
#[derive(Debug, Clone, Copy)]
pub struct SplitTieBreaker {
    pub feature_idx: usize,
    pub threshold: f64,
}

impl SplitTieBreaker {
    pub fn new(feature_idx: usize, threshold: f64) -> Self {
        Self {
            feature_idx,
            threshold,
        }
    }

    /// Total order over candidates, thresholds compared with `total_cmp`
    pub fn cmp_key(&self, other: &Self) -> Ordering {
        self.feature_idx
            .cmp(&other.feature_idx)
            .then_with(|| self.threshold.total_cmp(&other.threshold))
    }

    pub fn precedes(&self, other: &Self) -> bool {
        self.cmp_key(other) == Ordering::Less
    }
}

/// RNG stream for tree `tree_idx` of an ensemble seeded with `base_seed`.
pub fn tree_rng(base_seed: u64, tree_idx: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(tree_idx as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_tie_breaker_ordering() {
        let t1 = SplitTieBreaker::new(0, 0.5);
        let t2 = SplitTieBreaker::new(0, 1.5);
        let t3 = SplitTieBreaker::new(1, -3.0);

        assert!(t1.precedes(&t2));
        assert!(t2.precedes(&t3));
        assert!(!t3.precedes(&t1));
        assert!(!t1.precedes(&t1));
    }

    #[test]
    fn test_tree_rng_streams() {
        let mut a = tree_rng(42, 3);
        let mut b = tree_rng(42, 3);
        let mut c = tree_rng(42, 4);

        let first = a.next_u64();
        assert_eq!(first, b.next_u64());
        assert_ne!(first, c.next_u64());
    }
}
