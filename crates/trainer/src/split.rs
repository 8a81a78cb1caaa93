//! Train/validation splitting
//!
//! Rows are partitioned by a seeded Fisher-Yates permutation: the first
//! `N - floor(r * N)` permuted indices train, the rest validate.

use crate::errors::{PipelineError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Disjoint row-index partition, both halves in permutation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
}

impl Split {
    pub fn total(&self) -> usize {
        self.train.len() + self.valid.len()
    }
}

/// Number of validation rows for `n` rows at ratio `ratio`
pub fn valid_size(n: usize, ratio: f64) -> usize {
    (ratio * n as f64).floor() as usize
}

pub fn train_valid_split(n: usize, ratio: f64, seed: u64) -> Result<Split> {
    if !ratio.is_finite() || !(0.0..1.0).contains(&ratio) {
        return Err(PipelineError::config(format!(
            "valid_ratio must be in [0, 1), got {}",
            ratio
        )));
    }

    let n_valid = valid_size(n, ratio).min(n);
    let n_train = n - n_valid;

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let valid = order.split_off(n_train);
    Ok(Split {
        train: order,
        valid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let split = train_valid_split(10, 0.2, 5201314).unwrap();
        assert_eq!(split.train.len(), 8);
        assert_eq!(split.valid.len(), 2);

        let split = train_valid_split(7, 0.5, 1).unwrap();
        assert_eq!(split.valid.len(), 3);
        assert_eq!(split.train.len(), 4);
    }

    #[test]
    fn test_zero_ratio_keeps_everything() {
        let split = train_valid_split(5, 0.0, 3).unwrap();
        assert!(split.valid.is_empty());
        let mut train = split.train.clone();
        train.sort_unstable();
        assert_eq!(train, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_invalid_ratio() {
        for ratio in [1.0, 1.5, -0.2, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                train_valid_split(10, ratio, 0),
                Err(PipelineError::Config(_))
            ));
        }
    }

    #[test]
    fn test_empty_input() {
        let split = train_valid_split(0, 0.2, 0).unwrap();
        assert_eq!(split.total(), 0);
    }

    #[test]
    fn test_seed_matters() {
        let a = train_valid_split(50, 0.2, 1).unwrap();
        let b = train_valid_split(50, 0.2, 2).unwrap();
        assert_ne!(a, b);
    }
}
