//! Feature ranking
//!
//! A [`FeatureRanker`] turns a training matrix into one importance score per
//! column; [`FeatureRanking`] orders the columns ascending by that score.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{ForestError, Result};
use crate::forest::{validate_training_data, ForestConfig, RandomForestRegressor};

/// Anything that can score feature columns against a regression target
pub trait FeatureRanker {
    fn name(&self) -> &'static str;

    /// One non-negative score per feature column
    fn importances(&self, features: &[Vec<f32>], targets: &[f32]) -> Result<Vec<f64>>;
}

/// Feature indices ordered from least to most important
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRanking {
    order: Vec<usize>,
    scores: Vec<f64>,
}

impl FeatureRanking {
    /// Sort columns ascending by score. Equal scores keep ascending index order.
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
        Self { order, scores }
    }

    /// Ranked indices, least important first
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Scores indexed by original column
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The `k` most important columns, in ranking order. `None` if `k` exceeds the width.
    pub fn top(&self, k: usize) -> Option<&[usize]> {
        let n = self.order.len();
        if k > n {
            return None;
        }
        Some(&self.order[n - k..])
    }

    /// `(index, score)` pairs, most important first
    pub fn report(&self, limit: usize) -> Vec<(usize, f64)> {
        self.order
            .iter()
            .rev()
            .take(limit)
            .map(|&idx| (idx, self.scores[idx]))
            .collect()
    }
}

/// Score the columns with `ranker` and order them
pub fn rank_features<R: FeatureRanker + ?Sized>(
    ranker: &R,
    features: &[Vec<f32>],
    targets: &[f32],
) -> Result<FeatureRanking> {
    let scores = ranker.importances(features, targets)?;
    let ranking = FeatureRanking::from_scores(scores);

    info!(
        ranker = ranker.name(),
        samples = features.len(),
        features = ranking.len(),
        "ranked features"
    );
    Ok(ranking)
}

/// Impurity importances from a bootstrap random forest
#[derive(Debug, Clone)]
pub struct ForestRanker {
    config: ForestConfig,
}

impl ForestRanker {
    pub fn new(config: ForestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }
}

impl FeatureRanker for ForestRanker {
    fn name(&self) -> &'static str {
        "forest"
    }

    fn importances(&self, features: &[Vec<f32>], targets: &[f32]) -> Result<Vec<f64>> {
        let mut forest = RandomForestRegressor::new(self.config.clone());
        forest.fit(features, targets)?;
        forest
            .feature_importances()
            .map(<[f64]>::to_vec)
            .ok_or(ForestError::NotFitted)
    }
}

/// Absolute Pearson correlation between each column and the target.
/// Constant columns score zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationRanker;

impl FeatureRanker for CorrelationRanker {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn importances(&self, features: &[Vec<f32>], targets: &[f32]) -> Result<Vec<f64>> {
        let n_features = validate_training_data(features, targets)?;
        let n = targets.len() as f64;

        let target_mean = targets.iter().map(|&t| t as f64).sum::<f64>() / n;
        let target_var: f64 = targets
            .iter()
            .map(|&t| (t as f64 - target_mean).powi(2))
            .sum();

        let scores = (0..n_features)
            .map(|col| {
                let mean = features.iter().map(|row| row[col] as f64).sum::<f64>() / n;
                let mut cov = 0.0;
                let mut var = 0.0;
                for (row, &t) in features.iter().zip(targets) {
                    let dx = row[col] as f64 - mean;
                    cov += dx * (t as f64 - target_mean);
                    var += dx * dx;
                }
                if var <= 0.0 || target_var <= 0.0 {
                    0.0
                } else {
                    (cov / (var * target_var).sqrt()).abs()
                }
            })
            .collect();

        Ok(scores)
    }
}
