//! Random-forest regressor
//!
//! Bootstrap-aggregated CART trees. Each tree draws its bootstrap sample and
//! per-node feature subsets from its own ChaCha stream (`seed + tree_idx`),
//! so a fitted forest is a pure function of (data, config).

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cart::{CartBuilder, RegressionTree, TreeConfig};
use crate::deterministic::tree_rng;
use crate::errors::{ForestError, Result};

/// Strategy for the number of features examined at each split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaxFeatures {
    /// Square root of the feature count
    Sqrt,
    /// Fraction of the feature count
    Fraction(f64),
    /// Fixed number of features
    Fixed(usize),
    /// Every feature
    All,
}

impl MaxFeatures {
    fn resolve(&self, n_features: usize) -> Option<usize> {
        let count = match *self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).ceil() as usize,
            MaxFeatures::Fixed(n) => n,
            MaxFeatures::All => return None,
        };
        Some(count.clamp(1, n_features.max(1)))
    }
}

/// Random-forest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: Some(5),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
            seed: 0,
        }
    }
}

/// Random-forest regressor with impurity-based feature importances
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    config: ForestConfig,
    trees: Vec<RegressionTree>,
    importances: Option<Vec<f64>>,
    n_features: usize,
}

impl RandomForestRegressor {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            importances: None,
            n_features: 0,
        }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Fit the forest to a row-major feature matrix and its targets
    pub fn fit(&mut self, features: &[Vec<f32>], targets: &[f32]) -> Result<&mut Self> {
        let n_features = validate_training_data(features, targets)?;

        if self.config.n_estimators == 0 {
            return Err(ForestError::InvalidParameters(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        if self.config.max_depth == Some(0) {
            return Err(ForestError::InvalidParameters(
                "max_depth must be at least 1".to_string(),
            ));
        }

        let n_samples = features.len();
        let tree_config = TreeConfig {
            max_depth: self.config.max_depth,
            min_samples_split: self.config.min_samples_split,
            min_samples_leaf: self.config.min_samples_leaf,
            max_features: self.config.max_features.resolve(n_features),
        };
        let builder = CartBuilder::new(features, targets, tree_config);

        let mut trees = Vec::with_capacity(self.config.n_estimators);
        let mut total_importances = vec![0.0; n_features];

        for tree_idx in 0..self.config.n_estimators {
            let mut rng = tree_rng(self.config.seed, tree_idx);

            let sample_indices: Vec<usize> = if self.config.bootstrap {
                (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
            } else {
                (0..n_samples).collect()
            };

            let mut tree_importances = vec![0.0; n_features];
            let tree = builder.build(&sample_indices, &mut rng, &mut tree_importances);

            // Per-tree normalisation, as in the usual impurity-importance definition
            let tree_total: f64 = tree_importances.iter().sum();
            if tree_total > 0.0 {
                for (total, imp) in total_importances.iter_mut().zip(&tree_importances) {
                    *total += imp / tree_total;
                }
            }

            debug!(
                tree = tree_idx,
                nodes = tree.nodes.len(),
                depth = tree.depth(),
                "fitted tree"
            );
            trees.push(tree);
        }

        let n_trees = trees.len() as f64;
        for imp in &mut total_importances {
            *imp /= n_trees;
        }

        let total: f64 = total_importances.iter().sum();
        if total > 0.0 {
            for imp in &mut total_importances {
                *imp /= total;
            }
        }

        self.trees = trees;
        self.importances = Some(total_importances);
        self.n_features = n_features;

        Ok(self)
    }

    /// Normalised impurity importances (sum to 1 unless no tree could split)
    pub fn feature_importances(&self) -> Option<&[f64]> {
        self.importances.as_deref()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Mean of the tree predictions for one feature vector
    pub fn predict_row(&self, features: &[f32]) -> Result<f64> {
        if self.trees.is_empty() {
            return Err(ForestError::NotFitted);
        }
        if features.len() != self.n_features {
            return Err(ForestError::InvalidParameters(format!(
                "expected {} features, got {}",
                self.n_features,
                features.len()
            )));
        }

        let sum: f64 = self.trees.iter().map(|tree| tree.evaluate(features)).sum();
        Ok(sum / self.trees.len() as f64)
    }

    pub fn predict(&self, features: &[Vec<f32>]) -> Result<Vec<f64>> {
        features.iter().map(|row| self.predict_row(row)).collect()
    }
}

/// Check shape and finiteness of a training matrix, returning the feature count
pub(crate) fn validate_training_data(features: &[Vec<f32>], targets: &[f32]) -> Result<usize> {
    if features.len() != targets.len() {
        return Err(ForestError::InsufficientData(format!(
            "{} feature rows but {} targets",
            features.len(),
            targets.len()
        )));
    }
    if features.len() < 2 {
        return Err(ForestError::InsufficientData(format!(
            "need at least 2 samples, got {}",
            features.len()
        )));
    }

    let n_features = features[0].len();
    if n_features == 0 {
        return Err(ForestError::InsufficientData(
            "feature matrix has no columns".to_string(),
        ));
    }

    for (row_idx, row) in features.iter().enumerate() {
        if row.len() != n_features {
            return Err(ForestError::InvalidParameters(format!(
                "row {} has {} features, expected {}",
                row_idx,
                row.len(),
                n_features
            )));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ForestError::InvalidParameters(format!(
                "row {} contains a non-finite feature value",
                row_idx
            )));
        }
    }

    if let Some(idx) = targets.iter().position(|t| !t.is_finite()) {
        return Err(ForestError::InvalidParameters(format!(
            "target {} is not finite",
            idx
        )));
    }

    Ok(n_features)
}
