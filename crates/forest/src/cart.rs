//! CART (Classification and Regression Tree) builder
//!
//! Implements deterministic exact-greedy regression trees with MSE impurity.
//! Every accepted split credits its impurity decrease to the split feature;
//! the forest aggregates those credits into feature importances.

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::deterministic::SplitTieBreaker;

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per node (`None` examines all of them)
    pub max_features: Option<usize>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

/// A regression tree node
///
/// Leaves carry `feature_idx == -1` and `left == right == -1`.
/// Internal nodes keep the mean of their samples in `value` as well.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub feature_idx: i32,
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
    pub value: f64,
    pub samples: usize,
}

impl Node {
    fn leaf(value: f64, samples: usize) -> Self {
        Self {
            feature_idx: -1,
            threshold: 0.0,
            left: -1,
            right: -1,
            value,
            samples,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature_idx < 0
    }
}

/// A fitted regression tree (node 0 is the root)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionTree {
    pub nodes: Vec<Node>,
    pub feature_count: usize,
}

impl RegressionTree {
    /// Traverse the tree for one feature vector
    pub fn evaluate(&self, features: &[f32]) -> f64 {
        let mut idx = 0usize;

        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };

            if node.is_leaf() {
                return node.value;
            }

            let Some(&value) = features.get(node.feature_idx as usize) else {
                return node.value;
            };

            idx = if f64::from(value) <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
    }

    /// Depth of the deepest leaf (a lone root leaf has depth 0)
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(node) if !node.is_leaf() => {
                    1 + walk(nodes, node.left as usize).max(walk(nodes, node.right as usize))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }
}

/// Running target moments for a set of samples
#[derive(Clone, Copy, Debug, Default)]
struct Moments {
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn add(&mut self, y: f64) {
        self.count += 1;
        self.sum += y;
        self.sum_sq += y * y;
    }

    fn minus(&self, other: &Moments) -> Moments {
        Moments {
            count: self.count - other.count,
            sum: self.sum - other.sum,
            sum_sq: self.sum_sq - other.sum_sq,
        }
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Sum of squared deviations, i.e. `count * mse_impurity`
    fn sse(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum_sq - self.sum * self.sum / self.count as f64).max(0.0)
    }
}

/// Split candidate with gain and tie-breaker
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
    tie_breaker: SplitTieBreaker,
}

impl SplitCandidate {
    fn new(feature_idx: usize, threshold: f64, gain: f64) -> Self {
        Self {
            feature_idx,
            threshold,
            gain,
            tie_breaker: SplitTieBreaker::new(feature_idx, threshold),
        }
    }

    fn beats(&self, current: &SplitCandidate) -> bool {
        self.gain > current.gain
            || (self.gain == current.gain && self.tie_breaker.precedes(&current.tie_breaker))
    }
}

/// Build a regression tree using the exact-greedy CART algorithm
pub struct CartBuilder<'a> {
    config: TreeConfig,
    features: &'a [Vec<f32>],
    targets: &'a [f32],
    feature_count: usize,
}

impl<'a> CartBuilder<'a> {
    pub fn new(features: &'a [Vec<f32>], targets: &'a [f32], config: TreeConfig) -> Self {
        debug_assert_eq!(features.len(), targets.len());

        let feature_count = features.first().map_or(0, Vec::len);

        Self {
            config,
            features,
            targets,
            feature_count,
        }
    }

    /// Build a tree over `indices` (duplicates allowed, as in bootstrap samples).
    ///
    /// The impurity decrease of every split is added to `importances[feature]`,
    /// which must be `feature_count` long.
    pub fn build<R: Rng>(&self, indices: &[usize], rng: &mut R, importances: &mut [f64]) -> RegressionTree {
        let mut nodes = Vec::new();

        if !indices.is_empty() {
            self.build_node(indices.to_vec(), 0, rng, &mut nodes, importances);
        }

        RegressionTree {
            nodes,
            feature_count: self.feature_count,
        }
    }

    /// Recursively build tree nodes, returning the index of the created node
    fn build_node<R: Rng>(
        &self,
        indices: Vec<usize>,
        depth: usize,
        rng: &mut R,
        nodes: &mut Vec<Node>,
        importances: &mut [f64],
    ) -> i32 {
        let current_idx = nodes.len();
        let stats = self.moments(&indices);
        let leaf_value = stats.mean();

        let depth_reached = self.config.max_depth.is_some_and(|max| depth >= max);
        if depth_reached
            || indices.len() < self.config.min_samples_split.max(2)
            || indices.len() < 2 * self.config.min_samples_leaf.max(1)
            || stats.sse() <= f64::EPSILON * stats.sum_sq.max(1.0)
        {
            nodes.push(Node::leaf(leaf_value, indices.len()));
            return current_idx as i32;
        }

        let Some(split) = self.find_best_split(&indices, &stats, rng) else {
            nodes.push(Node::leaf(leaf_value, indices.len()));
            return current_idx as i32;
        };

        let feature_idx = split.feature_idx;
        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&idx| f64::from(self.features[idx][feature_idx]) <= split.threshold);

        importances[feature_idx] += split.gain;

        // Reserve the slot, children are patched in once built
        nodes.push(Node {
            feature_idx: feature_idx as i32,
            threshold: split.threshold,
            left: -1,
            right: -1,
            value: leaf_value,
            samples: indices.len(),
        });

        let left_idx = self.build_node(left_indices, depth + 1, rng, nodes, importances);
        let right_idx = self.build_node(right_indices, depth + 1, rng, nodes, importances);

        nodes[current_idx].left = left_idx;
        nodes[current_idx].right = right_idx;

        current_idx as i32
    }

    /// Find the split with the largest SSE reduction
    fn find_best_split<R: Rng>(
        &self,
        indices: &[usize],
        parent: &Moments,
        rng: &mut R,
    ) -> Option<SplitCandidate> {
        let candidates = match self.config.max_features {
            Some(max) if max < self.feature_count => {
                let mut chosen = index::sample(rng, self.feature_count, max.max(1)).into_vec();
                chosen.sort_unstable();
                chosen
            }
            _ => (0..self.feature_count).collect(),
        };

        let parent_sse = parent.sse();
        let min_leaf = self.config.min_samples_leaf.max(1);
        let n = indices.len();
        let mut order = indices.to_vec();
        let mut best_split: Option<SplitCandidate> = None;

        for feature_idx in candidates {
            order.sort_unstable_by(|&a, &b| {
                self.features[a][feature_idx]
                    .total_cmp(&self.features[b][feature_idx])
                    .then(a.cmp(&b))
            });

            let mut left = Moments::default();
            for pos in 0..n - 1 {
                let idx = order[pos];
                left.add(f64::from(self.targets[idx]));

                let current = self.features[idx][feature_idx];
                let next = self.features[order[pos + 1]][feature_idx];
                if current == next {
                    continue;
                }

                if left.count < min_leaf || n - left.count < min_leaf {
                    continue;
                }

                let right = parent.minus(&left);
                let gain = parent_sse - left.sse() - right.sse();
                if gain <= 0.0 {
                    continue;
                }

                let candidate = SplitCandidate::new(feature_idx, midpoint(current, next), gain);
                best_split = match best_split {
                    None => Some(candidate),
                    Some(current) if candidate.beats(&current) => Some(candidate),
                    keep => keep,
                };
            }
        }

        best_split
    }

    fn moments(&self, indices: &[usize]) -> Moments {
        let mut moments = Moments::default();
        for &idx in indices {
            moments.add(f64::from(self.targets[idx]));
        }
        moments
    }
}

/// Threshold strictly between two adjacent sorted values (`lo <= t < hi`)
fn midpoint(lo: f32, hi: f32) -> f64 {
    let (lo, hi) = (f64::from(lo), f64::from(hi));
    let mid = lo + (hi - lo) / 2.0;
    if mid >= hi {
        lo
    } else {
        mid
    }
}
