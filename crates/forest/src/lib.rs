//! healthcast forest - deterministic random-forest regression
//!
//! Bootstrap-aggregated CART trees with MSE impurity, used to score feature
//! columns before the network is trained. Every random draw comes from a
//! seeded ChaCha stream, so fitting the same data twice yields identical trees
//! and identical importances.

pub mod cart;
pub mod deterministic;
pub mod errors;
pub mod forest;
pub mod ranking;

pub use cart::{CartBuilder, Node, RegressionTree, TreeConfig};
pub use deterministic::{tree_rng, SplitTieBreaker};
pub use errors::{ForestError, Result};
pub use forest::{ForestConfig, MaxFeatures, RandomForestRegressor};
pub use ranking::{rank_features, CorrelationRanker, FeatureRanker, FeatureRanking, ForestRanker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
