//! Integration tests for the forest ranker
//!
//! Identical inputs and seeds must produce identical forests and rankings.

use anyhow::Result;
use healthcast_forest::{
    rank_features, CorrelationRanker, FeatureRanker, ForestConfig, ForestRanker,
    RandomForestRegressor,
};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// 100 rows, 30 columns, target driven by columns 3, 7, 11, 19 and 26
fn informative_dataset() -> (Vec<Vec<f32>>, Vec<f32>, Vec<usize>) {
    let informative = vec![3, 7, 11, 19, 26];
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let features: Vec<Vec<f32>> = (0..100)
        .map(|_| (0..30).map(|_| rng.gen::<f32>()).collect())
        .collect();
    let targets = features
        .iter()
        .map(|row| {
            let noise = rng.gen_range(-0.05_f32..0.05);
            4.0 * row[3] + 3.0 * row[7] - 3.5 * row[11] + 2.5 * row[19] + 3.0 * row[26] + noise
        })
        .collect();
    (features, targets, informative)
}

fn ranker_config(seed: u64) -> ForestConfig {
    ForestConfig {
        n_estimators: 30,
        max_depth: Some(5),
        seed,
        ..ForestConfig::default()
    }
}

#[test]
fn test_deterministic_ranking() -> Result<()> {
    let (features, targets, _) = informative_dataset();

    let first = rank_features(&ForestRanker::new(ranker_config(5201314)), &features, &targets)?;
    let second = rank_features(&ForestRanker::new(ranker_config(5201314)), &features, &targets)?;

    assert_eq!(first.order(), second.order());
    for (a, b) in first.scores().iter().zip(second.scores()) {
        assert_eq!(a.to_bits(), b.to_bits(), "importances must match bitwise");
    }
    Ok(())
}

#[test]
fn test_informative_features_in_top_twenty() -> Result<()> {
    let (features, targets, informative) = informative_dataset();

    for seed in [1_u64, 42, 5201314] {
        let ranking = rank_features(&ForestRanker::new(ranker_config(seed)), &features, &targets)?;
        let top = ranking.top(20).expect("30 columns");
        for idx in &informative {
            assert!(
                top.contains(idx),
                "seed {}: informative column {} missing from top 20",
                seed,
                idx
            );
        }
    }
    Ok(())
}

#[test]
fn test_correlation_ranker_agrees_on_signal() -> Result<()> {
    let (features, targets, informative) = informative_dataset();
    let ranking = rank_features(&CorrelationRanker, &features, &targets)?;
    let top = ranking.top(20).expect("30 columns");

    let hits = informative.iter().filter(|idx| top.contains(idx)).count();
    assert!(hits >= 4, "only {} informative columns selected", hits);
    Ok(())
}

#[test]
fn test_forest_predictions_stable_across_fits() -> Result<()> {
    let (features, targets, _) = informative_dataset();

    let mut a = RandomForestRegressor::new(ranker_config(9));
    let mut b = RandomForestRegressor::new(ranker_config(9));
    a.fit(&features, &targets)?;
    b.fit(&features, &targets)?;

    assert_eq!(a.predict(&features)?, b.predict(&features)?);
    Ok(())
}

proptest! {
    #[test]
    fn ranking_is_a_permutation(
        rows in 2usize..24,
        cols in 1usize..8,
        seed in any::<u64>(),
        salt in 0u32..1000,
    ) {
        let features: Vec<Vec<f32>> = (0..rows)
            .map(|r| (0..cols).map(|c| ((r as u32 * 7 + c as u32 * 3 + salt) % 13) as f32).collect())
            .collect();
        let targets: Vec<f32> = (0..rows).map(|r| ((r as u32 * salt) % 11) as f32).collect();

        let ranker = ForestRanker::new(ForestConfig {
            n_estimators: 3,
            max_depth: Some(3),
            seed,
            ..ForestConfig::default()
        });
        let scores = ranker.importances(&features, &targets).unwrap();
        let ranking = healthcast_forest::FeatureRanking::from_scores(scores);

        let mut seen = ranking.order().to_vec();
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..cols).collect::<Vec<_>>());

        let total: f64 = ranking.scores().iter().sum();
        prop_assert!(total == 0.0 || (total - 1.0).abs() < 1e-9);
        prop_assert!(ranking.scores().iter().all(|s| *s >= 0.0));
    }
}
