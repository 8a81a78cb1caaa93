//! Property tests for splitting, batching and column selection

use healthcast_trainer::split::valid_size;
use healthcast_trainer::{train_valid_split, BatchLoader, SampleSet, SelectedFeatures};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn sample_set(n: usize, width: usize) -> SampleSet {
    // row i holds i in every column, target i as well
    let rows = (0..n).map(|i| vec![i as f32; width]).collect();
    let targets = (0..n).map(|i| i as f32).collect();
    SampleSet::new(width, rows, Some(targets)).unwrap()
}

proptest! {
    #[test]
    fn split_is_a_partition(n in 0usize..400, ratio in 0.0f64..0.95, seed in any::<u64>()) {
        let split = train_valid_split(n, ratio, seed).unwrap();

        prop_assert_eq!(split.valid.len(), valid_size(n, ratio));
        prop_assert_eq!(split.total(), n);

        let mut all: Vec<usize> = split.train.iter().chain(&split.valid).copied().collect();
        all.sort_unstable();
        prop_assert_eq!(all, (0..n).collect::<Vec<_>>());

        prop_assert_eq!(train_valid_split(n, ratio, seed).unwrap(), split);
    }

    #[test]
    fn shuffled_pass_keeps_every_row_once(
        n in 1usize..300,
        batch_size in 1usize..64,
        seed in any::<u64>(),
        passes in 1usize..4,
    ) {
        let set = sample_set(n, 3);
        let mut loader = BatchLoader::shuffled(&set, batch_size, ChaCha8Rng::seed_from_u64(seed)).unwrap();

        for _ in 0..passes {
            let mut seen = Vec::with_capacity(n);
            let mut batches = 0;
            for batch in loader.batches() {
                prop_assert!(batch.len() <= batch_size);
                let targets = batch.targets.as_ref().unwrap();
                for (i, &row) in batch.rows.iter().enumerate() {
                    prop_assert!(batch.row(i).iter().all(|&v| v == row as f32));
                    prop_assert_eq!(targets[i], row as f32);
                }
                seen.extend(batch.rows.iter().copied());
                batches += 1;
            }
            prop_assert_eq!(batches, n.div_ceil(batch_size));
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn sequential_pass_preserves_order(n in 0usize..300, batch_size in 1usize..64) {
        let set = sample_set(n, 2);
        let mut loader = BatchLoader::sequential(&set, batch_size).unwrap();

        let order: Vec<usize> = loader.batches().flat_map(|b| b.rows).collect();
        prop_assert_eq!(order, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn selection_keeps_columns_aligned(
        width in 1usize..40,
        picks in proptest::collection::vec(any::<prop::sample::Index>(), 1..10),
        rows in 1usize..20,
    ) {
        let mut indices: Vec<usize> = picks.iter().map(|p| p.index(width)).collect();
        let mut seen = std::collections::HashSet::new();
        indices.retain(|i| seen.insert(*i));

        let selection = SelectedFeatures::from_indices(indices.clone(), width).unwrap();
        let matrix: Vec<Vec<f32>> = (0..rows)
            .map(|r| (0..width).map(|c| (r * 1000 + c) as f32).collect())
            .collect();

        let reduced = selection.apply(&matrix, "train").unwrap();
        prop_assert_eq!(reduced.len(), rows);
        for (r, row) in reduced.iter().enumerate() {
            prop_assert_eq!(row.len(), indices.len());
            for (j, &col) in indices.iter().enumerate() {
                prop_assert_eq!(row[j], (r * 1000 + col) as f32);
            }
        }
    }
}
