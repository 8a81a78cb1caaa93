//! Shared fixtures for the trainer integration tests

#![allow(dead_code)]

use anyhow::Result;
use healthcast_trainer::PipelineConfig;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Feature columns of the survey-like tables, after the `id` column
pub const N_FEATURES: usize = 10;

/// Source-column indices (counting `id` as column 0) that drive the target
pub const INFORMATIVE: [usize; 3] = [3, 6, 8];

fn survey_row(rng: &mut ChaCha8Rng) -> (Vec<f32>, f32) {
    let features: Vec<f32> = (0..N_FEATURES).map(|_| rng.gen::<f32>()).collect();
    let noise = rng.gen_range(-0.02_f32..0.02);
    // features[k] sits at source column k + 1
    let target = 4.0 * features[2] - 3.0 * features[5] + 2.5 * features[7] + 1.0 + noise;
    (features, target)
}

fn header(with_target: bool) -> String {
    let mut cols = vec!["id".to_string()];
    cols.extend((0..N_FEATURES).map(|i| format!("f{}", i)));
    if with_target {
        cols.push("tested_positive".to_string());
    }
    cols.join(",")
}

/// Training CSV: `id,f0..f9,tested_positive`
pub fn write_train_csv(dir: &Path, rows: usize, seed: u64) -> Result<PathBuf> {
    write_scaled_train_csv(dir, rows, seed, 1.0)
}

/// Training CSV with every target multiplied by `scale`
pub fn write_scaled_train_csv(dir: &Path, rows: usize, seed: u64, scale: f32) -> Result<PathBuf> {
    let path = dir.join("covid.train.csv");
    let mut file = std::fs::File::create(&path)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    writeln!(file, "{}", header(true))?;
    for id in 0..rows {
        let (features, target) = survey_row(&mut rng);
        let values: Vec<String> = features.iter().map(|v| v.to_string()).collect();
        writeln!(file, "{},{},{}", id, values.join(","), target * scale)?;
    }
    file.flush()?;
    Ok(path)
}

/// Test CSV: same columns without the target
pub fn write_test_csv(dir: &Path, rows: usize, seed: u64) -> Result<PathBuf> {
    let path = dir.join("covid.test.csv");
    let mut file = std::fs::File::create(&path)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    writeln!(file, "{}", header(false))?;
    for id in 0..rows {
        let (features, _) = survey_row(&mut rng);
        let values: Vec<String> = features.iter().map(|v| v.to_string()).collect();
        writeln!(file, "{},{}", id, values.join(","))?;
    }
    file.flush()?;
    Ok(path)
}

/// Target of the linear table
pub fn linear_target(x0: f32, x1: f32) -> f32 {
    2.0 * x0 - x1 + 1.0
}

/// Two-feature table with `y = 2*x0 - x1 + 1`
pub fn write_linear_csv(dir: &Path, rows: usize, seed: u64) -> Result<PathBuf> {
    let path = dir.join("linear.csv");
    let mut file = std::fs::File::create(&path)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    writeln!(file, "x0,x1,y")?;
    for _ in 0..rows {
        let x0 = rng.gen::<f32>();
        let x1 = rng.gen::<f32>();
        writeln!(file, "{},{},{}", x0, x1, linear_target(x0, x1))?;
    }
    file.flush()?;
    Ok(path)
}

/// Small, fast configuration writing its checkpoint under `dir`
pub fn quick_config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        n_epochs: 40,
        batch_size: 16,
        learning_rate: 0.01,
        early_stop: 10,
        top_k_features: 5,
        ensemble_size: 20,
        ensemble_max_depth: 4,
        save_path: dir.join("models/model.ckpt"),
        ..PipelineConfig::default()
    }
}
