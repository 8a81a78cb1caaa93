//! Deterministic seeding
//!
//! A [`SeedSequence`] is built once from the configured seed and hands out an
//! independent ChaCha stream per named stage. Stage seeds are derived from
//! BLAKE3(seed, label), so adding a stage never perturbs another stage.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Weight initialisation stream
pub const STAGE_INIT: &str = "init";
/// Training-loader shuffle stream
pub const STAGE_SHUFFLE_TRAIN: &str = "shuffle/train";
/// Validation-loader shuffle stream
pub const STAGE_SHUFFLE_VALID: &str = "shuffle/valid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSequence {
    seed: u64,
}

impl SeedSequence {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// The configured seed. The splitter and the ranker consume it directly.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// 64-bit seed for a named stage
    pub fn stage_seed(&self, stage: &str) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(stage.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Fresh generator for a named stage
    pub fn stream(&self, stage: &str) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.stage_seed(stage))
    }
}
