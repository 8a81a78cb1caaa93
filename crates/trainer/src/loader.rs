//! Batch loading
//!
//! A [`BatchLoader`] walks a [`SampleSet`] in fixed-size batches. Every call to
//! [`BatchLoader::batches`] starts a new pass; shuffled loaders reorder the
//! rows at the start of each pass from their own seeded stream. The last batch
//! may be short.

use crate::container::SampleSet;
use crate::errors::{PipelineError, Result};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Contiguous row-major batch
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Source row of each sample
    pub rows: Vec<usize>,
    pub features: Vec<f32>,
    pub targets: Option<Vec<f32>>,
    pub width: usize,
    /// Staged for device transfer
    pub pinned: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.features[i * self.width..(i + 1) * self.width]
    }
}

#[derive(Debug)]
pub struct BatchLoader<'a> {
    samples: &'a SampleSet,
    batch_size: usize,
    rng: Option<ChaCha8Rng>,
    pin_memory: bool,
    order: Vec<usize>,
}

impl<'a> BatchLoader<'a> {
    /// Loader that preserves row order
    pub fn sequential(samples: &'a SampleSet, batch_size: usize) -> Result<Self> {
        Self::build(samples, batch_size, None)
    }

    /// Loader that reshuffles every pass using `rng`
    pub fn shuffled(samples: &'a SampleSet, batch_size: usize, rng: ChaCha8Rng) -> Result<Self> {
        Self::build(samples, batch_size, Some(rng))
    }

    fn build(samples: &'a SampleSet, batch_size: usize, rng: Option<ChaCha8Rng>) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::config("batch_size must be positive"));
        }
        Ok(Self {
            samples,
            batch_size,
            rng,
            pin_memory: false,
            order: (0..samples.len()).collect(),
        })
    }

    pub fn with_pin_memory(mut self, pin_memory: bool) -> Self {
        self.pin_memory = pin_memory;
        self
    }

    pub fn is_shuffled(&self) -> bool {
        self.rng.is_some()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Samples per pass
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn width(&self) -> usize {
        self.samples.width()
    }

    pub fn num_batches(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    /// Start a new pass over the samples
    pub fn batches(&mut self) -> Batches<'_> {
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
        Batches {
            samples: self.samples,
            chunks: self.order.chunks(self.batch_size),
            pinned: self.pin_memory,
        }
    }
}

/// One pass of batches
pub struct Batches<'p> {
    samples: &'p SampleSet,
    chunks: std::slice::Chunks<'p, usize>,
    pinned: bool,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let chunk = self.chunks.next()?;
        let width = self.samples.width();

        let mut features = Vec::with_capacity(chunk.len() * width);
        let mut targets = self
            .samples
            .has_targets()
            .then(|| Vec::with_capacity(chunk.len()));

        for &idx in chunk {
            // indices come from 0..len, so access cannot fail
            let Ok(sample) = self.samples.get(idx) else {
                continue;
            };
            features.extend_from_slice(sample.features);
            if let (Some(targets), Some(target)) = (targets.as_mut(), sample.target) {
                targets.push(target);
            }
        }

        Some(Batch {
            rows: chunk.to_vec(),
            features,
            targets,
            width,
            pinned: self.pinned,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}
