//! Sample container
//!
//! Immutable, indexable records built once from a reduced feature matrix and
//! optional targets. Rows are stored contiguously.

use crate::errors::{PipelineError, Result};

/// One record: a feature slice and, for labelled data, its target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    pub features: &'a [f32],
    pub target: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    features: Vec<f32>,
    targets: Option<Vec<f32>>,
    width: usize,
    len: usize,
}

impl SampleSet {
    /// Build from `rows` of exactly `width` features each
    pub fn new(width: usize, rows: Vec<Vec<f32>>, targets: Option<Vec<f32>>) -> Result<Self> {
        let len = rows.len();

        if let Some(targets) = &targets {
            if targets.len() != len {
                return Err(PipelineError::config(format!(
                    "{} targets for {} feature rows",
                    targets.len(),
                    len
                )));
            }
        }

        let mut features = Vec::with_capacity(len * width);
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(PipelineError::config(format!(
                    "row {} has {} features, expected {}",
                    idx,
                    row.len(),
                    width
                )));
            }
            features.extend(row);
        }

        Ok(Self {
            features,
            targets,
            width,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Features per sample
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn has_targets(&self) -> bool {
        self.targets.is_some()
    }

    pub fn get(&self, index: usize) -> Result<Sample<'_>> {
        if index >= self.len {
            return Err(PipelineError::Index {
                index,
                len: self.len,
            });
        }
        let start = index * self.width;
        Ok(Sample {
            features: &self.features[start..start + self.width],
            target: self.targets.as_ref().map(|t| t[index]),
        })
    }
}
