//! Top-K feature selection
//!
//! One [`SelectedFeatures`] value is derived from the ranking and applied to
//! the train, validation and test matrices alike, so the columns line up.

use crate::errors::{PipelineError, Result};
use healthcast_forest::FeatureRanking;
use serde::{Deserialize, Serialize};

/// Column subset of a source matrix of width `source_width`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedFeatures {
    indices: Vec<usize>,
    source_width: usize,
}

impl SelectedFeatures {
    /// Last `k` entries of the ranking, i.e. the most important columns, in ranking order
    pub fn from_ranking(ranking: &FeatureRanking, k: usize) -> Result<Self> {
        if k == 0 {
            return Err(PipelineError::config("top_k_features must be positive"));
        }
        let top = ranking.top(k).ok_or_else(|| {
            PipelineError::config(format!(
                "top_k_features = {} exceeds the {} available features",
                k,
                ranking.len()
            ))
        })?;

        Ok(Self {
            indices: top.to_vec(),
            source_width: ranking.len(),
        })
    }

    /// Every column in natural order
    pub fn all(source_width: usize) -> Self {
        Self {
            indices: (0..source_width).collect(),
            source_width,
        }
    }

    /// Rebuild a selection, e.g. from a checkpoint
    pub fn from_indices(indices: Vec<usize>, source_width: usize) -> Result<Self> {
        if indices.is_empty() {
            return Err(PipelineError::config("feature selection is empty"));
        }
        let mut seen = vec![false; source_width];
        for &idx in &indices {
            match seen.get_mut(idx) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(PipelineError::config(format!(
                        "feature {} selected twice",
                        idx
                    )))
                }
                None => {
                    return Err(PipelineError::config(format!(
                        "feature {} out of range for width {}",
                        idx, source_width
                    )))
                }
            }
        }
        Ok(Self {
            indices,
            source_width,
        })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn source_width(&self) -> usize {
        self.source_width
    }

    /// Reduce `matrix` to the selected columns. `split` names the matrix in errors.
    pub fn apply(&self, matrix: &[Vec<f32>], split: &str) -> Result<Vec<Vec<f32>>> {
        matrix
            .iter()
            .enumerate()
            .map(|(row_idx, row)| {
                if row.len() != self.source_width {
                    return Err(PipelineError::config(format!(
                        "{} row {} has {} features, expected {}",
                        split,
                        row_idx,
                        row.len(),
                        self.source_width
                    )));
                }
                Ok(self.indices.iter().map(|&col| row[col]).collect())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranking() -> FeatureRanking {
        FeatureRanking::from_scores(vec![0.1, 0.4, 0.0, 0.3, 0.2])
    }

    #[test]
    fn test_top_k_in_ranking_order() {
        let selected = SelectedFeatures::from_ranking(&ranking(), 2).unwrap();
        assert_eq!(selected.indices(), &[3, 1]);
        assert_eq!(selected.source_width(), 5);
    }

    #[test]
    fn test_k_bounds() {
        assert!(matches!(
            SelectedFeatures::from_ranking(&ranking(), 0),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            SelectedFeatures::from_ranking(&ranking(), 6),
            Err(PipelineError::Config(_))
        ));
        assert_eq!(SelectedFeatures::from_ranking(&ranking(), 5).unwrap().len(), 5);
    }

    #[test]
    fn test_apply_same_columns_everywhere() {
        let selected = SelectedFeatures::from_ranking(&ranking(), 2).unwrap();
        let train = vec![vec![0.0, 1.0, 2.0, 3.0, 4.0]];
        let test = vec![vec![10.0, 11.0, 12.0, 13.0, 14.0]];

        assert_eq!(selected.apply(&train, "train").unwrap(), vec![vec![3.0, 1.0]]);
        assert_eq!(selected.apply(&test, "test").unwrap(), vec![vec![13.0, 11.0]]);

        let err = selected.apply(&[vec![1.0, 2.0]], "test").unwrap_err();
        assert!(err.to_string().contains("test row 0"));
    }

    #[test]
    fn test_all_and_from_indices() {
        assert_eq!(SelectedFeatures::all(3).indices(), &[0, 1, 2]);
        assert!(SelectedFeatures::from_indices(vec![2, 0], 3).is_ok());
        assert!(SelectedFeatures::from_indices(vec![2, 2], 3).is_err());
        assert!(SelectedFeatures::from_indices(vec![3], 3).is_err());
        assert!(SelectedFeatures::from_indices(vec![], 3).is_err());
    }
}
