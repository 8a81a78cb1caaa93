//! CSV dataset loading
//!
//! Reads header-led numeric tables. The first non-comment record is the
//! header; every later record is a data row of the same width. Fields may be
//! quoted and are trimmed. For training files the last column is the
//! regression target.

use crate::errors::{PipelineError, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Numeric table with its header
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub header: Vec<String>,
    pub rows: Vec<Vec<f32>>,
    pub width: usize,
}

/// Feature matrix with its aligned targets
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledData {
    pub features: Vec<Vec<f32>>,
    pub targets: Vec<f32>,
}

fn csv_error(origin: &Path, err: csv::Error) -> PipelineError {
    let line = err.position().map_or(0, |pos| pos.line() as usize);
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => PipelineError::io(origin, source),
        _ => PipelineError::Parse {
            path: origin.to_path_buf(),
            line,
            message,
        },
    }
}

fn record_line(record: &StringRecord) -> usize {
    record.position().map_or(0, |pos| pos.line() as usize)
}

impl Dataset {
    /// Load dataset from CSV file
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let dataset = Self::from_reader(file, path)?;

        debug!(
            path = %path.display(),
            rows = dataset.len(),
            width = dataset.width,
            "loaded dataset"
        );
        Ok(dataset)
    }

    /// Parse CSV from any reader; `origin` labels errors
    pub fn from_reader<R: Read>(reader: R, origin: impl Into<PathBuf>) -> Result<Self> {
        let origin = origin.into();
        // flexible: short or long rows are reported below with their line
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| csv_error(&origin, e))?
            .iter()
            .map(str::to_string)
            .collect();
        if header.iter().all(String::is_empty) {
            return Err(PipelineError::InsufficientData(format!(
                "{} has no header row",
                origin.display()
            )));
        }

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| csv_error(&origin, e))?;
            let line = record_line(&record);

            if record.len() != header.len() {
                return Err(PipelineError::Parse {
                    path: origin,
                    line,
                    message: format!("expected {} fields, got {}", header.len(), record.len()),
                });
            }

            let mut row = Vec::with_capacity(record.len());
            for (col, field) in record.iter().enumerate() {
                let value = field.parse::<f32>().map_err(|_| PipelineError::Parse {
                    path: origin.clone(),
                    line,
                    message: format!("column {} (`{}`): invalid number `{}`", col + 1, header[col], field),
                })?;
                row.push(value);
            }
            rows.push(row);
        }

        let width = header.len();
        Ok(Self {
            header,
            rows,
            width,
        })
    }

    /// Get number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Per-column (min, max), logged when a table is loaded
    pub fn feature_stats(&self) -> Vec<(f32, f32)> {
        let mut stats = vec![(f32::INFINITY, f32::NEG_INFINITY); self.width];

        for row in &self.rows {
            for (stat, &val) in stats.iter_mut().zip(row) {
                stat.0 = stat.0.min(val);
                stat.1 = stat.1.max(val);
            }
        }

        stats
    }

    /// Names of the feature columns when the last column is the target
    pub fn feature_names(&self) -> &[String] {
        let n = self.header.len().saturating_sub(1);
        &self.header[..n]
    }

    /// Split the last column off as the target, keeping only `indices` (in that order)
    pub fn labeled_subset(&self, indices: &[usize]) -> Result<LabeledData> {
        if self.width < 2 {
            return Err(PipelineError::InsufficientData(format!(
                "training data needs at least one feature and a target, got {} columns",
                self.width
            )));
        }

        let target_col = self.width - 1;
        let mut features = Vec::with_capacity(indices.len());
        let mut targets = Vec::with_capacity(indices.len());

        for &idx in indices {
            let row = self.rows.get(idx).ok_or(PipelineError::Index {
                index: idx,
                len: self.rows.len(),
            })?;
            features.push(row[..target_col].to_vec());
            targets.push(row[target_col]);
        }

        Ok(LabeledData { features, targets })
    }
}

impl LabeledData {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
id,cli,ili,tested_positive
# comment lines are ignored
0,0.5,1.5,10

1,0.25,2.0,12.5
2,1.0,-3,9
";

    #[test]
    fn test_parse_with_header() {
        let ds = Dataset::from_reader(SAMPLE.as_bytes(), "sample.csv").unwrap();
        assert_eq!(ds.header, vec!["id", "cli", "ili", "tested_positive"]);
        assert_eq!(ds.width, 4);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.rows[1], vec![1.0, 0.25, 2.0, 12.5]);
        assert_eq!(ds.feature_names(), &["id", "cli", "ili"]);
    }

    #[test]
    fn test_labeled_subset_order() {
        let ds = Dataset::from_reader(SAMPLE.as_bytes(), "sample.csv").unwrap();
        let data = ds.labeled_subset(&[2, 0]).unwrap();
        assert_eq!(data.features, vec![vec![2.0, 1.0, -3.0], vec![0.0, 0.5, 1.5]]);
        assert_eq!(data.targets, vec![9.0, 10.0]);

        let err = ds.labeled_subset(&[3]).unwrap_err();
        assert!(matches!(err, PipelineError::Index { index: 3, len: 3 }));
    }

    #[test]
    fn test_width_mismatch_reports_line() {
        let err = Dataset::from_reader("a,b\n1,2\n3\n".as_bytes(), "bad.csv").unwrap_err();
        match err {
            PipelineError::Parse { path, line, .. } => {
                assert_eq!(path, PathBuf::from("bad.csv"));
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_number() {
        let err = Dataset::from_reader("a,b\n1,x\n".as_bytes(), "bad.csv").unwrap_err();
        assert!(err.to_string().contains("invalid number `x`"));
    }

    #[test]
    fn test_quoted_fields() {
        let input = "\"id\",\"cli\",\"tested_positive\"\n\"0\",\"1.5\",\"2\"\n";
        let ds = Dataset::from_reader(input.as_bytes(), "quoted.csv").unwrap();
        assert_eq!(ds.header, vec!["id", "cli", "tested_positive"]);
        assert_eq!(ds.rows, vec![vec![0.0, 1.5, 2.0]]);
    }

    #[test]
    fn test_missing_header() {
        let err = Dataset::from_reader("\n# nothing\n".as_bytes(), "empty.csv").unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData(_)));
    }

    #[test]
    fn test_from_csv_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", SAMPLE).unwrap();
        file.flush().unwrap();

        let ds = Dataset::from_csv(file.path()).unwrap();
        assert_eq!(ds.len(), 3);

        let stats = ds.feature_stats();
        assert_eq!(stats[2], (-3.0, 2.0));

        let err = Dataset::from_csv("/nonexistent/covid.train.csv").unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
