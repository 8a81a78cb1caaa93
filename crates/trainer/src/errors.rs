use healthcast_forest::ForestError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the healthcast pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("index {index} out of range for {len} samples")]
    Index { index: usize, len: usize },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("checkpoint {}: {message}", .path.display())]
    Checkpoint { path: PathBuf, message: String },

    #[error("no epoch improved the monitored loss in {epochs} epochs; no checkpoint was written")]
    NoImprovement { epochs: usize },

    #[error("device error: {0}")]
    Device(String),

    #[error("feature ranking failed: {0}")]
    Forest(ForestError),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn checkpoint(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PipelineError::Checkpoint {
            path: path.into(),
            message: message.into(),
        }
    }
}

// Shape problems from the ranker map onto the pipeline's own taxonomy.
impl From<ForestError> for PipelineError {
    fn from(err: ForestError) -> Self {
        match err {
            ForestError::InsufficientData(msg) => PipelineError::InsufficientData(msg),
            ForestError::InvalidParameters(msg) => PipelineError::Config(msg),
            other => PipelineError::Forest(other),
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
