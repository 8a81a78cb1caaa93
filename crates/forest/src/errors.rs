use thiserror::Error;

/// Errors returned while fitting or querying a forest.
#[derive(Debug, Error)]
pub enum ForestError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid forest parameters: {0}")]
    InvalidParameters(String),

    #[error("forest has not been fitted")]
    NotFitted,
}

/// Result type for forest operations
pub type Result<T> = std::result::Result<T, ForestError>;
