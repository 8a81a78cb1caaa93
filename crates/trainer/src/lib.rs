//! healthcast trainer - deterministic tabular regression pipeline
//!
//! Splits a training table, ranks and selects features, trains a small
//! feed-forward regressor with early stopping, persists the best checkpoint
//! and predicts a test table from it. Every random draw is derived from one
//! configured seed.

pub mod canonical;
pub mod checkpoint;
pub mod config;
pub mod container;
pub mod dataset;
pub mod device;
pub mod errors;
pub mod loader;
pub mod model;
pub mod optim;
pub mod pipeline;
pub mod predictor;
pub mod seeding;
pub mod selection;
pub mod split;
pub mod telemetry;
pub mod trainer;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{PipelineConfig, RankerKind};
pub use container::{Sample, SampleSet};
pub use dataset::{Dataset, LabeledData};
pub use device::{ComputeDevice, PlacedBatch, Placement};
pub use errors::{PipelineError, Result};
pub use loader::{Batch, BatchLoader};
pub use model::{NamedTensor, Regressor, HIDDEN_WIDTHS};
pub use optim::{Optimizer, SgdMomentum};
pub use pipeline::{importance_report, FeatureImportance, Pipeline, PreparedData};
pub use predictor::{predict, write_csv, write_predictions};
pub use seeding::SeedSequence;
pub use selection::SelectedFeatures;
pub use split::{train_valid_split, Split};
pub use telemetry::{
    EventFileSink, FanoutSink, MemorySink, MetricsSink, ScalarEvent, ScalarSink, TracingSink,
};
pub use trainer::{
    evaluate, EpochOutcome, EpochRecord, StopReason, Trainer, TrainerConfig, TrainingReport,
    TrainingState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
