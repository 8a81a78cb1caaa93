//! Pipeline orchestration
//!
//! raw rows -> split -> rank + select -> sample sets -> loaders -> trainer,
//! and later: checkpoint -> reduce test rows -> predictor.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::{PipelineConfig, RankerKind};
use crate::container::SampleSet;
use crate::dataset::{Dataset, LabeledData};
use crate::device::Placement;
use crate::errors::{PipelineError, Result};
use crate::loader::BatchLoader;
use crate::model::Regressor;
use crate::optim::SgdMomentum;
use crate::predictor;
use crate::seeding::{SeedSequence, STAGE_INIT, STAGE_SHUFFLE_TRAIN, STAGE_SHUFFLE_VALID};
use crate::selection::SelectedFeatures;
use crate::split::{train_valid_split, Split};
use crate::telemetry::ScalarSink;
use crate::trainer::{Trainer, TrainerConfig, TrainingReport};
use healthcast_forest::{rank_features, CorrelationRanker, FeatureRanker, FeatureRanking, ForestRanker};
use std::path::Path;
use tracing::info;

/// Number of entries in the logged importance report
pub const REPORT_LIMIT: usize = 20;

/// Everything the trainer and predictor consume, with one shared column selection
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub split: Split,
    pub ranking: Option<FeatureRanking>,
    pub selection: SelectedFeatures,
    pub train: SampleSet,
    pub valid: SampleSet,
    pub test: Option<SampleSet>,
}

/// One row of the importance report
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureImportance {
    pub index: usize,
    pub name: String,
    pub score: f64,
}

/// Most important features first, named after the training header
pub fn importance_report(
    ranking: &FeatureRanking,
    names: &[String],
    limit: usize,
) -> Vec<FeatureImportance> {
    ranking
        .report(limit)
        .into_iter()
        .map(|(index, score)| FeatureImportance {
            index,
            name: names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("feature_{}", index)),
            score,
        })
        .collect()
}

pub struct Pipeline {
    config: PipelineConfig,
    seeds: SeedSequence,
    placement: Placement,
}

impl Pipeline {
    /// Validate `config` and resolve the compute device
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let seeds = SeedSequence::new(config.seed);
        let placement = Placement::resolve(config.device);
        Ok(Self {
            config,
            seeds,
            placement,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(&self.config.save_path)
    }

    fn ranker(&self) -> Box<dyn FeatureRanker> {
        match self.config.ranker {
            RankerKind::Forest => Box::new(ForestRanker::new(self.config.forest_config())),
            RankerKind::Correlation => Box::new(CorrelationRanker),
        }
    }

    /// Score and order the training features
    pub fn rank(&self, train: &LabeledData) -> Result<FeatureRanking> {
        let ranker = self.ranker();
        Ok(rank_features(ranker.as_ref(), &train.features, &train.targets)?)
    }

    /// Rank on the full training file without splitting
    pub fn rank_dataset(&self, train_raw: &Dataset) -> Result<FeatureRanking> {
        let all: Vec<usize> = (0..train_raw.len()).collect();
        self.rank(&train_raw.labeled_subset(&all)?)
    }

    /// Split, rank, select and wrap the data
    pub fn prepare(&self, train_raw: &Dataset, test_raw: Option<&Dataset>) -> Result<PreparedData> {
        if train_raw.len() < 2 {
            return Err(PipelineError::InsufficientData(format!(
                "need at least 2 training rows, got {}",
                train_raw.len()
            )));
        }

        let split = train_valid_split(train_raw.len(), self.config.valid_ratio, self.seeds.seed())?;
        let train = train_raw.labeled_subset(&split.train)?;
        let valid = train_raw.labeled_subset(&split.valid)?;
        let n_features = train_raw.width - 1;

        info!(
            "Split {} rows: train {}, valid {}",
            train_raw.len(),
            train.len(),
            valid.len()
        );

        if let Some(test) = test_raw {
            if test.width != n_features {
                return Err(PipelineError::config(format!(
                    "test data has {} columns, training data has {} features",
                    test.width, n_features
                )));
            }
        }

        let (ranking, selection) = if self.config.select_all {
            (None, SelectedFeatures::all(n_features))
        } else {
            let ranking = self.rank(&train)?;
            let selection = SelectedFeatures::from_ranking(&ranking, self.config.top_k_features)?;

            info!("Top features:");
            for entry in importance_report(&ranking, train_raw.feature_names(), REPORT_LIMIT) {
                info!("  {:>4} {:<24} {:.6}", entry.index, entry.name, entry.score);
            }
            (Some(ranking), selection)
        };
        info!("Selected {} of {} features: {:?}", selection.len(), n_features, selection.indices());

        let width = selection.len();
        let train_set = SampleSet::new(
            width,
            selection.apply(&train.features, "train")?,
            Some(train.targets),
        )?;
        let valid_set = SampleSet::new(
            width,
            selection.apply(&valid.features, "valid")?,
            Some(valid.targets),
        )?;
        let test_set = test_raw
            .map(|test| SampleSet::new(width, selection.apply(&test.rows, "test")?, None))
            .transpose()?;

        Ok(PreparedData {
            split,
            ranking,
            selection,
            train: train_set,
            valid: valid_set,
            test: test_set,
        })
    }

    /// Train a fresh model, persisting every improvement to `save_path`.
    ///
    /// Fails with [`PipelineError::NoImprovement`] when no epoch produced a
    /// finite, improving loss, since nothing from this run was persisted.
    pub fn train<S: ScalarSink + ?Sized>(
        &self,
        data: &PreparedData,
        sink: &mut S,
    ) -> Result<TrainingReport> {
        let mut init_rng = self.seeds.stream(STAGE_INIT);
        let mut model = Regressor::new(data.selection.len(), &mut init_rng, self.placement.device())?;
        let mut optimizer =
            SgdMomentum::new(self.config.learning_rate as f32, self.config.momentum as f32);

        let mut train_loader = BatchLoader::shuffled(
            &data.train,
            self.config.batch_size,
            self.seeds.stream(STAGE_SHUFFLE_TRAIN),
        )?
        .with_pin_memory(self.config.pin_memory);
        let mut valid_loader = BatchLoader::shuffled(
            &data.valid,
            self.config.batch_size,
            self.seeds.stream(STAGE_SHUFFLE_VALID),
        )?
        .with_pin_memory(self.config.pin_memory);

        let store = self.checkpoint_store();
        let trainer = Trainer::new(
            TrainerConfig {
                max_epochs: self.config.n_epochs,
                patience: self.config.early_stop,
            },
            self.placement,
        );

        let report = trainer.train(
            &mut model,
            &mut optimizer,
            &mut train_loader,
            &mut valid_loader,
            sink,
            |model, record| {
                let checkpoint =
                    Checkpoint::capture(model, &data.selection, record.epoch, record.monitored_loss);
                store.save(&checkpoint).map(|_| ())
            },
        )?;

        // whatever sits at save_path belongs to an earlier run
        if report.best_epoch.is_none() {
            return Err(PipelineError::NoImprovement {
                epochs: report.epochs_run(),
            });
        }
        Ok(report)
    }

    /// Load the persisted checkpoint and predict every row of `test_raw`
    pub fn predict_from_checkpoint(&self, test_raw: &Dataset) -> Result<Vec<f32>> {
        let store = self.checkpoint_store();
        let (model, selection, checkpoint) = store.restore(self.placement.device())?;
        info!(
            "Loaded checkpoint {} (epoch {}, loss {:.4})",
            store.path().display(),
            checkpoint.epoch,
            checkpoint.monitored_loss
        );
        self.predict_with(&model, &selection, test_raw)
    }

    /// Predict every row of `test_raw` with an in-memory model
    pub fn predict_with(
        &self,
        model: &Regressor,
        selection: &SelectedFeatures,
        test_raw: &Dataset,
    ) -> Result<Vec<f32>> {
        if test_raw.width != selection.source_width() {
            return Err(PipelineError::config(format!(
                "test data has {} columns, model was trained on {}",
                test_raw.width,
                selection.source_width()
            )));
        }
        let test = SampleSet::new(selection.len(), selection.apply(&test_raw.rows, "test")?, None)?;
        let mut loader = BatchLoader::sequential(&test, self.config.batch_size)?
            .with_pin_memory(self.config.pin_memory);
        predictor::predict(model, &mut loader, &self.placement)
    }

    /// Train on `train_raw`, then predict `test_raw` from the persisted checkpoint into `output`
    pub fn run<S: ScalarSink + ?Sized>(
        &self,
        train_raw: &Dataset,
        test_raw: &Dataset,
        output: &Path,
        sink: &mut S,
    ) -> Result<(TrainingReport, Vec<f32>)> {
        let data = self.prepare(train_raw, Some(test_raw))?;
        let report = self.train(&data, sink)?;
        let preds = self.predict_from_checkpoint(test_raw)?;
        predictor::write_predictions(output, &preds, &self.config.target_name)?;
        Ok((report, preds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;

    fn table(rows: usize, with_target: bool) -> Dataset {
        let width = if with_target { 4 } else { 3 };
        let mut header: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        if with_target {
            header.push("y".into());
        }
        let rows = (0..rows)
            .map(|i| {
                let x = i as f32 / 10.0;
                let mut row = vec![x, (i % 3) as f32, 1.0 - x];
                if with_target {
                    row.push(2.0 * x + 1.0);
                }
                row
            })
            .collect();
        Dataset {
            header,
            rows,
            width,
        }
    }

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            n_epochs: 5,
            batch_size: 4,
            learning_rate: 0.01,
            early_stop: 3,
            top_k_features: 2,
            ensemble_size: 5,
            ensemble_max_depth: 3,
            save_path: dir.join("model.ckpt"),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_prepare_aligns_columns() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        let data = pipeline.prepare(&table(20, true), Some(&table(6, false))).unwrap();

        assert_eq!(data.train.len(), 16);
        assert_eq!(data.valid.len(), 4);
        assert_eq!(data.selection.len(), 2);
        assert_eq!(data.train.width(), 2);
        assert_eq!(data.test.as_ref().map(SampleSet::len), Some(6));
        assert_eq!(data.ranking.as_ref().map(FeatureRanking::len), Some(3));
    }

    #[test]
    fn test_select_all_skips_ranking() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(PipelineConfig {
            select_all: true,
            ..config(dir.path())
        })
        .unwrap();
        let data = pipeline.prepare(&table(10, true), None).unwrap();
        assert!(data.ranking.is_none());
        assert_eq!(data.selection.indices(), &[0, 1, 2]);
    }

    #[test]
    fn test_k_larger_than_width_fails_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(PipelineConfig {
            top_k_features: 20,
            ..config(dir.path())
        })
        .unwrap();
        let err = pipeline.prepare(&table(10, true), None).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(!dir.path().join("model.ckpt").exists());
    }

    #[test]
    fn test_misaligned_test_file() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        let err = pipeline
            .prepare(&table(10, true), Some(&table(3, true)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_train_writes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        let data = pipeline.prepare(&table(20, true), None).unwrap();

        let mut sink = MemorySink::default();
        let report = pipeline.train(&data, &mut sink).unwrap();
        assert!(report.epochs_run() >= 1 && report.epochs_run() <= 5);
        assert_eq!(sink.values("Loss/train").len(), report.epochs_run());
        assert!(pipeline.checkpoint_store().path().exists());

        let preds = pipeline.predict_from_checkpoint(&table(4, false)).unwrap();
        assert_eq!(preds.len(), 4);
    }

    #[test]
    fn test_importance_report_names() {
        let ranking = FeatureRanking::from_scores(vec![0.2, 0.8]);
        let names = vec!["cli".to_string(), "ili".to_string()];
        let report = importance_report(&ranking, &names, 5);
        assert_eq!(report[0].name, "ili");
        assert_eq!(report[1].index, 0);
    }

    #[test]
    fn test_tiny_dataset_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        let err = pipeline.prepare(&table(1, true), None).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData(_)));
    }
}
