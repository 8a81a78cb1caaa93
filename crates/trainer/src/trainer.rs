//! Training loop
//!
//! Each epoch runs one shuffled pass of SGD over the training batches, one
//! gradient-free pass over the validation batches, then feeds the monitored
//! loss to [`TrainingState`]. A strictly better loss is persisted through the
//! improvement hook; `patience` consecutive non-improving epochs halt the run.

use crate::device::Placement;
use crate::errors::{PipelineError, Result};
use crate::loader::BatchLoader;
use crate::model::Regressor;
use crate::optim::Optimizer;
use crate::telemetry::ScalarSink;
use serde::Serialize;
use tracing::{debug, info, warn};

pub const TRAIN_LOSS: &str = "Loss/train";
pub const VALID_LOSS: &str = "Loss/valid";

/// Epoch budget and patience
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainerConfig {
    pub max_epochs: usize,
    pub patience: usize,
}

/// Best loss and staleness, updated once per epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrainingState {
    /// Epochs completed
    pub epoch: usize,
    pub best_loss: f32,
    pub stale_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EpochOutcome {
    Improved,
    Stalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Ran `max_epochs` epochs
    Exhausted,
    /// `patience` consecutive epochs without improvement
    EarlyStopped,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            epoch: 0,
            best_loss: f32::INFINITY,
            stale_count: 0,
        }
    }
}

impl TrainingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one epoch's monitored loss. Non-finite losses never improve.
    pub fn observe(&mut self, loss: f32) -> EpochOutcome {
        self.epoch += 1;
        if loss.is_finite() && loss < self.best_loss {
            self.best_loss = loss;
            self.stale_count = 0;
            EpochOutcome::Improved
        } else {
            self.stale_count += 1;
            EpochOutcome::Stalled
        }
    }

    /// Terminal condition, if reached. Patience wins when both trigger together.
    pub fn stop_reason(&self, config: &TrainerConfig) -> Option<StopReason> {
        if self.stale_count >= config.patience {
            Some(StopReason::EarlyStopped)
        } else if self.epoch >= config.max_epochs {
            Some(StopReason::Exhausted)
        } else {
            None
        }
    }
}

/// Losses of one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochRecord {
    /// Zero-based epoch index
    pub epoch: usize,
    pub train_loss: f32,
    pub valid_loss: Option<f32>,
    /// Loss fed to the stopping rule
    pub monitored_loss: f32,
    pub outcome: EpochOutcome,
    /// Optimizer steps taken so far
    pub step: u64,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub history: Vec<EpochRecord>,
    pub stop_reason: StopReason,
    pub final_state: TrainingState,
    /// Parameters of the best epoch
    pub best_model: Option<Regressor>,
    pub best_epoch: Option<usize>,
    pub steps: u64,
}

impl TrainingReport {
    pub fn epochs_run(&self) -> usize {
        self.final_state.epoch
    }

    pub fn best_loss(&self) -> f32 {
        self.final_state.best_loss
    }
}

/// Mean MSE over a pass of `loader`, without gradients. `None` when the loader is empty.
pub fn evaluate(
    model: &Regressor,
    loader: &mut BatchLoader<'_>,
    placement: &Placement,
) -> Result<Option<f32>> {
    let mut total = 0.0_f64;
    let mut batches = 0usize;

    for batch in loader.batches() {
        let placed = placement.bind(&batch);
        total += model.mse(&placed)? as f64;
        batches += 1;
    }

    Ok((batches > 0).then(|| (total / batches as f64) as f32))
}

fn epoch_summary(record: &EpochRecord, max_epochs: usize) -> String {
    let valid = match record.valid_loss {
        Some(loss) => format!("{:.4}", loss),
        None => "n/a".to_string(),
    };
    format!(
        "Epoch [{}/{}]: Train loss: {:.4}, Valid loss: {}",
        record.epoch + 1,
        max_epochs,
        record.train_loss,
        valid
    )
}

pub struct Trainer {
    config: TrainerConfig,
    placement: Placement,
}

impl Trainer {
    pub fn new(config: TrainerConfig, placement: Placement) -> Self {
        Self { config, placement }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Run epochs until exhausted or out of patience.
    ///
    /// `on_improve` is called with the model and the epoch record each time the
    /// monitored loss strictly improves; an error from it aborts training.
    pub fn train<O, S, F>(
        &self,
        model: &mut Regressor,
        optimizer: &mut O,
        train_loader: &mut BatchLoader<'_>,
        valid_loader: &mut BatchLoader<'_>,
        sink: &mut S,
        mut on_improve: F,
    ) -> Result<TrainingReport>
    where
        O: Optimizer,
        S: ScalarSink + ?Sized,
        F: FnMut(&Regressor, &EpochRecord) -> Result<()>,
    {
        if self.config.max_epochs == 0 || self.config.patience == 0 {
            return Err(PipelineError::config(
                "max_epochs and patience must be positive",
            ));
        }
        if train_loader.is_empty() {
            return Err(PipelineError::InsufficientData(
                "training set is empty".to_string(),
            ));
        }
        if valid_loader.is_empty() {
            warn!("validation set is empty, monitoring training loss instead");
        }

        info!(
            samples = train_loader.len(),
            valid_samples = valid_loader.len(),
            batch_size = train_loader.batch_size(),
            parameters = model.num_parameters(),
            device = %self.placement.device(),
            "starting training"
        );

        let mut state = TrainingState::new();
        let mut history = Vec::new();
        let mut best_model = None;
        let mut best_epoch = None;

        let stop_reason = loop {
            let epoch = state.epoch;
            let train_loss = self.train_epoch(model, optimizer, train_loader)?;
            let valid_loss = evaluate(model, valid_loader, &self.placement)?;
            let step = optimizer.steps();

            sink.record(TRAIN_LOSS, train_loss as f64, step);
            if let Some(loss) = valid_loss {
                sink.record(VALID_LOSS, loss as f64, step);
            }

            let monitored_loss = valid_loss.unwrap_or(train_loss);
            let outcome = state.observe(monitored_loss);

            let record = EpochRecord {
                epoch,
                train_loss,
                valid_loss,
                monitored_loss,
                outcome,
                step,
            };
            info!("{}", epoch_summary(&record, self.config.max_epochs));

            if outcome == EpochOutcome::Improved {
                info!("Saving model with loss {:.3}...", monitored_loss);
                on_improve(model, &record)?;
                best_model = Some(model.clone());
                best_epoch = Some(epoch);
            }
            history.push(record);

            if let Some(reason) = state.stop_reason(&self.config) {
                if reason == StopReason::EarlyStopped {
                    info!("Model is not improving, so we halt the training session.");
                }
                break reason;
            }
        };

        sink.flush();
        info!(
            epochs = state.epoch,
            best_loss = state.best_loss,
            reason = ?stop_reason,
            "training finished"
        );

        Ok(TrainingReport {
            history,
            stop_reason,
            final_state: state,
            best_model,
            best_epoch,
            steps: optimizer.steps(),
        })
    }

    fn train_epoch<O: Optimizer>(
        &self,
        model: &mut Regressor,
        optimizer: &mut O,
        loader: &mut BatchLoader<'_>,
    ) -> Result<f32> {
        let mut total = 0.0_f64;
        let mut batches = 0usize;

        for batch in loader.batches() {
            let placed = self.placement.bind(&batch);
            let (loss, grads) = model.loss_and_gradients(&placed)?;
            drop(placed);

            optimizer.step(model, &grads)?;
            total += loss as f64;
            batches += 1;
            debug!(step = optimizer.steps(), loss, "batch");
        }

        Ok((total / batches.max(1) as f64) as f32)
    }
}
