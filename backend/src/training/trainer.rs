use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::callbacks::{BestCheckpoint, EarlyStop, EarlyStopping, ReduceLrOnPlateau};
use super::config::TrainingConfig;
use super::TrainingError;
use crate::dataset::ImageSource;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

/// A model the fit loop can drive.
pub trait Learner {
    /// Opaque copy of the weights, used to restore the best epoch.
    type Snapshot;

    fn train_epoch(
        &mut self,
        batches: &mut ImageSource,
        learning_rate: f64,
    ) -> Result<EpochMetrics, TrainingError>;

    fn evaluate(&mut self, batches: &mut ImageSource) -> Result<EpochMetrics, TrainingError>;

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: &Self::Snapshot) -> Result<(), TrainingError>;

    fn save(&self, path: &Path) -> Result<(), TrainingError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub checkpoint_saved: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs_run: usize,
    pub best_val_accuracy: f64,
    pub final_val_accuracy: f64,
    pub stopped_early: bool,
    /// Epoch whose weights were restored and written to the model file when
    /// early stopping fired.
    #[serde(default)]
    pub restored_epoch: Option<usize>,
    pub history: Vec<EpochRecord>,
}

impl TrainingReport {
    pub fn write_history(&self, path: &Path) -> Result<(), TrainingError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Runs up to `epochs` epochs. The model file is rewritten each time
    /// validation accuracy reaches a new high. When early stopping fires with
    /// best-weight restoring on, the best-loss weights are re-evaluated and
    /// become the final model file.
    pub fn fit<L: Learner>(
        &self,
        learner: &mut L,
        train: &mut ImageSource,
        validation: &mut ImageSource,
    ) -> Result<TrainingReport, TrainingError> {
        let config = &self.config;
        let mut checkpoint = BestCheckpoint::default();
        let mut plateau = ReduceLrOnPlateau::new(config.learning_rate, &config.plateau);
        let mut early_stopping = EarlyStopping::new(&config.early_stopping);
        let mut best_weights: Option<L::Snapshot> = None;
        let mut restored: Option<(usize, EpochMetrics)> = None;
        let mut report = TrainingReport::default();

        if let Some(parent) = config.model_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        for epoch in 1..=config.epochs {
            train.reset();
            validation.reset();

            let learning_rate = plateau.learning_rate();
            let train_metrics = learner.train_epoch(train, learning_rate)?;
            let val_metrics = learner.evaluate(validation)?;

            info!(
                "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} \
                 - val_accuracy: {:.4} - lr: {:e}",
                epoch,
                config.epochs,
                train_metrics.loss,
                train_metrics.accuracy,
                val_metrics.loss,
                val_metrics.accuracy,
                learning_rate
            );

            let checkpoint_saved = checkpoint.update(val_metrics.accuracy);
            if checkpoint_saved {
                learner.save(&config.model_path)?;
                info!(
                    "val_accuracy improved to {:.4}, saved model to {}",
                    val_metrics.accuracy,
                    config.model_path.display()
                );
            }

            if let Some(reduced) = plateau.step(val_metrics.loss) {
                info!("Reducing learning rate to {:e}", reduced);
            }

            report.history.push(EpochRecord {
                epoch,
                learning_rate,
                train_loss: train_metrics.loss,
                train_accuracy: train_metrics.accuracy,
                val_loss: val_metrics.loss,
                val_accuracy: val_metrics.accuracy,
                checkpoint_saved,
            });

            match early_stopping.step(epoch, val_metrics.loss) {
                EarlyStop::Improved if early_stopping.restore_best_weights() => {
                    best_weights = Some(learner.snapshot());
                }
                EarlyStop::Improved | EarlyStop::Wait => {}
                EarlyStop::Stop => {
                    info!("Early stopping at epoch {}", epoch);
                    report.stopped_early = true;
                    if let Some(weights) = &best_weights {
                        let best_epoch = early_stopping.best_epoch().unwrap_or(epoch);
                        info!("Restoring weights from epoch {}", best_epoch);
                        learner.restore(weights)?;
                        validation.reset();
                        restored = Some((best_epoch, learner.evaluate(validation)?));
                        learner.save(&config.model_path)?;
                        info!("Saved restored weights to {}", config.model_path.display());
                    }
                    break;
                }
            }
        }

        report.epochs_run = report.history.len();
        report.final_val_accuracy = match restored {
            Some((_, metrics)) => metrics.accuracy,
            None => report.history.last().map_or(0.0, |r| r.val_accuracy),
        };
        report.restored_epoch = restored.map(|(epoch, _)| epoch);
        report.best_val_accuracy = checkpoint.best().unwrap_or(0.0);
        if report.epochs_run == 0 {
            warn!("No epochs were run");
        }
        Ok(report)
    }
}
