//! Per-epoch hooks driven by validation metrics.

use super::config::{EarlyStoppingConfig, PlateauConfig};

/// Whether the monitored metric should decrease (loss) or increase (accuracy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Min,
    Max,
}

#[derive(Debug, Clone)]
struct Monitor {
    mode: MonitorMode,
    best: f64,
}

impl Monitor {
    fn new(mode: MonitorMode) -> Self {
        let best = match mode {
            MonitorMode::Min => f64::INFINITY,
            MonitorMode::Max => f64::NEG_INFINITY,
        };
        Self { mode, best }
    }

    /// Records `value` if it strictly beats the best so far.
    fn improve(&mut self, value: f64) -> bool {
        let improved = match self.mode {
            MonitorMode::Min => value < self.best,
            MonitorMode::Max => value > self.best,
        };
        if improved {
            self.best = value;
        }
        improved
    }
}

/// Saves the model whenever validation accuracy reaches a new maximum.
#[derive(Debug, Clone)]
pub struct BestCheckpoint {
    monitor: Monitor,
}

impl Default for BestCheckpoint {
    fn default() -> Self {
        Self {
            monitor: Monitor::new(MonitorMode::Max),
        }
    }
}

impl BestCheckpoint {
    /// True when this epoch's accuracy should be written out.
    pub fn update(&mut self, val_accuracy: f64) -> bool {
        self.monitor.improve(val_accuracy)
    }

    pub fn best(&self) -> Option<f64> {
        self.monitor.best.is_finite().then_some(self.monitor.best)
    }
}

/// Multiplies the learning rate by `factor` after `patience` epochs without a
/// lower validation loss, never going below `min_lr`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    monitor: Monitor,
    factor: f64,
    patience: usize,
    min_lr: f64,
    wait: usize,
    learning_rate: f64,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64, config: &PlateauConfig) -> Self {
        Self {
            monitor: Monitor::new(MonitorMode::Min),
            factor: config.factor,
            patience: config.patience,
            min_lr: config.min_lr,
            wait: 0,
            learning_rate: initial_lr,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Returns the new learning rate if this step reduced it.
    pub fn step(&mut self, val_loss: f64) -> Option<f64> {
        if self.monitor.improve(val_loss) {
            self.wait = 0;
            return None;
        }

        self.wait += 1;
        if self.wait < self.patience {
            return None;
        }
        self.wait = 0;

        let reduced = (self.learning_rate * self.factor).max(self.min_lr);
        if reduced < self.learning_rate {
            self.learning_rate = reduced;
            Some(reduced)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStop {
    /// New best validation loss; a snapshot of the weights is worth keeping.
    Improved,
    Wait,
    Stop,
}

/// Ends training once validation loss has not improved for `patience` epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    monitor: Monitor,
    patience: usize,
    wait: usize,
    restore_best_weights: bool,
    best_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(config: &EarlyStoppingConfig) -> Self {
        Self {
            monitor: Monitor::new(MonitorMode::Min),
            patience: config.patience,
            wait: 0,
            restore_best_weights: config.restore_best_weights,
            best_epoch: None,
        }
    }

    pub fn restore_best_weights(&self) -> bool {
        self.restore_best_weights
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn step(&mut self, epoch: usize, val_loss: f64) -> EarlyStop {
        if self.monitor.improve(val_loss) {
            self.wait = 0;
            self.best_epoch = Some(epoch);
            return EarlyStop::Improved;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            EarlyStop::Stop
        } else {
            EarlyStop::Wait
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_only_on_strict_improvement() {
        let mut checkpoint = BestCheckpoint::default();
        assert_eq!(checkpoint.best(), None);
        assert!(checkpoint.update(0.40));
        assert!(!checkpoint.update(0.40));
        assert!(!checkpoint.update(0.35));
        assert!(checkpoint.update(0.41));
        assert_eq!(checkpoint.best(), Some(0.41));
    }

    #[test]
    fn plateau_halves_after_patience() {
        let config = PlateauConfig {
            factor: 0.5,
            patience: 2,
            min_lr: 1e-7,
        };
        let mut plateau = ReduceLrOnPlateau::new(1e-3, &config);

        assert_eq!(plateau.step(1.0), None);
        assert_eq!(plateau.step(1.1), None);
        assert_eq!(plateau.step(1.2), Some(5e-4));
        assert_eq!(plateau.learning_rate(), 5e-4);

        // Counter restarts after a reduction and after an improvement.
        assert_eq!(plateau.step(1.3), None);
        assert_eq!(plateau.step(0.9), None);
        assert_eq!(plateau.step(0.95), None);
        assert_eq!(plateau.step(0.95), Some(2.5e-4));
    }

    #[test]
    fn plateau_respects_min_lr() {
        let config = PlateauConfig {
            factor: 0.5,
            patience: 1,
            min_lr: 4e-4,
        };
        let mut plateau = ReduceLrOnPlateau::new(1e-3, &config);
        plateau.step(1.0);
        assert_eq!(plateau.step(1.0), Some(5e-4));
        assert_eq!(plateau.step(1.0), Some(4e-4));
        assert_eq!(plateau.step(1.0), None);
        assert_eq!(plateau.learning_rate(), 4e-4);
    }

    #[test]
    fn early_stopping_tracks_best_epoch() {
        let mut early = EarlyStopping::new(&EarlyStoppingConfig {
            patience: 3,
            restore_best_weights: true,
        });

        assert_eq!(early.step(1, 1.0), EarlyStop::Improved);
        assert_eq!(early.step(2, 0.8), EarlyStop::Improved);
        assert_eq!(early.step(3, 0.9), EarlyStop::Wait);
        assert_eq!(early.step(4, 0.85), EarlyStop::Wait);
        assert_eq!(early.step(5, 0.81), EarlyStop::Stop);
        assert_eq!(early.best_epoch(), Some(2));
        assert!(early.restore_best_weights());
    }
}
