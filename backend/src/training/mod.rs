pub mod callbacks;
pub mod config;
pub mod pipeline;
pub mod trainer;

use std::path::Path;
use std::sync::Arc;

use crate::config::ConfigError;
use crate::dataset::DatasetError;

pub use config::TrainingConfig;
pub use trainer::{EpochMetrics, EpochRecord, Learner, Trainer, TrainingReport};

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Split left {train} training and {validation} validation images")]
    EmptySplit { train: usize, validation: usize },
    #[error("Model error: {0}")]
    Model(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to write history: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "torch")]
impl From<crate::model::ModelError> for TrainingError {
    fn from(err: crate::model::ModelError) -> Self {
        TrainingError::Model(err.to_string())
    }
}

/// Runs a full training pipeline against a data directory. The HTTP layer holds
/// one when a training backend is compiled in.
pub trait TrainingRunner: Send + Sync {
    fn run(&self, data_dir: &Path) -> Result<TrainingReport, TrainingError>;
}

#[cfg(feature = "torch")]
pub fn default_runner(config: TrainingConfig) -> Option<Arc<dyn TrainingRunner>> {
    Some(Arc::new(pipeline::TorchTrainingRunner::new(config)))
}

#[cfg(not(feature = "torch"))]
pub fn default_runner(_config: TrainingConfig) -> Option<Arc<dyn TrainingRunner>> {
    log::info!("Built without the torch feature, /train will answer as a stub");
    None
}
