use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::dataset::AugmentConfig;
use crate::preprocess::PreprocessConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.5,
            patience: 5,
            min_lr: 1e-7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub patience: usize,
    pub restore_best_weights: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            patience: 10,
            restore_best_weights: true,
        }
    }
}

/// Training run parameters. Every field has a default, so a YAML file only
/// needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub validation_split: f64,
    pub seed: u64,
    pub model_path: PathBuf,
    pub plateau: PlateauConfig,
    pub early_stopping: EarlyStoppingConfig,
    pub augmentation: AugmentConfig,
    pub preprocessing: PreprocessConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-4,
            validation_split: 0.2,
            seed: 42,
            model_path: PathBuf::from("./models/dr_model.ot"),
            plateau: PlateauConfig::default(),
            early_stopping: EarlyStoppingConfig::default(),
            augmentation: AugmentConfig::default(),
            preprocessing: PreprocessConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Where the per-epoch history is written, next to the weights.
    pub fn history_path(&self) -> PathBuf {
        let mut name = self.model_path.clone().into_os_string();
        name.push(".history.json");
        PathBuf::from(name)
    }
}
