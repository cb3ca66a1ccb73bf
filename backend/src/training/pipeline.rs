use std::path::Path;

use log::info;

use super::{TrainingConfig, TrainingError};
use crate::dataset::{discover, stratified_split, Augmenter, ImageSource};
use crate::preprocess::Preprocessor;

/// Discovers and splits the dataset, then binds an augmenting, shuffled source
/// for training and a plain one for validation.
pub fn prepare_sources(
    data_dir: &Path,
    config: &TrainingConfig,
) -> Result<(ImageSource, ImageSource), TrainingError> {
    let samples = discover(data_dir)?;
    let split = stratified_split(samples, config.validation_split, config.seed)?;
    if split.train.is_empty() || split.validation.is_empty() {
        return Err(TrainingError::EmptySplit {
            train: split.train.len(),
            validation: split.validation.len(),
        });
    }
    info!(
        "Training on {} images, validating on {}",
        split.train.len(),
        split.validation.len()
    );

    let preprocessor = Preprocessor::new(config.preprocessing.clone());
    let train = ImageSource::training(
        split.train,
        preprocessor.clone(),
        Augmenter::new(config.augmentation.clone()),
        config.batch_size,
        config.seed,
    );
    let validation = ImageSource::validation(split.validation, preprocessor, config.batch_size);
    Ok((train, validation))
}

#[cfg(feature = "torch")]
pub use torch_pipeline::{run_pipeline, TorchTrainingRunner};

#[cfg(feature = "torch")]
mod torch_pipeline {
    use std::path::Path;

    use log::info;
    use tch::Device;

    use super::prepare_sources;
    use crate::model::TorchLearner;
    use crate::training::{Trainer, TrainingConfig, TrainingError, TrainingReport, TrainingRunner};

    pub fn run_pipeline(
        data_dir: &Path,
        config: &TrainingConfig,
    ) -> Result<TrainingReport, TrainingError> {
        tch::manual_seed(config.seed as i64);
        let (mut train, mut validation) = prepare_sources(data_dir, config)?;

        let device = Device::cuda_if_available();
        let mut learner =
            TorchLearner::new(device, config.preprocessing.image_size, config.learning_rate)?;
        info!(
            "Built model with {} parameters on {:?}",
            learner.parameter_count(),
            device
        );

        let report = Trainer::new(config.clone()).fit(&mut learner, &mut train, &mut validation)?;
        let history = config.history_path();
        report.write_history(&history)?;
        info!(
            "Training finished after {} epochs, best val_accuracy {:.4}, history at {}",
            report.epochs_run,
            report.best_val_accuracy,
            history.display()
        );
        Ok(report)
    }

    pub struct TorchTrainingRunner {
        config: TrainingConfig,
    }

    impl TorchTrainingRunner {
        pub fn new(config: TrainingConfig) -> Self {
            Self { config }
        }
    }

    impl TrainingRunner for TorchTrainingRunner {
        fn run(&self, data_dir: &Path) -> Result<TrainingReport, TrainingError> {
            run_pipeline(data_dir, &self.config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::PreprocessConfig;
    use image::{Rgb, RgbImage};
    use std::fs;

    fn write_class(dir: &Path, class: &str, n: usize) {
        fs::create_dir_all(dir.join(class)).unwrap();
        for i in 0..n {
            RgbImage::from_pixel(10, 10, Rgb([i as u8, 0, 0]))
                .save(dir.join(class).join(format!("{}.png", i)))
                .unwrap();
        }
    }

    fn config() -> TrainingConfig {
        TrainingConfig {
            batch_size: 4,
            preprocessing: PreprocessConfig {
                image_size: 16,
                ..PreprocessConfig::default()
            },
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn binds_stratified_sources() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "0", 10);
        write_class(dir.path(), "2", 5);

        let (mut train, validation) = prepare_sources(dir.path(), &config()).unwrap();
        assert_eq!(train.len(), 12);
        assert_eq!(validation.len(), 3);
        assert_eq!(train.num_batches(), 3);

        let batch = train.next().unwrap().unwrap();
        assert_eq!(batch.images.shape(), &[4, 16, 16, 3]);
    }

    #[test]
    fn single_image_dataset_cannot_validate() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "1", 1);

        assert!(matches!(
            prepare_sources(dir.path(), &config()),
            Err(TrainingError::EmptySplit { train: 1, validation: 0 })
        ));
    }

    #[test]
    fn missing_directory_propagates() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            prepare_sources(&dir.path().join("absent"), &config()),
            Err(TrainingError::Dataset(_))
        ));
    }
}
