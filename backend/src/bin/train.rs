//! Command line entry point for training the grading model and for offline
//! dataset preprocessing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use retina_backend::logging;
use retina_backend::preprocess::batch::preprocess_directory;
use retina_backend::preprocess::{PreprocessConfig, Preprocessor};
use retina_backend::training::TrainingConfig;

#[derive(Parser, Debug)]
#[command(name = "retina-train")]
#[command(version)]
#[command(about = "Train the diabetic retinopathy grading model", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fit the model on a labeled image directory
    Train {
        /// Dataset directory (trainLabels.csv + train/, or one folder per class)
        #[arg(short, long)]
        data_dir: PathBuf,

        /// YAML file with training parameters
        #[arg(short, long, env = "TRAINING_CONFIG")]
        config: Option<PathBuf>,

        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Where the best weights are written
        #[arg(short, long, env = "MODEL_PATH")]
        model_path: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,

        /// Skip local contrast enhancement
        #[arg(long, default_value = "false")]
        no_contrast: bool,
    },

    /// Resize and contrast-enhance every image in a directory
    Preprocess {
        #[arg(short, long)]
        input_dir: PathBuf,

        #[arg(short, long)]
        output_dir: PathBuf,

        #[arg(long, default_value_t = shared::INPUT_SIZE)]
        image_size: u32,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init_console(cli.verbose);

    match cli.command {
        Commands::Train {
            data_dir,
            config,
            epochs,
            batch_size,
            learning_rate,
            model_path,
            seed,
            no_contrast,
        } => {
            let mut training = match &config {
                Some(path) => TrainingConfig::load(path)?,
                None => TrainingConfig::default(),
            };
            if let Some(epochs) = epochs {
                training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                training.batch_size = batch_size;
            }
            if let Some(learning_rate) = learning_rate {
                training.learning_rate = learning_rate;
            }
            if let Some(model_path) = model_path {
                training.model_path = model_path;
            }
            if let Some(seed) = seed {
                training.seed = seed;
            }
            if no_contrast {
                training.preprocessing.enhance_contrast = false;
            }
            train(&data_dir, &training)
        }
        Commands::Preprocess {
            input_dir,
            output_dir,
            image_size,
        } => {
            let preprocessor = Preprocessor::new(PreprocessConfig {
                image_size,
                ..PreprocessConfig::default()
            });
            let summary = preprocess_directory(&input_dir, &output_dir, &preprocessor)
                .with_context(|| format!("Failed to preprocess {}", input_dir.display()))?;
            info!(
                "Preprocessed {} images into {}, {} failed",
                summary.processed,
                output_dir.display(),
                summary.failed.len()
            );
            Ok(())
        }
    }
}

#[cfg(feature = "torch")]
fn train(data_dir: &std::path::Path, config: &TrainingConfig) -> Result<()> {
    info!("Training on {} with {:?}", data_dir.display(), config);
    let report = retina_backend::training::pipeline::run_pipeline(data_dir, config)
        .with_context(|| format!("Training on {} failed", data_dir.display()))?;
    info!(
        "Done: {} epochs, best val_accuracy {:.4}, final val_accuracy {:.4}{}",
        report.epochs_run,
        report.best_val_accuracy,
        report.final_val_accuracy,
        if report.stopped_early { " (stopped early)" } else { "" }
    );
    Ok(())
}

#[cfg(not(feature = "torch"))]
fn train(data_dir: &std::path::Path, _config: &TrainingConfig) -> Result<()> {
    anyhow::bail!(
        "cannot train on {}: retina-train was built without the torch feature, \
         rebuild with `--features torch`",
        data_dir.display()
    )
}
