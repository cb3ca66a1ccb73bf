pub mod augment;
pub mod loader;
pub mod source;
pub mod split;

use std::path::PathBuf;

use crate::preprocess::PreprocessError;

pub use augment::{AugmentConfig, Augmenter};
pub use loader::{discover, Sample};
pub use source::{Batch, ImageSource};
pub use split::{stratified_split, DatasetSplit};

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset directory does not exist: {0}")]
    NotFound(PathBuf),
    #[error("No labeled images found in {0}")]
    NoImages(PathBuf),
    #[error("Image {image} has label {level}, expected 0-4")]
    InvalidLabel { image: String, level: i64 },
    #[error("Labeled image is missing: {0}")]
    MissingImage(PathBuf),
    #[error("Validation fraction must be in [0, 1), got {0}")]
    InvalidFraction(f64),
    #[error("Failed to load {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: PreprocessError,
    },
    #[error("Failed to read labels: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
