use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use log::{error, info};
use rayon::prelude::*;

use super::{PreprocessError, Preprocessor};

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: Vec<PathBuf>,
}

pub fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ImageFormat::from_extension)
            .is_some()
}

/// Resizes and contrast-enhances every image in `input_dir` into `output_dir`,
/// keeping file names. A file that fails is logged and skipped.
pub fn preprocess_directory(
    input_dir: &Path,
    output_dir: &Path,
    preprocessor: &Preprocessor,
) -> Result<BatchSummary, PreprocessError> {
    fs::create_dir_all(output_dir)?;

    let mut inputs: Vec<PathBuf> = fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_image_file(path))
        .collect();
    inputs.sort();
    info!("Preprocessing {} images from {}", inputs.len(), input_dir.display());

    let failed: Vec<PathBuf> = inputs
        .par_iter()
        .filter_map(|path| {
            let Some(name) = path.file_name() else {
                return Some(path.clone());
            };
            match enhance_file(path, &output_dir.join(name), preprocessor) {
                Ok(()) => None,
                Err(e) => {
                    error!("Error processing {}: {}", path.display(), e);
                    Some(path.clone())
                }
            }
        })
        .collect();

    Ok(BatchSummary {
        processed: inputs.len() - failed.len(),
        failed,
    })
}

fn enhance_file(
    input: &Path,
    output: &Path,
    preprocessor: &Preprocessor,
) -> Result<(), PreprocessError> {
    let bytes = fs::read(input)?;
    let decoded = preprocessor.decode(&bytes)?;
    preprocessor.prepare(&decoded).save(output)?;
    Ok(())
}
