//! Discovery of labeled retinal images on disk.
//!
//! Two layouts are accepted:
//!
//! ```text
//! data_dir/                       data_dir/
//! ├── trainLabels.csv             ├── 0/
//! └── train/                      │   ├── a.jpeg
//!     ├── 10_left.jpeg            │   └── b.png
//!     └── 10_right.jpeg           └── Moderate DR/
//!                                     └── c.jpeg
//! ```
//!
//! The CSV has an `image,level` header; each image lives at
//! `train/<image>.jpeg`. Class folders are named by index or severity name.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Deserialize;
use shared::Severity;

use super::DatasetError;
use crate::preprocess::batch::is_image_file;

pub const LABELS_FILE: &str = "trainLabels.csv";
const IMAGE_DIR: &str = "train";
const IMAGE_EXTENSION: &str = "jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: Severity,
}

#[derive(Debug, Deserialize)]
struct LabelRecord {
    image: String,
    level: i64,
}

pub fn discover(data_dir: &Path) -> Result<Vec<Sample>, DatasetError> {
    if !data_dir.is_dir() {
        return Err(DatasetError::NotFound(data_dir.to_path_buf()));
    }

    let labels = data_dir.join(LABELS_FILE);
    let samples = if labels.is_file() {
        info!("Reading labels from {}", labels.display());
        from_labels_csv(&labels, &data_dir.join(IMAGE_DIR))?
    } else {
        info!("Reading class folders under {}", data_dir.display());
        from_class_folders(data_dir)?
    };

    if samples.is_empty() {
        return Err(DatasetError::NoImages(data_dir.to_path_buf()));
    }
    info!("Found {} labeled images", samples.len());
    Ok(samples)
}

fn from_labels_csv(labels: &Path, image_dir: &Path) -> Result<Vec<Sample>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(labels)?;

    let mut samples = Vec::new();
    for record in reader.deserialize::<LabelRecord>() {
        let record = record?;
        let label = usize::try_from(record.level)
            .ok()
            .and_then(Severity::from_index)
            .ok_or_else(|| DatasetError::InvalidLabel {
                image: record.image.clone(),
                level: record.level,
            })?;

        let path = image_dir.join(format!("{}.{}", record.image, IMAGE_EXTENSION));
        if !path.is_file() {
            return Err(DatasetError::MissingImage(path));
        }
        samples.push(Sample { path, label });
    }
    Ok(samples)
}

fn from_class_folders(data_dir: &Path) -> Result<Vec<Sample>, DatasetError> {
    let mut class_dirs: Vec<(Severity, PathBuf)> = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match Severity::from_name(&name) {
            Some(label) => class_dirs.push((label, entry.path())),
            None => warn!("Skipping directory {}: not a severity class", name),
        }
    }
    class_dirs.sort();

    let mut samples = Vec::new();
    for (label, dir) in class_dirs {
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        files.sort();
        debug!("Class {} ({}): {} images", label, dir.display(), files.len());
        samples.extend(files.into_iter().map(|path| Sample { path, label }));
    }
    Ok(samples)
}
