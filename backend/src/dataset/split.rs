use std::collections::BTreeMap;

use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::Severity;

use super::{DatasetError, Sample};

#[derive(Debug, Clone, Default)]
pub struct DatasetSplit {
    pub train: Vec<Sample>,
    pub validation: Vec<Sample>,
}

/// Splits samples into train and validation while keeping each class's share.
///
/// Classes are visited in severity order and shuffled with one RNG seeded from
/// `seed`, so the same input and seed always give the same partition. A class
/// with two or more images contributes at least one validation image and keeps
/// at least one for training.
pub fn stratified_split(
    samples: Vec<Sample>,
    validation_fraction: f64,
    seed: u64,
) -> Result<DatasetSplit, DatasetError> {
    if !(0.0..1.0).contains(&validation_fraction) {
        return Err(DatasetError::InvalidFraction(validation_fraction));
    }

    let mut by_class: BTreeMap<Severity, Vec<Sample>> = BTreeMap::new();
    for sample in samples {
        by_class.entry(sample.label).or_default().push(sample);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = DatasetSplit::default();
    for (label, mut group) in by_class {
        group.shuffle(&mut rng);

        let n = group.len();
        let mut n_val = (n as f64 * validation_fraction).round() as usize;
        if n >= 2 && validation_fraction > 0.0 {
            n_val = n_val.clamp(1, n - 1);
        }
        info!("Class {}: {} train / {} validation", label, n - n_val, n_val);

        let train = group.split_off(n_val);
        split.validation.extend(group);
        split.train.extend(train);
    }
    Ok(split)
}
