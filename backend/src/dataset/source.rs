use std::fs;

use ndarray::{s, Array4};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::{Augmenter, DatasetError, Sample};
use crate::preprocess::Preprocessor;

/// One mini-batch: `(B, H, W, 3)` images in [0, 1] and class indices.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Vec<i64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Streams batches from disk. Each pass over the data ends with `None`; call
/// [`ImageSource::reset`] before the next epoch.
pub struct ImageSource {
    samples: Vec<Sample>,
    preprocessor: Preprocessor,
    augmenter: Option<Augmenter>,
    batch_size: usize,
    shuffle: bool,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl ImageSource {
    /// Shuffled and augmented.
    pub fn training(
        samples: Vec<Sample>,
        preprocessor: Preprocessor,
        augmenter: Augmenter,
        batch_size: usize,
        seed: u64,
    ) -> Self {
        Self::new(samples, preprocessor, Some(augmenter), batch_size, true, seed)
    }

    /// Fixed order, no augmentation.
    pub fn validation(samples: Vec<Sample>, preprocessor: Preprocessor, batch_size: usize) -> Self {
        Self::new(samples, preprocessor, None, batch_size, false, 0)
    }

    fn new(
        samples: Vec<Sample>,
        preprocessor: Preprocessor,
        augmenter: Option<Augmenter>,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Self {
        let order = (0..samples.len()).collect();
        let mut source = Self {
            samples,
            preprocessor,
            augmenter,
            batch_size: batch_size.max(1),
            shuffle,
            order,
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
        };
        source.reset();
        source
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    fn load_batch(&mut self, indices: &[usize]) -> Result<Batch, DatasetError> {
        // Seeds are drawn up front so parallel loading stays reproducible.
        let seeds: Vec<u64> = indices.iter().map(|_| self.rng.random()).collect();

        let images = indices
            .par_iter()
            .zip(seeds.par_iter())
            .map(|(&index, &seed)| self.load_one(&self.samples[index], seed))
            .collect::<Result<Vec<_>, DatasetError>>()?;

        let size = self.preprocessor.config().image_size as usize;
        let mut batch = Array4::zeros((images.len(), size, size, 3));
        for (i, image) in images.iter().enumerate() {
            batch
                .slice_mut(s![i, .., .., ..])
                .assign(&image.slice(s![0, .., .., ..]));
        }

        Ok(Batch {
            images: batch,
            labels: indices
                .iter()
                .map(|&index| self.samples[index].label.index() as i64)
                .collect(),
        })
    }

    fn load_one(&self, sample: &Sample, seed: u64) -> Result<Array4<f32>, DatasetError> {
        let image_error = |source| DatasetError::Image {
            path: sample.path.clone(),
            source,
        };

        let bytes = fs::read(&sample.path)?;
        let decoded = self.preprocessor.decode(&bytes).map_err(image_error)?;
        let mut prepared = self.preprocessor.prepare(&decoded);
        if let Some(augmenter) = &self.augmenter {
            prepared = augmenter.augment(&prepared, &mut StdRng::seed_from_u64(seed));
        }
        Ok(self.preprocessor.to_tensor(&prepared))
    }
}

impl Iterator for ImageSource {
    type Item = Result<Batch, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        Some(self.load_batch(&indices))
    }
}
