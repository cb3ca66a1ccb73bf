pub mod batch;
pub mod clahe;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Error preprocessing image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Error preprocessing image: empty payload")]
    Empty,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub image_size: u32,
    pub enhance_contrast: bool,
    pub clip_limit: f32,
    pub tile_grid: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            image_size: shared::INPUT_SIZE,
            enhance_contrast: true,
            clip_limit: 3.0,
            tile_grid: 8,
        }
    }
}

/// Turns encoded image bytes into the normalized NHWC tensor the model
/// consumes. Serving and training share one instance per configuration.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn input_shape(&self) -> [u32; 3] {
        [self.config.image_size, self.config.image_size, shared::INPUT_CHANNELS]
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
        if bytes.is_empty() {
            return Err(PreprocessError::Empty);
        }
        Ok(image::load_from_memory(bytes)?.to_rgb8())
    }

    /// Resize to the model input and, if enabled, enhance local contrast.
    pub fn prepare(&self, image: &RgbImage) -> RgbImage {
        let size = self.config.image_size;
        let resized = if image.dimensions() == (size, size) {
            image.clone()
        } else {
            imageops::resize(image, size, size, FilterType::Triangle)
        };

        if self.config.enhance_contrast {
            clahe::equalize_luma(&resized, self.config.clip_limit, self.config.tile_grid)
        } else {
            resized
        }
    }

    /// Scales to [0, 1] and adds the batch axis: `(1, height, width, 3)`.
    pub fn to_tensor(&self, image: &RgbImage) -> Array4<f32> {
        let (width, height) = image.dimensions();
        Array4::from_shape_fn(
            (1, height as usize, width as usize, 3),
            |(_, y, x, c)| image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
        )
    }

    pub fn preprocess(&self, bytes: &[u8]) -> Result<Array4<f32>, PreprocessError> {
        let decoded = self.decode(bytes)?;
        Ok(self.to_tensor(&self.prepare(&decoded)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    fn sample_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn every_format_yields_model_shape_in_unit_range() {
        let preprocessor = Preprocessor::default();
        let image = sample_image(300, 180);

        for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Bmp] {
            let tensor = preprocessor.preprocess(&encode(&image, format)).unwrap();
            assert_eq!(tensor.shape(), &[1, 224, 224, 3], "{:?}", format);
            assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)), "{:?}", format);
        }
    }

    #[test]
    fn grayscale_input_is_expanded_to_three_channels() {
        let gray = image::GrayImage::from_fn(50, 50, |x, _| image::Luma([(x * 5) as u8]));
        let mut bytes = Vec::new();
        gray.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();

        let tensor = Preprocessor::default().preprocess(&bytes).unwrap();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
    }

    #[test]
    fn normalization_without_enhancement_is_plain_scaling() {
        let preprocessor = Preprocessor::new(PreprocessConfig {
            image_size: 4,
            enhance_contrast: false,
            ..PreprocessConfig::default()
        });
        let image = RgbImage::from_pixel(4, 4, Rgb([255, 0, 51]));

        let tensor = preprocessor.preprocess(&encode(&image, ImageFormat::Png)).unwrap();
        assert_eq!(tensor[[0, 2, 1, 0]], 1.0);
        assert_eq!(tensor[[0, 2, 1, 1]], 0.0);
        assert!((tensor[[0, 2, 1, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let preprocessor = Preprocessor::default();
        assert!(matches!(
            preprocessor.preprocess(b"definitely not an image"),
            Err(PreprocessError::Decode(_))
        ));
        assert!(matches!(preprocessor.preprocess(&[]), Err(PreprocessError::Empty)));
    }
}
