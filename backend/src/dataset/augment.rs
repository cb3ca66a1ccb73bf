//! Random geometric augmentation for training images.
//!
//! Each call draws one affine transform (rotation, shift, shear, zoom) and
//! resamples the image through it with bilinear interpolation. Coordinates
//! that fall outside the source are clamped to the nearest edge pixel.

use image::{imageops, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    /// Maximum rotation in degrees, applied as ±range.
    pub rotation_range: f32,
    /// Maximum horizontal shift as a fraction of width.
    pub width_shift: f32,
    /// Maximum vertical shift as a fraction of height.
    pub height_shift: f32,
    /// Maximum shear angle in radians.
    pub shear_range: f32,
    /// Scale is drawn per axis from `[1 - zoom_range, 1 + zoom_range]`.
    pub zoom_range: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            horizontal_flip: true,
            vertical_flip: false,
            rotation_range: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            shear_range: 0.2,
            zoom_range: 0.2,
        }
    }
}

impl AugmentConfig {
    pub fn none() -> Self {
        Self {
            horizontal_flip: false,
            vertical_flip: false,
            rotation_range: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
        }
    }
}

/// Output-to-source mapping: `src = m * (dst - center) + center + shift`.
#[derive(Debug, Clone, Copy)]
struct Affine {
    m: [[f32; 2]; 2],
    shift: [f32; 2],
}

impl Affine {
    fn is_identity(&self) -> bool {
        self.m == [[1.0, 0.0], [0.0, 1.0]] && self.shift == [0.0, 0.0]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Augmenter {
    config: AugmentConfig,
}

impl Augmenter {
    pub fn new(config: AugmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    pub fn augment(&self, image: &RgbImage, rng: &mut StdRng) -> RgbImage {
        let transform = self.draw(image.width(), image.height(), rng);
        let mut output = if transform.is_identity() {
            image.clone()
        } else {
            warp(image, &transform)
        };

        if self.config.horizontal_flip && rng.random_bool(0.5) {
            imageops::flip_horizontal_in_place(&mut output);
        }
        if self.config.vertical_flip && rng.random_bool(0.5) {
            imageops::flip_vertical_in_place(&mut output);
        }
        output
    }

    fn draw(&self, width: u32, height: u32, rng: &mut StdRng) -> Affine {
        let c = &self.config;
        let theta = symmetric(rng, c.rotation_range).to_radians();
        let tx = symmetric(rng, c.width_shift) * width as f32;
        let ty = symmetric(rng, c.height_shift) * height as f32;
        let shear = symmetric(rng, c.shear_range);
        let (zx, zy) = if c.zoom_range > 0.0 {
            (
                rng.random_range(1.0 - c.zoom_range..=1.0 + c.zoom_range),
                rng.random_range(1.0 - c.zoom_range..=1.0 + c.zoom_range),
            )
        } else {
            (1.0, 1.0)
        };

        let rotation = [[theta.cos(), -theta.sin()], [theta.sin(), theta.cos()]];
        let shearing = [[1.0, -shear.sin()], [0.0, shear.cos()]];
        let zoom = [[zx, 0.0], [0.0, zy]];

        Affine {
            m: matmul(matmul(rotation, shearing), zoom),
            shift: [tx, ty],
        }
    }
}

fn symmetric(rng: &mut StdRng, range: f32) -> f32 {
    if range > 0.0 {
        rng.random_range(-range..=range)
    } else {
        0.0
    }
}

fn matmul(a: [[f32; 2]; 2], b: [[f32; 2]; 2]) -> [[f32; 2]; 2] {
    let mut out = [[0.0; 2]; 2];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = a[i][0] * b[0][j] + a[i][1] * b[1][j];
        }
    }
    out
}

fn warp(image: &RgbImage, transform: &Affine) -> RgbImage {
    let (width, height) = image.dimensions();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let m = transform.m;

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = m[0][0] * dx + m[0][1] * dy + cx + transform.shift[0];
        let sy = m[1][0] * dx + m[1][1] * dy + cy + transform.shift[1];
        sample_nearest_edge(image, sx, sy)
    })
}

fn sample_nearest_edge(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = image.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        *value = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(24, 16, |x, y| Rgb([(x * 10) as u8, (y * 15) as u8, 77]))
    }

    #[test]
    fn disabled_config_is_identity() {
        let augmenter = Augmenter::new(AugmentConfig::none());
        let mut rng = StdRng::seed_from_u64(1);
        let image = gradient();
        assert_eq!(augmenter.augment(&image, &mut rng), image);
    }

    #[test]
    fn flip_only_yields_original_or_mirror() {
        let augmenter = Augmenter::new(AugmentConfig {
            horizontal_flip: true,
            ..AugmentConfig::none()
        });
        let image = gradient();
        let mirrored = imageops::flip_horizontal(&image);

        let mut rng = StdRng::seed_from_u64(3);
        let mut seen_flip = false;
        let mut seen_plain = false;
        for _ in 0..32 {
            let out = augmenter.augment(&image, &mut rng);
            if out == mirrored {
                seen_flip = true;
            } else {
                assert_eq!(out, image);
                seen_plain = true;
            }
        }
        assert!(seen_flip && seen_plain);
    }

    #[test]
    fn default_transform_keeps_size_and_is_seeded() {
        let augmenter = Augmenter::default();
        let image = gradient();

        let a = augmenter.augment(&image, &mut StdRng::seed_from_u64(11));
        let b = augmenter.augment(&image, &mut StdRng::seed_from_u64(11));
        assert_eq!(a.dimensions(), image.dimensions());
        assert_eq!(a, b);
    }

    #[test]
    fn shifted_pixels_fill_from_edge() {
        let transform = Affine {
            m: [[1.0, 0.0], [0.0, 1.0]],
            shift: [-100.0, 0.0],
        };
        let image = gradient();
        let out = warp(&image, &transform);
        for y in 0..image.height() {
            assert_eq!(out.get_pixel(5, y), image.get_pixel(0, y));
        }
    }
}
