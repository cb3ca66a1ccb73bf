//! Contrast-limited adaptive histogram equalization (CLAHE) on the luma
//! channel.
//!
//! The image is converted to full-range YCbCr (BT.601). Y is split into a grid
//! of tiles; each tile gets a clipped-histogram equalization lookup table, and
//! every pixel is mapped through a bilinear blend of its four nearest tile
//! tables. Cb and Cr are carried through unchanged.

use image::{Rgb, RgbImage};

const BINS: usize = 256;

/// Equalizes luma contrast. `clip_limit` follows the usual convention: the
/// per-bin cap is `clip_limit * tile_area / 256`; a value of `0` disables
/// clipping (plain adaptive equalization).
pub fn equalize_luma(image: &RgbImage, clip_limit: f32, tile_grid: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || tile_grid == 0 {
        return image.clone();
    }

    let pixel_count = (width * height) as usize;
    let mut luma = Vec::with_capacity(pixel_count);
    let mut chroma = Vec::with_capacity(pixel_count);
    for pixel in image.pixels() {
        let (y, cb, cr) = rgb_to_ycbcr(pixel);
        luma.push(y.round().clamp(0.0, 255.0) as u8);
        chroma.push((cb, cr));
    }

    let equalized = equalize_plane(
        &luma,
        width as usize,
        height as usize,
        clip_limit,
        tile_grid as usize,
    );

    let mut output = RgbImage::new(width, height);
    for ((pixel, &y), &(cb, cr)) in output.pixels_mut().zip(&equalized).zip(&chroma) {
        *pixel = ycbcr_to_rgb(y as f32, cb, cr);
    }
    output
}

fn rgb_to_ycbcr(pixel: &Rgb<u8>) -> (f32, f32, f32) {
    let [r, g, b] = pixel.0.map(f32::from);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (y, cb, cr)
}

fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> Rgb<u8> {
    let cb = cb - 128.0;
    let cr = cr - 128.0;
    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Tile layout covering a plane; edge tiles may be smaller.
struct Grid {
    tile_w: usize,
    tile_h: usize,
    cols: usize,
    rows: usize,
}

impl Grid {
    fn new(width: usize, height: usize, tiles: usize) -> Self {
        let tile_w = width.div_ceil(tiles.min(width));
        let tile_h = height.div_ceil(tiles.min(height));
        Self {
            tile_w,
            tile_h,
            cols: width.div_ceil(tile_w),
            rows: height.div_ceil(tile_h),
        }
    }
}

fn equalize_plane(
    plane: &[u8],
    width: usize,
    height: usize,
    clip_limit: f32,
    tiles: usize,
) -> Vec<u8> {
    let grid = Grid::new(width, height, tiles);

    let mut luts = Vec::with_capacity(grid.cols * grid.rows);
    for row in 0..grid.rows {
        for col in 0..grid.cols {
            let x0 = col * grid.tile_w;
            let y0 = row * grid.tile_h;
            let x1 = (x0 + grid.tile_w).min(width);
            let y1 = (y0 + grid.tile_h).min(height);

            let mut histogram = [0u32; BINS];
            for y in y0..y1 {
                for &value in &plane[y * width + x0..y * width + x1] {
                    histogram[value as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as u32;
            luts.push(tile_lut(&mut histogram, area, clip_limit));
        }
    }

    let mut output = vec![0u8; plane.len()];
    for y in 0..height {
        let (row0, row1, wy) = neighbours(y, grid.tile_h, grid.rows);
        for x in 0..width {
            let (col0, col1, wx) = neighbours(x, grid.tile_w, grid.cols);
            let value = plane[y * width + x] as usize;

            let top = lerp(
                luts[row0 * grid.cols + col0][value],
                luts[row0 * grid.cols + col1][value],
                wx,
            );
            let bottom = lerp(
                luts[row1 * grid.cols + col0][value],
                luts[row1 * grid.cols + col1][value],
                wx,
            );
            output[y * width + x] = to_u8(top + (bottom - top) * wy);
        }
    }
    output
}

/// The two tile indices whose centers bracket `position`, and the weight of
/// the second one.
fn neighbours(position: usize, tile: usize, count: usize) -> (usize, usize, f32) {
    let center = (position as f32 + 0.5) / tile as f32 - 0.5;
    if center <= 0.0 {
        return (0, 0, 0.0);
    }
    let first = center.floor() as usize;
    if first + 1 >= count {
        return (count - 1, count - 1, 0.0);
    }
    (first, first + 1, center - first as f32)
}

fn lerp(a: u8, b: u8, weight: f32) -> f32 {
    a as f32 + (b as f32 - a as f32) * weight
}

fn tile_lut(histogram: &mut [u32; BINS], area: u32, clip_limit: f32) -> [u8; BINS] {
    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);
        let mut excess = 0u32;
        for bin in histogram.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }

        let per_bin = excess / BINS as u32;
        let remainder = (excess % BINS as u32) as usize;
        for bin in histogram.iter_mut() {
            *bin += per_bin;
        }
        if remainder > 0 {
            let step = (BINS / remainder).max(1);
            for bin in histogram.iter_mut().step_by(step).take(remainder) {
                *bin += 1;
            }
        }
    }

    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0u8; BINS];
    let mut cumulative = 0u32;
    for (entry, &count) in lut.iter_mut().zip(histogram.iter()) {
        cumulative += count;
        *entry = to_u8(cumulative as f32 * scale);
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(size: u32, dark: u8, light: u8) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            let v = if (x + y) % 2 == 0 { dark } else { light };
            Rgb([v, v, v])
        })
    }

    #[test]
    fn unclipped_equalization_spreads_two_levels() {
        let image = checkerboard(64, 120, 130);
        let enhanced = equalize_luma(&image, 0.0, 8);

        let mut levels: Vec<u8> = enhanced.pixels().map(|p| p[0]).collect();
        levels.sort_unstable();
        levels.dedup();
        assert_eq!(levels, vec![128, 255]);
    }

    #[test]
    fn gray_stays_gray() {
        let image = RgbImage::from_fn(40, 30, |x, y| {
            let v = ((x * 3 + y * 5) % 200) as u8 + 20;
            Rgb([v, v, v])
        });
        let enhanced = equalize_luma(&image, 3.0, 8);
        assert_eq!(enhanced.dimensions(), (40, 30));
        for pixel in enhanced.pixels() {
            assert!(pixel[0].abs_diff(pixel[1]) <= 1 && pixel[1].abs_diff(pixel[2]) <= 1);
        }
    }

    #[test]
    fn chroma_is_preserved() {
        let image =
            RgbImage::from_fn(32, 32, |x, y| Rgb([150 + (x % 4) as u8, 60, 40 + (y % 3) as u8]));
        let enhanced = equalize_luma(&image, 3.0, 4);
        for (before, after) in image.pixels().zip(enhanced.pixels()) {
            let (_, cb0, cr0) = rgb_to_ycbcr(before);
            let (_, cb1, cr1) = rgb_to_ycbcr(after);
            assert!((cb0 - cb1).abs() < 2.5, "cb {} -> {}", cb0, cb1);
            assert!((cr0 - cr1).abs() < 2.5, "cr {} -> {}", cr0, cr1);
        }
    }

    #[test]
    fn clipping_keeps_lut_monotonic_and_bounded() {
        let mut histogram = [0u32; BINS];
        histogram[10] = 500;
        histogram[200] = 12;
        let lut = tile_lut(&mut histogram, 512, 3.0);
        assert!(lut.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(lut[255], 255);
    }

    #[test]
    fn tiny_images_do_not_panic() {
        let image = RgbImage::from_pixel(3, 2, Rgb([10, 200, 30]));
        let enhanced = equalize_luma(&image, 3.0, 8);
        assert_eq!(enhanced.dimensions(), (3, 2));
    }
}
