//! Host reference pipeline
//!
//! Mirrors every kernel on the CPU with rayon so runs can be checked, or
//! produced, without a GPU adapter. Sampling follows the device: bilinear,
//! clamp to edge, texel centres at +0.5.

use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::encode::{OutputImage, to_byte};
use crate::error::Result;
use crate::gpu::Extent2d;
use crate::stages::FillPattern;
use crate::stages::downsample::downsample_steps;
use crate::stages::luminance::{LUMA_WEIGHTS, LUMINANCE_TILE, reduce_partial_sums};
use crate::stages::tonemap::tone_map_channel;
use crate::stages::upsample::upsample_steps;

/// Same constants as fill.wgsl
const DIAMOND_CELL: u32 = 120;
const DIAMOND_BASE_LEVEL: f32 = 0.05;

pub type Rgba = [f32; 4];

/// A float RGBA image in host memory, row-major
#[derive(Clone, Debug)]
pub struct HostImage {
    pub extent: Extent2d,
    pub pixels: Vec<Rgba>,
}

impl HostImage {
    pub fn new(extent: Extent2d) -> Self {
        Self {
            extent,
            pixels: vec![[0.0; 4]; extent.pixel_count() as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Rgba {
        self.pixels[pixel_index(self.extent, x, y)]
    }

    /// Bilinear sample at normalized `uv`, clamped to the edge texels
    pub fn sample(&self, u: f32, v: f32) -> Rgba {
        let Extent2d { width, height } = self.extent;
        let x = u * width as f32 - 0.5;
        let y = v * height as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);

        let clamp_x = |i: f32| (i as i64).clamp(0, width as i64 - 1) as u32;
        let clamp_y = |i: f32| (i as i64).clamp(0, height as i64 - 1) as u32;
        let (xa, xb) = (clamp_x(x0), clamp_x(x0 + 1.0));
        let (ya, yb) = (clamp_y(y0), clamp_y(y0 + 1.0));

        let top = lerp(self.get(xa, ya), self.get(xb, ya), fx);
        let bottom = lerp(self.get(xa, yb), self.get(xb, yb), fx);
        lerp(top, bottom, fy)
    }

    /// Apply `f(x, y)` to every pixel, rows in parallel
    fn fill_with(&mut self, f: impl Fn(u32, u32) -> Rgba + Sync) {
        let width = self.extent.width as usize;
        self.pixels
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, pixel) in row.iter_mut().enumerate() {
                    *pixel = f(x as u32, y as u32);
                }
            });
    }
}

/// Row-major index of (x, y), widened before multiplying
fn pixel_index(extent: Extent2d, x: u32, y: u32) -> usize {
    y as usize * extent.width as usize + x as usize
}

fn lerp(a: Rgba, b: Rgba, t: f32) -> Rgba {
    std::array::from_fn(|c| a[c] + (b[c] - a[c]) * t)
}

fn add_scaled(acc: &mut Rgba, value: Rgba, weight: f32) {
    for c in 0..4 {
        acc[c] += value[c] * weight;
    }
}

/// Rec. 709 luminance of one pixel
pub fn luminance(pixel: Rgba) -> f32 {
    pixel[0] * LUMA_WEIGHTS[0] + pixel[1] * LUMA_WEIGHTS[1] + pixel[2] * LUMA_WEIGHTS[2]
}

fn diamond(x: u32, y: u32, peak: f32) -> Rgba {
    let half_cell = DIAMOND_CELL as f32 * 0.5;
    let (cx, cy) = (x / DIAMOND_CELL, y / DIAMOND_CELL);
    let lx = (x % DIAMOND_CELL) as f32 + 0.5 - half_cell;
    let ly = (y % DIAMOND_CELL) as f32 + 0.5 - half_cell;
    let d = (lx.abs() + ly.abs()) / half_cell;
    let hue = ((cx * 7 + cy * 3) as f32 * 0.1).fract();
    let falloff = (1.0 - d).max(0.0);
    let intensity = DIAMOND_BASE_LEVEL + peak * falloff.powi(4);
    let tint = |offset: f32| 0.5 + 0.5 * (std::f32::consts::TAU * (hue + offset)).cos();
    [
        tint(0.0) * intensity,
        tint(0.33) * intensity,
        tint(0.67) * intensity,
        1.0,
    ]
}

/// Mip 0 content written by the fill kernel
pub fn fill(pattern: FillPattern, extent: Extent2d) -> HostImage {
    let mut image = HostImage::new(extent);
    match pattern {
        FillPattern::Flat(color) => image.fill_with(|_, _| color),
        FillPattern::Diamond { peak } => image.fill_with(|x, y| diamond(x, y, peak)),
    }
    image
}

/// 13-tap downsample of `src` into an image of `dst_extent`
pub fn downsample(src: &HostImage, dst_extent: Extent2d) -> HostImage {
    const TAPS: [(f32, f32, f32); 13] = [
        (0.0, 0.0, 0.125),
        (-2.0, -2.0, 0.03125),
        (2.0, -2.0, 0.03125),
        (-2.0, 2.0, 0.03125),
        (2.0, 2.0, 0.03125),
        (0.0, -2.0, 0.0625),
        (-2.0, 0.0, 0.0625),
        (2.0, 0.0, 0.0625),
        (0.0, 2.0, 0.0625),
        (-1.0, -1.0, 0.125),
        (1.0, -1.0, 0.125),
        (-1.0, 1.0, 0.125),
        (1.0, 1.0, 0.125),
    ];
    let texel = (1.0 / src.extent.width as f32, 1.0 / src.extent.height as f32);

    let mut dst = HostImage::new(dst_extent);
    dst.fill_with(|x, y| {
        let u = (x as f32 + 0.5) / dst_extent.width as f32;
        let v = (y as f32 + 0.5) / dst_extent.height as f32;
        let mut acc = [0.0; 4];
        for (dx, dy, weight) in TAPS {
            add_scaled(&mut acc, src.sample(u + dx * texel.0, v + dy * texel.1), weight);
        }
        acc
    });
    dst
}

/// Tent-upsample `src` and add it onto the finer `dst`
pub fn upsample_into(src: &HostImage, dst: &mut HostImage, strength: f32) {
    const TENT: [(f32, f32, f32); 9] = [
        (0.0, 0.0, 4.0),
        (0.0, -1.0, 2.0),
        (-1.0, 0.0, 2.0),
        (1.0, 0.0, 2.0),
        (0.0, 1.0, 2.0),
        (-1.0, -1.0, 1.0),
        (1.0, -1.0, 1.0),
        (-1.0, 1.0, 1.0),
        (1.0, 1.0, 1.0),
    ];
    let texel = (1.0 / src.extent.width as f32, 1.0 / src.extent.height as f32);
    let extent = dst.extent;
    let width = extent.width as usize;

    dst.pixels
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let v = (y as f32 + 0.5) / extent.height as f32;
            for (x, pixel) in row.iter_mut().enumerate() {
                let u = (x as f32 + 0.5) / extent.width as f32;
                let mut up = [0.0; 4];
                for (dx, dy, weight) in TENT {
                    add_scaled(&mut up, src.sample(u + dx * texel.0, v + dy * texel.1), weight / 16.0);
                }
                for c in 0..3 {
                    pixel[c] = (pixel[c] + up[c] * strength) / (1.0 + strength);
                }
            }
        });
}

/// Build the pyramid from mip 0 down to `mip_levels - 1`
pub fn downsample_pyramid(base: HostImage, mip_levels: u32) -> Vec<HostImage> {
    let full = base.extent;
    let mut levels = vec![base];
    for (src, dst) in downsample_steps(mip_levels) {
        let next = downsample(&levels[src as usize], full.mip(dst));
        levels.push(next);
    }
    levels
}

/// Accumulate bloom from the coarsest level back into mip 0
pub fn upsample_pyramid(levels: &mut [HostImage], strength: f32) {
    for (src, dst) in upsample_steps(levels.len() as u32) {
        let (finer, coarser) = levels.split_at_mut(src as usize);
        upsample_into(&coarser[0], &mut finer[dst as usize], strength);
    }
}

/// One partial sum per 16x16 tile, in dispatch order
pub fn luminance_partial_sums(image: &HostImage) -> Vec<f32> {
    let tiles_x = image.extent.width.div_ceil(LUMINANCE_TILE.width);
    let tiles_y = image.extent.height.div_ceil(LUMINANCE_TILE.height);
    (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|tile| {
            let x0 = (tile % tiles_x) * LUMINANCE_TILE.width;
            let y0 = (tile / tiles_x) * LUMINANCE_TILE.height;
            let x1 = (x0 + LUMINANCE_TILE.width).min(image.extent.width);
            let y1 = (y0 + LUMINANCE_TILE.height).min(image.extent.height);
            let mut sum = 0.0f32;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += luminance(image.get(x, y));
                }
            }
            sum
        })
        .collect()
}

/// Scene-average luminance of `image`
pub fn average_luminance(image: &HostImage) -> f32 {
    reduce_partial_sums(&luminance_partial_sums(image), image.extent)
}

/// Tone map in place
pub fn tone_map(image: &mut HostImage, average_luminance: f32, key_value: f32) {
    image.pixels.par_iter_mut().for_each(|pixel| {
        for c in 0..3 {
            pixel[c] = tone_map_channel(pixel[c], average_luminance, key_value);
        }
    });
}

/// Reduce to 8 bits per channel
pub fn to_output(image: &HostImage) -> OutputImage {
    let pixels = image
        .pixels
        .par_iter()
        .flat_map_iter(|pixel| pixel.map(to_byte))
        .collect();
    OutputImage::new(image.extent.width, image.extent.height, 4, pixels)
}

/// Result of a host run
pub struct ReferenceOutput {
    pub image: OutputImage,
    pub measured_luminance: f32,
    pub applied_luminance: f32,
}

/// Run the whole pipeline on the host
pub fn run_reference(config: &PipelineConfig) -> Result<ReferenceOutput> {
    config.validate()?;

    let base = fill(config.fill, config.extent);
    let mut levels = downsample_pyramid(base, config.mip_levels);
    upsample_pyramid(&mut levels, config.bloom_strength);

    let mut mip0 = levels.swap_remove(0);
    let measured_luminance = average_luminance(&mip0);
    let applied_luminance = config.fixed_luminance.unwrap_or(measured_luminance);
    log::info!(
        "Reference average luminance: measured {:.4}, applied {:.4}",
        measured_luminance,
        applied_luminance
    );

    tone_map(&mut mip0, applied_luminance, config.key_value);
    Ok(ReferenceOutput {
        image: to_output(&mip0),
        measured_luminance,
        applied_luminance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREY: Rgba = [0.5, 0.5, 0.5, 1.0];

    fn assert_close(actual: Rgba, expected: Rgba, tolerance: f32) {
        for c in 0..4 {
            let error = (actual[c] - expected[c]).abs() / expected[c].abs().max(1e-6);
            assert!(
                error <= tolerance,
                "channel {c}: {} vs {} ({:.3}% off)",
                actual[c],
                expected[c],
                error * 100.0
            );
        }
    }

    #[test]
    fn test_flat_image_survives_full_cascade() {
        let extent = Extent2d::new(1920, 1080);
        let mut levels = downsample_pyramid(fill(FillPattern::Flat(GREY), extent), 6);
        assert_eq!(levels.len(), 6);
        assert_eq!(levels[5].extent, Extent2d::new(60, 33));

        upsample_pyramid(&mut levels, 1.0);
        for pixel in &levels[0].pixels {
            assert_close(*pixel, GREY, 0.01);
        }
    }

    #[test]
    fn test_flat_luminance_at_one_tile() {
        let image = fill(FillPattern::Flat([0.3, 0.3, 0.3, 1.0]), Extent2d::new(16, 16));
        assert_eq!(luminance_partial_sums(&image).len(), 1);
        assert!((average_luminance(&image) - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_flat_luminance_at_full_hd() {
        let image = fill(FillPattern::Flat(GREY), Extent2d::new(1920, 1080));
        assert!((average_luminance(&image) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_luminance_partial_edge_tiles() {
        // Edge tiles cover fewer pixels; the average must not be diluted
        let image = fill(FillPattern::Flat([2.0, 2.0, 2.0, 1.0]), Extent2d::new(17, 33));
        assert_eq!(luminance_partial_sums(&image).len(), 2 * 3);
        assert!((average_luminance(&image) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_upsample_scales_sharp_image_by_strength() {
        let coarse = HostImage::new(Extent2d::new(4, 4));
        let mut fine = fill(FillPattern::Flat([1.0, 1.0, 1.0, 1.0]), Extent2d::new(8, 8));
        upsample_into(&coarse, &mut fine, 3.0);
        for pixel in &fine.pixels {
            assert_eq!(pixel[..3], [0.25; 3]);
            assert_eq!(pixel[3], 1.0);
        }
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_pixel_index_does_not_wrap_on_large_extents() {
        let extent = Extent2d::new(70_000, 70_000);
        assert_eq!(pixel_index(extent, 69_999, 69_999), 4_899_999_999);
        assert_eq!(pixel_index(extent, 5, 1), 70_005);
    }

    #[test]
    fn test_bright_spot_spreads_glow() {
        let extent = Extent2d::new(64, 64);
        let mut base = HostImage::new(extent);
        for y in 30..34 {
            for x in 30..34 {
                base.pixels[(y * 64 + x) as usize] = [50.0, 50.0, 50.0, 1.0];
            }
        }
        let before = base.get(20, 32)[0];
        let mut levels = downsample_pyramid(base, 4);
        upsample_pyramid(&mut levels, 1.0);
        assert_eq!(before, 0.0);
        assert!(levels[0].get(20, 32)[0] > 0.0, "no bloom reached the neighbourhood");
    }

    #[test]
    fn test_diamond_fill_is_hdr() {
        let image = fill(FillPattern::Diamond { peak: 8.0 }, Extent2d::new(240, 120));
        let brightest = image
            .pixels
            .iter()
            .map(|pixel| luminance(*pixel))
            .fold(0.0f32, f32::max);
        assert!(brightest > 1.0);
        assert!(image.pixels.iter().all(|pixel| pixel[3] == 1.0));
    }

    #[test]
    fn test_sample_at_texel_centre_is_exact() {
        let mut image = HostImage::new(Extent2d::new(4, 2));
        image.pixels[5] = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(image.sample(1.5 / 4.0, 1.5 / 2.0), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_reference_run_with_fixed_luminance() {
        let config = PipelineConfig {
            extent: Extent2d::new(320, 200),
            mip_levels: 6,
            fixed_luminance: Some(1.0),
            ..Default::default()
        };
        let output = run_reference(&config).unwrap();
        assert_eq!(output.applied_luminance, 1.0);
        assert_eq!(output.image.width, 320);
        assert_eq!(output.image.height, 200);
        assert_eq!(output.image.stride, 320 * 4);
        assert!(output.image.is_fully_populated());
    }
}
