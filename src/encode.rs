//! Output images and encoding them to files

use std::path::Path;

use crate::error::{PipelineError, Result};

/// Interleaved 8-bit pixels read back from the device
#[derive(Clone, Debug, PartialEq)]
pub struct OutputImage {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Bytes between the starts of two rows
    pub stride: u32,
    pub pixels: Vec<u8>,
}

impl OutputImage {
    /// Wrap tightly packed pixels (stride = `width * channels`)
    pub fn new(width: u32, height: u32, channels: u32, pixels: Vec<u8>) -> Self {
        let stride = width * channels;
        debug_assert_eq!(pixels.len(), (stride * height) as usize);
        Self {
            width,
            height,
            channels,
            stride,
            pixels,
        }
    }

    /// Channel values of the pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let start = (y * self.stride + x * self.channels) as usize;
        &self.pixels[start..start + self.channels as usize]
    }

    /// Whether the buffer holds exactly `height` rows of `stride` bytes
    pub fn is_fully_populated(&self) -> bool {
        self.stride == self.width * self.channels
            && self.pixels.len() == (self.stride * self.height) as usize
    }
}

/// Convert a float value (0.0-1.0) to a byte (0-255), rounding like a unorm store
#[inline]
pub fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Persists an `OutputImage`
pub trait ImageEncoder {
    fn encode(&self, image: &OutputImage, path: &Path) -> Result<()>;
}

/// Encodes through the `image` crate; the format follows the file extension
/// (`.png`, `.ppm`)
#[derive(Debug, Default)]
pub struct FileEncoder;

impl ImageEncoder for FileEncoder {
    fn encode(&self, image: &OutputImage, path: &Path) -> Result<()> {
        if !image.is_fully_populated() {
            return Err(PipelineError::Config(format!(
                "output buffer is {} bytes, expected {}x{} rows of {} bytes",
                image.pixels.len(),
                image.height,
                image.width,
                image.stride
            )));
        }

        match image.channels {
            4 => {
                let rgba = image::RgbaImage::from_raw(image.width, image.height, image.pixels.clone())
                    .ok_or_else(|| PipelineError::Config("output buffer too small".to_string()))?;
                // PPM has no alpha channel
                if is_ppm(path) {
                    image::DynamicImage::ImageRgba8(rgba).to_rgb8().save(path)?;
                } else {
                    rgba.save(path)?;
                }
            }
            3 => {
                let rgb = image::RgbImage::from_raw(image.width, image.height, image.pixels.clone())
                    .ok_or_else(|| PipelineError::Config("output buffer too small".to_string()))?;
                rgb.save(path)?;
            }
            channels => {
                return Err(PipelineError::Config(format!(
                    "cannot encode {channels}-channel images"
                )));
            }
        }

        log::info!(
            "Wrote {}x{} image to {}",
            image.width,
            image.height,
            path.display()
        );
        Ok(())
    }
}

fn is_ppm(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ppm"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(width: u32, height: u32) -> OutputImage {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                pixels.extend_from_slice(&[v, 128, 255 - v, 255]);
            }
        }
        OutputImage::new(width, height, 4, pixels)
    }

    #[test]
    fn test_to_byte_clamps() {
        assert_eq!(to_byte(-1.0), 0);
        assert_eq!(to_byte(0.5), 128);
        assert_eq!(to_byte(2.0), 255);
    }

    #[test]
    fn test_pixel_addressing() {
        let image = checker(3, 2);
        assert_eq!(image.stride, 12);
        assert_eq!(image.pixel(1, 0), &[0, 128, 255, 255]);
        assert_eq!(image.pixel(1, 1), &[255, 128, 0, 255]);
        assert!(image.is_fully_populated());
    }

    #[test]
    fn test_png_round_trips_through_file() {
        let path = std::env::temp_dir().join(format!("bloom_compute_{}.png", std::process::id()));
        let image = checker(5, 3);
        FileEncoder.encode(&image, &path).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (5, 3));
        assert_eq!(decoded.as_raw(), &image.pixels);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let mut image = checker(4, 4);
        image.pixels.truncate(10);
        let path = std::env::temp_dir().join("bloom_compute_short.png");
        assert!(matches!(
            FileEncoder.encode(&image, &path),
            Err(PipelineError::Config(_))
        ));
    }
}
