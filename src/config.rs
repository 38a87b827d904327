//! Run configuration and command-line parsing

use std::path::PathBuf;

use clap::Parser;

use crate::error::{PipelineError, Result};
use crate::gpu::Extent2d;
use crate::stages::FillPattern;

/// Configuration for one pipeline run
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Full-resolution extent of the HDR image
    pub extent: Extent2d,
    /// Levels in the bloom pyramid, including mip 0
    pub mip_levels: u32,
    /// Content written by the fill kernel
    pub fill: FillPattern,
    /// Weight of the upsampled glow against each level's own content.
    /// Each level is combined as `(own + s * glow) / (1 + s)`, so the sharp
    /// image ends up scaled by `1 / (1 + s)`.
    pub bloom_strength: f32,
    /// Exposure key: the display value an average-luminance pixel maps towards
    pub key_value: f32,
    /// Use this average luminance instead of the measured one
    pub fixed_luminance: Option<f32>,
    /// Where the encoded result goes
    pub output: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extent: Extent2d::new(1920, 1080),
            mip_levels: 6,
            fill: FillPattern::default(),
            bloom_strength: 1.0,
            key_value: 0.18,
            fixed_luminance: None,
            output: PathBuf::from("result.png"),
        }
    }
}

impl PipelineConfig {
    /// Reject settings that would make a dispatch or allocation meaningless
    pub fn validate(&self) -> Result<()> {
        let Extent2d { width, height } = self.extent;
        if width == 0 || height == 0 {
            return Err(PipelineError::Config(format!(
                "image extent must be non-zero, got {width}x{height}"
            )));
        }
        let max_levels = self.extent.max_mip_levels();
        if self.mip_levels == 0 || self.mip_levels > max_levels {
            return Err(PipelineError::Config(format!(
                "{width}x{height} supports 1..={max_levels} mip levels, got {}",
                self.mip_levels
            )));
        }
        if !(self.key_value > 0.0 && self.key_value.is_finite()) {
            return Err(PipelineError::Config(format!(
                "key value must be positive, got {}",
                self.key_value
            )));
        }
        if !(self.bloom_strength >= 0.0 && self.bloom_strength.is_finite()) {
            return Err(PipelineError::Config(format!(
                "bloom strength must be non-negative, got {}",
                self.bloom_strength
            )));
        }
        if let Some(luminance) = self.fixed_luminance {
            if !(luminance >= 0.0 && luminance.is_finite()) {
                return Err(PipelineError::Config(format!(
                    "average luminance must be non-negative, got {luminance}"
                )));
            }
        }
        Ok(())
    }
}

/// HDR bloom and tone mapping on the GPU
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Image width in pixels
    #[arg(long, default_value_t = 1920)]
    pub width: u32,

    /// Image height in pixels
    #[arg(long, default_value_t = 1080)]
    pub height: u32,

    /// Mip levels in the bloom pyramid
    #[arg(long, default_value_t = 6)]
    pub mip_levels: u32,

    /// Output file (.png or .ppm)
    #[arg(short, long, default_value = "result.png")]
    pub output: PathBuf,

    /// Skip measurement and tone map with this average luminance
    #[arg(long)]
    pub average_luminance: Option<f32>,

    /// Exposure key value
    #[arg(long, default_value_t = 0.18)]
    pub key_value: f32,

    /// Weight of the bloom glow at each pyramid level; the sharp image is
    /// scaled by 1 / (1 + strength)
    #[arg(long, default_value_t = 1.0)]
    pub bloom_strength: f32,

    /// Peak HDR intensity of the diamond pattern
    #[arg(long, default_value_t = 8.0)]
    pub peak: f32,

    /// Fill with one colour instead of the diamond pattern
    #[arg(long, value_name = "R,G,B,A", value_delimiter = ',')]
    pub flat: Option<Vec<f32>>,

    /// Run the host reference pipeline instead of the GPU
    #[arg(long)]
    pub reference: bool,
}

impl Cli {
    pub fn to_config(&self) -> Result<PipelineConfig> {
        let fill = match &self.flat {
            Some(channels) => match channels.as_slice() {
                &[r, g, b, a] => FillPattern::Flat([r, g, b, a]),
                _ => {
                    return Err(PipelineError::Config(
                        "--flat takes exactly four values".to_string(),
                    ));
                }
            },
            None => FillPattern::Diamond { peak: self.peak },
        };

        let config = PipelineConfig {
            extent: Extent2d::new(self.width, self.height),
            mip_levels: self.mip_levels,
            fill,
            bloom_strength: self.bloom_strength,
            key_value: self.key_value,
            fixed_luminance: self.average_luminance,
            output: self.output.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.extent, Extent2d::new(1920, 1080));
        assert_eq!(config.mip_levels, 6);
    }

    #[test]
    fn test_rejects_zero_extent() {
        let config = PipelineConfig {
            extent: Extent2d::new(0, 1080),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_rejects_mip_chain_longer_than_image() {
        let config = PipelineConfig {
            extent: Extent2d::new(16, 16),
            mip_levels: 6,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            mip_levels: 5,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_exposure_settings() {
        let config = PipelineConfig {
            key_value: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            fixed_luminance: Some(f32::NAN),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_flat_fill() {
        let cli = Cli::parse_from([
            "bloom_compute",
            "--width",
            "64",
            "--height",
            "32",
            "--mip-levels",
            "3",
            "--flat",
            "0.5,0.5,0.5,1.0",
            "--average-luminance",
            "1.0",
        ]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.extent, Extent2d::new(64, 32));
        assert_eq!(config.fill, FillPattern::Flat([0.5, 0.5, 0.5, 1.0]));
        assert_eq!(config.fixed_luminance, Some(1.0));
        assert!(!cli.reference);
    }

    #[test]
    fn test_cli_defaults_match_config_defaults() {
        let config = Cli::parse_from(["bloom_compute"]).to_config().unwrap();
        let defaults = PipelineConfig::default();
        assert_eq!(config.extent, defaults.extent);
        assert_eq!(config.mip_levels, defaults.mip_levels);
        assert_eq!(config.fill, defaults.fill);
        assert_eq!(config.output, defaults.output);
    }
}
