//! Compute stages of the bloom pipeline
//!
//! Each stage owns its kernel and records its dispatches into a
//! `CommandBatch`, transitioning the levels it touches right before use.

pub mod convert;
pub mod downsample;
pub mod fill;
pub mod luminance;
pub mod tonemap;
pub mod upsample;

pub use convert::FormatConverter;
pub use downsample::PyramidDownsampler;
pub use fill::{FillPattern, FillPipeline};
pub use luminance::LuminanceReducer;
pub use tonemap::ToneMapper;
pub use upsample::PyramidUpsampler;
