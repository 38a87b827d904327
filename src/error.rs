//! Error types for the bloom pipeline

use thiserror::Error;

/// Everything that can abort a pipeline run.
///
/// None of these are retried: a run either completes and produces one image
/// or stops before producing any output.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("GPU adapter does not support {0}")]
    MissingCapability(String),

    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("failed to create {label}: {message}")]
    ResourceCreation { label: String, message: String },

    #[error("failed to build kernel {label}: {message}")]
    KernelCreation { label: String, message: String },

    #[error("command batch {label} failed: {message}")]
    Submission { label: String, message: String },

    #[error("failed to map buffer: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),

    #[error("buffer mapping callback was dropped")]
    ReadbackChannel,

    #[error("failed to encode output image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
