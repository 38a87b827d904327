//! GPU context management - headless device and queue setup

use crate::error::{PipelineError, Result};

use super::batch::{BatchReport, CommandBatch};

/// Storage format used by the HDR image; read-write storage access on it is
/// an adapter-specific feature.
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Largest push-constant block any kernel uses
pub const PUSH_CONSTANT_BYTES: u32 = 32;

/// Holds the wgpu state needed to run compute batches
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Create a compute-only context on the best available adapter
    pub fn headless() -> Result<Self> {
        pollster::block_on(Self::headless_async())
    }

    async fn headless_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(PipelineError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        log::info!("Using GPU: {} ({:?})", adapter_info.name, adapter_info.backend);

        let required_features = wgpu::Features::PUSH_CONSTANTS
            | wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        let missing = required_features - adapter.features();
        if !missing.is_empty() {
            return Err(PipelineError::MissingCapability(format!("{missing:?}")));
        }
        if adapter.limits().max_push_constant_size < PUSH_CONSTANT_BYTES {
            return Err(PipelineError::MissingCapability(format!(
                "{PUSH_CONSTANT_BYTES} bytes of push constants"
            )));
        }
        let hdr_features = adapter.get_texture_format_features(HDR_FORMAT);
        if !hdr_features
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::STORAGE_READ_WRITE)
        {
            return Err(PipelineError::MissingCapability(format!(
                "read-write storage access on {HDR_FORMAT:?}"
            )));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Bloom Device"),
                    required_features,
                    required_limits: wgpu::Limits {
                        max_push_constant_size: PUSH_CONSTANT_BYTES,
                        ..wgpu::Limits::default()
                    },
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }

    /// Start recording a one-shot command batch
    pub fn begin_batch(&self, label: &'static str) -> CommandBatch {
        CommandBatch::new(self, label)
    }

    /// Submit a batch and block until the device has finished it.
    ///
    /// Validation errors raised while the batch was recorded or executed are
    /// returned instead of reaching the uncaptured error handler.
    pub fn submit_and_wait(&self, batch: CommandBatch) -> Result<BatchReport> {
        let (encoder, report) = batch.finish();
        let index = self.queue.submit(std::iter::once(encoder.finish()));
        let _ = self
            .device
            .poll(wgpu::Maintain::WaitForSubmissionIndex(index));

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(PipelineError::Submission {
                label: report.label.to_string(),
                message: error.to_string(),
            });
        }

        log::debug!(
            "Batch {} done: {} dispatches, {} barriers",
            report.label,
            report.dispatches,
            report.barriers.len()
        );
        Ok(report)
    }

    /// Run `create` inside a validation + out-of-memory error scope
    pub(crate) fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        (value, validation.or(out_of_memory))
    }
}
