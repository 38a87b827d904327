//! Compute kernel construction shared by every stage

use crate::error::{PipelineError, Result};

use super::context::GpuContext;

/// One compute pipeline and the layout of its single bind group
pub struct ComputeKernel {
    pub label: &'static str,
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

/// Everything needed to build a kernel
pub struct KernelDesc<'a> {
    pub label: &'static str,
    pub source: &'static str,
    pub entry_point: &'static str,
    pub entries: &'a [wgpu::BindGroupLayoutEntry],
    pub push_constant_bytes: u32,
}

impl ComputeKernel {
    /// Compile the shader and build the pipeline.
    ///
    /// Shader or layout errors come back as `KernelCreation`; they are never
    /// skipped.
    pub fn new(ctx: &GpuContext, desc: &KernelDesc<'_>) -> Result<Self> {
        let ((pipeline, bind_group_layout), error) = ctx.scoped(|device| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.into()),
            });

            let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.label),
                entries: desc.entries,
            });

            let mut push_constant_ranges = Vec::new();
            if desc.push_constant_bytes > 0 {
                push_constant_ranges.push(wgpu::PushConstantRange {
                    stages: wgpu::ShaderStages::COMPUTE,
                    range: 0..desc.push_constant_bytes,
                });
            }

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &push_constant_ranges,
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(desc.entry_point),
                compilation_options: Default::default(),
                cache: None,
            });

            (pipeline, bind_group_layout)
        });

        if let Some(error) = error {
            return Err(PipelineError::KernelCreation {
                label: desc.label.to_string(),
                message: error.to_string(),
            });
        }

        log::debug!("Built kernel {}", desc.label);
        Ok(Self {
            label: desc.label,
            pipeline,
            bind_group_layout,
        })
    }
}

/// Filterable float texture read through a sampler or `textureLoad`
pub fn sampled_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

pub fn storage_texture_entry(
    binding: u32,
    format: wgpu::TextureFormat,
    access: wgpu::StorageTextureAccess,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access,
            format,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

pub fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

pub fn storage_buffer_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bilinear clamp-to-edge sampler used by the pyramid kernels
pub fn linear_clamp_sampler(device: &wgpu::Device, label: &'static str) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}
